//! Ed448 key material.
//!
//! Servers and clients share one keypair representation: a 57-byte
//! symmetric seed, the clamped secret scalar derived from it, and the
//! public point. The secret scalar is never constructed from arbitrary
//! scalar input — always from the seed digest.

use ed448_goldilocks_plus::elliptic_curve::Group;
use ed448_goldilocks_plus::{EdwardsPoint, Scalar};
use rand::{CryptoRng, RngCore};
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::kdf::{kdf, UsageId};

/// Length of the symmetric seed a keypair is derived from.
pub const SYM_KEY_LEN: usize = 57;
/// Length of a compressed Ed448 point on the wire.
pub const POINT_LEN: usize = 57;
/// Length of an Ed448 scalar on the wire.
pub const SCALAR_LEN: usize = 56;
/// Length of a public-key fingerprint.
pub const FINGERPRINT_LEN: usize = 56;

/// An Ed448 keypair.
///
/// The seed is the only long-lived secret; scalar and point are cached
/// derivations of it. The seed is wiped on drop.
#[derive(Clone)]
pub struct Keypair {
    sym: [u8; SYM_KEY_LEN],
    secret: Scalar,
    public: EdwardsPoint,
}

impl Keypair {
    /// Generate a fresh keypair from the given randomness source.
    pub fn generate<R: RngCore + CryptoRng + ?Sized>(rng: &mut R) -> Self {
        let mut sym = [0u8; SYM_KEY_LEN];
        rng.fill_bytes(&mut sym);
        Self::from_symmetric_key(sym)
    }

    /// Derive a keypair from a 57-byte symmetric seed.
    ///
    /// The seed is hashed to 57 bytes and clamped (two low bits cleared,
    /// top byte zeroed, bit 447 set) before reduction into a scalar.
    pub fn from_symmetric_key(sym: [u8; SYM_KEY_LEN]) -> Self {
        let digest = kdf(UsageId::SecretScalar, SYM_KEY_LEN, &[&sym]);
        let mut clamped = [0u8; SYM_KEY_LEN];
        clamped.copy_from_slice(&digest);
        clamped[0] &= 0xFC;
        clamped[56] = 0;
        clamped[55] |= 0x80;

        let mut scalar_bytes = [0u8; SCALAR_LEN];
        scalar_bytes.copy_from_slice(&clamped[..SCALAR_LEN]);
        let secret = Scalar::from_bytes(&scalar_bytes);
        let public = secret * EdwardsPoint::generator();

        clamped.zeroize();
        scalar_bytes.zeroize();

        Self {
            sym,
            secret,
            public,
        }
    }

    /// The public point of this keypair.
    pub fn public(&self) -> EdwardsPoint {
        self.public
    }

    /// The public point in its 57-byte wire encoding.
    pub fn public_bytes(&self) -> Vec<u8> {
        encode_point(&self.public)
    }

    /// Fingerprint of the public key.
    pub fn fingerprint(&self) -> [u8; FINGERPRINT_LEN] {
        fingerprint(&self.public)
    }

    /// Diffie-Hellman: our secret scalar times the peer's public point.
    pub fn ecdh(&self, peer: &EdwardsPoint) -> EdwardsPoint {
        self.secret * *peer
    }

    pub(crate) fn secret(&self) -> Scalar {
        self.secret
    }

    pub(crate) fn sym(&self) -> &[u8; SYM_KEY_LEN] {
        &self.sym
    }
}

impl Drop for Keypair {
    fn drop(&mut self) {
        self.sym.zeroize();
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("fingerprint", &hex::encode(self.fingerprint()))
            .finish()
    }
}

/// Encode a point into its 57-byte compressed wire form.
pub fn encode_point(p: &EdwardsPoint) -> Vec<u8> {
    p.compress().to_bytes().to_vec()
}

/// Decode a compressed point, rejecting wrong lengths and non-curve
/// encodings. The identity element is a valid encoding here; callers that
/// must reject it use [`validate_point`].
pub fn decode_point(bytes: &[u8]) -> Result<EdwardsPoint, CryptoError> {
    if bytes.len() != POINT_LEN {
        return Err(CryptoError::InvalidPoint);
    }
    let point: Option<EdwardsPoint> = EdwardsPoint::from_bytes(bytes.into()).into();
    point.ok_or(CryptoError::InvalidPoint)
}

/// Reject the identity element.
pub fn validate_point(p: &EdwardsPoint) -> Result<(), CryptoError> {
    if bool::from(p.is_identity()) {
        return Err(CryptoError::IdentityPoint);
    }
    Ok(())
}

/// Encode a scalar into its 56-byte wire form.
pub fn encode_scalar(s: &Scalar) -> Vec<u8> {
    s.to_bytes().to_vec()
}

/// Decode a 56-byte scalar, reducing into the group order.
pub fn decode_scalar(bytes: &[u8]) -> Result<Scalar, CryptoError> {
    if bytes.len() != SCALAR_LEN {
        return Err(CryptoError::InvalidScalar);
    }
    let mut arr = [0u8; SCALAR_LEN];
    arr.copy_from_slice(bytes);
    Ok(Scalar::from_bytes(&arr))
}

/// Fingerprint of a public key: a 56-byte digest of its encoded form.
pub fn fingerprint(p: &EdwardsPoint) -> [u8; FINGERPRINT_LEN] {
    let digest = kdf(UsageId::Fingerprint, FINGERPRINT_LEN, &[&encode_point(p)]);
    let mut out = [0u8; FINGERPRINT_LEN];
    out.copy_from_slice(&digest);
    out
}
