//! Profile self-signatures.
//!
//! Schnorr signatures over Ed448 with a deterministic nonce derived from
//! the signer's seed, so signing never consumes external randomness.
//! Wire form is 113 bytes: the 57-byte commitment point followed by the
//! 56-byte response scalar.

use ed448_goldilocks_plus::elliptic_curve::Group;
use ed448_goldilocks_plus::{EdwardsPoint, Scalar};

use crate::error::CryptoError;
use crate::kdf::{hash_to_scalar, UsageId};
use crate::keys::{decode_point, decode_scalar, encode_point, encode_scalar, Keypair, POINT_LEN, SCALAR_LEN};

/// Length of an encoded signature.
pub const SIGNATURE_LEN: usize = POINT_LEN + SCALAR_LEN;

/// A Schnorr signature `(R, s)` with `s·G = R + c·A`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    r: EdwardsPoint,
    s: Scalar,
}

impl Signature {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = encode_point(&self.r);
        out.extend_from_slice(&encode_scalar(&self.s));
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != SIGNATURE_LEN {
            return Err(CryptoError::InvalidSignature);
        }
        let r = decode_point(&bytes[..POINT_LEN])?;
        let s = decode_scalar(&bytes[POINT_LEN..])?;
        Ok(Self { r, s })
    }
}

/// Sign a message with the keypair's secret scalar.
pub fn sign(keypair: &Keypair, message: &[u8]) -> Signature {
    let nonce = hash_to_scalar(UsageId::SignatureNonce, &[keypair.sym(), message]);
    let r = nonce * EdwardsPoint::generator();
    let c = challenge(&r, &keypair.public(), message);
    let s = nonce + c * keypair.secret();
    Signature { r, s }
}

/// Verify a signature against a public key.
pub fn verify(public: &EdwardsPoint, message: &[u8], signature: &Signature) -> bool {
    let c = challenge(&signature.r, public, message);
    signature.s * EdwardsPoint::generator() == signature.r + c * *public
}

fn challenge(r: &EdwardsPoint, public: &EdwardsPoint, message: &[u8]) -> Scalar {
    hash_to_scalar(
        UsageId::SignatureChallenge,
        &[&encode_point(r), &encode_point(public), message],
    )
}
