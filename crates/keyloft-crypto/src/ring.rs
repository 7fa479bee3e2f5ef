//! 1-of-3 ring signatures.
//!
//! An Abe-Ohkubo-Suzuki style OR-proof over three candidate public keys:
//! the verifier learns that the signer holds the secret for one of the
//! three, not which one. Branch selection never branches on the signer's
//! position — commitments, challenges and responses for all three slots
//! are computed unconditionally and merged with constant-time selects on
//! scalars, so the signer's slot cannot leak through timing.

use ed448_goldilocks_plus::elliptic_curve::Group;
use ed448_goldilocks_plus::subtle::{ConditionallySelectable, ConstantTimeEq};
use ed448_goldilocks_plus::{EdwardsPoint, Scalar};
use rand::{CryptoRng, RngCore};

use crate::error::CryptoError;
use crate::kdf::{hash_to_scalar, UsageId};
use crate::keys::{decode_scalar, encode_point, encode_scalar, Keypair, SCALAR_LEN};

/// Length of an encoded ring signature: six 56-byte scalars.
pub const RING_SIGNATURE_LEN: usize = 6 * SCALAR_LEN;

/// Three (challenge, response) pairs, one per candidate key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingSignature {
    pub c1: Scalar,
    pub r1: Scalar,
    pub c2: Scalar,
    pub r2: Scalar,
    pub c3: Scalar,
    pub r3: Scalar,
}

impl RingSignature {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(RING_SIGNATURE_LEN);
        for scalar in [&self.c1, &self.r1, &self.c2, &self.r2, &self.c3, &self.r3] {
            out.extend_from_slice(&encode_scalar(scalar));
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != RING_SIGNATURE_LEN {
            return Err(CryptoError::InvalidSignature);
        }
        let mut parts = [Scalar::from_bytes(&[0u8; SCALAR_LEN]); 6];
        for (i, part) in parts.iter_mut().enumerate() {
            *part = decode_scalar(&bytes[i * SCALAR_LEN..(i + 1) * SCALAR_LEN])?;
        }
        Ok(Self {
            c1: parts[0],
            r1: parts[1],
            c2: parts[2],
            r2: parts[3],
            c3: parts[4],
            r3: parts[5],
        })
    }
}

/// Sign `message` with `keypair`, whose public key must occupy exactly one
/// of the three ring slots.
pub fn generate<R: RngCore + CryptoRng + ?Sized>(
    rng: &mut R,
    keypair: &Keypair,
    a1: &EdwardsPoint,
    a2: &EdwardsPoint,
    a3: &EdwardsPoint,
    message: &[u8],
) -> Result<RingSignature, CryptoError> {
    let public = encode_point(&keypair.public());
    let is1 = public.ct_eq(&encode_point(a1));
    let is2 = public.ct_eq(&encode_point(a2));
    let is3 = public.ct_eq(&encode_point(a3));

    if is1.unwrap_u8() + is2.unwrap_u8() + is3.unwrap_u8() != 1 {
        return Err(CryptoError::SignerNotInRing);
    }

    let nonce = Scalar::random(&mut *rng);
    let zero = Scalar::from_bytes(&[0u8; SCALAR_LEN]);

    // Simulated (challenge, response) pairs for every slot; the signer's
    // slot gets its real values only after the overall challenge is known.
    let c1f = Scalar::random(&mut *rng);
    let r1f = Scalar::random(&mut *rng);
    let c2f = Scalar::random(&mut *rng);
    let r2f = Scalar::random(&mut *rng);
    let c3f = Scalar::random(&mut *rng);
    let r3f = Scalar::random(&mut *rng);

    // Every commitment has the shape r·G + c·A; the real branch is the
    // pair (nonce, 0), which collapses it to nonce·G.
    let t1 = commitment(
        &Scalar::conditional_select(&r1f, &nonce, is1),
        &Scalar::conditional_select(&c1f, &zero, is1),
        a1,
    );
    let t2 = commitment(
        &Scalar::conditional_select(&r2f, &nonce, is2),
        &Scalar::conditional_select(&c2f, &zero, is2),
        a2,
    );
    let t3 = commitment(
        &Scalar::conditional_select(&r3f, &nonce, is3),
        &Scalar::conditional_select(&c3f, &zero, is3),
        a3,
    );

    let c = challenge(a1, a2, a3, &t1, &t2, &t3, message);

    // Real challenge for slot i is c minus the other two simulated
    // challenges; real response closes the commitment with the secret.
    let fake_sum = c1f + c2f + c3f;
    let secret = keypair.secret();

    let c1r = c - (fake_sum - c1f);
    let c2r = c - (fake_sum - c2f);
    let c3r = c - (fake_sum - c3f);
    let r1r = nonce - c1r * secret;
    let r2r = nonce - c2r * secret;
    let r3r = nonce - c3r * secret;

    Ok(RingSignature {
        c1: Scalar::conditional_select(&c1f, &c1r, is1),
        r1: Scalar::conditional_select(&r1f, &r1r, is1),
        c2: Scalar::conditional_select(&c2f, &c2r, is2),
        r2: Scalar::conditional_select(&r2f, &r2r, is2),
        c3: Scalar::conditional_select(&c3f, &c3r, is3),
        r3: Scalar::conditional_select(&r3f, &r3r, is3),
    })
}

/// Verify a ring signature against its three candidate keys.
pub fn verify(
    a1: &EdwardsPoint,
    a2: &EdwardsPoint,
    a3: &EdwardsPoint,
    message: &[u8],
    signature: &RingSignature,
) -> bool {
    let t1 = commitment(&signature.r1, &signature.c1, a1);
    let t2 = commitment(&signature.r2, &signature.c2, a2);
    let t3 = commitment(&signature.r3, &signature.c3, a3);
    let c = challenge(a1, a2, a3, &t1, &t2, &t3, message);
    c == signature.c1 + signature.c2 + signature.c3
}

fn commitment(r: &Scalar, c: &Scalar, a: &EdwardsPoint) -> EdwardsPoint {
    *r * EdwardsPoint::generator() + *c * *a
}

fn challenge(
    a1: &EdwardsPoint,
    a2: &EdwardsPoint,
    a3: &EdwardsPoint,
    t1: &EdwardsPoint,
    t2: &EdwardsPoint,
    t3: &EdwardsPoint,
    message: &[u8],
) -> Scalar {
    hash_to_scalar(
        UsageId::Auth,
        &[
            &encode_point(&EdwardsPoint::generator()),
            &encode_point(a1),
            &encode_point(a2),
            &encode_point(a3),
            &encode_point(t1),
            &encode_point(t2),
            &encode_point(t3),
            message,
        ],
    )
}
