//! Batched proofs of knowledge.
//!
//! A client publishing N public values proves knowledge of all N private
//! exponents with a single proof: one nonce commitment, one Fiat-Shamir
//! challenge, and one aggregated response folding every secret in with a
//! per-value expansion share derived from the challenge. Two structurally
//! identical variants: ECDH over Ed448 and DH over the MODP group.

use ed448_goldilocks_plus::elliptic_curve::Group;
use ed448_goldilocks_plus::subtle::ConstantTimeEq;
use ed448_goldilocks_plus::{EdwardsPoint, Scalar};
use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};

use crate::dh;
use crate::error::CryptoError;
use crate::kdf::{kdf, UsageId};
use crate::keys::{decode_scalar, encode_point, encode_scalar, Keypair, SCALAR_LEN};

/// Length of a proof challenge digest.
pub const PROOF_CHALLENGE_LEN: usize = 64;
/// Length of one per-value expansion share (352 bits).
pub const PROOF_SHARE_LEN: usize = 44;

/// Proof of knowledge of the discrete logs of a batch of Ed448 points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcdhProof {
    pub challenge: [u8; PROOF_CHALLENGE_LEN],
    pub response: Scalar,
}

/// Proof of knowledge of the exponents of a batch of MODP group elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhProof {
    pub challenge: [u8; PROOF_CHALLENGE_LEN],
    pub response: BigUint,
}

impl EcdhProof {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.challenge.to_vec();
        out.extend_from_slice(&encode_scalar(&self.response));
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != PROOF_CHALLENGE_LEN + SCALAR_LEN {
            return Err(CryptoError::InvalidSignature);
        }
        let mut challenge = [0u8; PROOF_CHALLENGE_LEN];
        challenge.copy_from_slice(&bytes[..PROOF_CHALLENGE_LEN]);
        let response = decode_scalar(&bytes[PROOF_CHALLENGE_LEN..])?;
        Ok(Self {
            challenge,
            response,
        })
    }
}

/// Expand the challenge into one scalar share per batched value.
fn ecdh_shares(challenge: &[u8; PROOF_CHALLENGE_LEN], n: usize) -> Vec<Scalar> {
    let raw = kdf(UsageId::ProofExpansion, PROOF_SHARE_LEN * n, &[challenge]);
    raw.chunks_exact(PROOF_SHARE_LEN)
        .map(|chunk| {
            let mut wide = [0u8; SCALAR_LEN];
            wide[..PROOF_SHARE_LEN].copy_from_slice(chunk);
            Scalar::from_bytes(&wide)
        })
        .collect()
}

fn dh_shares(challenge: &[u8; PROOF_CHALLENGE_LEN], n: usize) -> Vec<BigUint> {
    let raw = kdf(UsageId::ProofExpansion, PROOF_SHARE_LEN * n, &[challenge]);
    raw.chunks_exact(PROOF_SHARE_LEN)
        .map(BigUint::from_bytes_be)
        .collect()
}

fn ecdh_challenge(
    usage: UsageId,
    commitment: &EdwardsPoint,
    publics: &[EdwardsPoint],
    message: &[u8],
) -> [u8; PROOF_CHALLENGE_LEN] {
    let mut segments: Vec<Vec<u8>> = vec![encode_point(commitment)];
    segments.extend(publics.iter().map(encode_point));
    segments.push(message.to_vec());
    let refs: Vec<&[u8]> = segments.iter().map(Vec::as_slice).collect();
    let mut out = [0u8; PROOF_CHALLENGE_LEN];
    out.copy_from_slice(&kdf(usage, PROOF_CHALLENGE_LEN, &refs));
    out
}

fn dh_challenge(
    usage: UsageId,
    commitment: &BigUint,
    publics: &[BigUint],
    message: &[u8],
) -> [u8; PROOF_CHALLENGE_LEN] {
    let mut segments: Vec<Vec<u8>> = vec![commitment.to_bytes_be()];
    segments.extend(publics.iter().map(BigUint::to_bytes_be));
    segments.push(message.to_vec());
    let refs: Vec<&[u8]> = segments.iter().map(Vec::as_slice).collect();
    let mut out = [0u8; PROOF_CHALLENGE_LEN];
    out.copy_from_slice(&kdf(usage, PROOF_CHALLENGE_LEN, &refs));
    out
}

/// Prove knowledge of the secrets behind every keypair in the batch.
pub fn generate_ecdh_proof<R: RngCore + CryptoRng + ?Sized>(
    rng: &mut R,
    keypairs: &[&Keypair],
    message: &[u8],
    usage: UsageId,
) -> Result<EcdhProof, CryptoError> {
    if keypairs.is_empty() {
        return Err(CryptoError::EmptyProofBatch);
    }

    let nonce = Scalar::random(&mut *rng);
    let commitment = nonce * EdwardsPoint::generator();
    let publics: Vec<EdwardsPoint> = keypairs.iter().map(|kp| kp.public()).collect();
    let challenge = ecdh_challenge(usage, &commitment, &publics, message);

    let shares = ecdh_shares(&challenge, keypairs.len());
    let mut response = nonce;
    for (share, keypair) in shares.iter().zip(keypairs) {
        response = response + *share * keypair.secret();
    }

    Ok(EcdhProof {
        challenge,
        response,
    })
}

/// Verify an ECDH batch proof against the published points.
pub fn verify_ecdh_proof(
    publics: &[EdwardsPoint],
    message: &[u8],
    usage: UsageId,
    proof: &EcdhProof,
) -> bool {
    if publics.is_empty() {
        return false;
    }

    let shares = ecdh_shares(&proof.challenge, publics.len());
    let mut commitment = proof.response * EdwardsPoint::generator();
    for (share, public) in shares.iter().zip(publics) {
        commitment = commitment - *share * *public;
    }

    let expected = ecdh_challenge(usage, &commitment, publics, message);
    bool::from(expected.ct_eq(&proof.challenge))
}

/// Prove knowledge of the exponents behind every (secret, public) DH pair.
pub fn generate_dh_proof<R: RngCore + CryptoRng + ?Sized>(
    rng: &mut R,
    pairs: &[(BigUint, BigUint)],
    message: &[u8],
    usage: UsageId,
) -> Result<DhProof, CryptoError> {
    if pairs.is_empty() {
        return Err(CryptoError::EmptyProofBatch);
    }

    use num_bigint::RandBigInt;
    let q = dh::subgroup_order();
    let nonce = rng.gen_biguint_range(&BigUint::from(2u8), q);
    let commitment = dh::dh_exp(dh::generator(), &nonce);
    let publics: Vec<BigUint> = pairs.iter().map(|(_, public)| public.clone()).collect();
    let challenge = dh_challenge(usage, &commitment, &publics, message);

    let shares = dh_shares(&challenge, pairs.len());
    let mut response = nonce;
    for (share, (secret, _)) in shares.iter().zip(pairs) {
        response = (response + share * secret) % q;
    }

    Ok(DhProof {
        challenge,
        response,
    })
}

/// Verify a DH batch proof against the published group elements.
///
/// Reconstructs the commitment as `g^v · (Π pub_i^t_i)^-1 mod p`; the
/// inversion is Fermat, valid because the modulus is prime and the
/// product of validated group elements is nonzero.
pub fn verify_dh_proof(
    publics: &[BigUint],
    message: &[u8],
    usage: UsageId,
    proof: &DhProof,
) -> bool {
    if publics.is_empty() {
        return false;
    }

    let shares = dh_shares(&proof.challenge, publics.len());
    let mut aggregate = BigUint::from(1u8);
    for (share, public) in shares.iter().zip(publics) {
        aggregate = (aggregate * dh::dh_exp(public, share)) % dh::modulus();
    }
    let Ok(inverse) = dh::mod_inverse(&aggregate) else {
        return false;
    };
    let commitment = (dh::dh_exp(dh::generator(), &proof.response) * inverse) % dh::modulus();

    let expected = dh_challenge(usage, &commitment, publics, message);
    bool::from(expected.ct_eq(&proof.challenge))
}
