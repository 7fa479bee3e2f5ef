//! Domain-separated key derivation.
//!
//! Every derivation in the protocol goes through one SHAKE-256 XOF seeded
//! with a fixed protocol prefix and a usage label byte. Reusing a label
//! across semantically different derivations breaks the protocol, so the
//! labels are a closed enum rather than loose integers.

use ed448_goldilocks_plus::Scalar;
use sha3::{
    digest::{ExtendableOutput, Update, XofReader},
    Shake256,
};

/// Fixed domain prefix mixed into every derivation.
pub const KDF_PREFIX: &[u8] = b"OTR-Prekey-Server";

/// Closed enumeration of every domain-separation label in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UsageId {
    /// Public-key fingerprints.
    Fingerprint = 0x00,
    /// Seed-to-secret-scalar digest during keypair derivation.
    SecretScalar = 0x01,
    /// DAKE shared secret from the raw ECDH point.
    SharedSecret = 0x02,
    /// Transcript hash of the client profile, server-signing direction.
    InitiatorClientProfile = 0x03,
    /// Transcript hash of the composite identity, server-signing direction.
    InitiatorCompositeIdentity = 0x04,
    /// Transcript hash of phi, server-signing direction.
    InitiatorPhi = 0x05,
    /// Transcript hash of the client profile, client-signing direction.
    ReceiverClientProfile = 0x06,
    /// Transcript hash of the composite identity, client-signing direction.
    ReceiverCompositeIdentity = 0x07,
    /// Transcript hash of phi, client-signing direction.
    ReceiverPhi = 0x08,
    /// Ring-signature challenge.
    Auth = 0x09,
    /// MAC key from the DAKE shared secret.
    PreMacKey = 0x0A,
    /// Storage information request MAC.
    StorageInfoMac = 0x0B,
    /// Storage status message MAC.
    StatusMac = 0x0C,
    /// Success message MAC.
    SuccessMac = 0x0D,
    /// Failure message MAC.
    FailureMac = 0x0E,
    /// Publication message MAC.
    PublicationMac = 0x0F,
    /// Challenge for the ECDH proof over prekey-message points.
    ProofMessageEcdh = 0x10,
    /// Challenge for the DH proof over prekey-message group elements.
    ProofMessageDh = 0x11,
    /// Challenge for the ECDH proof over the shared-prekey point.
    ProofSharedEcdh = 0x12,
    /// Per-value expansion shares inside a batched proof.
    ProofExpansion = 0x13,
    /// Deterministic signature nonce.
    SignatureNonce = 0x14,
    /// Signature challenge.
    SignatureChallenge = 0x15,
    /// Context value binding publication proofs to one DAKE run.
    ProofContext = 0x16,
}

/// Derive `out_len` bytes for the given usage from the concatenated segments.
pub fn kdf(usage: UsageId, out_len: usize, segments: &[&[u8]]) -> Vec<u8> {
    let mut hasher = Shake256::default();
    hasher.update(KDF_PREFIX);
    hasher.update(&[usage as u8]);
    for segment in segments {
        hasher.update(segment);
    }
    let mut out = vec![0u8; out_len];
    hasher.finalize_xof().read(&mut out);
    out
}

/// Derive a fixed 64-byte output (MAC keys and MACs).
pub fn kdf_64(usage: UsageId, segments: &[&[u8]]) -> [u8; 64] {
    let mut out = [0u8; 64];
    out.copy_from_slice(&kdf(usage, 64, segments));
    out
}

/// Derive an Ed448 scalar: 56 KDF bytes reduced into the group order.
pub fn hash_to_scalar(usage: UsageId, segments: &[&[u8]]) -> Scalar {
    let bytes = kdf(usage, 56, segments);
    let mut arr = [0u8; 56];
    arr.copy_from_slice(&bytes);
    Scalar::from_bytes(&arr)
}
