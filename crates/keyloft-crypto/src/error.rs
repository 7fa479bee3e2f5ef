use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid point encoding")]
    InvalidPoint,

    #[error("point is the identity element")]
    IdentityPoint,

    #[error("invalid scalar encoding")]
    InvalidScalar,

    #[error("invalid signature encoding")]
    InvalidSignature,

    #[error("group element outside the valid range")]
    DhElementOutOfRange,

    #[error("group element not in the prime-order subgroup")]
    DhElementNotInSubgroup,

    #[error("zero residue has no modular inverse")]
    NoModularInverse,

    /// Invariant violation: ring signing was invoked with a key that does
    /// not occupy exactly one ring slot. This signals a logic error in the
    /// caller, not attacker input.
    #[error("signer key does not occupy exactly one ring slot")]
    SignerNotInRing,

    /// Invariant violation: a batched knowledge proof over zero values.
    #[error("knowledge proof requires at least one keypair")]
    EmptyProofBatch,
}
