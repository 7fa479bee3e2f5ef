pub mod dh;
pub mod eddsa;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod proofs;
pub mod ring;

pub use error::CryptoError;
pub use kdf::UsageId;
pub use keys::Keypair;
pub use ring::RingSignature;

// Re-exported so downstream crates use the exact curve and bignum types
// this crate was built against.
pub use ed448_goldilocks_plus::{EdwardsPoint, Scalar};
pub use num_bigint::BigUint;
