use keyloft_crypto::CryptoError;
use keyloft_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServerError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("no active session for sender")]
    NoSession,

    #[error("instance tag mismatch")]
    InstanceTagMismatch,

    #[error("invalid ring signature")]
    InvalidRingSignature,

    #[error("invalid message authentication code")]
    InvalidMac,

    #[error("invalid knowledge proof")]
    InvalidProof,

    #[error("sender rejected by policy")]
    Rejected,

    #[error("unexpected message type 0x{0:02x}")]
    UnexpectedMessage(u8),

    #[error("query does not include a supported protocol version")]
    UnsupportedQueryVersions,

    #[error("storage error: {0}")]
    Storage(String),
}
