use keyloft_crypto::CryptoError;
use thiserror::Error;

/// Why a profile failed validation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProfileFault {
    #[error("instance tag mismatch")]
    WrongInstanceTag,

    #[error("bad self-signature")]
    BadSignature,

    #[error("expired")]
    Expired,

    #[error("protocol version not supported")]
    VersionUnsupported,

    #[error("degenerate shared-prekey point")]
    DegenerateSharedPrekey,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("message missing terminator")]
    MissingTerminator,

    #[error("corrupt base64 payload")]
    InvalidBase64,

    #[error("text field is not valid UTF-8")]
    InvalidUtf8,

    #[error("malformed fragment header: {0}")]
    MalformedFragment(&'static str),

    #[error("fragment index or total out of range")]
    FragmentOutOfRange,

    #[error("fragment total disagrees with existing context")]
    FragmentTotalMismatch,

    #[error("truncated message: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("trailing bytes after message end")]
    TrailingBytes,

    #[error("unknown message type 0x{0:02x}")]
    UnknownMessageType(u8),

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),

    #[error("invalid client profile: {0}")]
    InvalidClientProfile(ProfileFault),

    #[error("invalid prekey profile: {0}")]
    InvalidPrekeyProfile(ProfileFault),

    #[error("invalid prekey message: {0}")]
    InvalidPrekeyMessage(CryptoError),

    #[error("ensemble parts carry different instance tags")]
    EnsembleTagMismatch,

    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),
}
