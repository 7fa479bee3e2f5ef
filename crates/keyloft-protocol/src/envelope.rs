//! Transport envelope.
//!
//! A serialized binary message travels as base64 terminated by a literal
//! `.`. Fragments carry their own prefix and are reassembled before the
//! envelope is decoded.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::ProtocolError;

/// Encode a binary message for transport.
pub fn encode_envelope(binary: &[u8]) -> String {
    format!("{}.", STANDARD.encode(binary))
}

/// Decode a transport envelope back into the binary message.
pub fn decode_envelope(message: &str) -> Result<Vec<u8>, ProtocolError> {
    if message.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    let body = message
        .strip_suffix('.')
        .ok_or(ProtocolError::MissingTerminator)?;
    STANDARD
        .decode(body)
        .map_err(|_| ProtocolError::InvalidBase64)
}
