//! Prekey ensembles.
//!
//! The unit of retrieval: one client profile, one prekey profile, and one
//! single-use prekey message. Ensembles are assembled on demand by
//! storage and validated as a whole before they leave the server.

use crate::codec::{Decoder, Encoder};
use crate::error::ProtocolError;
use crate::messages::PrekeyMessage;
use crate::profiles::{ClientProfile, PrekeyProfile};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrekeyEnsemble {
    pub client_profile: ClientProfile,
    pub prekey_profile: PrekeyProfile,
    pub prekey_message: PrekeyMessage,
}

impl PrekeyEnsemble {
    /// Validate the ensemble as a unit: consistent instance tags, valid
    /// profiles, valid ephemeral values.
    pub fn validate(&self, now: u64) -> Result<(), ProtocolError> {
        let tag = self.client_profile.instance_tag;
        self.client_profile.validate(tag, now)?;
        self.prekey_profile
            .validate(tag, now, &self.client_profile.public_key)?;
        if self.prekey_message.instance_tag != tag {
            return Err(ProtocolError::EnsembleTagMismatch);
        }
        self.prekey_message.validate()
    }

    pub fn encode_to(&self, enc: &mut Encoder) {
        self.client_profile.encode_to(enc);
        self.prekey_profile.encode_to(enc);
        self.prekey_message.encode_to(enc);
    }

    pub fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, ProtocolError> {
        let client_profile = ClientProfile::decode_from(dec)?;
        let prekey_profile = PrekeyProfile::decode_from(dec)?;
        let prekey_message = PrekeyMessage::decode_from(dec)?;
        Ok(Self {
            client_profile,
            prekey_profile,
            prekey_message,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        self.encode_to(&mut enc);
        enc.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut dec = Decoder::new(bytes);
        let ensemble = Self::decode_from(&mut dec)?;
        dec.expect_end()?;
        Ok(ensemble)
    }
}
