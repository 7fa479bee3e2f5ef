//! Protocol wire messages.
//!
//! Every message starts `version:u16 | type:u8`. The version is fixed;
//! anything else is rejected before type dispatch. Each message type owns
//! its `encode`/`decode` pair; decoding consumes the whole buffer and
//! fails on trailing bytes.

use keyloft_crypto::proofs::{DhProof, EcdhProof, PROOF_CHALLENGE_LEN};
use keyloft_crypto::ring::{RingSignature, RING_SIGNATURE_LEN};
use keyloft_crypto::{BigUint, EdwardsPoint};

use crate::codec::{Decoder, Encoder};
use crate::ensemble::PrekeyEnsemble;
use crate::error::ProtocolError;
use crate::profiles::{ClientProfile, PrekeyProfile};

/// The protocol version carried by every message.
pub const PROTOCOL_VERSION: u16 = 4;

/// Length of a message MAC.
pub const MAC_LEN: usize = 64;

/// Body text of [`NoPrekeyEnsembles`].
pub const NO_PREKEY_ENSEMBLES_MESSAGE: &str = "No Prekey Messages available for this identity";

/// Wire message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Failure = 0x05,
    Success = 0x06,
    Publication = 0x08,
    StorageInfoRequest = 0x09,
    StorageStatus = 0x0B,
    NoPrekeyEnsembles = 0x0E,
    PrekeyMessage = 0x0F,
    EnsembleRetrievalQuery = 0x10,
    EnsembleRetrieval = 0x13,
    Dake1 = 0x35,
    Dake2 = 0x36,
    Dake3 = 0x37,
}

impl MessageType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x05 => Some(Self::Failure),
            0x06 => Some(Self::Success),
            0x08 => Some(Self::Publication),
            0x09 => Some(Self::StorageInfoRequest),
            0x0B => Some(Self::StorageStatus),
            0x0E => Some(Self::NoPrekeyEnsembles),
            0x0F => Some(Self::PrekeyMessage),
            0x10 => Some(Self::EnsembleRetrievalQuery),
            0x13 => Some(Self::EnsembleRetrieval),
            0x35 => Some(Self::Dake1),
            0x36 => Some(Self::Dake2),
            0x37 => Some(Self::Dake3),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Read the version and type of a serialized message without consuming it.
pub fn peek_header(bytes: &[u8]) -> Result<(u16, MessageType), ProtocolError> {
    let mut dec = Decoder::new(bytes);
    let version = dec.read_u16()?;
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    let byte = dec.read_u8()?;
    let mtype = MessageType::from_byte(byte).ok_or(ProtocolError::UnknownMessageType(byte))?;
    Ok((version, mtype))
}

fn write_header(enc: &mut Encoder, mtype: MessageType) {
    enc.write_u16(PROTOCOL_VERSION).write_u8(mtype.as_byte());
}

fn read_header(dec: &mut Decoder<'_>, expected: MessageType) -> Result<(), ProtocolError> {
    let version = dec.read_u16()?;
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    let byte = dec.read_u8()?;
    if byte != expected.as_byte() {
        return Err(ProtocolError::UnknownMessageType(byte));
    }
    Ok(())
}

fn read_mac(dec: &mut Decoder<'_>) -> Result<[u8; MAC_LEN], ProtocolError> {
    let bytes = dec.read_bytes(MAC_LEN)?;
    let mut mac = [0u8; MAC_LEN];
    mac.copy_from_slice(&bytes);
    Ok(mac)
}

fn write_ring_signature(enc: &mut Encoder, sigma: &RingSignature) {
    enc.write_raw(&sigma.to_bytes());
}

fn read_ring_signature(dec: &mut Decoder<'_>) -> Result<RingSignature, ProtocolError> {
    Ok(RingSignature::from_bytes(&dec.read_bytes(RING_SIGNATURE_LEN)?)?)
}

fn write_ecdh_proof(enc: &mut Encoder, proof: &EcdhProof) {
    enc.write_raw(&proof.challenge).write_scalar(&proof.response);
}

fn read_ecdh_proof(dec: &mut Decoder<'_>) -> Result<EcdhProof, ProtocolError> {
    let mut challenge = [0u8; PROOF_CHALLENGE_LEN];
    challenge.copy_from_slice(&dec.read_bytes(PROOF_CHALLENGE_LEN)?);
    let response = dec.read_scalar()?;
    Ok(EcdhProof {
        challenge,
        response,
    })
}

fn write_dh_proof(enc: &mut Encoder, proof: &DhProof) {
    enc.write_raw(&proof.challenge).write_mpi(&proof.response);
}

fn read_dh_proof(dec: &mut Decoder<'_>) -> Result<DhProof, ProtocolError> {
    let mut challenge = [0u8; PROOF_CHALLENGE_LEN];
    challenge.copy_from_slice(&dec.read_bytes(PROOF_CHALLENGE_LEN)?);
    let response = dec.read_mpi()?;
    Ok(DhProof {
        challenge,
        response,
    })
}

/// First DAKE message, client to server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dake1 {
    pub client_instance_tag: u32,
    pub profile: ClientProfile,
    pub i: EdwardsPoint,
}

impl Dake1 {
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        write_header(&mut enc, MessageType::Dake1);
        enc.write_u32(self.client_instance_tag);
        self.profile.encode_to(&mut enc);
        enc.write_point(&self.i);
        enc.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut dec = Decoder::new(bytes);
        read_header(&mut dec, MessageType::Dake1)?;
        let client_instance_tag = dec.read_u32()?;
        let profile = ClientProfile::decode_from(&mut dec)?;
        let i = dec.read_point()?;
        dec.expect_end()?;
        Ok(Self {
            client_instance_tag,
            profile,
            i,
        })
    }
}

/// Second DAKE message, server to client. Carries the server's composite
/// identity (identity string + long-term key), fresh ephemeral point, and
/// the server's ring signature over the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dake2 {
    pub client_instance_tag: u32,
    pub server_identity: Vec<u8>,
    pub server_key: EdwardsPoint,
    pub s: EdwardsPoint,
    pub sigma: RingSignature,
}

impl Dake2 {
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        write_header(&mut enc, MessageType::Dake2);
        enc.write_u32(self.client_instance_tag)
            .write_data(&self.server_identity)
            .write_point(&self.server_key)
            .write_point(&self.s);
        write_ring_signature(&mut enc, &self.sigma);
        enc.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut dec = Decoder::new(bytes);
        read_header(&mut dec, MessageType::Dake2)?;
        let client_instance_tag = dec.read_u32()?;
        let server_identity = dec.read_data()?;
        let server_key = dec.read_point()?;
        let s = dec.read_point()?;
        let sigma = read_ring_signature(&mut dec)?;
        dec.expect_end()?;
        Ok(Self {
            client_instance_tag,
            server_identity,
            server_key,
            s,
            sigma,
        })
    }

    /// The composite-identity bytes bound into the DAKE transcript.
    pub fn composite_identity(&self) -> Vec<u8> {
        composite_identity(&self.server_identity, &self.server_key)
    }
}

/// Encode a server composite identity: identity string + long-term key.
pub fn composite_identity(identity: &[u8], server_key: &EdwardsPoint) -> Vec<u8> {
    let mut enc = Encoder::new();
    enc.write_data(identity).write_point(server_key);
    enc.finish()
}

/// Third DAKE message, client to server. The embedded message is a
/// serialized [`Publication`] or [`StorageInformationRequest`], MAC-keyed
/// by the DAKE-negotiated secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dake3 {
    pub client_instance_tag: u32,
    pub sigma: RingSignature,
    pub message: Vec<u8>,
}

impl Dake3 {
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        write_header(&mut enc, MessageType::Dake3);
        enc.write_u32(self.client_instance_tag);
        write_ring_signature(&mut enc, &self.sigma);
        enc.write_data(&self.message);
        enc.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut dec = Decoder::new(bytes);
        read_header(&mut dec, MessageType::Dake3)?;
        let client_instance_tag = dec.read_u32()?;
        let sigma = read_ring_signature(&mut dec)?;
        let message = dec.read_data()?;
        dec.expect_end()?;
        Ok(Self {
            client_instance_tag,
            sigma,
            message,
        })
    }
}

/// A single-use bundle of fresh ephemeral public values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrekeyMessage {
    pub id: u32,
    pub instance_tag: u32,
    pub y: EdwardsPoint,
    pub b: BigUint,
}

impl PrekeyMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        self.encode_to(&mut enc);
        enc.finish()
    }

    pub fn encode_to(&self, enc: &mut Encoder) {
        write_header(enc, MessageType::PrekeyMessage);
        enc.write_u32(self.id)
            .write_u32(self.instance_tag)
            .write_point(&self.y)
            .write_mpi(&self.b);
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut dec = Decoder::new(bytes);
        let msg = Self::decode_from(&mut dec)?;
        dec.expect_end()?;
        Ok(msg)
    }

    pub fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, ProtocolError> {
        read_header(dec, MessageType::PrekeyMessage)?;
        let id = dec.read_u32()?;
        let instance_tag = dec.read_u32()?;
        let y = dec.read_point()?;
        let b = dec.read_mpi()?;
        Ok(Self {
            id,
            instance_tag,
            y,
            b,
        })
    }

    /// Check the ephemeral values: Y on-curve and non-identity, B a
    /// nontrivial member of the prime-order subgroup.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        keyloft_crypto::keys::validate_point(&self.y)
            .map_err(ProtocolError::InvalidPrekeyMessage)?;
        keyloft_crypto::dh::validate_dh_element(&self.b)
            .map_err(ProtocolError::InvalidPrekeyMessage)?;
        Ok(())
    }
}

/// Publication of key material, embedded in DAKE3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub prekey_messages: Vec<PrekeyMessage>,
    pub client_profile: Option<ClientProfile>,
    pub prekey_profile: Option<PrekeyProfile>,
    /// Proof of knowledge for every prekey message's Y. Present iff
    /// messages are present.
    pub message_proof_ecdh: Option<EcdhProof>,
    /// Proof of knowledge for every prekey message's B. Present iff
    /// messages are present.
    pub message_proof_dh: Option<DhProof>,
    /// Proof of knowledge for the prekey profile's shared point. Present
    /// iff a prekey profile is present.
    pub shared_proof_ecdh: Option<EcdhProof>,
    pub mac: [u8; MAC_LEN],
}

impl Publication {
    /// Everything the MAC covers: the full encoding up to the MAC field.
    pub fn mac_input(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        self.encode_body(&mut enc);
        enc.finish()
    }

    fn encode_body(&self, enc: &mut Encoder) {
        write_header(enc, MessageType::Publication);
        enc.write_u8(u8::try_from(self.prekey_messages.len()).expect("at most 255 prekey messages"));
        for message in &self.prekey_messages {
            message.encode_to(enc);
        }
        enc.write_u8(u8::from(self.client_profile.is_some()));
        if let Some(profile) = &self.client_profile {
            profile.encode_to(enc);
        }
        enc.write_u8(u8::from(self.prekey_profile.is_some()));
        if let Some(profile) = &self.prekey_profile {
            profile.encode_to(enc);
        }
        if let Some(proof) = &self.message_proof_ecdh {
            write_ecdh_proof(enc, proof);
        }
        if let Some(proof) = &self.message_proof_dh {
            write_dh_proof(enc, proof);
        }
        if let Some(proof) = &self.shared_proof_ecdh {
            write_ecdh_proof(enc, proof);
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        self.encode_body(&mut enc);
        enc.write_raw(&self.mac);
        enc.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut dec = Decoder::new(bytes);
        read_header(&mut dec, MessageType::Publication)?;

        let count = dec.read_u8()? as usize;
        let mut prekey_messages = Vec::with_capacity(count);
        for _ in 0..count {
            prekey_messages.push(PrekeyMessage::decode_from(&mut dec)?);
        }

        let client_profile = if dec.read_u8()? == 1 {
            Some(ClientProfile::decode_from(&mut dec)?)
        } else {
            None
        };
        let prekey_profile = if dec.read_u8()? == 1 {
            Some(PrekeyProfile::decode_from(&mut dec)?)
        } else {
            None
        };

        let (message_proof_ecdh, message_proof_dh) = if count > 0 {
            (
                Some(read_ecdh_proof(&mut dec)?),
                Some(read_dh_proof(&mut dec)?),
            )
        } else {
            (None, None)
        };
        let shared_proof_ecdh = if prekey_profile.is_some() {
            Some(read_ecdh_proof(&mut dec)?)
        } else {
            None
        };

        let mac = read_mac(&mut dec)?;
        dec.expect_end()?;
        Ok(Self {
            prekey_messages,
            client_profile,
            prekey_profile,
            message_proof_ecdh,
            message_proof_dh,
            shared_proof_ecdh,
            mac,
        })
    }
}

/// Request for the number of stored prekey messages, embedded in DAKE3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageInformationRequest {
    pub mac: [u8; MAC_LEN],
}

impl StorageInformationRequest {
    pub fn mac_input() -> Vec<u8> {
        let mut enc = Encoder::new();
        write_header(&mut enc, MessageType::StorageInfoRequest);
        enc.finish()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        write_header(&mut enc, MessageType::StorageInfoRequest);
        enc.write_raw(&self.mac);
        enc.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut dec = Decoder::new(bytes);
        read_header(&mut dec, MessageType::StorageInfoRequest)?;
        let mac = read_mac(&mut dec)?;
        dec.expect_end()?;
        Ok(Self { mac })
    }
}

/// Reply to a storage information request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStatus {
    pub client_instance_tag: u32,
    pub number: u32,
    pub mac: [u8; MAC_LEN],
}

impl StorageStatus {
    pub fn mac_input(client_instance_tag: u32, number: u32) -> Vec<u8> {
        let mut enc = Encoder::new();
        write_header(&mut enc, MessageType::StorageStatus);
        enc.write_u32(client_instance_tag).write_u32(number);
        enc.finish()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        write_header(&mut enc, MessageType::StorageStatus);
        enc.write_u32(self.client_instance_tag)
            .write_u32(self.number)
            .write_raw(&self.mac);
        enc.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut dec = Decoder::new(bytes);
        read_header(&mut dec, MessageType::StorageStatus)?;
        let client_instance_tag = dec.read_u32()?;
        let number = dec.read_u32()?;
        let mac = read_mac(&mut dec)?;
        dec.expect_end()?;
        Ok(Self {
            client_instance_tag,
            number,
            mac,
        })
    }
}

/// Positive acknowledgement of a publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Success {
    pub client_instance_tag: u32,
    pub mac: [u8; MAC_LEN],
}

impl Success {
    pub fn mac_input(client_instance_tag: u32) -> Vec<u8> {
        let mut enc = Encoder::new();
        write_header(&mut enc, MessageType::Success);
        enc.write_u32(client_instance_tag);
        enc.finish()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        write_header(&mut enc, MessageType::Success);
        enc.write_u32(self.client_instance_tag).write_raw(&self.mac);
        enc.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut dec = Decoder::new(bytes);
        read_header(&mut dec, MessageType::Success)?;
        let client_instance_tag = dec.read_u32()?;
        let mac = read_mac(&mut dec)?;
        dec.expect_end()?;
        Ok(Self {
            client_instance_tag,
            mac,
        })
    }
}

/// Negative acknowledgement of a publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub client_instance_tag: u32,
    pub mac: [u8; MAC_LEN],
}

impl Failure {
    pub fn mac_input(client_instance_tag: u32) -> Vec<u8> {
        let mut enc = Encoder::new();
        write_header(&mut enc, MessageType::Failure);
        enc.write_u32(client_instance_tag);
        enc.finish()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        write_header(&mut enc, MessageType::Failure);
        enc.write_u32(self.client_instance_tag).write_raw(&self.mac);
        enc.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut dec = Decoder::new(bytes);
        read_header(&mut dec, MessageType::Failure)?;
        let client_instance_tag = dec.read_u32()?;
        let mac = read_mac(&mut dec)?;
        dec.expect_end()?;
        Ok(Self {
            client_instance_tag,
            mac,
        })
    }
}

/// Unauthenticated query for another party's prekey ensembles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsembleRetrievalQuery {
    pub instance_tag: u32,
    pub identity: String,
    pub versions: String,
}

impl EnsembleRetrievalQuery {
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        write_header(&mut enc, MessageType::EnsembleRetrievalQuery);
        enc.write_u32(self.instance_tag)
            .write_data(self.identity.as_bytes())
            .write_data(self.versions.as_bytes());
        enc.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut dec = Decoder::new(bytes);
        read_header(&mut dec, MessageType::EnsembleRetrievalQuery)?;
        let instance_tag = dec.read_u32()?;
        let identity =
            String::from_utf8(dec.read_data()?).map_err(|_| ProtocolError::InvalidUtf8)?;
        let versions =
            String::from_utf8(dec.read_data()?).map_err(|_| ProtocolError::InvalidUtf8)?;
        dec.expect_end()?;
        Ok(Self {
            instance_tag,
            identity,
            versions,
        })
    }
}

/// Reply carrying one ensemble per instance tag that had material stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsembleRetrieval {
    pub instance_tag: u32,
    pub ensembles: Vec<PrekeyEnsemble>,
}

impl EnsembleRetrieval {
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        write_header(&mut enc, MessageType::EnsembleRetrieval);
        enc.write_u32(self.instance_tag);
        enc.write_u8(u8::try_from(self.ensembles.len()).expect("at most 255 ensembles"));
        for ensemble in &self.ensembles {
            ensemble.encode_to(&mut enc);
        }
        enc.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut dec = Decoder::new(bytes);
        read_header(&mut dec, MessageType::EnsembleRetrieval)?;
        let instance_tag = dec.read_u32()?;
        let count = dec.read_u8()? as usize;
        let mut ensembles = Vec::with_capacity(count);
        for _ in 0..count {
            ensembles.push(PrekeyEnsemble::decode_from(&mut dec)?);
        }
        dec.expect_end()?;
        Ok(Self {
            instance_tag,
            ensembles,
        })
    }
}

/// Reply when no ensembles are stored for the queried identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoPrekeyEnsembles {
    pub instance_tag: u32,
    pub message: String,
}

impl NoPrekeyEnsembles {
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        write_header(&mut enc, MessageType::NoPrekeyEnsembles);
        enc.write_u32(self.instance_tag)
            .write_data(self.message.as_bytes());
        enc.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut dec = Decoder::new(bytes);
        read_header(&mut dec, MessageType::NoPrekeyEnsembles)?;
        let instance_tag = dec.read_u32()?;
        let message =
            String::from_utf8(dec.read_data()?).map_err(|_| ProtocolError::InvalidUtf8)?;
        dec.expect_end()?;
        Ok(Self {
            instance_tag,
            message,
        })
    }
}
