//! Protocol engine.
//!
//! Top-level entry point for every transport message: reassembles
//! fragments, decodes the envelope, consults the admission policy, runs
//! the DAKE state machine or the retrieval path, and encodes (and
//! potentially fragments) the response. All capabilities — storage,
//! admission policy, randomness — are injected at construction; a failed
//! step produces a typed error and no reply.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use keyloft_crypto::kdf::{kdf, kdf_64, UsageId};
use keyloft_crypto::keys::validate_point;
use keyloft_crypto::proofs::{verify_dh_proof, verify_ecdh_proof};
use keyloft_crypto::{ring, BigUint, EdwardsPoint, Keypair};
use keyloft_protocol::envelope::{decode_envelope, encode_envelope};
use keyloft_protocol::fragmentation::{potentially_fragment, Assembler};
use keyloft_protocol::messages::{
    composite_identity, peek_header, Dake1, Dake2, Dake3, EnsembleRetrieval,
    EnsembleRetrievalQuery, MessageType, NoPrekeyEnsembles, Publication, StorageInformationRequest,
    StorageStatus, Success, NO_PREKEY_ENSEMBLES_MESSAGE,
};
use keyloft_protocol::ClientProfile;
use parking_lot::Mutex;
use rand::{CryptoRng, RngCore};
use subtle::ConstantTimeEq;

use crate::dake::{derive_mac_key, transcript, SIDE_INITIATOR, SIDE_RECEIVER};
use crate::error::ServerError;
use crate::restrictor::Restrictor;
use crate::session::{Session, SessionManager};
use crate::storage::Storage;

/// Randomness capability: any cryptographically secure source.
pub trait SecureRng: RngCore + CryptoRng + Send {}
impl<T: RngCore + CryptoRng + Send> SecureRng for T {}

/// Engine construction parameters that are configuration, not state.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Server identity string, bound into the composite identity.
    pub identity: String,
    /// Context value bound into DAKE transcripts (network binding data).
    pub phi: Vec<u8>,
    /// Fragment prefix on the wire.
    pub fragment_prefix: String,
    /// Maximum transport payload length; 0 disables fragmentation.
    pub max_fragment_len: usize,
    /// Instance tag the server stamps on outgoing fragments.
    pub instance_tag: u32,
}

pub struct Engine {
    options: EngineOptions,
    keypair: Keypair,
    sessions: SessionManager,
    assembler: Assembler,
    storage: Box<dyn Storage>,
    restrictor: Box<dyn Restrictor>,
    rng: Mutex<Box<dyn SecureRng>>,
}

impl Engine {
    pub fn new(
        options: EngineOptions,
        keypair: Keypair,
        storage: Box<dyn Storage>,
        restrictor: Box<dyn Restrictor>,
        rng: Box<dyn SecureRng>,
    ) -> Self {
        let assembler = Assembler::new(&options.fragment_prefix);
        Self {
            options,
            keypair,
            sessions: SessionManager::new(),
            assembler,
            storage,
            restrictor,
            rng: Mutex::new(rng),
        }
    }

    /// The server's long-term public key fingerprint, for operator display.
    pub fn fingerprint(&self) -> String {
        hex::encode(self.keypair.fingerprint())
    }

    /// Whether a DAKE session is live for the sender (test and operator
    /// introspection).
    pub fn has_session(&self, identity: &str) -> bool {
        self.sessions.has(identity)
    }

    /// Handle one transport message from `from`. Returns the encoded
    /// response pieces; an empty vector means nothing to send yet (e.g. a
    /// fragment that did not complete a message).
    pub fn handle(&self, from: &str, raw: &str) -> Result<Vec<String>, ServerError> {
        if self.restrictor.should_reject(from) {
            return Err(ServerError::Rejected);
        }

        let complete = if self.assembler.is_fragment(raw) {
            match self.assembler.new_fragment_received(from, raw)? {
                Some(message) => message,
                None => return Ok(vec![]),
            }
        } else {
            raw.to_string()
        };

        let binary = decode_envelope(&complete)?;
        let (_, mtype) = peek_header(&binary)?;
        tracing::debug!(%from, ?mtype, "dispatching message");

        let (response, receiver_tag) = match mtype {
            MessageType::Dake1 => self.handle_dake1(from, &binary)?,
            MessageType::Dake3 => self.handle_dake3(from, &binary)?,
            MessageType::EnsembleRetrievalQuery => self.handle_retrieval(&binary)?,
            other => return Err(ServerError::UnexpectedMessage(other.as_byte())),
        };

        let envelope = encode_envelope(&response);
        let mut rng = self.rng.lock();
        Ok(potentially_fragment(
            &envelope,
            self.options.max_fragment_len,
            self.options.instance_tag,
            receiver_tag,
            &self.options.fragment_prefix,
            &mut **rng,
        ))
    }

    /// Periodic expiry sweep over sessions, fragment contexts, and
    /// storage. Timeouts are advisory policies applied here, not
    /// preemption of in-flight work.
    pub fn cleanup(
        &self,
        session_timeout: Duration,
        fragment_timeout: Duration,
    ) -> Result<(), ServerError> {
        self.sessions.cleanup(session_timeout);
        self.assembler.cleanup(fragment_timeout);
        self.storage.cleanup(now_unix())
    }

    fn handle_dake1(&self, from: &str, binary: &[u8]) -> Result<(Vec<u8>, u32), ServerError> {
        let msg = Dake1::decode(binary)?;
        msg.profile.validate(msg.client_instance_tag, now_unix())?;
        validate_point(&msg.i)?;

        let ephemeral = {
            let mut rng = self.rng.lock();
            Keypair::generate(&mut **rng)
        };

        let ci = composite_identity(self.options.identity.as_bytes(), &self.keypair.public());
        let t = transcript(
            SIDE_INITIATOR,
            &msg.profile,
            &ci,
            &msg.i,
            &ephemeral.public(),
            &self.options.phi,
        );
        let sigma = {
            let mut rng = self.rng.lock();
            ring::generate(
                &mut **rng,
                &self.keypair,
                &msg.profile.public_key,
                &self.keypair.public(),
                &msg.i,
                &t,
            )?
        };

        let mac_key = derive_mac_key(&ephemeral.ecdh(&msg.i));
        let reply = Dake2 {
            client_instance_tag: msg.client_instance_tag,
            server_identity: self.options.identity.as_bytes().to_vec(),
            server_key: self.keypair.public(),
            s: ephemeral.public(),
            sigma,
        };

        // A fresh DAKE1 replaces any incomplete session for this sender.
        self.sessions.with_session(from, |session| {
            session.instance_tag = msg.client_instance_tag;
            session.ephemeral = Some(ephemeral.clone());
            session.their_ephemeral = Some(msg.i);
            session.profile = Some(msg.profile.clone());
            session.mac_key = Some(mac_key);
        });

        Ok((reply.encode(), msg.client_instance_tag))
    }

    fn handle_dake3(&self, from: &str, binary: &[u8]) -> Result<(Vec<u8>, u32), ServerError> {
        let msg = Dake3::decode(binary)?;
        let session = self.sessions.snapshot(from).ok_or(ServerError::NoSession)?;
        let (Some(ephemeral), Some(their_ephemeral), Some(profile), Some(mac_key)) = (
            session.ephemeral.clone(),
            session.their_ephemeral,
            session.profile.clone(),
            session.mac_key,
        ) else {
            return Err(ServerError::NoSession);
        };

        if msg.client_instance_tag != session.instance_tag {
            return Err(ServerError::InstanceTagMismatch);
        }

        let ci = composite_identity(self.options.identity.as_bytes(), &self.keypair.public());
        let t = transcript(
            SIDE_RECEIVER,
            &profile,
            &ci,
            &their_ephemeral,
            &ephemeral.public(),
            &self.options.phi,
        );
        if !ring::verify(
            &profile.public_key,
            &self.keypair.public(),
            &ephemeral.public(),
            &t,
            &msg.sigma,
        ) {
            return Err(ServerError::InvalidRingSignature);
        }

        let (_, inner_type) = peek_header(&msg.message)?;
        let response = match inner_type {
            MessageType::StorageInfoRequest => {
                self.handle_storage_info(from, &session, &msg.message, &mac_key)?
            }
            MessageType::Publication => {
                self.handle_publication(from, &session, &profile, &msg.message, &mac_key)?
            }
            other => return Err(ServerError::UnexpectedMessage(other.as_byte())),
        };

        // One DAKE cycle per session.
        self.sessions.complete(from);
        Ok((response, session.instance_tag))
    }

    fn handle_storage_info(
        &self,
        from: &str,
        session: &Session,
        inner: &[u8],
        mac_key: &[u8; 64],
    ) -> Result<Vec<u8>, ServerError> {
        let request = StorageInformationRequest::decode(inner)?;
        let expected = kdf_64(
            UsageId::StorageInfoMac,
            &[mac_key, &StorageInformationRequest::mac_input()],
        );
        if !bool::from(expected.ct_eq(&request.mac)) {
            return Err(ServerError::InvalidMac);
        }

        let number = self.storage.number_stored(from, session.instance_tag)?;
        let mac = kdf_64(
            UsageId::StatusMac,
            &[
                mac_key,
                &StorageStatus::mac_input(session.instance_tag, number),
            ],
        );
        Ok(StorageStatus {
            client_instance_tag: session.instance_tag,
            number,
            mac,
        }
        .encode())
    }

    fn handle_publication(
        &self,
        from: &str,
        session: &Session,
        session_profile: &ClientProfile,
        inner: &[u8],
        mac_key: &[u8; 64],
    ) -> Result<Vec<u8>, ServerError> {
        let publication = Publication::decode(inner)?;
        let expected = kdf_64(UsageId::PublicationMac, &[mac_key, &publication.mac_input()]);
        if !bool::from(expected.ct_eq(&publication.mac)) {
            return Err(ServerError::InvalidMac);
        }

        let now = now_unix();
        let tag = session.instance_tag;

        if let Some(profile) = &publication.client_profile {
            profile.validate(tag, now)?;
        }
        let signer = publication
            .client_profile
            .as_ref()
            .map_or(session_profile.public_key, |profile| profile.public_key);
        if let Some(profile) = &publication.prekey_profile {
            profile.validate(tag, now, &signer)?;
        }
        for message in &publication.prekey_messages {
            if message.instance_tag != tag {
                return Err(ServerError::InstanceTagMismatch);
            }
            message.validate()?;
        }

        // Proofs are bound to this DAKE run through the MAC key.
        let context = kdf(UsageId::ProofContext, 64, &[mac_key]);
        if !publication.prekey_messages.is_empty() {
            let points: Vec<EdwardsPoint> =
                publication.prekey_messages.iter().map(|m| m.y).collect();
            let proof = publication
                .message_proof_ecdh
                .as_ref()
                .ok_or(ServerError::InvalidProof)?;
            if !verify_ecdh_proof(&points, &context, UsageId::ProofMessageEcdh, proof) {
                return Err(ServerError::InvalidProof);
            }

            let elements: Vec<BigUint> = publication
                .prekey_messages
                .iter()
                .map(|m| m.b.clone())
                .collect();
            let proof = publication
                .message_proof_dh
                .as_ref()
                .ok_or(ServerError::InvalidProof)?;
            if !verify_dh_proof(&elements, &context, UsageId::ProofMessageDh, proof) {
                return Err(ServerError::InvalidProof);
            }
        }
        if let Some(profile) = &publication.prekey_profile {
            let proof = publication
                .shared_proof_ecdh
                .as_ref()
                .ok_or(ServerError::InvalidProof)?;
            if !verify_ecdh_proof(
                &[profile.shared_prekey],
                &context,
                UsageId::ProofSharedEcdh,
                proof,
            ) {
                return Err(ServerError::InvalidProof);
            }
        }

        // Everything verified; commit to storage. The session's validated
        // profile stands in when the publication carries none, so stored
        // material always has a profile to build ensembles from.
        let stored_profile = publication.client_profile.as_ref().unwrap_or(session_profile);
        self.storage.store_client_profile(from, stored_profile)?;
        if let Some(profile) = &publication.prekey_profile {
            self.storage
                .store_prekey_profiles(from, std::slice::from_ref(profile))?;
        }
        if !publication.prekey_messages.is_empty() {
            self.storage
                .store_prekey_messages(from, &publication.prekey_messages)?;
        }
        tracing::info!(
            %from,
            messages = publication.prekey_messages.len(),
            "stored publication"
        );

        let mac = kdf_64(UsageId::SuccessMac, &[mac_key, &Success::mac_input(tag)]);
        Ok(Success {
            client_instance_tag: tag,
            mac,
        }
        .encode())
    }

    fn handle_retrieval(&self, binary: &[u8]) -> Result<(Vec<u8>, u32), ServerError> {
        let query = EnsembleRetrievalQuery::decode(binary)?;
        if !query.versions.contains('4') {
            return Err(ServerError::UnsupportedQueryVersions);
        }

        let ensembles = self.storage.retrieve_for(&query.identity)?;
        if ensembles.is_empty() {
            let reply = NoPrekeyEnsembles {
                instance_tag: query.instance_tag,
                message: NO_PREKEY_ENSEMBLES_MESSAGE.to_string(),
            };
            return Ok((reply.encode(), query.instance_tag));
        }

        let reply = EnsembleRetrieval {
            instance_tag: query.instance_tag,
            ensembles,
        };
        Ok((reply.encode(), query.instance_tag))
    }
}

/// Seconds since the Unix epoch.
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
