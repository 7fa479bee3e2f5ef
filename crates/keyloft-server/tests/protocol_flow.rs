//! End-to-end protocol flows against the engine, with the client side
//! driven directly through the crypto and protocol crates and all
//! randomness fixture-seeded for reproducibility.

use std::sync::Arc;

use rand::{CryptoRng, RngCore};
use subtle::ConstantTimeEq;

use keyloft_crypto::kdf::{kdf, kdf_64, UsageId};
use keyloft_crypto::{dh, proofs, ring, Keypair};
use keyloft_protocol::envelope::{decode_envelope, encode_envelope};
use keyloft_protocol::fragmentation::{potentially_fragment, Assembler, DEFAULT_FRAGMENT_PREFIX};
use keyloft_protocol::messages::{
    Dake1, Dake2, Dake3, EnsembleRetrieval, EnsembleRetrievalQuery, NoPrekeyEnsembles,
    Publication, StorageInformationRequest, StorageStatus, Success, NO_PREKEY_ENSEMBLES_MESSAGE,
};
use keyloft_protocol::{ClientProfile, PrekeyProfile, ProfileFault, ProtocolError};
use keyloft_server::dake::{derive_mac_key, transcript, SIDE_RECEIVER};
use keyloft_server::{
    AcceptAll, DenyList, Engine, EngineOptions, MemoryStorage, ServerError, Storage,
};

const SERVER_IDENTITY: &str = "prekeys.example.org";
const PHI: &[u8] = b"tcp:prekeys.example.org:7676";
const CLIENT_IDENTITY: &str = "alice@example.org";
const CLIENT_TAG: u32 = 0x1234_5678;
const FAR_FUTURE: u64 = 4_102_444_800;

/// Deterministic xorshift RNG for fixture-seeded flows. Test-only.
struct FixtureRng(u64);

impl RngCore for FixtureRng {
    fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(8) {
            let bytes = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl CryptoRng for FixtureRng {}

fn test_engine(storage: Arc<MemoryStorage>, rng_seed: u64) -> Engine {
    let options = EngineOptions {
        identity: SERVER_IDENTITY.to_string(),
        phi: PHI.to_vec(),
        fragment_prefix: DEFAULT_FRAGMENT_PREFIX.to_string(),
        max_fragment_len: 0,
        instance_tag: 0x0000_0100,
    };
    let keypair = Keypair::from_symmetric_key([0x42; 57]);
    Engine::new(
        options,
        keypair,
        Box::new(SharedStorage(storage)),
        Box::new(AcceptAll),
        Box::new(FixtureRng(rng_seed)),
    )
}

/// Storage adapter sharing one `MemoryStorage` between the engine and the
/// test's own assertions.
struct SharedStorage(Arc<MemoryStorage>);

impl Storage for SharedStorage {
    fn store_client_profile(
        &self,
        identity: &str,
        profile: &ClientProfile,
    ) -> Result<(), ServerError> {
        self.0.store_client_profile(identity, profile)
    }

    fn store_prekey_profiles(
        &self,
        identity: &str,
        profiles: &[PrekeyProfile],
    ) -> Result<(), ServerError> {
        self.0.store_prekey_profiles(identity, profiles)
    }

    fn store_prekey_messages(
        &self,
        identity: &str,
        messages: &[keyloft_protocol::messages::PrekeyMessage],
    ) -> Result<(), ServerError> {
        self.0.store_prekey_messages(identity, messages)
    }

    fn number_stored(&self, identity: &str, instance_tag: u32) -> Result<u32, ServerError> {
        self.0.number_stored(identity, instance_tag)
    }

    fn retrieve_for(
        &self,
        identity: &str,
    ) -> Result<Vec<keyloft_protocol::PrekeyEnsemble>, ServerError> {
        self.0.retrieve_for(identity)
    }

    fn cleanup(&self, now: u64) -> Result<(), ServerError> {
        self.0.cleanup(now)
    }
}

struct TestClient {
    keypair: Keypair,
    profile: ClientProfile,
    ephemeral: Keypair,
    rng: FixtureRng,
}

impl TestClient {
    fn new(rng_seed: u64) -> Self {
        let keypair = Keypair::from_symmetric_key([0x01; 57]);
        let forger = Keypair::from_symmetric_key([0x02; 57]);
        let profile =
            ClientProfile::new_signed(&keypair, forger.public(), CLIENT_TAG, "4", FAR_FUTURE);
        let ephemeral = Keypair::from_symmetric_key([0x03; 57]);
        Self {
            keypair,
            profile,
            ephemeral,
            rng: FixtureRng(rng_seed),
        }
    }

    fn dake1_envelope(&self) -> String {
        let msg = Dake1 {
            client_instance_tag: CLIENT_TAG,
            profile: self.profile.clone(),
            i: self.ephemeral.public(),
        };
        encode_envelope(&msg.encode())
    }

    /// Verify the server's DAKE2 and derive the MAC key, as a real client
    /// would before answering.
    fn process_dake2(&self, envelope: &str) -> (Dake2, [u8; 64]) {
        let dake2 = Dake2::decode(&decode_envelope(envelope).unwrap()).unwrap();
        assert_eq!(dake2.client_instance_tag, CLIENT_TAG);
        assert_eq!(dake2.server_identity, SERVER_IDENTITY.as_bytes());

        let t = transcript(
            keyloft_server::dake::SIDE_INITIATOR,
            &self.profile,
            &dake2.composite_identity(),
            &self.ephemeral.public(),
            &dake2.s,
            PHI,
        );
        assert!(ring::verify(
            &self.profile.public_key,
            &dake2.server_key,
            &self.ephemeral.public(),
            &t,
            &dake2.sigma,
        ));

        let mac_key = derive_mac_key(&self.ephemeral.ecdh(&dake2.s));
        (dake2, mac_key)
    }

    fn dake3_envelope(&mut self, dake2: &Dake2, inner: Vec<u8>) -> String {
        let t = transcript(
            SIDE_RECEIVER,
            &self.profile,
            &dake2.composite_identity(),
            &self.ephemeral.public(),
            &dake2.s,
            PHI,
        );
        let sigma = ring::generate(
            &mut self.rng,
            &self.keypair,
            &self.profile.public_key,
            &dake2.server_key,
            &dake2.s,
            &t,
        )
        .unwrap();
        let msg = Dake3 {
            client_instance_tag: CLIENT_TAG,
            sigma,
            message: inner,
        };
        encode_envelope(&msg.encode())
    }
}

fn storage_info_request(mac_key: &[u8; 64]) -> Vec<u8> {
    let mac = kdf_64(
        UsageId::StorageInfoMac,
        &[mac_key, &StorageInformationRequest::mac_input()],
    );
    StorageInformationRequest { mac }.encode()
}

fn retrieval_envelope(identity: &str, tag: u32) -> String {
    let query = EnsembleRetrievalQuery {
        instance_tag: tag,
        identity: identity.to_string(),
        versions: "4".to_string(),
    };
    encode_envelope(&query.encode())
}

#[test]
fn dake_storage_information_flow() {
    let storage = Arc::new(MemoryStorage::new());
    let engine = test_engine(Arc::clone(&storage), 0xD1CE);
    let mut client = TestClient::new(0xFEED);

    assert!(!engine.has_session(CLIENT_IDENTITY));

    let responses = engine.handle(CLIENT_IDENTITY, &client.dake1_envelope()).unwrap();
    assert_eq!(responses.len(), 1);
    assert!(engine.has_session(CLIENT_IDENTITY));

    let (dake2, mac_key) = client.process_dake2(&responses[0]);

    let inner = storage_info_request(&mac_key);
    let dake3 = client.dake3_envelope(&dake2, inner);
    let responses = engine.handle(CLIENT_IDENTITY, &dake3).unwrap();
    assert_eq!(responses.len(), 1);

    let status = StorageStatus::decode(&decode_envelope(&responses[0]).unwrap()).unwrap();
    assert_eq!(status.client_instance_tag, CLIENT_TAG);
    assert_eq!(status.number, 0);

    let expected_mac = kdf_64(
        UsageId::StatusMac,
        &[&mac_key, &StorageStatus::mac_input(CLIENT_TAG, 0)],
    );
    assert!(bool::from(expected_mac.ct_eq(&status.mac)));

    // One DAKE cycle per session.
    assert!(!engine.has_session(CLIENT_IDENTITY));
}

#[test]
fn dake_flow_is_deterministic_under_fixture_randomness() {
    // Identical seeds on both sides must reproduce byte-identical
    // responses, pinning the wire format and every derivation.
    let run = || {
        let storage = Arc::new(MemoryStorage::new());
        let engine = test_engine(storage, 0xD1CE);
        let mut client = TestClient::new(0xFEED);

        let dake2_response = engine
            .handle(CLIENT_IDENTITY, &client.dake1_envelope())
            .unwrap()
            .remove(0);
        let (dake2, mac_key) = client.process_dake2(&dake2_response);
        let dake3 = client.dake3_envelope(&dake2, storage_info_request(&mac_key));
        let status_response = engine.handle(CLIENT_IDENTITY, &dake3).unwrap().remove(0);
        (dake2_response, status_response)
    };

    let (dake2_a, status_a) = run();
    let (dake2_b, status_b) = run();
    assert_eq!(dake2_a, dake2_b);
    assert_eq!(status_a, status_b);
}

#[test]
fn publication_and_retrieval_flow() {
    let storage = Arc::new(MemoryStorage::new());
    let engine = test_engine(Arc::clone(&storage), 0xBEEF);
    let mut client = TestClient::new(0xACE5);

    let responses = engine.handle(CLIENT_IDENTITY, &client.dake1_envelope()).unwrap();
    let (dake2, mac_key) = client.process_dake2(&responses[0]);

    // Two prekey messages plus a prekey profile, with batched proofs
    // bound to this DAKE run.
    let y1 = Keypair::from_symmetric_key([0x11; 57]);
    let y2 = Keypair::from_symmetric_key([0x12; 57]);
    let (b1_secret, b1_public) = dh::generate_dh_keypair(&mut client.rng);
    let (b2_secret, b2_public) = dh::generate_dh_keypair(&mut client.rng);
    let shared = Keypair::from_symmetric_key([0x13; 57]);

    let messages = vec![
        keyloft_protocol::messages::PrekeyMessage {
            id: 1,
            instance_tag: CLIENT_TAG,
            y: y1.public(),
            b: b1_public.clone(),
        },
        keyloft_protocol::messages::PrekeyMessage {
            id: 2,
            instance_tag: CLIENT_TAG,
            y: y2.public(),
            b: b2_public.clone(),
        },
    ];
    let prekey_profile =
        PrekeyProfile::new_signed(&client.keypair, CLIENT_TAG, FAR_FUTURE, shared.public());

    let context = kdf(UsageId::ProofContext, 64, &[&mac_key]);
    let message_proof_ecdh = proofs::generate_ecdh_proof(
        &mut client.rng,
        &[&y1, &y2],
        &context,
        UsageId::ProofMessageEcdh,
    )
    .unwrap();
    let message_proof_dh = proofs::generate_dh_proof(
        &mut client.rng,
        &[(b1_secret, b1_public), (b2_secret, b2_public)],
        &context,
        UsageId::ProofMessageDh,
    )
    .unwrap();
    let shared_proof_ecdh = proofs::generate_ecdh_proof(
        &mut client.rng,
        &[&shared],
        &context,
        UsageId::ProofSharedEcdh,
    )
    .unwrap();

    let mut publication = Publication {
        prekey_messages: messages,
        client_profile: Some(client.profile.clone()),
        prekey_profile: Some(prekey_profile),
        message_proof_ecdh: Some(message_proof_ecdh),
        message_proof_dh: Some(message_proof_dh),
        shared_proof_ecdh: Some(shared_proof_ecdh),
        mac: [0u8; 64],
    };
    publication.mac = kdf_64(
        UsageId::PublicationMac,
        &[&mac_key, &publication.mac_input()],
    );

    let dake3 = client.dake3_envelope(&dake2, publication.encode());
    let responses = engine.handle(CLIENT_IDENTITY, &dake3).unwrap();
    let success = Success::decode(&decode_envelope(&responses[0]).unwrap()).unwrap();
    assert_eq!(success.client_instance_tag, CLIENT_TAG);
    let expected_mac = kdf_64(
        UsageId::SuccessMac,
        &[&mac_key, &Success::mac_input(CLIENT_TAG)],
    );
    assert!(bool::from(expected_mac.ct_eq(&success.mac)));

    assert_eq!(storage.number_stored(CLIENT_IDENTITY, CLIENT_TAG).unwrap(), 2);

    // Anyone may retrieve without authentication; one ensemble per tag.
    let retrieval = retrieval_envelope(CLIENT_IDENTITY, 0x0000_9999);
    let responses = engine.handle("bob@example.org", &retrieval).unwrap();
    let retrieved = EnsembleRetrieval::decode(&decode_envelope(&responses[0]).unwrap()).unwrap();
    assert_eq!(retrieved.instance_tag, 0x0000_9999);
    assert_eq!(retrieved.ensembles.len(), 1);

    let ensemble = &retrieved.ensembles[0];
    assert!(ensemble.validate(1_700_000_000).is_ok());
    assert_eq!(ensemble.client_profile, client.profile);
    assert_eq!(ensemble.prekey_message.y, y1.public());

    // The pool decremented: one message left.
    assert_eq!(storage.number_stored(CLIENT_IDENTITY, CLIENT_TAG).unwrap(), 1);
}

#[test]
fn tampered_publication_mac_is_rejected_and_stores_nothing() {
    let storage = Arc::new(MemoryStorage::new());
    let engine = test_engine(Arc::clone(&storage), 0xBEEF);
    let mut client = TestClient::new(0xACE5);

    let responses = engine.handle(CLIENT_IDENTITY, &client.dake1_envelope()).unwrap();
    let (dake2, _) = client.process_dake2(&responses[0]);

    let publication = Publication {
        prekey_messages: vec![],
        client_profile: Some(client.profile.clone()),
        prekey_profile: None,
        message_proof_ecdh: None,
        message_proof_dh: None,
        shared_proof_ecdh: None,
        mac: [0xEE; 64],
    };
    let dake3 = client.dake3_envelope(&dake2, publication.encode());
    assert_eq!(
        engine.handle(CLIENT_IDENTITY, &dake3).unwrap_err(),
        ServerError::InvalidMac
    );
    assert_eq!(storage.number_stored(CLIENT_IDENTITY, CLIENT_TAG).unwrap(), 0);
    assert!(storage.retrieve_for(CLIENT_IDENTITY).unwrap().is_empty());
}

#[test]
fn dake1_with_mismatched_instance_tag_creates_no_session() {
    let storage = Arc::new(MemoryStorage::new());
    let engine = test_engine(storage, 0xD1CE);
    let client = TestClient::new(0xFEED);

    let msg = Dake1 {
        // Envelope tag disagrees with the profile's own declared tag.
        client_instance_tag: CLIENT_TAG + 1,
        profile: client.profile.clone(),
        i: client.ephemeral.public(),
    };
    let envelope = encode_envelope(&msg.encode());

    assert_eq!(
        engine.handle(CLIENT_IDENTITY, &envelope).unwrap_err(),
        ServerError::Protocol(ProtocolError::InvalidClientProfile(
            ProfileFault::WrongInstanceTag
        ))
    );
    assert!(!engine.has_session(CLIENT_IDENTITY));
}

#[test]
fn dake3_without_session_is_rejected() {
    let storage = Arc::new(MemoryStorage::new());
    let engine = test_engine(storage, 0xD1CE);
    let mut client = TestClient::new(0xFEED);

    let fake_dake2 = Dake2 {
        client_instance_tag: CLIENT_TAG,
        server_identity: SERVER_IDENTITY.as_bytes().to_vec(),
        server_key: Keypair::from_symmetric_key([0x42; 57]).public(),
        s: Keypair::from_symmetric_key([0x44; 57]).public(),
        sigma: keyloft_crypto::RingSignature::from_bytes(&[0x07; 336]).unwrap(),
    };
    let dake3 = client.dake3_envelope(&fake_dake2, vec![0x00]);
    assert_eq!(
        engine.handle(CLIENT_IDENTITY, &dake3).unwrap_err(),
        ServerError::NoSession
    );
}

#[test]
fn dake3_with_bad_ring_signature_keeps_session_state() {
    let storage = Arc::new(MemoryStorage::new());
    let engine = test_engine(storage, 0xD1CE);
    let mut client = TestClient::new(0xFEED);

    let responses = engine.handle(CLIENT_IDENTITY, &client.dake1_envelope()).unwrap();
    let (dake2, mac_key) = client.process_dake2(&responses[0]);

    let mut dake3 = Dake3::decode(
        &decode_envelope(&client.dake3_envelope(&dake2, storage_info_request(&mac_key))).unwrap(),
    )
    .unwrap();
    // Corrupt one response scalar.
    dake3.sigma.r2 = dake3.sigma.r1;
    let envelope = encode_envelope(&dake3.encode());

    assert_eq!(
        engine.handle(CLIENT_IDENTITY, &envelope).unwrap_err(),
        ServerError::InvalidRingSignature
    );
    // A failed DAKE3 does not consume the session.
    assert!(engine.has_session(CLIENT_IDENTITY));
}

#[test]
fn session_expires_via_cleanup_sweep() {
    use std::time::Duration;

    let storage = Arc::new(MemoryStorage::new());
    let engine = test_engine(storage, 0xD1CE);
    let client = TestClient::new(0xFEED);

    engine.handle(CLIENT_IDENTITY, &client.dake1_envelope()).unwrap();
    assert!(engine.has_session(CLIENT_IDENTITY));

    // A generous timeout keeps the in-flight exchange alive.
    engine
        .cleanup(Duration::from_secs(300), Duration::from_secs(300))
        .unwrap();
    assert!(engine.has_session(CLIENT_IDENTITY));

    // A zero timeout expires it.
    engine.cleanup(Duration::ZERO, Duration::ZERO).unwrap();
    assert!(!engine.has_session(CLIENT_IDENTITY));
}

#[test]
fn retrieval_with_nothing_stored_returns_literal_notice() {
    let storage = Arc::new(MemoryStorage::new());
    let engine = test_engine(storage, 0xD1CE);

    let envelope = retrieval_envelope("nobody@example.org", 0x0000_0007);
    let responses = engine.handle("curious@example.org", &envelope).unwrap();
    assert_eq!(responses.len(), 1);

    let reply = NoPrekeyEnsembles::decode(&decode_envelope(&responses[0]).unwrap()).unwrap();
    assert_eq!(reply.instance_tag, 0x0000_0007);
    assert_eq!(reply.message, NO_PREKEY_ENSEMBLES_MESSAGE);
}

#[test]
fn deny_listed_sender_is_rejected_before_processing() {
    let options = EngineOptions {
        identity: SERVER_IDENTITY.to_string(),
        phi: PHI.to_vec(),
        fragment_prefix: DEFAULT_FRAGMENT_PREFIX.to_string(),
        max_fragment_len: 0,
        instance_tag: 0x0000_0100,
    };
    let engine = Engine::new(
        options,
        Keypair::from_symmetric_key([0x42; 57]),
        Box::new(MemoryStorage::new()),
        Box::new(DenyList::new([CLIENT_IDENTITY.to_string()])),
        Box::new(FixtureRng(0xD1CE)),
    );
    let client = TestClient::new(0xFEED);

    assert_eq!(
        engine.handle(CLIENT_IDENTITY, &client.dake1_envelope()).unwrap_err(),
        ServerError::Rejected
    );
    assert!(!engine.has_session(CLIENT_IDENTITY));
}

#[test]
fn transport_errors_are_typed() {
    let storage = Arc::new(MemoryStorage::new());
    let engine = test_engine(storage, 0xD1CE);

    assert_eq!(
        engine.handle(CLIENT_IDENTITY, "").unwrap_err(),
        ServerError::Protocol(ProtocolError::EmptyMessage)
    );
    assert_eq!(
        engine.handle(CLIENT_IDENTITY, "no terminator").unwrap_err(),
        ServerError::Protocol(ProtocolError::MissingTerminator)
    );

    // Version 3 message: rejected before type dispatch.
    let envelope = encode_envelope(&[0x00, 0x03, 0x35, 0x00]);
    assert_eq!(
        engine.handle(CLIENT_IDENTITY, &envelope).unwrap_err(),
        ServerError::Protocol(ProtocolError::UnsupportedVersion(3))
    );

    // Server-to-client message types are unexpected as requests.
    let envelope = encode_envelope(
        &StorageStatus {
            client_instance_tag: 1,
            number: 0,
            mac: [0u8; 64],
        }
        .encode(),
    );
    assert_eq!(
        engine.handle(CLIENT_IDENTITY, &envelope).unwrap_err(),
        ServerError::UnexpectedMessage(0x0B)
    );
}

#[test]
fn fragmented_exchange_roundtrips() {
    let storage = Arc::new(MemoryStorage::new());
    let options = EngineOptions {
        identity: SERVER_IDENTITY.to_string(),
        phi: PHI.to_vec(),
        fragment_prefix: DEFAULT_FRAGMENT_PREFIX.to_string(),
        // Small enough to force multi-fragment responses.
        max_fragment_len: 300,
        instance_tag: 0x0000_0100,
    };
    let engine = Engine::new(
        options,
        Keypair::from_symmetric_key([0x42; 57]),
        Box::new(SharedStorage(storage)),
        Box::new(AcceptAll),
        Box::new(FixtureRng(0xD1CE)),
    );
    let mut client = TestClient::new(0xFEED);

    // Fragment the client's DAKE1 and feed the pieces out of order.
    let envelope = client.dake1_envelope();
    let mut fragments = potentially_fragment(
        &envelope,
        300,
        CLIENT_TAG,
        0x0000_0100,
        DEFAULT_FRAGMENT_PREFIX,
        &mut client.rng,
    );
    assert!(fragments.len() > 1);
    fragments.swap(0, 1);

    let mut responses = vec![];
    for fragment in &fragments {
        responses = engine.handle(CLIENT_IDENTITY, fragment).unwrap();
    }
    assert!(responses.len() > 1, "response should be fragmented too");

    // Reassemble the server's fragmented DAKE2.
    let assembler = Assembler::new(DEFAULT_FRAGMENT_PREFIX);
    let mut complete = None;
    for response in &responses {
        complete = assembler.new_fragment_received(SERVER_IDENTITY, response).unwrap();
    }
    let _ = client.process_dake2(&complete.unwrap());
}
