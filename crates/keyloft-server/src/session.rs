//! Per-sender DAKE session state.
//!
//! One live session per sender identity: DAKE1 fills it, DAKE3 consumes
//! it, and the periodic sweep expires sessions whose exchange stalled.
//! Accessors refresh the last-touch instant so an in-progress exchange
//! does not expire mid-flight.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use keyloft_crypto::{EdwardsPoint, Keypair};
use keyloft_protocol::ClientProfile;
use parking_lot::Mutex;

/// Ephemeral state carried between DAKE1 and DAKE3 for one sender.
#[derive(Debug, Clone)]
pub struct Session {
    pub instance_tag: u32,
    pub ephemeral: Option<Keypair>,
    pub their_ephemeral: Option<EdwardsPoint>,
    pub profile: Option<ClientProfile>,
    pub mac_key: Option<[u8; 64]>,
    last_touch: Instant,
}

impl Session {
    fn new() -> Self {
        Self {
            instance_tag: 0,
            ephemeral: None,
            their_ephemeral: None,
            profile: None,
            mac_key: None,
            last_touch: Instant::now(),
        }
    }

    /// Whether DAKE1 has populated this session.
    pub fn is_established(&self) -> bool {
        self.ephemeral.is_some()
            && self.their_ephemeral.is_some()
            && self.profile.is_some()
            && self.mac_key.is_some()
    }
}

/// Shared map of sessions keyed by sender identity.
///
/// A coarse lock over the whole map serializes lookup-or-create plus
/// mutation, which is all the concurrency the engine needs; out-of-order
/// DAKE steps from a single sender are a client error, not a race to
/// untangle here.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` on the sender's session, creating an empty one if absent.
    /// Touches the session.
    pub fn with_session<T>(&self, identity: &str, f: impl FnOnce(&mut Session) -> T) -> T {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .entry(identity.to_string())
            .or_insert_with(Session::new);
        session.last_touch = Instant::now();
        f(session)
    }

    /// Clone the sender's session if one exists. Touches the session.
    pub fn snapshot(&self, identity: &str) -> Option<Session> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(identity)?;
        session.last_touch = Instant::now();
        Some(session.clone())
    }

    /// Whether the sender has a live session. Touches it if so.
    pub fn has(&self, identity: &str) -> bool {
        self.snapshot(identity).is_some()
    }

    /// Remove the sender's session (successful DAKE completion).
    pub fn complete(&self, identity: &str) {
        self.sessions.lock().remove(identity);
    }

    /// Drop sessions idle longer than `timeout`.
    pub fn cleanup(&self, timeout: Duration) {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, session| session.last_touch.elapsed() < timeout);
        let dropped = before - sessions.len();
        if dropped > 0 {
            tracing::debug!(dropped, "expired idle sessions");
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
