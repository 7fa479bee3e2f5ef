//! Server configuration.
//!
//! Loaded from a JSON file; every field has a default so a bare server
//! runs with no config at all. Wire-format knobs (fragment prefix,
//! protocol phi) are configuration passed into the engine, not
//! process-wide state.

use serde::{Deserialize, Serialize};

use keyloft_protocol::fragmentation::DEFAULT_FRAGMENT_PREFIX;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP listen address.
    pub listen_addr: String,
    /// Server identity string bound into the DAKE composite identity.
    pub identity: String,
    /// Hex-encoded 57-byte key seed; a fresh key is generated if unset.
    pub key_seed_hex: Option<String>,
    /// Fragment prefix on the wire.
    pub fragment_prefix: String,
    /// Maximum transport payload length; 0 disables fragmentation.
    pub max_fragment_len: usize,
    /// Instance tag stamped on outgoing fragments.
    pub instance_tag: u32,
    /// Idle DAKE sessions are dropped after this many seconds.
    pub session_timeout_secs: u64,
    /// Incomplete fragment contexts are dropped after this many seconds.
    pub fragment_timeout_secs: u64,
    /// Period of the expiry sweep.
    pub cleanup_interval_secs: u64,
    /// Identities refused service.
    pub deny: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7676".to_string(),
            identity: "keyloft.localdomain".to_string(),
            key_seed_hex: None,
            fragment_prefix: DEFAULT_FRAGMENT_PREFIX.to_string(),
            max_fragment_len: 0,
            instance_tag: 0x0000_0100,
            session_timeout_secs: 300,
            fragment_timeout_secs: 300,
            cleanup_interval_secs: 60,
            deny: vec![],
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &str) -> Result<Self, String> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| format!("failed to read {path}: {e}"))?;
        serde_json::from_str(&contents).map_err(|e| format!("failed to parse {path}: {e}"))
    }
}
