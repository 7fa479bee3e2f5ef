//! Storage capability.
//!
//! The engine talks to storage through this trait only; the in-memory
//! implementation lives in [`crate::memory`]. Persistent backends are a
//! deployment choice behind the same interface.

use keyloft_protocol::messages::PrekeyMessage;
use keyloft_protocol::{ClientProfile, PrekeyEnsemble, PrekeyProfile};

use crate::error::ServerError;

pub trait Storage: Send + Sync {
    /// Store (or replace) a client profile for an identity.
    fn store_client_profile(
        &self,
        identity: &str,
        profile: &ClientProfile,
    ) -> Result<(), ServerError>;

    /// Store prekey profiles for an identity.
    fn store_prekey_profiles(
        &self,
        identity: &str,
        profiles: &[PrekeyProfile],
    ) -> Result<(), ServerError>;

    /// Append prekey messages to an identity's pool.
    fn store_prekey_messages(
        &self,
        identity: &str,
        messages: &[PrekeyMessage],
    ) -> Result<(), ServerError>;

    /// Number of prekey messages still stored for one device.
    fn number_stored(&self, identity: &str, instance_tag: u32) -> Result<u32, ServerError>;

    /// Detach and return at most one ensemble per instance tag that has a
    /// complete set of material, decrementing the message pool.
    fn retrieve_for(&self, identity: &str) -> Result<Vec<PrekeyEnsemble>, ServerError>;

    /// Purge expired profiles; identities left with no artifacts of any
    /// kind may be dropped entirely.
    fn cleanup(&self, now: u64) -> Result<(), ServerError>;
}
