//! In-memory storage.
//!
//! Suitable for testing and single-process deployments; everything is
//! lost on process exit. One record per identity, with per-device
//! (instance-tag) tables inside it.

use std::collections::HashMap;

use keyloft_protocol::messages::PrekeyMessage;
use keyloft_protocol::{ClientProfile, PrekeyEnsemble, PrekeyProfile};
use parking_lot::Mutex;

use crate::error::ServerError;
use crate::storage::Storage;

#[derive(Debug, Default)]
struct IdentityRecord {
    client_profiles: HashMap<u32, ClientProfile>,
    prekey_profiles: HashMap<u32, PrekeyProfile>,
    prekey_messages: HashMap<u32, Vec<PrekeyMessage>>,
}

impl IdentityRecord {
    fn is_empty(&self) -> bool {
        self.client_profiles.is_empty()
            && self.prekey_profiles.is_empty()
            && self.prekey_messages.values().all(Vec::is_empty)
    }
}

/// Shared in-memory store keyed by identity.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: Mutex<HashMap<String, IdentityRecord>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn store_client_profile(
        &self,
        identity: &str,
        profile: &ClientProfile,
    ) -> Result<(), ServerError> {
        let mut records = self.records.lock();
        let record = records.entry(identity.to_string()).or_default();
        record
            .client_profiles
            .insert(profile.instance_tag, profile.clone());
        Ok(())
    }

    fn store_prekey_profiles(
        &self,
        identity: &str,
        profiles: &[PrekeyProfile],
    ) -> Result<(), ServerError> {
        let mut records = self.records.lock();
        let record = records.entry(identity.to_string()).or_default();
        for profile in profiles {
            record
                .prekey_profiles
                .insert(profile.instance_tag, profile.clone());
        }
        Ok(())
    }

    fn store_prekey_messages(
        &self,
        identity: &str,
        messages: &[PrekeyMessage],
    ) -> Result<(), ServerError> {
        let mut records = self.records.lock();
        let record = records.entry(identity.to_string()).or_default();
        for message in messages {
            record
                .prekey_messages
                .entry(message.instance_tag)
                .or_default()
                .push(message.clone());
        }
        Ok(())
    }

    fn number_stored(&self, identity: &str, instance_tag: u32) -> Result<u32, ServerError> {
        let records = self.records.lock();
        let count = records
            .get(identity)
            .and_then(|record| record.prekey_messages.get(&instance_tag))
            .map_or(0, Vec::len);
        u32::try_from(count).map_err(|_| ServerError::Storage("message count overflow".into()))
    }

    fn retrieve_for(&self, identity: &str) -> Result<Vec<PrekeyEnsemble>, ServerError> {
        let mut records = self.records.lock();
        let Some(record) = records.get_mut(identity) else {
            return Ok(vec![]);
        };

        let mut tags: Vec<u32> = record.client_profiles.keys().copied().collect();
        tags.sort_unstable();

        let mut ensembles = Vec::new();
        for tag in tags {
            let Some(client_profile) = record.client_profiles.get(&tag) else {
                continue;
            };
            let Some(prekey_profile) = record.prekey_profiles.get(&tag) else {
                continue;
            };
            let Some(pool) = record.prekey_messages.get_mut(&tag) else {
                continue;
            };
            if pool.is_empty() {
                continue;
            }
            // Detach one message: each prekey message is single-use.
            let prekey_message = pool.remove(0);
            ensembles.push(PrekeyEnsemble {
                client_profile: client_profile.clone(),
                prekey_profile: prekey_profile.clone(),
                prekey_message,
            });
        }
        Ok(ensembles)
    }

    fn cleanup(&self, now: u64) -> Result<(), ServerError> {
        let mut records = self.records.lock();
        for record in records.values_mut() {
            record.client_profiles.retain(|_, profile| profile.expiry > now);
            record.prekey_profiles.retain(|_, profile| profile.expiry > now);
            // Prekey messages belonging to a purged device go with it.
            record
                .prekey_messages
                .retain(|tag, _| record.client_profiles.contains_key(tag));
        }
        let before = records.len();
        records.retain(|_, record| !record.is_empty());
        let dropped = before - records.len();
        if dropped > 0 {
            tracing::debug!(dropped, "dropped empty identities from storage");
        }
        Ok(())
    }
}
