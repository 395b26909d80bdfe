//! Pinned device keys.
//!
//! Maps node ids to their Ed25519 public keys. Keys arrive from
//! pre-registered config or, when TOFU is enabled, are pinned on first
//! observation. The store is LRU-capped; a node with an active connection
//! is never evicted.

use std::{
    collections::{HashMap, HashSet},
    time::Instant,
};

use tracing::{info, warn};

use crate::error::{AuthError, Result};

#[derive(Debug, Clone)]
struct PinnedKey {
    public_key: String,
    pinned_at: Instant,
    last_used_at: Instant,
}

pub struct DeviceKeyStore {
    keys: HashMap<String, PinnedKey>,
    /// Node ids with a live connection; exempt from eviction.
    active: HashSet<String>,
    allow_tofu: bool,
    max_keys: usize,
}

impl DeviceKeyStore {
    pub fn new(allow_tofu: bool, max_keys: usize) -> Self {
        Self {
            keys: HashMap::new(),
            active: HashSet::new(),
            allow_tofu,
            max_keys,
        }
    }

    /// Seed pre-registered keys (from config). Pre-registered keys count
    /// against the cap but are inserted unconditionally.
    pub fn seed<'a>(&mut self, known: impl IntoIterator<Item = (&'a str, &'a str)>) {
        let now = Instant::now();
        for (node_id, key) in known {
            self.keys.insert(node_id.to_string(), PinnedKey {
                public_key: key.to_string(),
                pinned_at: now,
                last_used_at: now,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.keys.contains_key(node_id)
    }

    pub fn key_for(&self, node_id: &str) -> Option<&str> {
        self.keys.get(node_id).map(|k| k.public_key.as_str())
    }

    /// Validate an advertised key against the pin for `node_id`, pinning it
    /// on first use when TOFU is enabled.
    pub fn observe(&mut self, node_id: &str, public_key: &str) -> Result<()> {
        if let Some(pinned) = self.keys.get_mut(node_id) {
            if pinned.public_key != public_key {
                warn!(node_id, "public key mismatch against pinned key");
                return Err(AuthError::KeyMismatch);
            }
            pinned.last_used_at = Instant::now();
            return Ok(());
        }

        if !self.allow_tofu {
            return Err(AuthError::TofuDisabled);
        }
        if self.keys.len() >= self.max_keys {
            self.evict_lru()?;
        }
        let now = Instant::now();
        self.keys.insert(node_id.to_string(), PinnedKey {
            public_key: public_key.to_string(),
            pinned_at: now,
            last_used_at: now,
        });
        info!(node_id, "pinned new device key (TOFU)");
        Ok(())
    }

    /// Mark a node as having a live connection.
    pub fn mark_active(&mut self, node_id: &str) {
        self.active.insert(node_id.to_string());
    }

    pub fn mark_inactive(&mut self, node_id: &str) {
        self.active.remove(node_id);
    }

    fn evict_lru(&mut self) -> Result<()> {
        let candidate = self
            .keys
            .iter()
            .filter(|(node_id, _)| !self.active.contains(*node_id))
            .min_by_key(|(_, k)| k.last_used_at)
            .map(|(node_id, _)| node_id.clone());
        match candidate {
            Some(node_id) => {
                self.keys.remove(&node_id);
                warn!(node_id, "evicted least-recently-used device key");
                Ok(())
            },
            // Every pinned node is connected; refuse the new pin instead of
            // evicting a live key.
            None => Err(AuthError::StoreFull),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn tofu_pins_first_key() {
        let mut store = DeviceKeyStore::new(true, 4);
        store.observe("n1", "K1").unwrap();
        assert_eq!(store.key_for("n1"), Some("K1"));
        // Same key verifies, a different key is rejected.
        store.observe("n1", "K1").unwrap();
        assert!(matches!(store.observe("n1", "K2"), Err(AuthError::KeyMismatch)));
        assert_eq!(store.key_for("n1"), Some("K1"));
    }

    #[test]
    fn tofu_disabled_rejects_unknown() {
        let mut store = DeviceKeyStore::new(false, 4);
        assert!(matches!(store.observe("n1", "K1"), Err(AuthError::TofuDisabled)));
    }

    #[test]
    fn seeded_keys_verify_without_tofu() {
        let mut store = DeviceKeyStore::new(false, 4);
        store.seed([("n1", "K1")]);
        store.observe("n1", "K1").unwrap();
        assert!(matches!(store.observe("n1", "K2"), Err(AuthError::KeyMismatch)));
    }

    #[test]
    fn cap_evicts_lru_inactive() {
        let mut store = DeviceKeyStore::new(true, 2);
        store.observe("n1", "K1").unwrap();
        store.observe("n2", "K2").unwrap();
        // Refresh n1 so n2 is the LRU entry.
        store.observe("n1", "K1").unwrap();
        store.observe("n3", "K3").unwrap();
        assert!(store.contains("n1"));
        assert!(!store.contains("n2"));
        assert!(store.contains("n3"));
    }

    #[test]
    fn active_keys_survive_eviction() {
        let mut store = DeviceKeyStore::new(true, 2);
        store.observe("n1", "K1").unwrap();
        store.observe("n2", "K2").unwrap();
        store.mark_active("n1");
        store.mark_active("n2");
        assert!(matches!(store.observe("n3", "K3"), Err(AuthError::StoreFull)));
        store.mark_inactive("n2");
        store.observe("n3", "K3").unwrap();
        assert!(store.contains("n1"));
        assert!(!store.contains("n2"));
    }
}
