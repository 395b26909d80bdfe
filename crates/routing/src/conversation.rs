//! Conversation affinity store.
//!
//! Bounded map from conversation key to node id with a reverse index for
//! O(|keys|) cleanup when a node goes away. Overflow evicts the
//! least-recently-accessed binding; a periodic sweep drops bindings idle for
//! longer than the TTL.

use std::{
    collections::{HashMap, HashSet},
    time::{Duration, Instant},
};

#[derive(Debug, Clone)]
pub struct ConversationBinding {
    pub node_id: String,
    pub created_at: Instant,
    pub last_accessed_at: Instant,
}

pub struct ConversationStore {
    entries: HashMap<String, ConversationBinding>,
    /// node_id → keys bound to it. Sets are removed when they become empty.
    by_node: HashMap<String, HashSet<String>>,
    max_entries: usize,
    ttl: Duration,
}

impl ConversationStore {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            by_node: HashMap::new(),
            max_entries,
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Create or refresh a binding. Rebinding a key to a different node moves
    /// it in the reverse index.
    pub fn bind(&mut self, key: &str, node_id: &str) {
        let now = Instant::now();
        if let Some(existing) = self.entries.get_mut(key) {
            if existing.node_id != node_id {
                Self::unindex(&mut self.by_node, &existing.node_id, key);
                existing.node_id = node_id.to_string();
                self.by_node
                    .entry(node_id.to_string())
                    .or_default()
                    .insert(key.to_string());
            }
            existing.last_accessed_at = now;
            return;
        }

        if self.entries.len() >= self.max_entries {
            self.evict_lru();
        }

        self.entries.insert(key.to_string(), ConversationBinding {
            node_id: node_id.to_string(),
            created_at: now,
            last_accessed_at: now,
        });
        self.by_node
            .entry(node_id.to_string())
            .or_default()
            .insert(key.to_string());
    }

    /// Look up a binding, refreshing its access time.
    pub fn get(&mut self, key: &str) -> Option<&ConversationBinding> {
        let entry = self.entries.get_mut(key)?;
        entry.last_accessed_at = Instant::now();
        Some(&*entry)
    }

    /// Look up a binding without refreshing it.
    pub fn peek(&self, key: &str) -> Option<&ConversationBinding> {
        self.entries.get(key)
    }

    /// Remove every binding pointing at `node_id`. Returns the removed keys.
    pub fn evict_node(&mut self, node_id: &str) -> Vec<String> {
        let Some(keys) = self.by_node.remove(node_id) else {
            return Vec::new();
        };
        let mut removed: Vec<String> = keys.into_iter().collect();
        removed.sort();
        for key in &removed {
            self.entries.remove(key);
        }
        removed
    }

    /// Drop bindings idle for longer than the TTL. Idempotent; returns the
    /// number of bindings removed.
    pub fn sweep(&mut self) -> usize {
        // A TTL reaching past process start means nothing can be expired.
        let Some(cutoff) = Instant::now().checked_sub(self.ttl) else {
            return 0;
        };
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, v)| v.last_accessed_at <= cutoff)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            if let Some(entry) = self.entries.remove(key) {
                Self::unindex(&mut self.by_node, &entry.node_id, key);
            }
        }
        expired.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_node.clear();
    }

    /// Keys currently bound to `node_id`.
    pub fn keys_for_node(&self, node_id: &str) -> Vec<String> {
        self.by_node
            .get(node_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, v)| v.last_accessed_at)
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest
            && let Some(entry) = self.entries.remove(&key)
        {
            Self::unindex(&mut self.by_node, &entry.node_id, &key);
        }
    }

    fn unindex(by_node: &mut HashMap<String, HashSet<String>>, node_id: &str, key: &str) {
        if let Some(set) = by_node.get_mut(node_id) {
            set.remove(key);
            if set.is_empty() {
                by_node.remove(node_id);
            }
        }
    }
}
