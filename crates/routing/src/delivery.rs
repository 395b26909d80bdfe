//! Delivery tracking: the per-node set of messages sent downstream and not
//! yet acknowledged. Entries are insertion-ordered; the cap evicts the
//! oldest pending delivery without an ack.

use std::{
    collections::{HashMap, VecDeque},
    time::Instant,
};

#[derive(Debug, Clone)]
pub struct PendingDelivery {
    pub message_id: String,
    pub sent_at: Instant,
}

pub struct DeliveryTracker {
    nodes: HashMap<String, VecDeque<PendingDelivery>>,
    max_pending: usize,
}

impl DeliveryTracker {
    pub fn new(max_pending: usize) -> Self {
        Self {
            nodes: HashMap::new(),
            max_pending,
        }
    }

    /// Record a downstream send. A duplicate message id replaces the prior
    /// entry and moves it to the back.
    pub fn track(&mut self, node_id: &str, message_id: &str) {
        let queue = self.nodes.entry(node_id.to_string()).or_default();
        if let Some(pos) = queue.iter().position(|p| p.message_id == message_id) {
            queue.remove(pos);
        } else if queue.len() >= self.max_pending
            && let Some(evicted) = queue.pop_front()
        {
            tracing::warn!(
                node_id,
                message_id = %evicted.message_id,
                max_pending = self.max_pending,
                "pending delivery cap reached, evicting oldest"
            );
        }
        queue.push_back(PendingDelivery {
            message_id: message_id.to_string(),
            sent_at: Instant::now(),
        });
    }

    /// Acknowledge a delivery. Returns whether the entry existed. Dropping
    /// the last entry removes the node's map slot entirely.
    pub fn ack(&mut self, node_id: &str, message_id: &str) -> bool {
        let Some(queue) = self.nodes.get_mut(node_id) else {
            return false;
        };
        let Some(pos) = queue.iter().position(|p| p.message_id == message_id) else {
            return false;
        };
        queue.remove(pos);
        if queue.is_empty() {
            self.nodes.remove(node_id);
        }
        true
    }

    /// Unacked deliveries for a node, ordered by `sent_at` ascending.
    pub fn unacked(&self, node_id: &str) -> Vec<PendingDelivery> {
        self.nodes
            .get(node_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of unacked deliveries; 0 for unknown nodes.
    pub fn pending_count(&self, node_id: &str) -> usize {
        self.nodes.get(node_id).map_or(0, VecDeque::len)
    }

    /// Drop all state for a node. Returns the number of entries removed.
    pub fn remove_node(&mut self, node_id: &str) -> usize {
        self.nodes.remove(node_id).map_or(0, |q| q.len())
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn track_and_ack() {
        let mut t = DeliveryTracker::new(8);
        t.track("n1", "m1");
        t.track("n1", "m2");
        assert_eq!(t.pending_count("n1"), 2);
        assert!(t.ack("n1", "m1"));
        assert!(!t.ack("n1", "m1"));
        assert_eq!(t.pending_count("n1"), 1);
    }

    #[test]
    fn last_ack_removes_node_slot() {
        let mut t = DeliveryTracker::new(8);
        t.track("n1", "m1");
        assert!(t.ack("n1", "m1"));
        assert_eq!(t.pending_count("n1"), 0);
        assert!(t.unacked("n1").is_empty());
    }

    #[test]
    fn unknown_node_counts_zero() {
        let t = DeliveryTracker::new(8);
        assert_eq!(t.pending_count("ghost"), 0);
    }

    #[test]
    fn duplicate_id_overwrites() {
        let mut t = DeliveryTracker::new(8);
        t.track("n1", "m1");
        t.track("n1", "m2");
        t.track("n1", "m1");
        assert_eq!(t.pending_count("n1"), 2);
        let order: Vec<_> = t.unacked("n1").iter().map(|p| p.message_id.clone()).collect();
        assert_eq!(order, vec!["m2".to_string(), "m1".to_string()]);
    }

    #[test]
    fn cap_evicts_oldest_without_ack() {
        let mut t = DeliveryTracker::new(2);
        t.track("n1", "m1");
        t.track("n1", "m2");
        t.track("n1", "m3");
        assert_eq!(t.pending_count("n1"), 2);
        let order: Vec<_> = t.unacked("n1").iter().map(|p| p.message_id.clone()).collect();
        assert_eq!(order, vec!["m2".to_string(), "m3".to_string()]);
    }

    #[test]
    fn unacked_is_sent_at_ascending() {
        let mut t = DeliveryTracker::new(8);
        t.track("n1", "m1");
        t.track("n1", "m2");
        t.track("n1", "m3");
        let pending = t.unacked("n1");
        assert!(pending.windows(2).all(|w| w[0].sent_at <= w[1].sent_at));
    }

    #[test]
    fn remove_node_bulk_cleanup() {
        let mut t = DeliveryTracker::new(8);
        t.track("n1", "m1");
        t.track("n1", "m2");
        t.track("n2", "m3");
        assert_eq!(t.remove_node("n1"), 2);
        assert_eq!(t.pending_count("n1"), 0);
        assert_eq!(t.pending_count("n2"), 1);
    }

    #[test]
    fn ack_order_independent() {
        let mut t = DeliveryTracker::new(8);
        t.track("n1", "m1");
        t.track("n1", "m2");
        t.track("n1", "m3");
        assert!(t.ack("n1", "m2"));
        assert!(t.ack("n1", "m3"));
        assert!(t.ack("n1", "m1"));
        assert_eq!(t.pending_count("n1"), 0);
    }
}
