//! Registry of registered worker nodes and the agent → node index.
//!
//! The agent index lives in a shared synchronous map so the router can
//! consult it through [`switchyard_routing::AgentNodeResolver`] without
//! taking the async registry lock; the registry is its only writer.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Instant,
};

use tracing::warn;

use switchyard_protocol::NodeCapabilities;

use crate::error::{Error, Result};

/// Shared agent → node map.
pub type AgentIndex = Arc<RwLock<HashMap<String, String>>>;

/// A registered worker node.
#[derive(Debug, Clone)]
pub struct Node {
    pub node_id: String,
    /// Connection currently serving this node. Only this connection may
    /// mutate or deregister it.
    pub conn_id: String,
    pub capabilities: NodeCapabilities,
    pub last_seen_at: Instant,
    pub is_alive: bool,
    /// Health-monitor intervals elapsed without a pong.
    pub missed_intervals: u32,
}

/// Registry of registered nodes plus the agent index.
pub struct NodeRegistry {
    /// node_id → Node
    nodes: HashMap<String, Node>,
    /// conn_id → node_id (reverse lookup for cleanup on disconnect)
    by_conn: HashMap<String, String>,
    /// agent_id → node_id; the inverse of each node's advertised agents.
    agents: AgentIndex,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            by_conn: HashMap::new(),
            agents: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Handle to the agent index for wiring into the router.
    pub fn agent_index(&self) -> AgentIndex {
        Arc::clone(&self.agents)
    }

    pub fn register(
        &mut self,
        node_id: &str,
        conn_id: &str,
        capabilities: NodeCapabilities,
    ) -> Result<()> {
        if self.nodes.contains_key(node_id) {
            return Err(Error::AlreadyRegistered(node_id.to_string()));
        }
        self.index_agents(node_id, &capabilities);
        self.by_conn.insert(conn_id.to_string(), node_id.to_string());
        self.nodes.insert(node_id.to_string(), Node {
            node_id: node_id.to_string(),
            conn_id: conn_id.to_string(),
            capabilities,
            last_seen_at: Instant::now(),
            is_alive: true,
            missed_intervals: 0,
        });
        Ok(())
    }

    /// Point an existing node at a new connection (suspended → reconnect).
    pub fn rebind_conn(&mut self, node_id: &str, conn_id: &str) -> Result<()> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| Error::NodeNotFound(node_id.to_string()))?;
        self.by_conn.remove(&node.conn_id);
        self.by_conn.insert(conn_id.to_string(), node_id.to_string());
        node.conn_id = conn_id.to_string();
        node.last_seen_at = Instant::now();
        node.is_alive = true;
        node.missed_intervals = 0;
        Ok(())
    }

    /// Remove a node and every agent-index pointer still owned by it.
    pub fn deregister(&mut self, node_id: &str) -> Option<Node> {
        let node = self.nodes.remove(node_id)?;
        self.by_conn.remove(&node.conn_id);
        self.agents_write().retain(|_, owner| owner != node_id);
        Some(node)
    }

    pub fn get(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    pub fn node_for_conn(&self, conn_id: &str) -> Option<&str> {
        self.by_conn.get(conn_id).map(String::as_str)
    }

    pub fn count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    /// Replace a node's capabilities, re-indexing its agents.
    pub fn update_capabilities(
        &mut self,
        node_id: &str,
        capabilities: NodeCapabilities,
    ) -> Result<()> {
        if !self.nodes.contains_key(node_id) {
            return Err(Error::NodeNotFound(node_id.to_string()));
        }
        // Drop pointers this node owned but no longer advertises.
        let advertised: std::collections::HashSet<&str> =
            capabilities.agents.iter().map(String::as_str).collect();
        self.agents_write()
            .retain(|agent, owner| owner != node_id || advertised.contains(agent.as_str()));
        self.index_agents(node_id, &capabilities);
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.capabilities = capabilities;
        }
        Ok(())
    }

    /// The node currently serving an agent.
    pub fn node_for_agent(&self, agent_id: &str) -> Option<String> {
        self.agents_read().get(agent_id).cloned()
    }

    /// Record liveness for a node (any inbound traffic or a pong).
    pub fn touch(&mut self, node_id: &str) {
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.last_seen_at = Instant::now();
            node.is_alive = true;
            node.missed_intervals = 0;
        }
    }

    pub fn mark_stale(&mut self, node_id: &str) {
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.is_alive = false;
        }
    }

    pub fn record_missed_interval(&mut self, node_id: &str) -> u32 {
        match self.nodes.get_mut(node_id) {
            Some(node) => {
                node.missed_intervals += 1;
                node.missed_intervals
            },
            None => 0,
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.by_conn.clear();
        self.agents_write().clear();
    }

    fn index_agents(&mut self, node_id: &str, capabilities: &NodeCapabilities) {
        let mut agents = self.agents_write();
        for agent in &capabilities.agents {
            if let Some(prev) = agents.insert(agent.clone(), node_id.to_string())
                && prev != node_id
            {
                // Last write wins on duplicate agent registration.
                warn!(agent_id = %agent, old_node = %prev, new_node = %node_id,
                    "agent re-registered on a different node");
            }
        }
    }

    fn agents_read(&self) -> RwLockReadGuard<'_, HashMap<String, String>> {
        self.agents.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn agents_write(&self) -> RwLockWriteGuard<'_, HashMap<String, String>> {
        self.agents.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn caps(agents: &[&str]) -> NodeCapabilities {
        NodeCapabilities {
            agents: agents.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut reg = NodeRegistry::new();
        reg.register("n1", "c1", caps(&["bot"])).unwrap();
        assert_eq!(reg.count(), 1);
        assert_eq!(reg.node_for_agent("bot").as_deref(), Some("n1"));
        assert_eq!(reg.node_for_conn("c1"), Some("n1"));
    }

    #[test]
    fn duplicate_register_fails() {
        let mut reg = NodeRegistry::new();
        reg.register("n1", "c1", caps(&[])).unwrap();
        assert!(matches!(
            reg.register("n1", "c2", caps(&[])),
            Err(Error::AlreadyRegistered(_))
        ));
        // Original connection untouched.
        assert_eq!(reg.get("n1").unwrap().conn_id, "c1");
    }

    #[test]
    fn agent_conflict_last_write_wins() {
        let mut reg = NodeRegistry::new();
        reg.register("n1", "c1", caps(&["bot"])).unwrap();
        reg.register("n2", "c2", caps(&["bot"])).unwrap();
        assert_eq!(reg.node_for_agent("bot").as_deref(), Some("n2"));
        // Deregistering n1 must not remove the pointer n2 now owns.
        reg.deregister("n1");
        assert_eq!(reg.node_for_agent("bot").as_deref(), Some("n2"));
    }

    #[test]
    fn deregister_removes_owned_agents() {
        let mut reg = NodeRegistry::new();
        reg.register("n1", "c1", caps(&["a", "b"])).unwrap();
        reg.register("n2", "c2", caps(&["c"])).unwrap();
        reg.deregister("n1").unwrap();
        assert_eq!(reg.node_for_agent("a"), None);
        assert_eq!(reg.node_for_agent("b"), None);
        assert_eq!(reg.node_for_agent("c").as_deref(), Some("n2"));
        assert_eq!(reg.count(), 1);
    }

    #[test]
    fn update_capabilities_reindexes() {
        let mut reg = NodeRegistry::new();
        reg.register("n1", "c1", caps(&["a", "b"])).unwrap();
        reg.update_capabilities("n1", caps(&["b", "c"])).unwrap();
        assert_eq!(reg.node_for_agent("a"), None);
        assert_eq!(reg.node_for_agent("b").as_deref(), Some("n1"));
        assert_eq!(reg.node_for_agent("c").as_deref(), Some("n1"));
    }

    #[test]
    fn rebind_conn_moves_reverse_lookup() {
        let mut reg = NodeRegistry::new();
        reg.register("n1", "c1", caps(&[])).unwrap();
        reg.rebind_conn("n1", "c2").unwrap();
        assert_eq!(reg.node_for_conn("c1"), None);
        assert_eq!(reg.node_for_conn("c2"), Some("n1"));
    }

    #[test]
    fn shared_agent_index_tracks_registry() {
        let mut reg = NodeRegistry::new();
        let index = reg.agent_index();
        reg.register("n1", "c1", caps(&["bot"])).unwrap();
        assert_eq!(
            index.read().unwrap().get("bot").map(String::as_str),
            Some("n1")
        );
        reg.deregister("n1");
        assert!(index.read().unwrap().is_empty());
    }

    #[test]
    fn touch_resets_liveness() {
        let mut reg = NodeRegistry::new();
        reg.register("n1", "c1", caps(&[])).unwrap();
        reg.mark_stale("n1");
        assert_eq!(reg.record_missed_interval("n1"), 1);
        assert!(!reg.get("n1").unwrap().is_alive);
        reg.touch("n1");
        let node = reg.get("n1").unwrap();
        assert!(node.is_alive);
        assert_eq!(node.missed_intervals, 0);
    }
}
