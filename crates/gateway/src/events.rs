//! Internal event bus.
//!
//! Backpressure and lifecycle signals are published on a broadcast channel
//! so embedders (and tests) can observe them without reaching into gateway
//! state.

use switchyard_protocol::Lane;

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// A full lane dropped its oldest message to admit a new one.
    LaneOverflow {
        lane: Lane,
        node_id: String,
        capacity: usize,
    },
    /// A scoped route degraded its conversation scope.
    ConversationDegraded {
        agent_id: String,
        warnings: Vec<String>,
    },
    /// A node stopped answering pings and was suspended.
    NodeSuspended { node_id: String },
    /// A node was deregistered (explicitly or by timeout).
    NodeDeregistered { node_id: String, reason: String },
}
