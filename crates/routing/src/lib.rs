//! Message routing: agent bindings, conversation scoping and affinity,
//! per-node lane queues, and delivery tracking.

mod bindings;
mod conversation;
mod delivery;
mod error;
mod lanes;
mod router;
mod scope;

pub use {
    bindings::{AgentBinding, BindingMatch, BindingResolver},
    conversation::{ConversationBinding, ConversationStore},
    delivery::{DeliveryTracker, PendingDelivery},
    error::{Error, Result},
    lanes::{LaneDispatcher, LaneOverflow},
    router::{AgentNodeResolver, RouteOutcome, Router, ScopedRoute},
    scope::{ConversationScope, ScopedKey, conversation_key},
};
