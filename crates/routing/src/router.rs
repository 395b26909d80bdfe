//! The router: turns an inbound lane message into `(nodeId, conversationKey)`
//! and enqueues it on the target node's lanes.
//!
//! Target precedence: an agent binding resolved through the agent → node
//! index wins; otherwise the static channel binding applies. Scoped routing
//! additionally pins the conversation key to a node so follow-up traffic
//! sticks to it.

use std::{collections::HashMap, sync::Arc};

use tracing::debug;

use switchyard_protocol::LaneMessage;

use crate::{
    bindings::{AgentBinding, BindingResolver},
    conversation::ConversationStore,
    error::{Error, Result},
    lanes::{LaneDispatcher, LaneOverflow},
    scope::{ConversationScope, ScopedKey, conversation_key},
};

/// Resolves an agent id to the node currently serving it. Implemented by the
/// node registry; kept behind a trait so the router never reaches into
/// registry internals.
pub trait AgentNodeResolver: Send + Sync {
    fn node_for_agent(&self, agent_id: &str) -> Option<String>;
}

/// Invoked when a scoped route had to degrade its conversation scope.
pub type DegradationHook = Box<dyn Fn(&str, &[String]) + Send + Sync>;

/// A plain routing decision.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub node_id: String,
    /// The agent the binding resolver picked, when one matched.
    pub agent_id: Option<String>,
    pub overflow: Option<LaneOverflow>,
}

/// A routing decision that also established a conversation binding.
#[derive(Debug, Clone)]
pub struct ScopedRoute {
    pub node_id: String,
    pub key: String,
    pub effective_scope: ConversationScope,
    pub degraded: bool,
    pub warnings: Vec<String>,
    pub overflow: Option<LaneOverflow>,
}

pub struct Router {
    channel_bindings: HashMap<String, String>,
    resolver: BindingResolver,
    agent_nodes: Option<Arc<dyn AgentNodeResolver>>,
    default_scope: ConversationScope,
    scope_overrides: HashMap<String, ConversationScope>,
    degradation_hook: Option<DegradationHook>,
}

impl Router {
    pub fn new(default_scope: ConversationScope) -> Self {
        Self {
            channel_bindings: HashMap::new(),
            resolver: BindingResolver::default(),
            agent_nodes: None,
            default_scope,
            scope_overrides: HashMap::new(),
            degradation_hook: None,
        }
    }

    // ── Admin surface ────────────────────────────────────────────────────

    pub fn bind_channel(&mut self, channel_id: &str, node_id: &str) {
        self.channel_bindings
            .insert(channel_id.to_string(), node_id.to_string());
    }

    pub fn unbind_channel(&mut self, channel_id: &str) -> Option<String> {
        self.channel_bindings.remove(channel_id)
    }

    pub fn channel_binding(&self, channel_id: &str) -> Option<&str> {
        self.channel_bindings.get(channel_id).map(String::as_str)
    }

    /// Recompile the agent binding table (atomic swap).
    pub fn update_bindings(&mut self, bindings: &[AgentBinding]) {
        self.resolver.update_bindings(bindings);
    }

    pub fn set_agent_nodes(&mut self, resolver: Arc<dyn AgentNodeResolver>) {
        self.agent_nodes = Some(resolver);
    }

    pub fn set_degradation_hook(&mut self, hook: DegradationHook) {
        self.degradation_hook = Some(hook);
    }

    /// Change the gateway-wide default scope. The caller must clear the
    /// conversation store afterwards so old-format keys cannot straddle the
    /// change.
    pub fn set_default_scope(&mut self, scope: ConversationScope) -> ConversationScope {
        std::mem::replace(&mut self.default_scope, scope)
    }

    pub fn default_scope(&self) -> ConversationScope {
        self.default_scope
    }

    pub fn set_scope_override(&mut self, agent_id: &str, scope: ConversationScope) {
        self.scope_overrides.insert(agent_id.to_string(), scope);
    }

    /// Per-agent override, falling back to the gateway default.
    pub fn effective_scope(&self, agent_id: &str) -> ConversationScope {
        self.scope_overrides
            .get(agent_id)
            .copied()
            .unwrap_or(self.default_scope)
    }

    /// The agent the binding resolver picks for this message, if any.
    pub fn resolve_agent(&self, msg: &LaneMessage) -> Option<&str> {
        self.resolver.resolve_message(msg)
    }

    // ── Routing ──────────────────────────────────────────────────────────

    /// Pick the target node for a message without enqueueing it.
    pub fn resolve_target(&self, msg: &LaneMessage) -> Result<(String, Option<String>)> {
        if let Some(agent_id) = self.resolver.resolve_message(msg) {
            let node = self
                .agent_nodes
                .as_ref()
                .and_then(|r| r.node_for_agent(agent_id));
            return match node {
                Some(node_id) => Ok((node_id, Some(agent_id.to_string()))),
                None => Err(Error::AgentNotFound(agent_id.to_string())),
            };
        }
        self.channel_bindings
            .get(&msg.channel_id)
            .map(|n| (n.clone(), None))
            .ok_or_else(|| Error::NodeNotFound(msg.channel_id.clone()))
    }

    /// Route and enqueue. Fails when no binding matches, when a bound agent
    /// has no serving node, or when the target node has no dispatcher wired.
    pub fn route(&self, msg: LaneMessage, dispatch: &mut LaneDispatcher) -> Result<RouteOutcome> {
        let (node_id, agent_id) = self.resolve_target(&msg)?;
        if !dispatch.has_node(&node_id) {
            return Err(Error::NodeNotFound(node_id));
        }
        let overflow = dispatch.enqueue(&node_id, msg)?;
        Ok(RouteOutcome {
            node_id,
            agent_id,
            overflow,
        })
    }

    /// Compute the conversation key for a message without routing it or
    /// touching the store.
    pub fn resolve_conversation(&self, msg: &LaneMessage, agent_id: &str) -> Result<ScopedKey> {
        conversation_key(
            agent_id,
            self.effective_scope(agent_id),
            &msg.channel_id,
            msg.routing_context.as_ref(),
        )
    }

    /// Route with conversation affinity: compute the scope key, prefer the
    /// node an ongoing conversation is pinned to, enqueue, and (re)establish
    /// the binding in the store.
    pub fn route_with_scope(
        &self,
        msg: LaneMessage,
        agent_id: &str,
        dispatch: &mut LaneDispatcher,
        conversations: &mut ConversationStore,
    ) -> Result<ScopedRoute> {
        let scoped = self.resolve_conversation(&msg, agent_id)?;

        let node_id = match conversations.get(&scoped.key) {
            Some(binding) if dispatch.has_node(&binding.node_id) => binding.node_id.clone(),
            _ => {
                let (node_id, _) = self.resolve_target(&msg)?;
                if !dispatch.has_node(&node_id) {
                    return Err(Error::NodeNotFound(node_id));
                }
                node_id
            },
        };

        let overflow = dispatch.enqueue(&node_id, msg)?;
        conversations.bind(&scoped.key, &node_id);

        if scoped.degraded {
            debug!(agent_id, key = %scoped.key, "conversation scope degraded");
            if let Some(hook) = &self.degradation_hook {
                hook(agent_id, &scoped.warnings);
            }
        }

        Ok(ScopedRoute {
            node_id,
            key: scoped.key,
            effective_scope: scoped.effective_scope,
            degraded: scoped.degraded,
            warnings: scoped.warnings,
            overflow,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::{
        sync::Mutex,
        time::Duration,
    };

    use switchyard_protocol::{Lane, MessageType, RoutingContext};

    use {
        super::*,
        crate::bindings::BindingMatch,
    };

    struct FixedAgents(HashMap<String, String>);

    impl AgentNodeResolver for FixedAgents {
        fn node_for_agent(&self, agent_id: &str) -> Option<String> {
            self.0.get(agent_id).cloned()
        }
    }

    fn msg(id: &str, channel: &str, peer: Option<&str>) -> LaneMessage {
        LaneMessage {
            id: id.into(),
            lane: Lane::Steer,
            channel_id: channel.into(),
            payload: serde_json::Value::Null,
            timestamp: 0,
            routing_context: peer.map(|p| RoutingContext {
                peer_id: Some(p.into()),
                message_type: Some(MessageType::Dm),
                ..Default::default()
            }),
        }
    }

    fn dispatcher_with(nodes: &[&str]) -> LaneDispatcher {
        let mut d = LaneDispatcher::new(8);
        for n in nodes {
            d.add_node(n);
        }
        d
    }

    #[test]
    fn channel_binding_fallback() {
        let mut router = Router::new(ConversationScope::Main);
        router.bind_channel("ch", "n1");
        let mut d = dispatcher_with(&["n1"]);
        let outcome = router.route(msg("m1", "ch", None), &mut d).unwrap();
        assert_eq!(outcome.node_id, "n1");
        assert!(outcome.agent_id.is_none());
        assert_eq!(d.total_queued("n1"), 1);
    }

    #[test]
    fn agent_binding_takes_precedence() {
        let mut router = Router::new(ConversationScope::Main);
        router.bind_channel("ch", "n1");
        router.update_bindings(&[AgentBinding {
            agent_id: "bot".into(),
            matcher: BindingMatch::default(),
        }]);
        router.set_agent_nodes(Arc::new(FixedAgents(
            [("bot".to_string(), "n2".to_string())].into(),
        )));
        let mut d = dispatcher_with(&["n1", "n2"]);
        let outcome = router.route(msg("m1", "ch", None), &mut d).unwrap();
        assert_eq!(outcome.node_id, "n2");
        assert_eq!(outcome.agent_id.as_deref(), Some("bot"));
    }

    #[test]
    fn unbound_channel_is_node_not_found() {
        let router = Router::new(ConversationScope::Main);
        let mut d = dispatcher_with(&[]);
        assert!(matches!(
            router.route(msg("m1", "ch", None), &mut d),
            Err(Error::NodeNotFound(_))
        ));
    }

    #[test]
    fn agent_without_serving_node_is_agent_not_found() {
        let mut router = Router::new(ConversationScope::Main);
        router.update_bindings(&[AgentBinding {
            agent_id: "bot".into(),
            matcher: BindingMatch::default(),
        }]);
        router.set_agent_nodes(Arc::new(FixedAgents(HashMap::new())));
        let mut d = dispatcher_with(&[]);
        assert!(matches!(
            router.route(msg("m1", "ch", None), &mut d),
            Err(Error::AgentNotFound(_))
        ));
    }

    #[test]
    fn bound_node_without_dispatcher_is_node_not_found() {
        let mut router = Router::new(ConversationScope::Main);
        router.bind_channel("ch", "n1");
        let mut d = dispatcher_with(&[]);
        assert!(matches!(
            router.route(msg("m1", "ch", None), &mut d),
            Err(Error::NodeNotFound(_))
        ));
    }

    #[test]
    fn scoped_route_establishes_binding() {
        let mut router = Router::new(ConversationScope::PerChannelPeer);
        router.bind_channel("whatsapp", "n1");
        let mut d = dispatcher_with(&["n1"]);
        let mut store = ConversationStore::new(16, Duration::from_secs(60));
        let route = router
            .route_with_scope(msg("m1", "whatsapp", Some("p1")), "bot", &mut d, &mut store)
            .unwrap();
        assert_eq!(route.key, "agent:bot:whatsapp:dm:p1");
        assert_eq!(store.peek(&route.key).unwrap().node_id, "n1");
    }

    #[test]
    fn conversation_sticks_to_pinned_node() {
        let mut router = Router::new(ConversationScope::PerPeer);
        router.bind_channel("ch", "n1");
        let mut d = dispatcher_with(&["n1", "n2"]);
        let mut store = ConversationStore::new(16, Duration::from_secs(60));
        // Pin the conversation to n2, then route: the pin wins over the
        // channel binding.
        store.bind("agent:bot:dm:p1", "n2");
        let route = router
            .route_with_scope(msg("m1", "ch", Some("p1")), "bot", &mut d, &mut store)
            .unwrap();
        assert_eq!(route.node_id, "n2");
        assert_eq!(d.total_queued("n2"), 1);
        assert_eq!(d.total_queued("n1"), 0);
    }

    #[test]
    fn stale_pin_falls_back_to_bindings() {
        let mut router = Router::new(ConversationScope::PerPeer);
        router.bind_channel("ch", "n1");
        let mut d = dispatcher_with(&["n1"]);
        let mut store = ConversationStore::new(16, Duration::from_secs(60));
        store.bind("agent:bot:dm:p1", "gone");
        let route = router
            .route_with_scope(msg("m1", "ch", Some("p1")), "bot", &mut d, &mut store)
            .unwrap();
        assert_eq!(route.node_id, "n1");
        assert_eq!(store.peek("agent:bot:dm:p1").unwrap().node_id, "n1");
    }

    #[test]
    fn degradation_hook_fires() {
        let mut router = Router::new(ConversationScope::PerAccountChannelPeer);
        router.bind_channel("ch", "n1");
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        router.set_degradation_hook(Box::new(move |agent, warnings| {
            sink.lock().unwrap().push(format!("{agent}:{}", warnings.len()));
        }));
        let mut d = dispatcher_with(&["n1"]);
        let mut store = ConversationStore::new(16, Duration::from_secs(60));
        let route = router
            .route_with_scope(msg("m1", "ch", Some("p1")), "bot", &mut d, &mut store)
            .unwrap();
        assert!(route.degraded);
        assert_eq!(seen.lock().unwrap().as_slice(), ["bot:1".to_string()]);
    }

    #[test]
    fn missing_peer_id_fails_scoped_route() {
        let mut router = Router::new(ConversationScope::PerChannelPeer);
        router.bind_channel("ch", "n1");
        let mut d = dispatcher_with(&["n1"]);
        let mut store = ConversationStore::new(16, Duration::from_secs(60));
        assert!(matches!(
            router.route_with_scope(msg("m1", "ch", None), "bot", &mut d, &mut store),
            Err(Error::MissingPeerId(_))
        ));
        assert_eq!(d.total_queued("n1"), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn scope_override_beats_default() {
        let mut router = Router::new(ConversationScope::Main);
        router.set_scope_override("bot", ConversationScope::PerPeer);
        assert_eq!(router.effective_scope("bot"), ConversationScope::PerPeer);
        assert_eq!(router.effective_scope("other"), ConversationScope::Main);
    }
}
