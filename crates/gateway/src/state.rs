//! Shared gateway runtime state.
//!
//! Every process-wide component sits behind its own `RwLock` field. Lock
//! ordering, for flows that must hold more than one:
//! `auth → registry → sessions → dispatcher → tracker → router →
//! conversations → pairing`. Cross-component flows (deregistration,
//! disconnect) release each lock before progressing downstream, so no flow
//! holds more than three at once.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use {
    tokio::sync::{RwLock, broadcast, mpsc},
    tokio_util::{sync::CancellationToken, task::TaskTracker},
    tracing::{debug, info, warn},
};

use {
    switchyard_auth::{AuthVerifier, DeviceKeyStore, HandshakeAuth},
    switchyard_config::GatewayConfig,
    switchyard_protocol::{
        DelegationCancel, Frame, SessionUpdate, close_codes, encode_frame,
    },
    switchyard_routing::{
        AgentNodeResolver, ConversationStore, DeliveryTracker, LaneDispatcher, Router,
    },
};

use crate::{
    events::GatewayEvent,
    nodes::NodeRegistry,
    pairing::PairingGuard,
    services::GatewayServices,
    session::SessionManager,
};

// ── Outbound channel ─────────────────────────────────────────────────────────

/// What a connection's write loop can be asked to do.
#[derive(Debug, Clone)]
pub enum WsOut {
    /// A pre-serialized JSON frame.
    Frame(String),
    /// Close the socket with a code and reason, then stop.
    Close { code: u16, reason: String },
}

// ── Connection ───────────────────────────────────────────────────────────────

/// A live WebSocket connection.
pub struct Connection {
    pub conn_id: String,
    /// Channel into this connection's write loop.
    pub sender: mpsc::UnboundedSender<WsOut>,
    pub connected_at: Instant,
    pub remote_ip: Option<String>,
    pub handshake_auth: HandshakeAuth,
}

impl Connection {
    pub fn send_frame(&self, frame: &Frame) -> bool {
        match encode_frame(frame) {
            Ok(text) => self.sender.send(WsOut::Frame(text)).is_ok(),
            Err(e) => {
                warn!(conn_id = %self.conn_id, error = %e, "failed to encode frame");
                false
            },
        }
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.sender.send(WsOut::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

// ── Pending delegation ───────────────────────────────────────────────────────

/// A delegation awaiting accept/result from the target node.
pub struct PendingDelegation {
    pub requester_conn: String,
    pub requester_node: String,
    pub target_node: String,
    pub created_at: Instant,
}

// ── Gateway state ────────────────────────────────────────────────────────────

pub struct GatewayState {
    pub config: GatewayConfig,

    pub auth: RwLock<AuthVerifier>,
    pub registry: RwLock<NodeRegistry>,
    pub sessions: RwLock<SessionManager>,
    pub dispatcher: RwLock<LaneDispatcher>,
    pub tracker: RwLock<DeliveryTracker>,
    pub router: RwLock<Router>,
    pub conversations: RwLock<ConversationStore>,
    pub pairing: RwLock<PairingGuard>,

    /// Live WebSocket connections, keyed by conn_id.
    pub connections: RwLock<HashMap<String, Connection>>,
    /// Delegations in flight, keyed by delegation id.
    pub delegations: RwLock<HashMap<String, PendingDelegation>>,

    pub services: GatewayServices,
    /// Observer-store calls currently in flight (bounded by
    /// `max_observer_calls`).
    pub observer_inflight: std::sync::atomic::AtomicUsize,
    events: broadcast::Sender<GatewayEvent>,

    /// Background tasks owned by the gateway; `stop()` waits for these.
    pub tasks: TaskTracker,
    pub cancel: CancellationToken,
    stopped: AtomicBool,
}

/// Agent-index view handed to the router, so the router never touches
/// registry internals.
struct RegistryAgentIndex {
    index: crate::nodes::AgentIndex,
}

impl AgentNodeResolver for RegistryAgentIndex {
    fn node_for_agent(&self, agent_id: &str) -> Option<String> {
        self.index
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(agent_id)
            .cloned()
    }
}

impl GatewayState {
    pub fn new(config: GatewayConfig, services: GatewayServices) -> Arc<Self> {
        let mut keys = DeviceKeyStore::new(
            config.device_auth.allow_tofu,
            config.device_auth.max_device_keys,
        );
        keys.seed(
            config
                .device_auth
                .known_keys
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );
        let auth = AuthVerifier::new(
            config.auth_mode,
            config.auth_token.clone(),
            keys,
            Duration::from_millis(config.device_auth.jwt_max_age_ms),
        );

        let registry = NodeRegistry::new();
        let (events, _) = broadcast::channel(256);

        let mut router = Router::new(config.default_conversation_scope);
        router.update_bindings(&config.bindings);
        for (agent, scope) in &config.scope_overrides {
            router.set_scope_override(agent, *scope);
        }
        router.set_agent_nodes(Arc::new(RegistryAgentIndex {
            index: registry.agent_index(),
        }));
        let hook_events = events.clone();
        router.set_degradation_hook(Box::new(move |agent_id, warnings| {
            let _ = hook_events.send(GatewayEvent::ConversationDegraded {
                agent_id: agent_id.to_string(),
                warnings: warnings.to_vec(),
            });
        }));

        let pairing = PairingGuard::new(
            config.pairing.enabled,
            config.pairing.channels.iter().cloned(),
            Duration::from_millis(config.pairing.expiry_ms),
            config.pairing.max_attempts,
        );

        Arc::new(Self {
            auth: RwLock::new(auth),
            registry: RwLock::new(registry),
            sessions: RwLock::new(SessionManager::new(
                Duration::from_millis(config.session_timeout_ms),
                Duration::from_millis(config.suspend_timeout_ms),
            )),
            dispatcher: RwLock::new(LaneDispatcher::new(config.lane_capacity)),
            tracker: RwLock::new(DeliveryTracker::new(config.max_pending)),
            router: RwLock::new(router),
            conversations: RwLock::new(ConversationStore::new(
                config.max_conversations,
                Duration::from_millis(config.conversation_ttl_ms),
            )),
            pairing: RwLock::new(pairing),
            connections: RwLock::new(HashMap::new()),
            delegations: RwLock::new(HashMap::new()),
            services,
            observer_inflight: std::sync::atomic::AtomicUsize::new(0),
            events,
            tasks: TaskTracker::new(),
            cancel: CancellationToken::new(),
            stopped: AtomicBool::new(false),
            config,
        })
    }

    // ── Events ───────────────────────────────────────────────────────────

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: GatewayEvent) {
        let _ = self.events.send(event);
    }

    // ── Connections ──────────────────────────────────────────────────────

    pub async fn register_connection(&self, conn: Connection) {
        let conn_id = conn.conn_id.clone();
        self.connections.write().await.insert(conn_id, conn);
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a frame to a specific connection. Silently dropped if the
    /// connection is gone.
    pub async fn send_to_conn(&self, conn_id: &str, frame: &Frame) {
        if let Some(conn) = self.connections.read().await.get(conn_id) {
            conn.send_frame(frame);
        }
    }

    /// Send a frame to the connection serving a node. No-op for unknown
    /// nodes; the payload is serialized once.
    pub async fn send_frame(&self, node_id: &str, frame: &Frame) -> bool {
        let conn_id = {
            let registry = self.registry.read().await;
            match registry.get(node_id) {
                Some(node) => node.conn_id.clone(),
                None => return false,
            }
        };
        let connections = self.connections.read().await;
        connections
            .get(&conn_id)
            .map(|c| c.send_frame(frame))
            .unwrap_or(false)
    }

    /// Fan a frame out to every connection except `skip`.
    pub async fn broadcast_frame(&self, frame: &Frame, skip: Option<&str>) {
        let Ok(text) = encode_frame(frame) else {
            return;
        };
        let connections = self.connections.read().await;
        for (conn_id, conn) in connections.iter() {
            if Some(conn_id.as_str()) == skip {
                continue;
            }
            let _ = conn.sender.send(WsOut::Frame(text.clone()));
        }
    }

    // ── Delivery ─────────────────────────────────────────────────────────

    /// Push everything queued for a node down its connection, tracking each
    /// send. Skipped while the session is suspended (queues held).
    pub async fn flush_node(&self, node_id: &str) {
        use switchyard_protocol::{LaneMessageFrame, SessionState};

        let deliverable = {
            let sessions = self.sessions.read().await;
            sessions.get(node_id).is_some_and(|s| {
                matches!(s.state, SessionState::Connected | SessionState::Idle)
            })
        };
        if !deliverable {
            return;
        }

        let queued = self.dispatcher.write().await.drain(node_id);
        if queued.is_empty() {
            return;
        }
        {
            let mut tracker = self.tracker.write().await;
            for msg in &queued {
                tracker.track(node_id, &msg.id);
            }
        }
        for msg in queued {
            let frame = Frame::LaneMessage(LaneMessageFrame {
                lane: msg.lane,
                message: msg,
            });
            if !self.send_frame(node_id, &frame).await {
                debug!(node_id, "downstream send failed, node connection gone");
                break;
            }
        }
    }

    // ── Teardown flows ───────────────────────────────────────────────────

    /// Full node removal: registry, session, queues, pending deliveries,
    /// conversations, pairing approvals, key-store activity, delegations.
    /// Safe to call for an already-removed node.
    pub async fn cleanup_node(&self, node_id: &str, reason: &str) {
        let removed = self.registry.write().await.deregister(node_id);
        if removed.is_none() {
            return;
        }
        info!(node_id, reason, "node deregistered");

        let session = self.sessions.write().await.remove(node_id);
        let dropped = self.dispatcher.write().await.remove_node(node_id);
        if !dropped.is_empty() {
            debug!(node_id, dropped = dropped.len(), "dropped queued messages");
        }
        self.tracker.write().await.remove_node(node_id);
        self.conversations.write().await.evict_node(node_id);
        self.pairing.write().await.evict_node(node_id);
        self.auth.write().await.keys_mut().mark_inactive(node_id);
        self.cancel_delegations_for(node_id).await;

        if let Some(session) = session {
            self.broadcast_frame(
                &Frame::SessionUpdate(SessionUpdate {
                    node_id: node_id.to_string(),
                    session_id: session.session_id,
                    state: switchyard_protocol::SessionState::Disconnected,
                }),
                None,
            )
            .await;
        }

        self.emit(GatewayEvent::NodeDeregistered {
            node_id: node_id.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Transport-level disconnect. Exactly-once per connection: the
    /// connection-table entry is the guard, so a deregister frame followed
    /// by the socket closing (or vice versa) cleans up once.
    pub async fn disconnect_conn(&self, conn_id: &str) {
        let Some(conn) = self.connections.write().await.remove(conn_id) else {
            return;
        };
        debug!(conn_id, elapsed_secs = conn.connected_at.elapsed().as_secs(),
            "connection closed");

        let node_id = {
            let registry = self.registry.read().await;
            registry
                .node_for_conn(conn_id)
                .map(str::to_string)
        };
        let Some(node_id) = node_id else {
            return;
        };

        // The node stays registered; the session suspends and queues are
        // held until the suspend timer or a reconnect decides its fate.
        self.auth.write().await.keys_mut().mark_inactive(&node_id);
        let transition = self.sessions.write().await.suspend(&node_id);
        if let Some(t) = transition {
            info!(node_id = %node_id, "session suspended on disconnect");
            self.broadcast_frame(
                &Frame::SessionUpdate(SessionUpdate {
                    node_id: t.node_id,
                    session_id: t.session_id,
                    state: t.state,
                }),
                Some(conn_id),
            )
            .await;
            self.emit(GatewayEvent::NodeSuspended { node_id });
        }
    }

    /// Cancel and forget delegations involving a node that went away.
    async fn cancel_delegations_for(&self, node_id: &str) {
        let affected: Vec<(String, PendingDelegation)> = {
            let mut delegations = self.delegations.write().await;
            let ids: Vec<String> = delegations
                .iter()
                .filter(|(_, d)| d.requester_node == node_id || d.target_node == node_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| delegations.remove(&id).map(|d| (id, d)))
                .collect()
        };
        for (delegation_id, pending) in affected {
            let other = if pending.target_node == node_id {
                pending.requester_node.clone()
            } else {
                pending.target_node.clone()
            };
            let cancel = Frame::DelegationCancel(DelegationCancel {
                delegation_id,
                reason: Some(format!("node {node_id} disconnected")),
            });
            self.send_frame(&other, &cancel).await;
        }
    }

    // ── Stop ─────────────────────────────────────────────────────────────

    /// Idempotent shutdown: cancel background work, close every connection
    /// with 1001, wait for in-flight frame handling, clear all state.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("gateway stopping");
        self.cancel.cancel();

        {
            let connections = self.connections.read().await;
            for conn in connections.values() {
                conn.close(close_codes::GOING_AWAY, "gateway stopping");
            }
        }

        self.tasks.close();
        self.tasks.wait().await;

        self.connections.write().await.clear();
        self.delegations.write().await.clear();
        self.registry.write().await.clear();
        self.sessions.write().await.clear();
        self.dispatcher.write().await.clear();
        self.tracker.write().await.clear();
        self.conversations.write().await.clear();
        self.pairing.write().await.clear();
        info!("gateway stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    // ── Admin surface ────────────────────────────────────────────────────

    /// Bind a channel directly to a node.
    pub async fn bind_channel(&self, channel_id: &str, node_id: &str) {
        self.router.write().await.bind_channel(channel_id, node_id);
    }

    pub async fn unbind_channel(&self, channel_id: &str) {
        self.router.write().await.unbind_channel(channel_id);
    }

    /// Replace the agent binding table (atomic swap).
    pub async fn update_bindings(&self, bindings: &[switchyard_routing::AgentBinding]) {
        self.router.write().await.update_bindings(bindings);
    }

    /// Change the default conversation scope. Clears the conversation store
    /// so keys in the old format cannot straddle the change.
    pub async fn set_default_scope(&self, scope: switchyard_routing::ConversationScope) {
        self.router.write().await.set_default_scope(scope);
        self.conversations.write().await.clear();
    }

    /// Issue a pairing code for a `(node, channel)` pair.
    pub async fn generate_pairing_code(
        &self,
        node_id: &str,
        channel_id: &str,
    ) -> crate::pairing::PairingCode {
        self.pairing.write().await.generate_code(node_id, channel_id)
    }
}
