//! Per-frame handlers.
//!
//! The transport read loop fully processes one frame before dispatching the
//! next from the same connection, so each handler runs without intra-
//! connection races. Handlers send their own responses and error frames;
//! routing errors leave the connection open, auth failures close it.

use std::sync::{Arc, atomic::Ordering};

use tracing::{debug, info, warn};

use {
    switchyard_auth::{Credentials, HandshakeAuth},
    switchyard_protocol::{
        DelegationAccept, DelegationCancel, DelegationRequest, DelegationResult, ErrorCode, Frame,
        LaneMessage, LaneMessageAck, MessageType, NodeDeregister, NodeRegister, NodeRegisterAck,
        SessionIdentityUpdate, SessionUpdate,
    },
    switchyard_routing as routing,
};

use crate::{
    events::GatewayEvent,
    pairing::PairingStatus,
    services::{ObservationEntry, safe_call},
    state::GatewayState,
};

/// Dispatch one inbound frame from `conn_id`.
pub async fn handle_frame(state: &Arc<GatewayState>, conn_id: &str, frame: Frame) {
    // Any frame from a registered connection counts as node activity,
    // except heartbeats: pongs prove liveness but must not keep an
    // otherwise-quiet session out of idle.
    let registered_node = {
        let registry = state.registry.read().await;
        registry.node_for_conn(conn_id).map(str::to_string)
    };
    if let Some(node_id) = &registered_node {
        match &frame {
            Frame::HeartbeatPong(_) | Frame::HeartbeatPing(_) => {},
            _ => {
                state.registry.write().await.touch(node_id);
                if let Some(t) = state.sessions.write().await.touch(node_id) {
                    announce_session(state, &t, Some(conn_id)).await;
                }
            },
        }
    }

    match frame {
        Frame::NodeRegister(register) => handle_register(state, conn_id, register).await,
        Frame::NodeDeregister(deregister) => {
            handle_deregister(state, conn_id, registered_node.as_deref(), deregister).await;
        },
        Frame::HeartbeatPong(_) => {
            if let Some(node_id) = &registered_node {
                state.registry.write().await.touch(node_id);
            }
        },
        Frame::LaneMessage(frame) => {
            handle_lane_message(state, conn_id, registered_node.as_deref(), frame.message).await;
        },
        Frame::LaneMessageAck(ack) => {
            handle_lane_ack(state, registered_node.as_deref(), ack).await;
        },
        Frame::SessionIdentityUpdate(update) => {
            handle_identity_update(state, conn_id, registered_node.as_deref(), update).await;
        },
        Frame::DelegationRequest(request) => {
            handle_delegation_request(state, conn_id, registered_node.as_deref(), request).await;
        },
        Frame::DelegationAccept(accept) => handle_delegation_accept(state, accept).await,
        Frame::DelegationResult(result) => handle_delegation_result(state, result).await,
        Frame::DelegationCancel(cancel) => {
            handle_delegation_cancel(state, registered_node.as_deref(), cancel).await;
        },
        // Outbound-only kinds arriving inbound are ignored.
        Frame::NodeRegisterAck(_)
        | Frame::HeartbeatPing(_)
        | Frame::SessionUpdate(_)
        | Frame::Error(_) => {
            debug!(conn_id, kind = frame.kind(), "ignoring outbound-only frame kind");
        },
    }
}

async fn send_error(state: &GatewayState, conn_id: &str, code: ErrorCode, detail: Option<String>) {
    state
        .send_to_conn(conn_id, &Frame::error(code, detail))
        .await;
}

async fn announce_session(
    state: &GatewayState,
    transition: &crate::session::SessionTransition,
    skip: Option<&str>,
) {
    state
        .broadcast_frame(
            &Frame::SessionUpdate(SessionUpdate {
                node_id: transition.node_id.clone(),
                session_id: transition.session_id.clone(),
                state: transition.state,
            }),
            skip,
        )
        .await;
}

// ── node.register ────────────────────────────────────────────────────────────

async fn handle_register(state: &Arc<GatewayState>, conn_id: &str, register: NodeRegister) {
    if register.node_id.is_empty() {
        send_error(
            state,
            conn_id,
            ErrorCode::SchemaError,
            Some("nodeId must not be empty".into()),
        )
        .await;
        return;
    }

    // Handshake-granted connections (legacy/dual bearer token) skip frame
    // credentials; everything else is verified here.
    let handshake_granted = {
        let connections = state.connections.read().await;
        connections
            .get(conn_id)
            .is_some_and(|c| c.handshake_auth == HandshakeAuth::Granted)
    };
    if !handshake_granted {
        let result = state.auth.write().await.verify_register(
            &register.node_id,
            Credentials {
                token: register.token.as_deref(),
                signature: register.signature.as_deref(),
                public_key: register.public_key.as_deref(),
            },
        );
        if let Err(e) = result {
            warn!(conn_id, node_id = %register.node_id, error = %e, "register auth failed");
            send_error(state, conn_id, e.code(), Some(e.to_string())).await;
            let connections = state.connections.read().await;
            if let Some(conn) = connections.get(conn_id) {
                conn.close(e.close_code(), e.code().title());
            }
            return;
        }
    }

    // A suspended node re-registering under the same id is a reconnect;
    // anything else with an existing id is a conflict.
    let suspended = {
        let sessions = state.sessions.read().await;
        sessions
            .get(&register.node_id)
            .is_some_and(|s| s.state == switchyard_protocol::SessionState::Suspended)
    };
    if suspended {
        let rebound = state
            .registry
            .write()
            .await
            .rebind_conn(&register.node_id, conn_id);
        if rebound.is_ok()
            && let Some(t) = state.sessions.write().await.resume(&register.node_id)
        {
            info!(conn_id, node_id = %register.node_id, "node reconnected, session resumed");
            state.auth.write().await.keys_mut().mark_active(&register.node_id);
            let session_id = t.session_id.clone();
            announce_session(state, &t, Some(conn_id)).await;
            state
                .send_to_conn(
                    conn_id,
                    &Frame::NodeRegisterAck(NodeRegisterAck {
                        node_id: register.node_id.clone(),
                        session_id,
                    }),
                )
                .await;
            // Held queues drain now that delivery is possible again.
            state.flush_node(&register.node_id).await;
            return;
        }
    }

    let registered = state.registry.write().await.register(
        &register.node_id,
        conn_id,
        register.capabilities.clone(),
    );
    if let Err(e) = registered {
        warn!(conn_id, node_id = %register.node_id, "duplicate registration rejected");
        send_error(
            state,
            conn_id,
            ErrorCode::AlreadyRegistered,
            Some(e.to_string()),
        )
        .await;
        return;
    }

    let session_id = {
        let mut sessions = state.sessions.write().await;
        sessions.create(&register.node_id).session_id
    };
    state.dispatcher.write().await.add_node(&register.node_id);
    state.auth.write().await.keys_mut().mark_active(&register.node_id);

    info!(conn_id, node_id = %register.node_id, session_id = %session_id, "node registered");
    state
        .send_to_conn(
            conn_id,
            &Frame::NodeRegisterAck(NodeRegisterAck {
                node_id: register.node_id,
                session_id,
            }),
        )
        .await;
}

// ── node.deregister ──────────────────────────────────────────────────────────

async fn handle_deregister(
    state: &Arc<GatewayState>,
    conn_id: &str,
    registered_node: Option<&str>,
    deregister: NodeDeregister,
) {
    // Only the connection that registered a node may deregister it.
    if registered_node != Some(deregister.node_id.as_str()) {
        warn!(conn_id, node_id = %deregister.node_id, "cross-node deregister rejected");
        send_error(
            state,
            conn_id,
            ErrorCode::CrossNodeDeregister,
            Some(format!(
                "connection does not own node {}",
                deregister.node_id
            )),
        )
        .await;
        return;
    }
    let reason = deregister.reason.as_deref().unwrap_or("deregistered").to_string();
    state.cleanup_node(&deregister.node_id, &reason).await;
}

// ── lane.message ─────────────────────────────────────────────────────────────

async fn handle_lane_message(
    state: &Arc<GatewayState>,
    conn_id: &str,
    registered_node: Option<&str>,
    msg: LaneMessage,
) {
    // Producers must themselves be registered nodes.
    if registered_node.is_none() {
        send_error(
            state,
            conn_id,
            ErrorCode::Forbidden,
            Some("lane traffic requires a registered node".into()),
        )
        .await;
        return;
    }

    // Pick the target before the pairing gate; the allow-list is scoped per
    // target node.
    let (target, agent_id) = {
        let router = state.router.read().await;
        match router.resolve_target(&msg) {
            Ok(target) => target,
            Err(e) => {
                send_routing_error(state, conn_id, &e).await;
                return;
            },
        }
    };

    if let Some(ctx) = &msg.routing_context
        && let Some(peer_id) = ctx.peer_id.as_deref()
    {
        let message_type = ctx.message_type.unwrap_or(MessageType::Dm);
        let status = state.pairing.write().await.check_sender(
            &target,
            &msg.channel_id,
            peer_id,
            message_type,
            msg.payload_text(),
        );
        match status {
            PairingStatus::Blocked => {
                debug!(conn_id, peer_id, channel_id = %msg.channel_id, "dm blocked, pairing required");
                send_error(state, conn_id, ErrorCode::PairingRequired, None).await;
                return;
            },
            PairingStatus::ExpiredCode => {
                send_error(state, conn_id, ErrorCode::PairingExpired, None).await;
                return;
            },
            PairingStatus::RateLimited => {
                send_error(state, conn_id, ErrorCode::RateLimited, None).await;
                return;
            },
            PairingStatus::NotRequired | PairingStatus::Approved | PairingStatus::Paired => {},
        }
    }

    let message_id = msg.id.clone();
    let channel_id = msg.channel_id.clone();
    let payload = msg.payload.clone();

    // Lock order: dispatcher → router → conversations.
    let routed = {
        let mut dispatcher = state.dispatcher.write().await;
        let router = state.router.read().await;
        match &agent_id {
            Some(agent) => {
                let mut conversations = state.conversations.write().await;
                router
                    .route_with_scope(msg, agent, &mut dispatcher, &mut conversations)
                    .map(|r| (r.node_id, Some(r.key), r.overflow))
            },
            None => router
                .route(msg, &mut dispatcher)
                .map(|r| (r.node_id, None, r.overflow)),
        }
    };

    let (node_id, conversation_key, overflow) = match routed {
        Ok(r) => r,
        Err(e) => {
            send_routing_error(state, conn_id, &e).await;
            return;
        },
    };

    if let Some(overflow) = overflow {
        warn!(node_id = %overflow.node_id, lane = %overflow.lane, capacity = overflow.capacity,
            "lane overflow, dropped oldest message");
        state.emit(GatewayEvent::LaneOverflow {
            lane: overflow.lane,
            node_id: overflow.node_id,
            capacity: overflow.capacity,
        });
    }

    // Accept the message toward the producer, then push it downstream.
    state
        .send_to_conn(
            conn_id,
            &Frame::LaneMessageAck(LaneMessageAck {
                message_id: message_id.clone(),
            }),
        )
        .await;
    state.flush_node(&node_id).await;

    observe_message(state, &node_id, &channel_id, conversation_key, payload);
}

async fn send_routing_error(state: &GatewayState, conn_id: &str, err: &routing::Error) {
    let (code, detail) = match err {
        // An unbound message is a gateway-side routing failure.
        routing::Error::NodeNotFound(_) => {
            (ErrorCode::RoutingFailed, Some(err.to_string()))
        },
        routing::Error::AgentNotFound(_) => (ErrorCode::AgentNotFound, Some(err.to_string())),
        routing::Error::MissingPeerId(_) => (ErrorCode::MissingPeerId, Some(err.to_string())),
    };
    send_error(state, conn_id, code, detail).await;
}

/// Hand the routed message to the observation store, bounded by
/// `max_observer_calls`; 0 disables observation entirely.
fn observe_message(
    state: &Arc<GatewayState>,
    node_id: &str,
    channel_id: &str,
    conversation_key: Option<String>,
    payload: serde_json::Value,
) {
    let max = state.config.max_observer_calls;
    if max == 0 {
        return;
    }
    let inflight = state.observer_inflight.fetch_add(1, Ordering::SeqCst);
    if inflight >= max {
        state.observer_inflight.fetch_sub(1, Ordering::SeqCst);
        debug!(node_id, "observer pipeline saturated, skipping entry");
        return;
    }
    let entry = ObservationEntry {
        node_id: node_id.to_string(),
        channel_id: channel_id.to_string(),
        conversation_key,
        payload,
    };
    let memory = Arc::clone(&state.services.memory);
    let deadline = std::time::Duration::from_millis(state.config.rpc_timeout_ms);
    let counter = Arc::clone(state);
    state.tasks.spawn(async move {
        safe_call("memory.batch_store", deadline, (), memory.batch_store(vec![entry])).await;
        counter.observer_inflight.fetch_sub(1, Ordering::SeqCst);
    });
}

// ── lane.message.ack ─────────────────────────────────────────────────────────

async fn handle_lane_ack(
    state: &Arc<GatewayState>,
    registered_node: Option<&str>,
    ack: LaneMessageAck,
) {
    let Some(node_id) = registered_node else {
        return;
    };
    let acked = state.tracker.write().await.ack(node_id, &ack.message_id);
    if !acked {
        debug!(node_id, message_id = %ack.message_id, "ack for unknown delivery");
    }
}

// ── session.identity.update ──────────────────────────────────────────────────

async fn handle_identity_update(
    state: &Arc<GatewayState>,
    conn_id: &str,
    registered_node: Option<&str>,
    update: SessionIdentityUpdate,
) {
    if registered_node != Some(update.node_id.as_str()) {
        send_error(
            state,
            conn_id,
            ErrorCode::Forbidden,
            Some("connection does not own this node".into()),
        )
        .await;
        return;
    }
    let changed = state
        .sessions
        .write()
        .await
        .update_identity(&update.node_id, update.identity.clone());
    if changed {
        state
            .broadcast_frame(&Frame::SessionIdentityUpdate(update), Some(conn_id))
            .await;
    }
}

// ── delegation.* ─────────────────────────────────────────────────────────────

async fn handle_delegation_request(
    state: &Arc<GatewayState>,
    conn_id: &str,
    registered_node: Option<&str>,
    request: DelegationRequest,
) {
    let Some(requester_node) = registered_node else {
        send_error(
            state,
            conn_id,
            ErrorCode::Forbidden,
            Some("delegation requires a registered node".into()),
        )
        .await;
        return;
    };

    let target_node = {
        let registry = state.registry.read().await;
        registry.node_for_agent(&request.agent_id)
    };
    let Some(target_node) = target_node else {
        send_error(
            state,
            conn_id,
            ErrorCode::AgentNotFound,
            Some(format!("no node serving agent {}", request.agent_id)),
        )
        .await;
        return;
    };

    state.delegations.write().await.insert(
        request.delegation_id.clone(),
        crate::state::PendingDelegation {
            requester_conn: conn_id.to_string(),
            requester_node: requester_node.to_string(),
            target_node: target_node.clone(),
            created_at: std::time::Instant::now(),
        },
    );
    debug!(delegation_id = %request.delegation_id, requester = %requester_node,
        target = %target_node, "delegation forwarded");
    state
        .send_frame(&target_node, &Frame::DelegationRequest(request))
        .await;
}

async fn handle_delegation_accept(state: &Arc<GatewayState>, accept: DelegationAccept) {
    let requester = {
        let delegations = state.delegations.read().await;
        delegations
            .get(&accept.delegation_id)
            .map(|d| d.requester_conn.clone())
    };
    match requester {
        Some(conn) => {
            state
                .send_to_conn(&conn, &Frame::DelegationAccept(accept))
                .await;
        },
        None => warn!(delegation_id = %accept.delegation_id, "accept for unknown delegation"),
    }
}

async fn handle_delegation_result(state: &Arc<GatewayState>, result: DelegationResult) {
    let pending = state.delegations.write().await.remove(&result.delegation_id);
    match pending {
        Some(pending) => {
            state
                .send_to_conn(&pending.requester_conn, &Frame::DelegationResult(result))
                .await;
        },
        None => warn!(delegation_id = %result.delegation_id, "result for unknown delegation"),
    }
}

async fn handle_delegation_cancel(
    state: &Arc<GatewayState>,
    registered_node: Option<&str>,
    cancel: DelegationCancel,
) {
    let pending = state.delegations.write().await.remove(&cancel.delegation_id);
    let Some(pending) = pending else {
        warn!(delegation_id = %cancel.delegation_id, "cancel for unknown delegation");
        return;
    };
    // Relay to whichever side did not send the cancel.
    if registered_node == Some(pending.target_node.as_str()) {
        state
            .send_to_conn(&pending.requester_conn, &Frame::DelegationCancel(cancel))
            .await;
    } else {
        state
            .send_frame(&pending.target_node, &Frame::DelegationCancel(cancel))
            .await;
    }
}
