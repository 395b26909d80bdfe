//! Health monitor.
//!
//! A single periodic task pings every registered node, applies the
//! staleness and session timers, and piggybacks the conversation-store and
//! pairing sweeps on the same tick.

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tracing::{debug, info, warn};

use switchyard_protocol::{Frame, Heartbeat};

use crate::{events::GatewayEvent, state::GatewayState};

/// Missed intervals after which a node is deregistered.
const MISSED_INTERVAL_LIMIT: u32 = 3;

/// Start the monitor on the gateway task set. Stops with the gateway's
/// cancellation token.
pub fn spawn(state: Arc<GatewayState>) {
    let interval = Duration::from_millis(state.config.health_check_interval_ms);
    let tracker = state.tasks.clone();
    tracker.spawn(run(state, interval));
}

async fn run(state: Arc<GatewayState>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick of a tokio interval fires immediately; skip it so
    // freshly registered nodes are not pinged before they settle.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = state.cancel.cancelled() => {
                debug!("health monitor stopping");
                break;
            },
            _ = ticker.tick() => tick(&state, interval).await,
        }
    }
}

/// One monitor pass. Exposed for tests.
pub async fn tick(state: &Arc<GatewayState>, interval: Duration) {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    // Snapshot under a read lock, then act per node with the lock released.
    let nodes: Vec<(String, Duration)> = {
        let registry = state.registry.read().await;
        registry
            .node_ids()
            .into_iter()
            .filter_map(|id| {
                registry
                    .get(&id)
                    .map(|n| (id, n.last_seen_at.elapsed()))
            })
            .collect()
    };

    for (node_id, silent_for) in nodes {
        let delivered = state
            .send_frame(&node_id, &Frame::HeartbeatPing(Heartbeat { timestamp: now_ms }))
            .await;
        // No connection to ping: the node was suspended on disconnect and
        // the suspend timer owns its fate.
        if !delivered {
            continue;
        }

        if silent_for <= interval {
            continue;
        }
        let missed = state.registry.write().await.record_missed_interval(&node_id);
        if missed >= MISSED_INTERVAL_LIMIT {
            warn!(node_id = %node_id, missed, "node missed too many heartbeats, deregistering");
            state.cleanup_node(&node_id, "heartbeat timeout").await;
            continue;
        }
        if silent_for > interval * 2 {
            state.registry.write().await.mark_stale(&node_id);
            if let Some(t) = state.sessions.write().await.suspend(&node_id) {
                info!(node_id = %node_id, "node unresponsive, session suspended");
                state
                    .broadcast_frame(
                        &Frame::SessionUpdate(switchyard_protocol::SessionUpdate {
                            node_id: t.node_id.clone(),
                            session_id: t.session_id.clone(),
                            state: t.state,
                        }),
                        None,
                    )
                    .await;
                state.emit(GatewayEvent::NodeSuspended { node_id });
            }
        }
    }

    // Session timers share the tick.
    let session_tick = state.sessions.write().await.tick();
    for transition in &session_tick.idled {
        debug!(node_id = %transition.node_id, "session idle");
        state
            .broadcast_frame(
                &Frame::SessionUpdate(switchyard_protocol::SessionUpdate {
                    node_id: transition.node_id.clone(),
                    session_id: transition.session_id.clone(),
                    state: transition.state,
                }),
                None,
            )
            .await;
    }
    for node_id in session_tick.expired {
        info!(node_id = %node_id, "suspend timeout elapsed");
        state.cleanup_node(&node_id, "suspend timeout").await;
    }

    // Piggybacked sweeps.
    let swept = state.conversations.write().await.sweep();
    if swept > 0 {
        debug!(swept, "conversation bindings expired");
    }
    state.pairing.write().await.sweep();
}
