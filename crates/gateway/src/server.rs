//! Listener setup and gateway lifecycle.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    axum::{
        Router,
        extract::{ConnectInfo, State, WebSocketUpgrade},
        http::{HeaderMap, StatusCode, header},
        response::IntoResponse,
        routing::get,
    },
    tokio::net::TcpListener,
    tracing::{info, warn},
};

use switchyard_config::GatewayConfig;

use crate::{
    error::{Error, Result},
    services::{GatewayServices, safe_call},
    state::GatewayState,
    ws,
};

/// The embedding handle: owns the shared state and the listener lifecycle.
#[derive(Clone)]
pub struct Gateway {
    state: Arc<GatewayState>,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        Self::with_services(config, GatewayServices::noop())
    }

    pub fn with_services(config: GatewayConfig, services: GatewayServices) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::Message(format!("invalid config: {e}")))?;
        Ok(Self {
            state: GatewayState::new(config, services),
        })
    }

    pub fn state(&self) -> Arc<GatewayState> {
        Arc::clone(&self.state)
    }

    /// Bind the configured listener.
    pub async fn bind(&self) -> Result<TcpListener> {
        use crate::error::Context as _;

        let addr = format!("{}:{}", self.state.config.bind, self.state.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!(addr = %addr, "gateway listening");
        Ok(listener)
    }

    /// Serve connections on `listener` until `stop()` is called.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let state = Arc::clone(&self.state);

        // Out-of-band check of our upstream identity; a bad key is loud but
        // not fatal (the upstream may be down).
        if let Some(api_key) = state.config.nexus_api_key.clone() {
            let identity = Arc::clone(&state.services.identity);
            let deadline = Duration::from_millis(state.config.rpc_timeout_ms);
            state.tasks.spawn(async move {
                let valid = safe_call("identity.validate_api_key", deadline, true, async {
                    identity.validate_api_key(&api_key).await
                })
                .await;
                if !valid {
                    warn!("nexus rejected the configured api key");
                }
            });
        }

        crate::health::spawn(Arc::clone(&state));

        let app = build_app(Arc::clone(&state));
        let cancel = state.cancel.clone();
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
        Ok(())
    }

    /// Idempotent: closes every connection with 1001, drains background
    /// tasks, clears state.
    pub async fn stop(&self) {
        self.state.stop().await;
    }
}

/// Axum application exposing the WebSocket endpoint.
pub fn build_app(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

async fn ws_upgrade(
    upgrade: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if state.is_stopped() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    if state.connection_count().await >= state.config.max_connections {
        warn!(remote = %remote_addr, "connection limit reached, refusing upgrade");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    // Legacy/dual enforce the bearer token at the handshake; ed25519 defers
    // credential inspection to the first `node.register` frame.
    let handshake_auth = match state.auth.read().await.verify_handshake(bearer) {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(remote = %remote_addr, error = %e, "handshake auth rejected");
            return (StatusCode::UNAUTHORIZED, e.code().title()).into_response();
        },
    };

    upgrade
        .on_upgrade(move |socket| ws::handle_connection(socket, state, remote_addr, handshake_auth))
        .into_response()
}
