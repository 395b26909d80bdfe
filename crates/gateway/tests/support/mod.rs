#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]
//! Shared harness for gateway integration tests: spawns a real listener and
//! drives it with a tokio-tungstenite client.

use std::{net::SocketAddr, time::Duration};

use {
    futures::{SinkExt, StreamExt},
    tokio::net::{TcpListener, TcpStream},
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async,
        tungstenite::{client::IntoClientRequest, http::HeaderValue, protocol::Message},
    },
};

use {
    switchyard_auth::AuthMode,
    switchyard_config::GatewayConfig,
    switchyard_gateway::Gateway,
    switchyard_protocol::{
        Frame, Lane, LaneMessage, LaneMessageFrame, MessageType, NodeCapabilities, NodeRegister,
        RoutingContext, decode_frame, encode_frame,
    },
};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Legacy-auth config with timers too long to interfere with tests.
pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        auth_mode: AuthMode::Legacy,
        auth_token: Some("secret".into()),
        session_timeout_ms: 600_000,
        suspend_timeout_ms: 600_000,
        health_check_interval_ms: 600_000,
        max_frames_per_second: 0,
        ..Default::default()
    }
}

/// Start a gateway on an ephemeral port. It serves in the background until
/// stopped.
pub async fn spawn_gateway(config: GatewayConfig) -> (Gateway, SocketAddr) {
    let gateway = Gateway::new(config).expect("valid test config");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = gateway.clone();
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    (gateway, addr)
}

pub struct Client {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Client {
    pub async fn connect(addr: SocketAddr, bearer: Option<&str>) -> anyhow::Result<Self> {
        let mut request = format!("ws://{addr}/ws").into_client_request()?;
        if let Some(token) = bearer {
            request.headers_mut().insert(
                "Authorization",
                HeaderValue::from_str(&format!("Bearer {token}"))?,
            );
        }
        let (stream, _) = connect_async(request).await?;
        Ok(Self { stream })
    }

    pub async fn send(&mut self, frame: &Frame) {
        let text = encode_frame(frame).unwrap();
        self.stream.send(Message::Text(text.into())).await.unwrap();
    }

    pub async fn send_text(&mut self, text: &str) {
        self.stream
            .send(Message::Text(text.to_string().into()))
            .await
            .unwrap();
    }

    /// Next decodable frame, or `None` on timeout/close.
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            let msg = tokio::time::timeout(RECV_TIMEOUT, self.stream.next())
                .await
                .ok()??;
            match msg.ok()? {
                Message::Text(text) => return decode_frame(&text).ok(),
                Message::Close(_) => return None,
                _ => continue,
            }
        }
    }

    /// Skip frames until one matches `pred`; panics on timeout.
    pub async fn recv_matching(&mut self, what: &str, pred: impl Fn(&Frame) -> bool) -> Frame {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {what}"
            );
            match self.recv().await {
                Some(frame) if pred(&frame) => return frame,
                Some(_) => continue,
                None => panic!("connection closed while waiting for {what}"),
            }
        }
    }

    /// Expect an `error` frame with the given status.
    pub async fn expect_error(&mut self, status: u16) -> switchyard_protocol::ErrorBody {
        let frame = self
            .recv_matching("error frame", |f| matches!(f, Frame::Error(_)))
            .await;
        match frame {
            Frame::Error(e) => {
                assert_eq!(e.error.status, status, "unexpected error status: {:?}", e.error);
                e.error
            },
            _ => unreachable!(),
        }
    }

    /// Register a node and return the acked session id.
    pub async fn register(
        &mut self,
        node_id: &str,
        agents: &[&str],
        token: Option<&str>,
    ) -> String {
        self.send(&Frame::NodeRegister(NodeRegister {
            node_id: node_id.into(),
            capabilities: NodeCapabilities {
                agents: agents.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
            token: token.map(str::to_string),
            signature: None,
            public_key: None,
        }))
        .await;
        let frame = self
            .recv_matching("register ack", |f| matches!(f, Frame::NodeRegisterAck(_)))
            .await;
        match frame {
            Frame::NodeRegisterAck(ack) => {
                assert_eq!(ack.node_id, node_id);
                ack.session_id
            },
            _ => unreachable!(),
        }
    }

    pub async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

/// A steer-lane DM with a routing context.
pub fn dm(id: &str, channel: &str, peer: &str, text: &str) -> Frame {
    lane_frame(id, channel, Lane::Steer, serde_json::json!({ "text": text }), Some(RoutingContext {
        peer_id: Some(peer.into()),
        message_type: Some(MessageType::Dm),
        ..Default::default()
    }))
}

pub fn lane_frame(
    id: &str,
    channel: &str,
    lane: Lane,
    payload: serde_json::Value,
    routing_context: Option<RoutingContext>,
) -> Frame {
    Frame::LaneMessage(LaneMessageFrame {
        lane,
        message: LaneMessage {
            id: id.into(),
            lane,
            channel_id: channel.into(),
            payload,
            timestamp: 1,
            routing_context,
        },
    })
}
