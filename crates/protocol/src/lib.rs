//! Gateway wire protocol definitions.
//!
//! Protocol version 1. All communication uses JSON text frames over
//! WebSocket, one object per frame, discriminated by `kind`.
//!
//! Inbound kinds: `node.register`, `node.deregister`, `heartbeat.pong`,
//! `lane.message`, `lane.message.ack`, `session.identity.update` and the
//! `delegation.*` family. Outbound kinds: `node.register.ack`,
//! `heartbeat.ping`, `lane.message`, `session.update`,
//! `session.identity.update`, `error` and the `delegation.*` family.

use serde::{Deserialize, Serialize};

mod codes;

pub use codes::ErrorCode;

// ── Constants ────────────────────────────────────────────────────────────────

pub const PROTOCOL_VERSION: u32 = 1;
/// Hard cap on a single inbound text frame.
pub const MAX_FRAME_BYTES: usize = 262_144; // 256 KB
/// Consecutive schema errors tolerated before the connection is closed.
pub const SCHEMA_ERROR_LIMIT: u32 = 10;

/// WebSocket close codes used by the gateway.
pub mod close_codes {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const ABNORMAL: u16 = 1006;
    pub const AUTH_INVALID: u16 = 4401;
    pub const AUTH_FORBIDDEN: u16 = 4403;
}

// ── Lanes ────────────────────────────────────────────────────────────────────

/// Priority class for queued messages. Workers consume lanes in the order
/// `steer > collect > followup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    Steer,
    Collect,
    Followup,
}

impl Lane {
    /// All lanes in priority order.
    pub const ALL: [Lane; 3] = [Lane::Steer, Lane::Collect, Lane::Followup];

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Steer => "steer",
            Lane::Collect => "collect",
            Lane::Followup => "followup",
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Dm,
    Group,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Dm => "dm",
            MessageType::Group => "group",
        }
    }
}

/// Attributes a channel adapter attaches to an inbound message so the router
/// can pick an agent and a conversation key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutingContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageType>,
}

/// A message queued for delivery to a node, in exactly one lane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneMessage {
    pub id: String,
    pub lane: Lane,
    pub channel_id: String,
    pub payload: serde_json::Value,
    /// Producer timestamp, unix millis.
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing_context: Option<RoutingContext>,
}

impl LaneMessage {
    /// Best-effort text extraction from the payload, used by the pairing
    /// guard to scan DMs for pairing codes.
    pub fn payload_text(&self) -> Option<&str> {
        match &self.payload {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Object(map) => map.get("text").and_then(|v| v.as_str()),
            _ => None,
        }
    }
}

// ── Node metadata ────────────────────────────────────────────────────────────

/// Capabilities advertised by a node at registration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeCapabilities {
    /// Agent ids served by this node; seeds the agent → node index.
    pub agents: Vec<String>,
    pub agent_types: Vec<String>,
    pub tools: Vec<String>,
    pub max_concurrency: u32,
    /// Channel ids this node can serve.
    pub channels: Vec<String>,
}

/// Presentation identity a worker may attach to its session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Identity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

/// Session lifecycle state as seen on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Connecting,
    Connected,
    Idle,
    Suspended,
    Disconnected,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Idle => "idle",
            SessionState::Suspended => "suspended",
            SessionState::Disconnected => "disconnected",
        }
    }
}

// ── Error shape ──────────────────────────────────────────────────────────────

/// Body of an outbound `error` frame. `status` is HTTP-style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, detail: impl Into<Option<String>>) -> Self {
        Self {
            title: code.title().to_string(),
            status: code.status(),
            detail: detail.into(),
        }
    }
}

// ── Frames ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRegister {
    pub node_id: String,
    #[serde(default)]
    pub capabilities: NodeCapabilities,
    /// Shared-secret credential (legacy / dual auth modes).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// EdDSA JWT credential (ed25519 / dual auth modes).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Base64-encoded raw Ed25519 public key the JWT is signed with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRegisterAck {
    pub node_id: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDeregister {
    pub node_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Unix millis at send time.
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneMessageFrame {
    pub lane: Lane,
    pub message: LaneMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneMessageAck {
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    pub node_id: String,
    pub session_id: String,
    pub state: SessionState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdentityUpdate {
    pub node_id: String,
    pub identity: Identity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationRequest {
    pub delegation_id: String,
    pub agent_id: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationAccept {
    pub delegation_id: String,
    pub node_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationResult {
    pub delegation_id: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationCancel {
    pub delegation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Discriminated union of every frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Frame {
    #[serde(rename = "node.register")]
    NodeRegister(NodeRegister),
    #[serde(rename = "node.register.ack")]
    NodeRegisterAck(NodeRegisterAck),
    #[serde(rename = "node.deregister")]
    NodeDeregister(NodeDeregister),
    #[serde(rename = "heartbeat.ping")]
    HeartbeatPing(Heartbeat),
    #[serde(rename = "heartbeat.pong")]
    HeartbeatPong(Heartbeat),
    #[serde(rename = "lane.message")]
    LaneMessage(LaneMessageFrame),
    #[serde(rename = "lane.message.ack")]
    LaneMessageAck(LaneMessageAck),
    #[serde(rename = "session.update")]
    SessionUpdate(SessionUpdate),
    #[serde(rename = "session.identity.update")]
    SessionIdentityUpdate(SessionIdentityUpdate),
    #[serde(rename = "error")]
    Error(ErrorFrame),
    #[serde(rename = "delegation.request")]
    DelegationRequest(DelegationRequest),
    #[serde(rename = "delegation.accept")]
    DelegationAccept(DelegationAccept),
    #[serde(rename = "delegation.result")]
    DelegationResult(DelegationResult),
    #[serde(rename = "delegation.cancel")]
    DelegationCancel(DelegationCancel),
}

impl Frame {
    pub fn error(code: ErrorCode, detail: impl Into<Option<String>>) -> Self {
        Frame::Error(ErrorFrame {
            error: ErrorBody::new(code, detail),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::NodeRegister(_) => "node.register",
            Frame::NodeRegisterAck(_) => "node.register.ack",
            Frame::NodeDeregister(_) => "node.deregister",
            Frame::HeartbeatPing(_) => "heartbeat.ping",
            Frame::HeartbeatPong(_) => "heartbeat.pong",
            Frame::LaneMessage(_) => "lane.message",
            Frame::LaneMessageAck(_) => "lane.message.ack",
            Frame::SessionUpdate(_) => "session.update",
            Frame::SessionIdentityUpdate(_) => "session.identity.update",
            Frame::Error(_) => "error",
            Frame::DelegationRequest(_) => "delegation.request",
            Frame::DelegationAccept(_) => "delegation.accept",
            Frame::DelegationResult(_) => "delegation.result",
            Frame::DelegationCancel(_) => "delegation.cancel",
        }
    }
}

// ── Codec ────────────────────────────────────────────────────────────────────

/// Why an inbound text frame was rejected. A parse error means the text was
/// not JSON at all; a schema error means the JSON did not describe a known,
/// complete frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("parse error: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("schema error: {0}")]
    Schema(#[source] serde_json::Error),
}

impl DecodeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DecodeError::Parse(_) => ErrorCode::ParseError,
            DecodeError::Schema(_) => ErrorCode::SchemaError,
        }
    }
}

/// Decode a single text frame.
pub fn decode_frame(text: &str) -> Result<Frame, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(DecodeError::Parse)?;
    serde_json::from_value(value).map_err(DecodeError::Schema)
}

/// Encode a frame to its wire form.
pub fn encode_frame(frame: &Frame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}
