//! Flat error taxonomy.
//!
//! Every error the gateway emits is identified by an uppercase code carrying
//! an HTTP-style status, a gRPC-style code, a domain, and an `isExpected`
//! flag consumed by the observer pipeline.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Auth
    TokenMissing,
    TokenInvalid,
    TokenExpired,
    InsufficientScope,
    Forbidden,
    KeyMismatch,
    TofuDisabled,
    // Registration
    AlreadyRegistered,
    NodeNotFound,
    AgentNotFound,
    CrossNodeDeregister,
    HeartbeatTimeout,
    // Routing
    LaneOverflow,
    RoutingFailed,
    PairingRequired,
    PairingExpired,
    RateLimited,
    // Session
    InvalidTransition,
    SessionExpired,
    // Conversation
    MissingPeerId,
    MissingAccountId,
    // Protocol
    ParseError,
    SchemaError,
    FrameTooLarge,
    ConnectionLimit,
    // Config
    InvalidConfig,
    ReloadFailed,
}

impl ErrorCode {
    pub fn status(&self) -> u16 {
        use ErrorCode::*;
        match self {
            TokenMissing | TokenInvalid | TokenExpired => 401,
            InsufficientScope | Forbidden | KeyMismatch | TofuDisabled | CrossNodeDeregister
            | PairingRequired | PairingExpired => 403,
            NodeNotFound | AgentNotFound => 404,
            AlreadyRegistered => 409,
            HeartbeatTimeout => 408,
            LaneOverflow | RateLimited | ConnectionLimit => 429,
            RoutingFailed => 500,
            InvalidTransition | SessionExpired => 410,
            MissingPeerId | MissingAccountId | ParseError => 400,
            SchemaError | InvalidConfig | ReloadFailed => 422,
            FrameTooLarge => 413,
        }
    }

    pub fn grpc(&self) -> &'static str {
        use ErrorCode::*;
        match self {
            TokenMissing | TokenInvalid | TokenExpired => "UNAUTHENTICATED",
            InsufficientScope | Forbidden | KeyMismatch | TofuDisabled | CrossNodeDeregister
            | PairingRequired | PairingExpired => "PERMISSION_DENIED",
            NodeNotFound | AgentNotFound => "NOT_FOUND",
            AlreadyRegistered => "ALREADY_EXISTS",
            HeartbeatTimeout => "DEADLINE_EXCEEDED",
            LaneOverflow | RateLimited | ConnectionLimit => "RESOURCE_EXHAUSTED",
            RoutingFailed => "INTERNAL",
            InvalidTransition | SessionExpired => "FAILED_PRECONDITION",
            MissingPeerId | MissingAccountId | ParseError | SchemaError | FrameTooLarge => {
                "INVALID_ARGUMENT"
            },
            InvalidConfig | ReloadFailed => "FAILED_PRECONDITION",
        }
    }

    pub fn domain(&self) -> &'static str {
        use ErrorCode::*;
        match self {
            TokenMissing | TokenInvalid | TokenExpired | InsufficientScope | Forbidden
            | KeyMismatch | TofuDisabled => "auth",
            AlreadyRegistered | NodeNotFound | AgentNotFound | CrossNodeDeregister
            | HeartbeatTimeout => "registration",
            LaneOverflow | RoutingFailed | PairingRequired | PairingExpired | RateLimited => {
                "routing"
            },
            InvalidTransition | SessionExpired => "session",
            MissingPeerId | MissingAccountId => "conversation",
            ParseError | SchemaError | FrameTooLarge | ConnectionLimit => "protocol",
            InvalidConfig | ReloadFailed => "config",
        }
    }

    /// Expected errors are part of normal operation (bad peer input, limits);
    /// unexpected ones indicate a gateway-side fault.
    pub fn is_expected(&self) -> bool {
        !matches!(self, ErrorCode::RoutingFailed | ErrorCode::ReloadFailed)
    }

    /// Human-readable title used in outbound `error` frames.
    pub fn title(&self) -> &'static str {
        use ErrorCode::*;
        match self {
            TokenMissing => "Token missing",
            TokenInvalid => "Token invalid",
            TokenExpired => "Token expired",
            InsufficientScope => "Insufficient scope",
            Forbidden => "Forbidden",
            KeyMismatch => "Key mismatch",
            TofuDisabled => "Unknown key and TOFU disabled",
            AlreadyRegistered => "Node already registered",
            NodeNotFound => "Node not found",
            AgentNotFound => "Agent not found",
            CrossNodeDeregister => "Cross-node deregister",
            HeartbeatTimeout => "Heartbeat timeout",
            LaneOverflow => "Lane overflow",
            RoutingFailed => "Message routing failed",
            PairingRequired => "Pairing required",
            PairingExpired => "Pairing code expired",
            RateLimited => "Rate limited",
            InvalidTransition => "Invalid session transition",
            SessionExpired => "Session expired",
            MissingPeerId => "Missing peerId",
            MissingAccountId => "Missing accountId",
            ParseError => "Parse error",
            SchemaError => "Schema error",
            FrameTooLarge => "Frame too large",
            ConnectionLimit => "Connection limit reached",
            InvalidConfig => "Invalid config",
            ReloadFailed => "Reload failed",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.title())
    }
}
