//! Gateway config schema.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use {
    switchyard_auth::AuthMode,
    switchyard_routing::{AgentBinding, ConversationScope},
};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address to bind the WebSocket listener to.
    pub bind: String,
    pub port: u16,

    /// Upstream identity service.
    pub nexus_url: Option<String>,
    pub nexus_api_key: Option<String>,

    /// connected → idle after this long without activity.
    pub session_timeout_ms: u64,
    /// suspended → disconnected after this long without a reconnect.
    pub suspend_timeout_ms: u64,
    pub health_check_interval_ms: u64,

    /// Per-lane queue bound.
    pub lane_capacity: usize,
    /// Per-node unacked delivery cap.
    pub max_pending: usize,
    pub max_connections: usize,
    pub max_frames_per_second: u32,

    pub default_conversation_scope: ConversationScope,
    /// Per-agent scope overrides.
    pub scope_overrides: HashMap<String, ConversationScope>,
    pub max_conversations: usize,
    pub conversation_ttl_ms: u64,

    pub auth_mode: AuthMode,
    /// Shared secret for legacy / dual auth modes.
    pub auth_token: Option<String>,
    pub device_auth: DeviceAuthConfig,

    pub pairing: PairingConfig,

    /// Agent bindings, scanned in order.
    pub bindings: Vec<AgentBinding>,

    /// Concurrent observer-store calls allowed; 0 disables observation.
    pub max_observer_calls: usize,
    /// Deadline applied to collaborator RPCs.
    pub rpc_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 19710,
            nexus_url: None,
            nexus_api_key: None,
            session_timeout_ms: 300_000,
            suspend_timeout_ms: 600_000,
            health_check_interval_ms: 30_000,
            lane_capacity: 256,
            max_pending: 1_024,
            max_connections: 64,
            max_frames_per_second: 120,
            default_conversation_scope: ConversationScope::default(),
            scope_overrides: HashMap::new(),
            max_conversations: 4_096,
            conversation_ttl_ms: 86_400_000,
            auth_mode: AuthMode::default(),
            auth_token: None,
            device_auth: DeviceAuthConfig::default(),
            pairing: PairingConfig::default(),
            bindings: Vec::new(),
            max_observer_calls: 4,
            rpc_timeout_ms: 5_000,
        }
    }
}

impl GatewayConfig {
    /// Reject configurations the gateway cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("port must be non-zero".into());
        }
        if self.lane_capacity == 0 {
            return Err("lane_capacity must be at least 1".into());
        }
        if self.max_pending == 0 {
            return Err("max_pending must be at least 1".into());
        }
        if self.health_check_interval_ms == 0 {
            return Err("health_check_interval_ms must be non-zero".into());
        }
        if matches!(self.auth_mode, AuthMode::Legacy | AuthMode::Dual)
            && self.auth_token.as_deref().is_none_or(str::is_empty)
        {
            return Err(format!(
                "auth_mode {} requires auth_token",
                self.auth_mode.as_str()
            ));
        }
        if self.pairing.enabled && self.pairing.channels.is_empty() {
            return Err("pairing.enabled requires at least one channel".into());
        }
        Ok(())
    }
}

/// Device-key (ed25519) auth settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceAuthConfig {
    /// Trust-on-first-use: pin unknown node keys on first observation.
    pub allow_tofu: bool,
    pub max_device_keys: usize,
    /// Maximum accepted JWT age (issued-at to now).
    pub jwt_max_age_ms: u64,
    /// Pre-registered keys: node id → base64 Ed25519 public key.
    pub known_keys: HashMap<String, String>,
}

impl Default for DeviceAuthConfig {
    fn default() -> Self {
        Self {
            allow_tofu: true,
            max_device_keys: 256,
            jwt_max_age_ms: 300_000,
            known_keys: HashMap::new(),
        }
    }
}

/// DM pairing gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    pub enabled: bool,
    /// Channel ids whose DMs require pairing.
    pub channels: Vec<String>,
    pub expiry_ms: u64,
    pub max_attempts: u32,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channels: Vec::new(),
            expiry_ms: 600_000,
            max_attempts: 5,
        }
    }
}
