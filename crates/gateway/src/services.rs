//! Trait interfaces for the collaborators the gateway delegates to.
//!
//! Each trait has a `Noop` implementation returning empty/default responses,
//! allowing the gateway to run standalone before real collaborators are
//! wired in. Every call goes through [`safe_call`], which applies a deadline
//! and turns hangs into typed timeouts so background work can fall back
//! instead of wedging.

use std::{sync::Arc, time::Duration};

use {async_trait::async_trait, serde_json::Value, tracing::warn};

/// Error type returned by service methods.
pub type ServiceError = String;
pub type ServiceResult<T = Value> = Result<T, ServiceError>;

/// An observation entry destined for the memory store.
#[derive(Debug, Clone)]
pub struct ObservationEntry {
    pub node_id: String,
    pub channel_id: String,
    pub conversation_key: Option<String>,
    pub payload: Value,
}

/// Memory/observation store.
#[async_trait]
pub trait MemoryService: Send + Sync {
    async fn query(&self, filter: Value) -> ServiceResult<Vec<Value>>;
    async fn batch_store(&self, entries: Vec<ObservationEntry>) -> ServiceResult<()>;
}

/// Manifest/artifact provider: resolves an agent id to its capabilities and
/// model preferences.
#[async_trait]
pub trait ManifestService: Send + Sync {
    async fn resolve(&self, agent_id: &str) -> ServiceResult<Option<Value>>;
}

/// Upstream identity service; validates the gateway's own API key out of
/// band.
#[async_trait]
pub trait IdentityUpstream: Send + Sync {
    async fn validate_api_key(&self, api_key: &str) -> ServiceResult<bool>;
}

// ── Noop implementations ─────────────────────────────────────────────────────

pub struct NoopMemory;

#[async_trait]
impl MemoryService for NoopMemory {
    async fn query(&self, _filter: Value) -> ServiceResult<Vec<Value>> {
        Ok(Vec::new())
    }

    async fn batch_store(&self, _entries: Vec<ObservationEntry>) -> ServiceResult<()> {
        Ok(())
    }
}

pub struct NoopManifest;

#[async_trait]
impl ManifestService for NoopManifest {
    async fn resolve(&self, _agent_id: &str) -> ServiceResult<Option<Value>> {
        Ok(None)
    }
}

pub struct NoopIdentity;

#[async_trait]
impl IdentityUpstream for NoopIdentity {
    async fn validate_api_key(&self, _api_key: &str) -> ServiceResult<bool> {
        Ok(true)
    }
}

// ── Wiring ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct GatewayServices {
    pub memory: Arc<dyn MemoryService>,
    pub manifest: Arc<dyn ManifestService>,
    pub identity: Arc<dyn IdentityUpstream>,
}

impl GatewayServices {
    pub fn noop() -> Self {
        Self {
            memory: Arc::new(NoopMemory),
            manifest: Arc::new(NoopManifest),
            identity: Arc::new(NoopIdentity),
        }
    }
}

/// Run a collaborator call with a deadline, falling back on timeout or
/// error. `what` names the call for the log line.
pub async fn safe_call<T, F>(what: &str, deadline: Duration, fallback: T, fut: F) -> T
where
    F: Future<Output = ServiceResult<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            warn!(call = what, error = %e, "collaborator call failed, using fallback");
            fallback
        },
        Err(_) => {
            warn!(call = what, timeout_ms = deadline.as_millis() as u64,
                "collaborator call timed out, using fallback");
            fallback
        },
    }
}
