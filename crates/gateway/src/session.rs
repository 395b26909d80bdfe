//! Per-node session lifecycle.
//!
//! Sessions track node state independently of the transport connection:
//! a disconnect suspends the session (queues held) and only the suspend
//! timeout, an explicit deregister, or repeated heartbeat misses destroy it.
//! `last_activity_at` is the base for the idle timer, so a busy node never
//! goes idle.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use switchyard_protocol::{Identity, SessionState};

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub node_id: String,
    pub state: SessionState,
    pub identity: Option<Identity>,
    pub connected_at: Instant,
    pub last_activity_at: Instant,
    /// Set while suspended; base for the suspend timer.
    pub suspended_at: Option<Instant>,
}

/// State changes the caller must announce downstream as `session.update`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionTransition {
    pub session_id: String,
    pub node_id: String,
    pub state: SessionState,
}

/// Expiries found by a timer pass.
#[derive(Debug, Default)]
pub struct SessionTick {
    /// connected → idle transitions to announce.
    pub idled: Vec<SessionTransition>,
    /// Suspended sessions whose suspend timer ran out; the caller must
    /// deregister these nodes and drop their queues.
    pub expired: Vec<String>,
}

pub struct SessionManager {
    sessions: HashMap<String, Session>,
    session_timeout: Duration,
    suspend_timeout: Duration,
}

impl SessionManager {
    pub fn new(session_timeout: Duration, suspend_timeout: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            session_timeout,
            suspend_timeout,
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn get(&self, node_id: &str) -> Option<&Session> {
        self.sessions.get(node_id)
    }

    /// Create a session for a freshly registered node.
    pub fn create(&mut self, node_id: &str) -> Session {
        let now = Instant::now();
        let session = Session {
            session_id: uuid::Uuid::new_v4().to_string(),
            node_id: node_id.to_string(),
            state: SessionState::Connected,
            identity: None,
            connected_at: now,
            last_activity_at: now,
            suspended_at: None,
        };
        self.sessions.insert(node_id.to_string(), session.clone());
        session
    }

    /// Record activity; an idle session becomes connected again.
    pub fn touch(&mut self, node_id: &str) -> Option<SessionTransition> {
        let session = self.sessions.get_mut(node_id)?;
        session.last_activity_at = Instant::now();
        if session.state == SessionState::Idle {
            session.state = SessionState::Connected;
            return Some(transition(session));
        }
        None
    }

    /// Transport connection lost: connected/idle → suspended, queues held.
    pub fn suspend(&mut self, node_id: &str) -> Option<SessionTransition> {
        let session = self.sessions.get_mut(node_id)?;
        if !matches!(session.state, SessionState::Connected | SessionState::Idle) {
            return None;
        }
        session.state = SessionState::Suspended;
        session.suspended_at = Some(Instant::now());
        Some(transition(session))
    }

    /// Same node re-registered while suspended: back to connected.
    pub fn resume(&mut self, node_id: &str) -> Option<SessionTransition> {
        let session = self.sessions.get_mut(node_id)?;
        if session.state != SessionState::Suspended {
            return None;
        }
        session.state = SessionState::Connected;
        session.suspended_at = None;
        session.last_activity_at = Instant::now();
        Some(transition(session))
    }

    /// Tear down a session (deregister).
    pub fn remove(&mut self, node_id: &str) -> Option<Session> {
        self.sessions.remove(node_id)
    }

    /// Store a new identity record. Returns `false` (no downstream frame)
    /// when the record deep-equals the current one.
    pub fn update_identity(&mut self, node_id: &str, identity: Identity) -> bool {
        let Some(session) = self.sessions.get_mut(node_id) else {
            return false;
        };
        if session.identity.as_ref() == Some(&identity) {
            return false;
        }
        session.identity = Some(identity);
        true
    }

    /// Evaluate idle and suspend timers against `last_activity_at` /
    /// `suspended_at`.
    pub fn tick(&mut self) -> SessionTick {
        let now = Instant::now();
        let mut result = SessionTick::default();
        for session in self.sessions.values_mut() {
            match session.state {
                SessionState::Connected
                    if now.duration_since(session.last_activity_at) >= self.session_timeout =>
                {
                    session.state = SessionState::Idle;
                    result.idled.push(transition(session));
                },
                SessionState::Suspended => {
                    if let Some(suspended_at) = session.suspended_at
                        && now.duration_since(suspended_at) >= self.suspend_timeout
                    {
                        result.expired.push(session.node_id.clone());
                    }
                },
                _ => {},
            }
        }
        result
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}

fn transition(session: &Session) -> SessionTransition {
    SessionTransition {
        session_id: session.session_id.clone(),
        node_id: session.node_id.clone(),
        state: session.state,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn manager(session_ms: u64, suspend_ms: u64) -> SessionManager {
        SessionManager::new(
            Duration::from_millis(session_ms),
            Duration::from_millis(suspend_ms),
        )
    }

    #[test]
    fn create_assigns_uuid_session_id() {
        let mut m = manager(1000, 1000);
        let id = m.create("n1").session_id.clone();
        assert_eq!(uuid::Uuid::parse_str(&id).unwrap().get_version_num(), 4);
        assert_eq!(m.get("n1").unwrap().state, SessionState::Connected);
    }

    #[test]
    fn idle_after_timeout_and_back_on_touch() {
        let mut m = manager(0, 1000);
        m.create("n1");
        let tick = m.tick();
        assert_eq!(tick.idled.len(), 1);
        assert_eq!(m.get("n1").unwrap().state, SessionState::Idle);

        let t = m.touch("n1").unwrap();
        assert_eq!(t.state, SessionState::Connected);
    }

    #[test]
    fn suspend_and_resume() {
        let mut m = manager(1000, 1000);
        m.create("n1");
        let t = m.suspend("n1").unwrap();
        assert_eq!(t.state, SessionState::Suspended);
        // Suspending again is a no-op.
        assert!(m.suspend("n1").is_none());
        let t = m.resume("n1").unwrap();
        assert_eq!(t.state, SessionState::Connected);
        // Resuming a connected session is a no-op.
        assert!(m.resume("n1").is_none());
    }

    #[test]
    fn suspend_expiry_reports_node() {
        let mut m = manager(1000, 0);
        m.create("n1");
        m.suspend("n1");
        let tick = m.tick();
        assert_eq!(tick.expired, vec!["n1".to_string()]);
    }

    #[test]
    fn identity_diffing() {
        let mut m = manager(1000, 1000);
        m.create("n1");
        let identity = Identity {
            display_name: Some("Worker".into()),
            ..Default::default()
        };
        assert!(m.update_identity("n1", identity.clone()));
        // Deep-equal record: no-op.
        assert!(!m.update_identity("n1", identity.clone()));
        let changed = Identity {
            display_name: Some("Worker 2".into()),
            ..Default::default()
        };
        assert!(m.update_identity("n1", changed));
    }

    #[test]
    fn identity_gone_with_session() {
        let mut m = manager(1000, 1000);
        m.create("n1");
        m.update_identity("n1", Identity::default());
        m.remove("n1").unwrap();
        assert!(m.get("n1").is_none());
        // A fresh session starts without identity.
        m.create("n1");
        assert!(m.get("n1").unwrap().identity.is_none());
    }
}
