//! DM pairing guard.
//!
//! Channels on the pairing list only accept DMs from approved peers. A peer
//! becomes approved by presenting a one-shot pairing code handed out
//! out-of-band; unknown peers are blocked and repeated failed attempts are
//! rate limited per `(node, channel, peer)`.

use std::{
    collections::{HashMap, HashSet},
    time::{Duration, Instant},
};

use rand::Rng as _;

use switchyard_protocol::MessageType;

/// Attempt window duration for rate limiting.
const ATTEMPT_WINDOW: Duration = Duration::from_secs(60);

const CODE_LEN: usize = 8;
// No 0/O or 1/I; codes get read aloud or typed from another screen.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

#[derive(Debug, Clone)]
pub struct PairingCode {
    pub code: String,
    /// Display form, `ABCD-1234`.
    pub formatted: String,
    pub expires_at: Instant,
}

#[derive(Debug, Clone)]
struct IssuedCode {
    node_id: String,
    channel_id: String,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy)]
struct AttemptWindow {
    count: u32,
    started_at: Instant,
}

/// Outcome of checking a DM sender against the pairing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingStatus {
    /// Channel not on the pairing list, or non-DM traffic.
    NotRequired,
    /// Sender already approved.
    Approved,
    /// Payload contained a valid code; the sender is now approved.
    Paired,
    /// Code found but past its expiry.
    ExpiredCode,
    /// Too many failed attempts in the current window.
    RateLimited,
    /// Unknown peer, DM on a pairing channel.
    Blocked,
}

pub struct PairingGuard {
    enabled: bool,
    channels: HashSet<String>,
    /// code (normalized) → issue record.
    codes: HashMap<String, IssuedCode>,
    approved: HashSet<(String, String, String)>,
    attempts: HashMap<(String, String, String), AttemptWindow>,
    expiry: Duration,
    max_attempts: u32,
}

impl PairingGuard {
    pub fn new(
        enabled: bool,
        channels: impl IntoIterator<Item = String>,
        expiry: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            enabled,
            channels: channels.into_iter().collect(),
            codes: HashMap::new(),
            approved: HashSet::new(),
            attempts: HashMap::new(),
            expiry,
            max_attempts,
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, [], Duration::from_secs(600), 5)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Issue a one-shot code for pairing a peer with `node_id` on
    /// `channel_id`.
    pub fn generate_code(&mut self, node_id: &str, channel_id: &str) -> PairingCode {
        let mut rng = rand::rng();
        let code: String = (0..CODE_LEN)
            .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        let formatted = format!("{}-{}", &code[..4], &code[4..]);
        let expires_at = Instant::now() + self.expiry;
        self.codes.insert(code.clone(), IssuedCode {
            node_id: node_id.to_string(),
            channel_id: channel_id.to_string(),
            expires_at,
        });
        PairingCode {
            code,
            formatted,
            expires_at,
        }
    }

    /// Gate an inbound DM. Group traffic and channels outside the pairing
    /// list pass through untouched.
    pub fn check_sender(
        &mut self,
        node_id: &str,
        channel_id: &str,
        peer_id: &str,
        message_type: MessageType,
        payload: Option<&str>,
    ) -> PairingStatus {
        if !self.enabled
            || message_type != MessageType::Dm
            || !self.channels.contains(channel_id)
        {
            return PairingStatus::NotRequired;
        }

        let key = (
            node_id.to_string(),
            channel_id.to_string(),
            peer_id.to_string(),
        );
        if self.approved.contains(&key) {
            return PairingStatus::Approved;
        }

        let now = Instant::now();
        if let Some(window) = self.attempts.get(&key)
            && now.duration_since(window.started_at) < ATTEMPT_WINDOW
            && window.count >= self.max_attempts
        {
            return PairingStatus::RateLimited;
        }

        // Scan the payload for an issued code for this (node, channel).
        if let Some(text) = payload
            && let Some(code) = self.find_code(node_id, channel_id, text)
        {
            let issued = match self.codes.get(&code) {
                Some(issued) => issued.clone(),
                None => return self.record_failure(key, now),
            };
            if now > issued.expires_at {
                self.codes.remove(&code);
                self.record_failure(key, now);
                return PairingStatus::ExpiredCode;
            }
            // Consume the code and approve the peer.
            self.codes.remove(&code);
            self.attempts.remove(&key);
            self.approved.insert(key);
            return PairingStatus::Paired;
        }

        self.record_failure(key, now)
    }

    /// Remove expired codes and stale attempt windows. Invoked from the
    /// health-monitor tick; idempotent.
    pub fn sweep(&mut self) {
        let now = Instant::now();
        self.codes.retain(|_, issued| now <= issued.expires_at);
        self.attempts
            .retain(|_, w| now.duration_since(w.started_at) < ATTEMPT_WINDOW);
    }

    /// Forget approvals and in-flight codes for a node (deregistration).
    pub fn evict_node(&mut self, node_id: &str) {
        self.codes.retain(|_, issued| issued.node_id != node_id);
        self.approved.retain(|(n, _, _)| n != node_id);
        self.attempts.retain(|(n, _, _), _| n != node_id);
    }

    pub fn clear(&mut self) {
        self.codes.clear();
        self.approved.clear();
        self.attempts.clear();
    }

    fn record_failure(
        &mut self,
        key: (String, String, String),
        now: Instant,
    ) -> PairingStatus {
        let window = self
            .attempts
            .entry(key)
            .and_modify(|w| {
                if now.duration_since(w.started_at) >= ATTEMPT_WINDOW {
                    w.count = 0;
                    w.started_at = now;
                }
                w.count += 1;
            })
            .or_insert(AttemptWindow {
                count: 1,
                started_at: now,
            });
        if window.count >= self.max_attempts {
            PairingStatus::RateLimited
        } else {
            PairingStatus::Blocked
        }
    }

    /// Look for any code issued for `(node, channel)` inside the payload,
    /// tolerating the `ABCD-1234` display form.
    fn find_code(&self, node_id: &str, channel_id: &str, text: &str) -> Option<String> {
        let normalized: String = text
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_uppercase();
        self.codes
            .iter()
            .filter(|(_, issued)| issued.node_id == node_id && issued.channel_id == channel_id)
            .map(|(code, _)| code)
            .find(|code| normalized.contains(code.as_str()))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn guard() -> PairingGuard {
        PairingGuard::new(
            true,
            ["whatsapp".to_string()],
            Duration::from_secs(600),
            3,
        )
    }

    #[test]
    fn non_pairing_channel_not_required() {
        let mut g = guard();
        assert_eq!(
            g.check_sender("n1", "telegram", "p1", MessageType::Dm, None),
            PairingStatus::NotRequired
        );
    }

    #[test]
    fn group_traffic_not_required() {
        let mut g = guard();
        assert_eq!(
            g.check_sender("n1", "whatsapp", "p1", MessageType::Group, None),
            PairingStatus::NotRequired
        );
    }

    #[test]
    fn unknown_peer_blocked() {
        let mut g = guard();
        assert_eq!(
            g.check_sender("n1", "whatsapp", "p1", MessageType::Dm, Some("hello")),
            PairingStatus::Blocked
        );
    }

    #[test]
    fn code_format_and_pairing_flow() {
        let mut g = guard();
        let code = g.generate_code("n1", "whatsapp");
        assert_eq!(code.code.len(), 8);
        assert_eq!(code.formatted.len(), 9);
        assert_eq!(&code.formatted[4..5], "-");

        assert_eq!(
            g.check_sender("n1", "whatsapp", "p1", MessageType::Dm, Some(&code.formatted)),
            PairingStatus::Paired
        );
        // Approved from now on, no code needed.
        assert_eq!(
            g.check_sender("n1", "whatsapp", "p1", MessageType::Dm, Some("hi again")),
            PairingStatus::Approved
        );
        // Code was consumed; another peer cannot replay it.
        assert_eq!(
            g.check_sender("n1", "whatsapp", "p2", MessageType::Dm, Some(&code.formatted)),
            PairingStatus::Blocked
        );
    }

    #[test]
    fn code_embedded_in_message_text() {
        let mut g = guard();
        let code = g.generate_code("n1", "whatsapp");
        let text = format!("hi, my code is {}", code.formatted);
        assert_eq!(
            g.check_sender("n1", "whatsapp", "p1", MessageType::Dm, Some(&text)),
            PairingStatus::Paired
        );
    }

    #[test]
    fn expired_code_reported() {
        let mut g = PairingGuard::new(
            true,
            ["whatsapp".to_string()],
            Duration::ZERO,
            3,
        );
        let code = g.generate_code("n1", "whatsapp");
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(
            g.check_sender("n1", "whatsapp", "p1", MessageType::Dm, Some(&code.code)),
            PairingStatus::ExpiredCode
        );
    }

    #[test]
    fn rate_limiting_after_max_attempts() {
        let mut g = guard();
        assert_eq!(
            g.check_sender("n1", "whatsapp", "p1", MessageType::Dm, Some("a")),
            PairingStatus::Blocked
        );
        assert_eq!(
            g.check_sender("n1", "whatsapp", "p1", MessageType::Dm, Some("b")),
            PairingStatus::Blocked
        );
        assert_eq!(
            g.check_sender("n1", "whatsapp", "p1", MessageType::Dm, Some("c")),
            PairingStatus::RateLimited
        );
        // Even a valid code is refused while rate limited.
        let code = g.generate_code("n1", "whatsapp");
        assert_eq!(
            g.check_sender("n1", "whatsapp", "p1", MessageType::Dm, Some(&code.code)),
            PairingStatus::RateLimited
        );
    }

    #[test]
    fn sweep_drops_expired_codes() {
        let mut g = PairingGuard::new(
            true,
            ["whatsapp".to_string()],
            Duration::ZERO,
            3,
        );
        g.generate_code("n1", "whatsapp");
        std::thread::sleep(Duration::from_millis(5));
        g.sweep();
        assert!(g.codes.is_empty());
        g.sweep();
        assert!(g.codes.is_empty());
    }

    #[test]
    fn evict_node_forgets_approvals() {
        let mut g = guard();
        let code = g.generate_code("n1", "whatsapp");
        g.check_sender("n1", "whatsapp", "p1", MessageType::Dm, Some(&code.code));
        g.evict_node("n1");
        assert_eq!(
            g.check_sender("n1", "whatsapp", "p1", MessageType::Dm, Some("hi")),
            PairingStatus::Blocked
        );
    }
}
