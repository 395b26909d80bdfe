//! Agent bindings: declarative rules mapping message attributes to an agent.
//!
//! Patterns support exact strings, `foo-*` prefixes, `*-bar` suffixes, and
//! the bare `*` wildcard. Rules are precompiled on update and scanned in
//! insertion order; the first match wins.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use switchyard_protocol::{LaneMessage, MessageType};

/// Match criteria for a single binding. An empty match is a catch-all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BindingMatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_id_glob: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id_glob: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentBinding {
    pub agent_id: String,
    #[serde(default, rename = "match")]
    pub matcher: BindingMatch,
}

// ── Compiled patterns ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Pattern {
    Exact(String),
    Prefix(String),
    Suffix(String),
    Any,
}

impl Pattern {
    fn compile(raw: &str) -> Self {
        if raw == "*" {
            Pattern::Any
        } else if let Some(prefix) = raw.strip_suffix('*') {
            Pattern::Prefix(prefix.to_string())
        } else if let Some(suffix) = raw.strip_prefix('*') {
            Pattern::Suffix(suffix.to_string())
        } else {
            Pattern::Exact(raw.to_string())
        }
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            Pattern::Exact(s) => value == s,
            Pattern::Prefix(p) => value.starts_with(p.as_str()),
            Pattern::Suffix(s) => value.ends_with(s.as_str()),
            Pattern::Any => true,
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledBinding {
    agent_id: String,
    channel: Option<String>,
    message_type: Option<MessageType>,
    peer_id: Option<Pattern>,
    group_id: Option<Pattern>,
}

impl CompiledBinding {
    fn compile(binding: &AgentBinding) -> Self {
        Self {
            agent_id: binding.agent_id.clone(),
            channel: binding.matcher.channel.clone(),
            message_type: binding.matcher.message_type,
            peer_id: binding.matcher.peer_id_glob.as_deref().map(Pattern::compile),
            group_id: binding.matcher.group_id_glob.as_deref().map(Pattern::compile),
        }
    }

    fn matches(
        &self,
        channel_id: &str,
        message_type: MessageType,
        peer_id: Option<&str>,
        group_id: Option<&str>,
    ) -> bool {
        if let Some(ch) = &self.channel
            && ch != channel_id
        {
            return false;
        }
        if let Some(mt) = self.message_type
            && mt != message_type
        {
            return false;
        }
        if let Some(pat) = &self.peer_id
            && !peer_id.is_some_and(|p| pat.matches(p))
        {
            return false;
        }
        if let Some(pat) = &self.group_id
            && !group_id.is_some_and(|g| pat.matches(g))
        {
            return false;
        }
        true
    }
}

// ── Resolver ─────────────────────────────────────────────────────────────────

/// Precompiled binding table. Updates install a fresh table in a single
/// assignment; in-flight resolutions see either the old or the new table.
#[derive(Debug, Clone, Default)]
pub struct BindingResolver {
    table: Arc<[CompiledBinding]>,
}

impl BindingResolver {
    pub fn new(bindings: &[AgentBinding]) -> Self {
        let mut resolver = Self::default();
        resolver.update_bindings(bindings);
        resolver
    }

    /// Recompile and atomically swap the table.
    pub fn update_bindings(&mut self, bindings: &[AgentBinding]) {
        let compiled: Vec<CompiledBinding> =
            bindings.iter().map(CompiledBinding::compile).collect();
        self.table = compiled.into();
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// First-match resolution over `(channelId, messageType, peerId, groupId)`.
    pub fn resolve(
        &self,
        channel_id: &str,
        message_type: MessageType,
        peer_id: Option<&str>,
        group_id: Option<&str>,
    ) -> Option<&str> {
        self.table
            .iter()
            .find(|b| b.matches(channel_id, message_type, peer_id, group_id))
            .map(|b| b.agent_id.as_str())
    }

    /// Resolve a lane message. A missing `messageType` is treated as a DM.
    pub fn resolve_message(&self, msg: &LaneMessage) -> Option<&str> {
        let ctx = msg.routing_context.as_ref();
        self.resolve(
            &msg.channel_id,
            ctx.and_then(|c| c.message_type).unwrap_or(MessageType::Dm),
            ctx.and_then(|c| c.peer_id.as_deref()),
            ctx.and_then(|c| c.group_id.as_deref()),
        )
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn binding(agent: &str, matcher: BindingMatch) -> AgentBinding {
        AgentBinding {
            agent_id: agent.into(),
            matcher,
        }
    }

    #[test]
    fn empty_match_is_catch_all() {
        let resolver = BindingResolver::new(&[binding("fallback", BindingMatch::default())]);
        assert_eq!(
            resolver.resolve("anything", MessageType::Dm, None, None),
            Some("fallback")
        );
    }

    #[test]
    fn first_match_wins_in_insertion_order() {
        let resolver = BindingResolver::new(&[
            binding("support", BindingMatch {
                channel: Some("whatsapp".into()),
                ..Default::default()
            }),
            binding("fallback", BindingMatch::default()),
        ]);
        assert_eq!(
            resolver.resolve("whatsapp", MessageType::Dm, None, None),
            Some("support")
        );
        assert_eq!(
            resolver.resolve("telegram", MessageType::Dm, None, None),
            Some("fallback")
        );
    }

    #[test]
    fn prefix_and_suffix_globs() {
        let resolver = BindingResolver::new(&[
            binding("vip", BindingMatch {
                peer_id_glob: Some("vip-*".into()),
                ..Default::default()
            }),
            binding("corp", BindingMatch {
                peer_id_glob: Some("*@corp.example".into()),
                ..Default::default()
            }),
        ]);
        assert_eq!(
            resolver.resolve("ch", MessageType::Dm, Some("vip-alice"), None),
            Some("vip")
        );
        assert_eq!(
            resolver.resolve("ch", MessageType::Dm, Some("bob@corp.example"), None),
            Some("corp")
        );
        assert_eq!(resolver.resolve("ch", MessageType::Dm, Some("carol"), None), None);
    }

    #[test]
    fn glob_requires_field_present() {
        let resolver = BindingResolver::new(&[binding("g", BindingMatch {
            group_id_glob: Some("*".into()),
            ..Default::default()
        })]);
        assert_eq!(resolver.resolve("ch", MessageType::Group, None, None), None);
        assert_eq!(
            resolver.resolve("ch", MessageType::Group, None, Some("room-1")),
            Some("g")
        );
    }

    #[test]
    fn message_type_filter() {
        let resolver = BindingResolver::new(&[binding("groups-only", BindingMatch {
            message_type: Some(MessageType::Group),
            ..Default::default()
        })]);
        assert_eq!(resolver.resolve("ch", MessageType::Dm, None, None), None);
        assert_eq!(
            resolver.resolve("ch", MessageType::Group, None, None),
            Some("groups-only")
        );
    }

    #[test]
    fn update_replaces_table() {
        let mut resolver = BindingResolver::new(&[binding("old", BindingMatch::default())]);
        resolver.update_bindings(&[binding("new", BindingMatch::default())]);
        assert_eq!(resolver.resolve("ch", MessageType::Dm, None, None), Some("new"));
        assert_eq!(resolver.len(), 1);
    }
}
