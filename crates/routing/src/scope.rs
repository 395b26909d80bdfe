//! Conversation scope keys.
//!
//! The scope key is a pure function of `(agentId, effectiveScope,
//! routingContext, channelId)`; it decides which node an ongoing
//! conversation sticks to.

use serde::{Deserialize, Serialize};

use switchyard_protocol::{MessageType, RoutingContext};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConversationScope {
    /// All conversations collapse into a single key per agent.
    #[default]
    Main,
    /// One key per peer, across channels.
    PerPeer,
    /// One key per channel + peer.
    PerChannelPeer,
    /// Full isolation: account + channel + peer.
    PerAccountChannelPeer,
}

impl ConversationScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationScope::Main => "main",
            ConversationScope::PerPeer => "per-peer",
            ConversationScope::PerChannelPeer => "per-channel-peer",
            ConversationScope::PerAccountChannelPeer => "per-account-channel-peer",
        }
    }
}

/// A resolved conversation key plus how it was arrived at.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedKey {
    pub key: String,
    pub effective_scope: ConversationScope,
    pub degraded: bool,
    pub warnings: Vec<String>,
}

impl ScopedKey {
    fn clean(key: String, scope: ConversationScope) -> Self {
        Self {
            key,
            effective_scope: scope,
            degraded: false,
            warnings: Vec::new(),
        }
    }
}

/// Compute the conversation key for a message.
///
/// Group messages key on `groupId` in place of `peerId`. A missing
/// `accountId` under `per-account-channel-peer` degrades to
/// `per-channel-peer` with a recorded warning; a missing peer (or group) id
/// under any peer scope is an error — silently merging unrelated
/// conversations is forbidden.
pub fn conversation_key(
    agent_id: &str,
    scope: ConversationScope,
    channel_id: &str,
    ctx: Option<&RoutingContext>,
) -> Result<ScopedKey> {
    if scope == ConversationScope::Main {
        return Ok(ScopedKey::clean(
            format!("agent:{agent_id}:main"),
            ConversationScope::Main,
        ));
    }

    let message_type = ctx
        .and_then(|c| c.message_type)
        .unwrap_or(MessageType::Dm);
    let party = match message_type {
        MessageType::Group => ctx.and_then(|c| c.group_id.as_deref()),
        MessageType::Dm => ctx.and_then(|c| c.peer_id.as_deref()),
    };
    let Some(party) = party else {
        return Err(Error::MissingPeerId(scope.as_str()));
    };
    let mt = message_type.as_str();

    match scope {
        ConversationScope::Main => unreachable!("handled above"),
        ConversationScope::PerPeer => Ok(ScopedKey::clean(
            format!("agent:{agent_id}:{mt}:{party}"),
            scope,
        )),
        ConversationScope::PerChannelPeer => Ok(ScopedKey::clean(
            format!("agent:{agent_id}:{channel_id}:{mt}:{party}"),
            scope,
        )),
        ConversationScope::PerAccountChannelPeer => {
            match ctx.and_then(|c| c.account_id.as_deref()) {
                Some(account) => Ok(ScopedKey::clean(
                    format!("agent:{agent_id}:{account}:{channel_id}:{mt}:{party}"),
                    scope,
                )),
                None => Ok(ScopedKey {
                    key: format!("agent:{agent_id}:{channel_id}:{mt}:{party}"),
                    effective_scope: ConversationScope::PerChannelPeer,
                    degraded: true,
                    warnings: vec![
                        "missing accountId; degraded to per-channel-peer".to_string(),
                    ],
                }),
            }
        },
    }
}
