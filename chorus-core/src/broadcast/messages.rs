//! Wire messages pushed to connected clients
//!
//! Each delta carries the id of the entity it addresses plus only the fields
//! that changed; unchanged fields are omitted when serialized.

use crate::channel::Channel;
use crate::participant::{Participant, StateChange};
use crate::types::{ChannelId, SessionId, UserId};
use serde::{Deserialize, Serialize};

/// Message handed to the transport layer for one or more sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    UserState(UserState),
    UserRemove(UserRemove),
    ChannelState(ChannelState),
    ChannelRemove(ChannelRemove),
    TextMessage(TextMessage),
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::UserState(_) => "user_state",
            ServerMessage::UserRemove(_) => "user_remove",
            ServerMessage::ChannelState(_) => "channel_state",
            ServerMessage::ChannelRemove(_) => "channel_remove",
            ServerMessage::TextMessage(_) => "text_message",
        }
    }
}

/// Participant state delta
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserState {
    pub session: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mute: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deaf: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suppressed: Option<bool>,
}

impl UserState {
    /// Every field, used when a participant first appears
    pub fn full(p: &Participant) -> Self {
        Self {
            session: p.session(),
            name: Some(p.name().to_string()),
            user_id: p.user_id(),
            channel_id: Some(p.channel()),
            mute: Some(p.is_muted()),
            deaf: Some(p.is_deafened()),
            suppressed: Some(p.is_suppressed()),
        }
    }

    pub fn from_change(session: SessionId, change: &StateChange) -> Self {
        Self {
            session,
            channel_id: change.channel,
            mute: change.mute,
            deaf: change.deaf,
            suppressed: change.suppressed,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRemove {
    pub session: SessionId,
}

/// Channel state delta
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelState {
    pub channel_id: ChannelId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ChannelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Full link list, only sent when a channel first appears
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<ChannelId>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links_add: Vec<ChannelId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links_remove: Vec<ChannelId>,
}

impl ChannelState {
    pub fn new(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            ..Default::default()
        }
    }

    pub fn full(channel: &Channel) -> Self {
        Self {
            channel_id: channel.id(),
            parent: channel.parent(),
            name: Some(channel.name().to_string()),
            links: Some(channel.links().iter().copied().collect()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRemove {
    pub channel_id: ChannelId,
}

/// Text message; exactly one of `sessions`, `channel_ids` or `tree_ids` is set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sessions: Vec<SessionId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channel_ids: Vec<ChannelId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tree_ids: Vec<ChannelId>,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_state_omits_unchanged_fields() {
        let change = StateChange {
            mute: Some(true),
            ..Default::default()
        };
        let msg = ServerMessage::UserState(UserState::from_change(SessionId(3), &change));

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"type": "user_state", "session": 3, "mute": true}));
    }

    #[test]
    fn test_channel_state_link_lists() {
        let mut state = ChannelState::new(ChannelId(2));
        state.links_add = vec![ChannelId(4)];

        let value = serde_json::to_value(ServerMessage::ChannelState(state)).unwrap();
        assert_eq!(
            value,
            json!({"type": "channel_state", "channel_id": 2, "links_add": [4]})
        );
    }

    #[test]
    fn test_text_message_tree_scope() {
        let msg = TextMessage {
            tree_ids: vec![ChannelId(1)],
            message: "hi".into(),
            ..Default::default()
        };

        let value = serde_json::to_value(ServerMessage::TextMessage(msg)).unwrap();
        assert_eq!(
            value,
            json!({"type": "text_message", "tree_ids": [1], "message": "hi"})
        );
    }

    #[test]
    fn test_message_parses_back() {
        let raw = r#"{"type":"user_remove","session":8}"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg, ServerMessage::UserRemove(UserRemove { session: SessionId(8) }));
        assert_eq!(msg.kind(), "user_remove");
    }
}
