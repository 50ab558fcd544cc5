use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChannelId, ChatMessage, UserIdentity};

/// Maximum length of chat message content, counted in characters.
pub const MAX_CONTENT_CHARS: usize = 500;

/// Frames sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Post a chat message to the channel
    Message { content: String },

    /// Indicate the user is typing
    Typing,
}

impl ClientFrame {
    /// Wire names of every frame type a client may send.
    pub const TYPES: [&'static str; 2] = ["message", "typing"];
}

/// Events sent FROM server TO client, and carried between processes on the cluster bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A user-authored chat message
    Message(ChatMessage),

    /// A user joined or left the channel
    Presence(PresenceEvent),

    /// A user is typing (ephemeral)
    Typing(TypingEvent),

    /// An error addressed to a single connection
    Error(ErrorEvent),

    /// A moderation action against a user
    Moderation(ModerationEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceKind {
    Joined,
    Left,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub channel_id: ChannelId,
    pub user_id: Uuid,
    pub username: String,
    pub presence_type: PresenceKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingEvent {
    pub channel_id: ChannelId,
    pub user_id: Uuid,
    pub username: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub channel_id: ChannelId,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationAction {
    /// Close every connection the user holds on the channel
    Disconnect,
    /// Deliver a notice without closing anything
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationEvent {
    pub channel_id: ChannelId,
    pub user_id: Uuid,
    pub action: ModerationAction,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ServerEvent {
    pub fn presence(channel_id: ChannelId, user: &UserIdentity, presence_type: PresenceKind) -> Self {
        Self::Presence(PresenceEvent {
            channel_id,
            user_id: user.user_id,
            username: user.username.clone(),
            presence_type,
            timestamp: Utc::now(),
        })
    }

    pub fn typing(channel_id: ChannelId, user: &UserIdentity) -> Self {
        Self::Typing(TypingEvent {
            channel_id,
            user_id: user.user_id,
            username: user.username.clone(),
            timestamp: Utc::now(),
        })
    }

    pub fn error(channel_id: ChannelId, error: impl Into<String>) -> Self {
        Self::Error(ErrorEvent {
            channel_id,
            error: error.into(),
            timestamp: Utc::now(),
        })
    }

    pub fn moderation(
        channel_id: ChannelId,
        user_id: Uuid,
        action: ModerationAction,
        reason: Option<String>,
    ) -> Self {
        Self::Moderation(ModerationEvent {
            channel_id,
            user_id,
            action,
            reason,
            timestamp: Utc::now(),
        })
    }

    /// The channel this event belongs to.
    pub fn channel_id(&self) -> &ChannelId {
        match self {
            Self::Message(msg) => &msg.channel_id,
            Self::Presence(ev) => &ev.channel_id,
            Self::Typing(ev) => &ev.channel_id,
            Self::Error(ev) => &ev.channel_id,
            Self::Moderation(ev) => &ev.channel_id,
        }
    }

    /// Wire name of the event type, also used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Presence(_) => "presence",
            Self::Typing(_) => "typing",
            Self::Error(_) => "error",
            Self::Moderation(_) => "moderation",
        }
    }
}

/// A server event as it travels over the cluster bus, tagged with the
/// process that published it so that process can recognise its own echo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterEnvelope {
    pub origin: Uuid,
    pub event: ServerEvent,
}
