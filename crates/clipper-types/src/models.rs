use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque chat channel identifier. Channels are addressed by whatever id the
/// HTTP layer hands us; the hub never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ChannelId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identity of an already-authenticated user, as established at the upgrade layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl UserIdentity {
    pub fn new(user_id: Uuid, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            display_name: None,
            avatar_url: None,
        }
    }

    /// Display name, falling back to the username when none is set.
    pub fn display_name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.username)
    }
}

/// A user-authored chat message as broadcast, persisted and replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub channel_id: ChannelId,
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub content: String,
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Build a new message authored by `author`, stamped with a fresh id and the current time.
    pub fn new(channel_id: ChannelId, author: &UserIdentity, content: String) -> Self {
        Self {
            channel_id,
            user_id: author.user_id,
            username: author.username.clone(),
            display_name: author.display_name().to_string(),
            avatar_url: author.avatar_url.clone(),
            content,
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        }
    }
}
