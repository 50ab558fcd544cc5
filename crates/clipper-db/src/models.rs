//! Database row types. These map directly to SQLite rows and stay separate
//! from the wire models in clipper-types.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use clipper_types::models::{ChannelId, ChatMessage};

pub struct MessageRow {
    pub id: String,
    pub channel_id: String,
    pub user_id: String,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub content: String,
    pub created_at: String,
}

impl MessageRow {
    pub fn from_message(message: &ChatMessage) -> Self {
        Self {
            id: message.message_id.to_string(),
            channel_id: message.channel_id.to_string(),
            user_id: message.user_id.to_string(),
            username: message.username.clone(),
            display_name: message.display_name.clone(),
            avatar_url: message.avatar_url.clone(),
            content: message.content.clone(),
            created_at: timestamp(&message.timestamp),
        }
    }

    pub fn into_message(self) -> Result<ChatMessage> {
        Ok(ChatMessage {
            message_id: Uuid::parse_str(&self.id).with_context(|| format!("bad message id {}", self.id))?,
            channel_id: ChannelId::from(self.channel_id),
            user_id: Uuid::parse_str(&self.user_id).with_context(|| format!("bad user id {}", self.user_id))?,
            username: self.username,
            display_name: self.display_name,
            avatar_url: self.avatar_url,
            content: self.content,
            timestamp: DateTime::parse_from_rfc3339(&self.created_at)
                .with_context(|| format!("bad timestamp {}", self.created_at))?
                .with_timezone(&Utc),
        })
    }
}

pub struct BanRow {
    pub channel_id: String,
    pub user_id: String,
    pub reason: Option<String>,
    pub expires_at: Option<String>,
    pub created_at: String,
}

/// Fixed-width RFC 3339 so text comparison in SQL orders chronologically.
pub fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}
