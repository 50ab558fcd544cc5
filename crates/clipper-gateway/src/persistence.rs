use async_trait::async_trait;
use parking_lot::Mutex;

use clipper_types::models::{ChannelId, ChatMessage};

/// Durable storage for chat messages.
///
/// `save` must be idempotent on `message_id`. The hub calls it off the
/// inbound path and only logs failures.
#[async_trait]
pub trait MessagePersistence: Send + Sync + 'static {
    async fn save(&self, message: &ChatMessage) -> anyhow::Result<()>;

    /// Most recent `limit` messages of a channel, oldest first.
    async fn recent(&self, channel_id: &ChannelId, limit: usize) -> anyhow::Result<Vec<ChatMessage>>;
}

/// In-process store for tests and single-node development.
#[derive(Default)]
pub struct MemoryPersistence {
    messages: Mutex<Vec<ChatMessage>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

#[async_trait]
impl MessagePersistence for MemoryPersistence {
    async fn save(&self, message: &ChatMessage) -> anyhow::Result<()> {
        let mut messages = self.messages.lock();
        if !messages.iter().any(|m| m.message_id == message.message_id) {
            messages.push(message.clone());
        }
        Ok(())
    }

    async fn recent(&self, channel_id: &ChannelId, limit: usize) -> anyhow::Result<Vec<ChatMessage>> {
        let messages = self.messages.lock();
        let mut recent: Vec<ChatMessage> = messages
            .iter()
            .rev()
            .filter(|m| &m.channel_id == channel_id)
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        Ok(recent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipper_types::models::UserIdentity;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_save_is_idempotent() {
        let store = MemoryPersistence::new();
        let user = UserIdentity::new(Uuid::new_v4(), "alice");
        let msg = ChatMessage::new("general".into(), &user, "hi".into());

        store.save(&msg).await.unwrap();
        store.save(&msg).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_recent_is_oldest_first_and_bounded() {
        let store = MemoryPersistence::new();
        let user = UserIdentity::new(Uuid::new_v4(), "alice");
        let general = ChannelId::from("general");

        for i in 0..5 {
            store
                .save(&ChatMessage::new(general.clone(), &user, format!("m{i}")))
                .await
                .unwrap();
        }
        store
            .save(&ChatMessage::new("other".into(), &user, "elsewhere".into()))
            .await
            .unwrap();

        let recent = store.recent(&general, 3).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["m2", "m3", "m4"]);
    }
}
