//! The database as the gateway's message store and moderation gate.

use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use clipper_gateway::{MessagePersistence, ModerationGate};
use clipper_types::models::{ChannelId, ChatMessage};

use crate::Database;
use crate::models::MessageRow;

#[async_trait]
impl MessagePersistence for Database {
    async fn save(&self, message: &ChatMessage) -> anyhow::Result<()> {
        let row = MessageRow::from_message(message);
        let inserted = self.run(move |db| db.insert_message(&row)).await?;
        if !inserted {
            debug!("message {} already stored", message.message_id);
        }
        Ok(())
    }

    async fn recent(&self, channel_id: &ChannelId, limit: usize) -> anyhow::Result<Vec<ChatMessage>> {
        let channel_id = channel_id.to_string();
        let limit = u32::try_from(limit).unwrap_or(u32::MAX);
        let rows = self.run(move |db| db.recent_messages(&channel_id, limit)).await?;
        rows.into_iter().map(MessageRow::into_message).collect()
    }
}

/// Anyone not banned from the channel may join and post.
#[async_trait]
impl ModerationGate for Database {
    async fn may_post(&self, user_id: Uuid, channel_id: &ChannelId) -> anyhow::Result<bool> {
        let channel_id = channel_id.to_string();
        let banned = self
            .run(move |db| db.is_banned(&channel_id, &user_id.to_string()))
            .await?;
        Ok(!banned)
    }
}

impl Database {
    /// Delete lapsed bans every `every` until the runtime shuts down.
    pub fn spawn_ban_purge(&self, every: Duration) -> JoinHandle<()> {
        let db = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            loop {
                tick.tick().await;
                match db.run(|db| db.purge_expired_bans()).await {
                    Ok(0) => {}
                    Ok(purged) => info!("Purged {} expired bans", purged),
                    Err(e) => warn!("ban purge failed: {}", e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipper_types::models::UserIdentity;

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let author = UserIdentity::new(Uuid::new_v4(), "alice");
        let general = ChannelId::from("general");

        let msg = ChatMessage::new(general.clone(), &author, "hi".into());
        db.save(&msg).await.unwrap();
        db.save(&msg).await.unwrap();

        let recent = db.recent(&general, 50).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].message_id, msg.message_id);
        assert_eq!(recent[0].content, "hi");
    }

    #[tokio::test]
    async fn test_banned_user_may_not_post() {
        let db = Database::open_in_memory().unwrap();
        let user = Uuid::new_v4();
        let general = ChannelId::from("general");

        assert!(db.may_post(user, &general).await.unwrap());
        assert!(db.may_join(user, &general).await.unwrap());

        db.ban_user("general", &user.to_string(), Some("spam"), None).unwrap();
        assert!(!db.may_post(user, &general).await.unwrap());
        assert!(!db.may_join(user, &general).await.unwrap());
        assert!(db.may_post(user, &"random".into()).await.unwrap());
    }

    #[tokio::test]
    async fn test_ban_purge_task_removes_lapsed_bans() {
        let db = Database::open_in_memory().unwrap();
        let forever = Uuid::new_v4().to_string();
        let lapsed = Uuid::new_v4().to_string();
        db.ban_user("general", &forever, None, None).unwrap();
        db.ban_user("general", &lapsed, None, Some(chrono::Utc::now() - chrono::Duration::minutes(1)))
            .unwrap();

        let task = db.spawn_ban_purge(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;
        task.abort();

        let remaining: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM chat_bans", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(remaining, 1);
        assert!(db.is_banned("general", &forever).unwrap());
    }
}
