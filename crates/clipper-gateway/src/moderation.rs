use async_trait::async_trait;
use uuid::Uuid;

use clipper_types::models::ChannelId;

/// Authorization decisions for channel participation.
///
/// Errors and timeouts are treated as a denial by the hub.
#[async_trait]
pub trait ModerationGate: Send + Sync + 'static {
    async fn may_post(&self, user_id: Uuid, channel_id: &ChannelId) -> anyhow::Result<bool>;

    /// Checked once at upgrade time. Defaults to the posting decision.
    async fn may_join(&self, user_id: Uuid, channel_id: &ChannelId) -> anyhow::Result<bool> {
        self.may_post(user_id, channel_id).await
    }
}

/// Gate that admits everyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl ModerationGate for AllowAll {
    async fn may_post(&self, _user_id: Uuid, _channel_id: &ChannelId) -> anyhow::Result<bool> {
        Ok(true)
    }
}
