//! Cross-process fan-out
//!
//! Every server process subscribes to the channels it hosts a hub for and
//! publishes what its hubs accept. Delivery is best-effort and includes the
//! publishing process, so receivers must recognise their own traffic.
//!
//! - `MemoryBus` - in-process broker for single-node deployments and tests
//! - `RedisBus` - Redis Pub/Sub on `chat:<channel_id>` (feature `redis`)

mod memory;
#[cfg(feature = "redis")]
mod redis_bus;

pub use memory::MemoryBus;
#[cfg(feature = "redis")]
pub use redis_bus::RedisBus;

use std::sync::Arc;

use async_trait::async_trait;

use clipper_types::models::ChannelId;

/// Called once per payload received for a subscribed channel.
pub type MessageHandler = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

#[async_trait]
pub trait ClusterBus: Send + Sync + 'static {
    /// Deliver `payload` to every process subscribed to the channel.
    async fn publish(&self, channel_id: &ChannelId, payload: Vec<u8>) -> anyhow::Result<()>;

    /// Route the channel's traffic to `handler`, replacing any previous handler.
    async fn subscribe(&self, channel_id: &ChannelId, handler: MessageHandler) -> anyhow::Result<()>;

    /// Idempotent.
    async fn unsubscribe(&self, channel_id: &ChannelId) -> anyhow::Result<()>;
}

const TOPIC_PREFIX: &str = "chat:";

/// Redis channel name for a chat channel.
pub fn topic(channel_id: &ChannelId) -> String {
    format!("{}{}", TOPIC_PREFIX, channel_id)
}

/// Inverse of [`topic`]. `None` for names outside the chat namespace or
/// with an empty channel id.
pub fn channel_from_topic(name: &str) -> Option<ChannelId> {
    name.strip_prefix(TOPIC_PREFIX)
        .filter(|id| !id.is_empty())
        .map(ChannelId::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_routing() {
        let general = ChannelId::from("general");
        assert_eq!(topic(&general), "chat:general");
        assert_eq!(channel_from_topic(&topic(&general)), Some(general));

        // Only the first prefix is stripped
        assert_eq!(channel_from_topic("chat:chat:x"), Some(ChannelId::from("chat:x")));
        assert_eq!(channel_from_topic("chat:"), None);
        assert_eq!(channel_from_topic("presence:general"), None);
        assert_eq!(channel_from_topic("general"), None);
    }
}
