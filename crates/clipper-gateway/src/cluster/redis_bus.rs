//! Redis Pub/Sub cluster bus
//!
//! Publishes go through an auto-reconnecting `ConnectionManager`. A single
//! listener task holds a pattern subscription on `chat:*` and routes each
//! payload to the handler registered for its channel, so a reconnect never
//! has to replay individual SUBSCRIBE commands.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::task::JoinHandle;

use clipper_types::models::ChannelId;

use super::{ClusterBus, MessageHandler, channel_from_topic, topic};

const TOPIC_PATTERN: &str = "chat:*";
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

type Handlers = Arc<DashMap<ChannelId, MessageHandler>>;

pub struct RedisBus {
    publisher: ConnectionManager,
    handlers: Handlers,
    listener: JoinHandle<()>,
}

impl RedisBus {
    /// Connect to `redis_url` and start the listener task.
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let publisher = ConnectionManager::new(client.clone()).await?;

        let handlers: Handlers = Arc::new(DashMap::new());
        let listener = tokio::spawn(listen(client, handlers.clone()));

        tracing::info!("Redis cluster bus connected");
        Ok(Self {
            publisher,
            handlers,
            listener,
        })
    }
}

impl Drop for RedisBus {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

#[async_trait]
impl ClusterBus for RedisBus {
    async fn publish(&self, channel_id: &ChannelId, payload: Vec<u8>) -> anyhow::Result<()> {
        let mut conn = self.publisher.clone();
        conn.publish::<_, _, ()>(topic(channel_id), payload).await?;
        Ok(())
    }

    async fn subscribe(&self, channel_id: &ChannelId, handler: MessageHandler) -> anyhow::Result<()> {
        self.handlers.insert(channel_id.clone(), handler);
        Ok(())
    }

    async fn unsubscribe(&self, channel_id: &ChannelId) -> anyhow::Result<()> {
        self.handlers.remove(channel_id);
        Ok(())
    }
}

/// Reconnect delay that doubles per failed attempt up to a ceiling.
#[derive(Debug)]
struct Backoff {
    delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self { delay: RECONNECT_DELAY }
    }
}

impl Backoff {
    /// The wait before the next attempt.
    fn next_delay(&mut self) -> Duration {
        let delay = self.delay;
        self.delay = (delay * 2).min(MAX_RECONNECT_DELAY);
        delay
    }

    fn reset(&mut self) {
        self.delay = RECONNECT_DELAY;
    }
}

async fn listen(client: redis::Client, handlers: Handlers) {
    let mut backoff = Backoff::default();

    loop {
        match run_listener(&client, &handlers, &mut backoff).await {
            Ok(()) => tracing::warn!("Redis subscription stream ended"),
            Err(e) => tracing::error!("Redis listener error: {}", e),
        }

        let delay = backoff.next_delay();
        tracing::info!("Reconnecting to Redis in {:?}", delay);
        tokio::time::sleep(delay).await;
    }
}

/// The backoff resets once the subscription is in place, so it only grows
/// across consecutive failed attempts.
async fn run_listener(client: &redis::Client, handlers: &Handlers, backoff: &mut Backoff) -> anyhow::Result<()> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.psubscribe(TOPIC_PATTERN).await?;
    backoff.reset();
    tracing::debug!("Subscribed to {}", TOPIC_PATTERN);

    let mut messages = pubsub.on_message();
    while let Some(msg) = messages.next().await {
        let Some(channel) = channel_from_topic(msg.get_channel_name()) else {
            continue;
        };

        // Clone out of the map so a handler never runs under a shard lock
        let handler = handlers.get(&channel).map(|entry| entry.value().clone());

        if let Some(handler) = handler {
            handler(msg.get_payload_bytes().to_vec());
        }
    }

    Ok(())
}
