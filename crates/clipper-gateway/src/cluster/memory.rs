//! In-memory cluster bus built on `tokio::sync::broadcast`
//!
//! A `MemoryBus` and its peers share one broker. Each peer stands in for a
//! separate server process, which lets tests run a two-node cluster inside a
//! single runtime.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;

use clipper_types::models::ChannelId;

use super::{ClusterBus, MessageHandler};

const DEFAULT_BUFFER_SIZE: usize = 1024;

type Broker = Arc<DashMap<ChannelId, broadcast::Sender<Vec<u8>>>>;

pub struct MemoryBus {
    broker: Broker,
    subscriptions: DashMap<ChannelId, AbortHandle>,
    buffer_size: usize,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    /// Lagging subscribers lose messages once `buffer_size` are queued.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            broker: Arc::new(DashMap::new()),
            subscriptions: DashMap::new(),
            buffer_size,
        }
    }

    /// Another node attached to the same broker.
    pub fn peer(&self) -> Self {
        Self {
            broker: self.broker.clone(),
            subscriptions: DashMap::new(),
            buffer_size: self.buffer_size,
        }
    }

    pub fn is_subscribed(&self, channel_id: &ChannelId) -> bool {
        self.subscriptions.contains_key(channel_id)
    }

    fn sender(&self, channel_id: &ChannelId) -> broadcast::Sender<Vec<u8>> {
        self.broker
            .entry(channel_id.clone())
            .or_insert_with(|| broadcast::channel(self.buffer_size).0)
            .clone()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryBus {
    fn drop(&mut self) {
        for entry in self.subscriptions.iter() {
            entry.value().abort();
        }
    }
}

#[async_trait]
impl ClusterBus for MemoryBus {
    async fn publish(&self, channel_id: &ChannelId, payload: Vec<u8>) -> anyhow::Result<()> {
        // Err only means nobody is subscribed anywhere
        let _ = self.sender(channel_id).send(payload);
        Ok(())
    }

    async fn subscribe(&self, channel_id: &ChannelId, handler: MessageHandler) -> anyhow::Result<()> {
        let mut rx = self.sender(channel_id).subscribe();
        let channel = channel_id.clone();

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => handler(payload),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(channel = %channel, skipped, "cluster subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        if let Some(previous) = self.subscriptions.insert(channel_id.clone(), task.abort_handle()) {
            previous.abort();
        }
        Ok(())
    }

    async fn unsubscribe(&self, channel_id: &ChannelId) -> anyhow::Result<()> {
        if let Some((_, task)) = self.subscriptions.remove(channel_id) {
            task.abort();
        }
        self.broker
            .remove_if(channel_id, |_, tx| tx.receiver_count() == 0);
        Ok(())
    }
}
