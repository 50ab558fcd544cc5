use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::join_all;
use parking_lot::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use clipper_types::api::GatewayStats;
use clipper_types::events::{ClusterEnvelope, ModerationAction, ServerEvent};
use clipper_types::models::{ChannelId, ChatMessage};

use crate::cluster::ClusterBus;
use crate::config::HubConfig;
use crate::connection::ConnectionHandle;
use crate::error::HubError;
use crate::hub::{ChannelHub, Directory, HubContext};
use crate::metrics;
use crate::moderation::ModerationGate;
use crate::persistence::MessagePersistence;
use crate::presence::PresenceTracker;

/// A hub that closes between lookup and registration is replaced this many times.
const JOIN_ATTEMPTS: usize = 3;

/// Channel id to hub map for one server process.
///
/// Constructed once at startup and passed to whatever needs it. Hubs are
/// created on first join and remove themselves when they close.
#[derive(Clone)]
pub struct HubRegistry {
    hubs: Arc<Directory>,
    ctx: Arc<HubContext>,
    closing: Arc<AtomicBool>,
}

impl HubRegistry {
    pub fn new(
        config: HubConfig,
        bus: Arc<dyn ClusterBus>,
        persistence: Arc<dyn MessagePersistence>,
        gate: Arc<dyn ModerationGate>,
    ) -> Self {
        let presence = PresenceTracker::new(config.presence_ttl, config.typing_ttl);
        let ctx = HubContext {
            process_id: Uuid::new_v4(),
            config,
            bus,
            persistence,
            gate,
            presence,
            subscriptions: tokio::sync::Mutex::new(()),
        };

        Self {
            hubs: Arc::new(Mutex::new(HashMap::new())),
            ctx: Arc::new(ctx),
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.ctx.config
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.ctx.presence
    }

    pub fn gate(&self) -> &Arc<dyn ModerationGate> {
        &self.ctx.gate
    }

    /// Existing hub for the channel, or a freshly spawned one. Never creates
    /// two hubs for the same channel.
    pub fn get_or_create_hub(&self, channel_id: &ChannelId) -> Result<ChannelHub, HubError> {
        let mut hubs = self.hubs.lock();
        if self.closing.load(Ordering::Acquire) {
            return Err(HubError::Draining);
        }
        if let Some(hub) = hubs.get(channel_id) {
            return Ok(hub.clone());
        }

        let hub = ChannelHub::spawn(channel_id.clone(), self.ctx.clone(), Arc::downgrade(&self.hubs));
        hubs.insert(channel_id.clone(), hub.clone());
        metrics::channels_active(hubs.len());
        info!("Created hub for #{}", channel_id);

        Ok(hub)
    }

    pub fn hub(&self, channel_id: &ChannelId) -> Option<ChannelHub> {
        self.hubs.lock().get(channel_id).cloned()
    }

    /// Register `conn` with the channel's hub, replaying recent history first.
    pub async fn join(&self, channel_id: &ChannelId, conn: ConnectionHandle) -> Result<ChannelHub, HubError> {
        let history = self.recent_history(channel_id).await;

        for _ in 0..JOIN_ATTEMPTS {
            let hub = self.get_or_create_hub(channel_id)?;
            match hub.register(conn.clone(), history.clone()).await {
                Ok(()) => return Ok(hub),
                // Lost a race with idle expiry; the next lookup spawns a new hub
                Err(HubError::Closed) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(HubError::Closed)
    }

    async fn recent_history(&self, channel_id: &ChannelId) -> Vec<ChatMessage> {
        let limit = self.ctx.config.history_limit;
        if limit == 0 {
            return Vec::new();
        }

        let load = self.ctx.persistence.recent(channel_id, limit);
        match tokio::time::timeout(self.ctx.config.collaborator_timeout, load).await {
            Ok(Ok(history)) => history,
            Ok(Err(e)) => {
                warn!("failed to load history for #{}: {}", channel_id, e);
                Vec::new()
            }
            Err(_) => {
                warn!("loading history for #{} timed out", channel_id);
                Vec::new()
            }
        }
    }

    /// Close every connection `user_id` holds on the channel, on every node.
    pub async fn force_disconnect(
        &self,
        channel_id: &ChannelId,
        user_id: Uuid,
        reason: Option<String>,
    ) -> anyhow::Result<()> {
        let event = ServerEvent::moderation(channel_id.clone(), user_id, ModerationAction::Disconnect, reason);

        if let Some(hub) = self.hub(channel_id) {
            if hub.publish(event.clone()).await.is_ok() {
                return Ok(());
            }
        }

        // No live hub here; other nodes may still host the user
        let payload = serde_json::to_vec(&ClusterEnvelope {
            origin: self.ctx.process_id,
            event,
        })?;
        tokio::time::timeout(
            self.ctx.config.publish_timeout,
            self.ctx.bus.publish(channel_id, payload),
        )
        .await
        .map_err(|_| anyhow::anyhow!("cluster publish timed out"))??;

        Ok(())
    }

    pub fn stats(&self) -> GatewayStats {
        let hubs = self.hubs.lock();
        let mut stats = GatewayStats {
            active_channels: hubs.len(),
            ..GatewayStats::default()
        };
        for (channel_id, hub) in hubs.iter() {
            let count = hub.connection_count();
            stats.total_connections += count;
            stats.channel_stats.insert(channel_id.to_string(), count);
        }
        stats
    }

    /// Drain every hub and wait for all of them to close. New joins are
    /// refused from the moment this is called.
    pub async fn shutdown(&self) {
        // Flag and snapshot under one lock so no hub is spawned after the snapshot
        let hubs: Vec<ChannelHub> = {
            let hubs = self.hubs.lock();
            self.closing.store(true, Ordering::Release);
            hubs.values().cloned().collect()
        };
        info!("Draining {} channel hubs", hubs.len());
        join_all(hubs.iter().map(|hub| hub.shutdown())).await;

        self.hubs.lock().clear();
        metrics::channels_active(0);
        info!("All channel hubs closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipper_types::models::UserIdentity;

    use crate::cluster::MemoryBus;
    use crate::moderation::AllowAll;
    use crate::persistence::MemoryPersistence;

    fn registry() -> HubRegistry {
        HubRegistry::new(
            HubConfig::default(),
            Arc::new(MemoryBus::new()),
            Arc::new(MemoryPersistence::new()),
            Arc::new(AllowAll),
        )
    }

    fn conn(name: &str) -> (ConnectionHandle, tokio::sync::mpsc::Receiver<crate::connection::Outbound>) {
        ConnectionHandle::new(UserIdentity::new(Uuid::new_v4(), name), 16)
    }

    #[tokio::test]
    async fn test_get_or_create_returns_same_hub() {
        let registry = registry();
        let general = ChannelId::from("general");

        let first = registry.get_or_create_hub(&general).unwrap();
        let second = registry.get_or_create_hub(&general).unwrap();
        assert!(first.ptr_eq(&second));

        let other = registry.get_or_create_hub(&"random".into()).unwrap();
        assert!(!first.ptr_eq(&other));
        assert_eq!(registry.stats().active_channels, 2);
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create() {
        let registry = registry();
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.get_or_create_hub(&"busy".into()).unwrap() })
            })
            .collect();

        let hubs: Vec<ChannelHub> = join_all(tasks).await.into_iter().map(|r| r.unwrap()).collect();
        assert!(hubs.iter().all(|hub| hub.ptr_eq(&hubs[0])));
        assert_eq!(registry.stats().active_channels, 1);
    }

    #[tokio::test]
    async fn test_stats() {
        let registry = registry();
        let (a, _rx_a) = conn("alice");
        let (b, _rx_b) = conn("bob");
        let (c, _rx_c) = conn("carol");

        registry.join(&"general".into(), a).await.unwrap();
        registry.join(&"general".into(), b).await.unwrap();
        registry.join(&"random".into(), c).await.unwrap();

        let stats = registry.stats();
        assert_eq!(stats.total_connections, 3);
        assert_eq!(stats.active_channels, 2);
        assert_eq!(stats.channel_stats.get("general"), Some(&2));
        assert_eq!(stats.channel_stats.get("random"), Some(&1));
    }

    #[tokio::test]
    async fn test_shutdown_clears_registry_and_refuses_joins() {
        let registry = HubRegistry::new(
            HubConfig {
                shutdown_grace: std::time::Duration::from_millis(100),
                ..HubConfig::default()
            },
            Arc::new(MemoryBus::new()),
            Arc::new(MemoryPersistence::new()),
            Arc::new(AllowAll),
        );
        let (a, rx_a) = conn("alice");
        let hub = registry.join(&"general".into(), a.clone()).await.unwrap();
        drop(rx_a);

        registry.shutdown().await;

        assert_eq!(registry.stats(), GatewayStats::default());
        assert_eq!(hub.state(), crate::hub::HubState::Closed);
        assert!(a.is_closed());

        let (late, _rx) = conn("late");
        assert_eq!(registry.join(&"general".into(), late).await.err(), Some(HubError::Draining));
    }

    #[tokio::test]
    async fn test_shutdown_racing_joins_leaves_no_hub_behind() {
        let registry = HubRegistry::new(
            HubConfig {
                shutdown_grace: std::time::Duration::from_millis(50),
                ..HubConfig::default()
            },
            Arc::new(MemoryBus::new()),
            Arc::new(MemoryPersistence::new()),
            Arc::new(AllowAll),
        );

        let spawners: Vec<_> = (0..32)
            .map(|i| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    tokio::task::yield_now().await;
                    registry.get_or_create_hub(&ChannelId::from(format!("room-{i}")))
                })
            })
            .collect();
        registry.shutdown().await;

        for result in join_all(spawners).await {
            if let Ok(hub) = result.unwrap() {
                // Spawned before the flag: must have been drained with the rest
                assert_eq!(hub.state(), crate::hub::HubState::Closed);
            }
        }
        assert_eq!(registry.stats().active_channels, 0);
        assert_eq!(
            registry.get_or_create_hub(&"late".into()).err(),
            Some(HubError::Draining)
        );
    }
}
