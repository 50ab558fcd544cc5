//! Real-time chat gateway
//!
//! Per-channel hubs fan chat traffic out to WebSocket connections and bridge
//! it to other server processes over a cluster bus.
//!
//! ```text
//! Client (WS) → Connection → ChannelHub ─┬→ local Connections
//!                                         └→ ClusterBus → ChannelHub replicas
//! ```
//!
//! Every mutation of a hub's connection set happens on that hub's control
//! loop. Connections are owned by their hub; only the hub closes them.

pub mod cluster;
pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod metrics;
pub mod moderation;
pub mod persistence;
pub mod presence;
pub mod protocol;
pub mod rate_limit;
pub mod registry;

pub use cluster::{ClusterBus, MemoryBus, MessageHandler};
pub use config::{ConfigError, HubConfig, RateLimitConfig};
pub use connection::{ConnectionHandle, Outbound};
pub use error::{HubError, ProtocolError, Rejection};
pub use hub::{ChannelHub, HubState};
pub use moderation::{AllowAll, ModerationGate};
pub use persistence::{MemoryPersistence, MessagePersistence};
pub use presence::{PresenceStatus, PresenceTracker};
pub use rate_limit::RateLimiter;
pub use registry::HubRegistry;

#[cfg(feature = "redis")]
pub use cluster::RedisBus;
