//! Gateway tunables
//!
//! Defaults follow the chat service's production settings. The server binary
//! overrides them from the environment.

use std::time::Duration;

/// Hard ceiling on participants per channel, whatever the configuration says.
pub const MAX_PARTICIPANTS_CEILING: usize = 1000;

/// Token bucket settings for chat submissions, per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Sustained messages per minute. Zero disables limiting.
    pub per_minute: u32,
    /// Bucket capacity.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: 20,
            burst: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Participants allowed per channel (default 100)
    pub max_participants: usize,
    pub rate_limit: RateLimitConfig,
    /// Bounded depth of each connection's outbound queue (default 256)
    pub send_queue_depth: usize,
    /// Deadline for a single frame write (default 10s)
    pub write_timeout: Duration,
    /// Ping period (default 54s). Must be shorter than `pong_timeout`.
    pub ping_interval: Duration,
    /// Read deadline, reset by any inbound frame including pongs (default 60s)
    pub pong_timeout: Duration,
    /// How long a draining hub waits for clean closes (default 5s)
    pub shutdown_grace: Duration,
    /// How long an empty hub lingers to absorb reconnects (default 30s)
    pub idle_grace: Duration,
    /// Presence entries not refreshed within this window are stale (default 90s).
    /// Must be at least twice `maintenance_interval`.
    pub presence_ttl: Duration,
    /// Typing flag lifetime (default 3s)
    pub typing_ttl: Duration,
    /// Messages replayed to a joining connection (default 50)
    pub history_limit: usize,
    /// Bound on a single cluster publish (default 2s)
    pub publish_timeout: Duration,
    /// Bound on persistence and moderation calls (default 3s)
    pub collaborator_timeout: Duration,
    /// Presence heartbeat and sweep period (default 30s)
    pub maintenance_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_participants: 100,
            rate_limit: RateLimitConfig::default(),
            send_queue_depth: 256,
            write_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(54),
            pong_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(5),
            idle_grace: Duration::from_secs(30),
            presence_ttl: Duration::from_secs(90),
            typing_ttl: Duration::from_secs(3),
            history_limit: 50,
            publish_timeout: Duration::from_secs(2),
            collaborator_timeout: Duration::from_secs(3),
            maintenance_interval: Duration::from_secs(30),
        }
    }
}

impl HubConfig {
    /// Set the per-channel participant limit, clamped to `1..=MAX_PARTICIPANTS_CEILING`.
    pub fn with_max_participants(mut self, max: usize) -> Self {
        self.max_participants = max.clamp(1, MAX_PARTICIPANTS_CEILING);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, period) in [
            ("ping_interval", self.ping_interval),
            ("presence_ttl", self.presence_ttl),
            ("maintenance_interval", self.maintenance_interval),
        ] {
            if period.is_zero() {
                return Err(ConfigError::Invalid(name, "must be positive".into()));
            }
        }
        if self.ping_interval >= self.pong_timeout {
            return Err(ConfigError::Invalid(
                "ping_interval",
                "must be shorter than pong_timeout".into(),
            ));
        }
        // Every presence entry must be refreshed at least twice before it goes stale
        if self.presence_ttl < self.maintenance_interval * 2 {
            return Err(ConfigError::Invalid(
                "presence_ttl",
                "must be at least twice maintenance_interval".into(),
            ));
        }
        if self.send_queue_depth == 0 {
            return Err(ConfigError::Invalid("send_queue_depth", "must be positive".into()));
        }
        if self.rate_limit.per_minute > 0 && self.rate_limit.burst == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.burst",
                "must be positive when limiting is enabled".into(),
            ));
        }
        if self.max_participants == 0 || self.max_participants > MAX_PARTICIPANTS_CEILING {
            return Err(ConfigError::Invalid(
                "max_participants",
                format!("must be between 1 and {}", MAX_PARTICIPANTS_CEILING),
            ));
        }
        Ok(())
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid environment variable {0}: {1}")]
    InvalidEnv(&'static str, String),
    #[error("invalid setting {0}: {1}")]
    Invalid(&'static str, String),
}
