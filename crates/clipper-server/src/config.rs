use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clipper_gateway::{ConfigError, HubConfig, RateLimitConfig};

const DEV_JWT_SECRET: &str = "dev-secret-change-me";

/// Everything the binary reads from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub db_path: PathBuf,
    /// `None` runs a single node on the in-memory bus.
    pub redis_url: Option<String>,
    pub allowed_origins: Vec<String>,
    /// `None` disables the `/internal` routes.
    pub internal_token: Option<String>,
    pub hub: HubConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let defaults = HubConfig::default();
        let secs = |key: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(parse::<u64>(get(key), key)?.map_or(default, Duration::from_secs))
        };

        let max_participants = parse(get("CHAT_MAX_PARTICIPANTS"), "CHAT_MAX_PARTICIPANTS")?
            .unwrap_or(defaults.max_participants);

        let hub = HubConfig {
            rate_limit: RateLimitConfig {
                per_minute: parse(get("CHAT_RATE_LIMIT_PER_MINUTE"), "CHAT_RATE_LIMIT_PER_MINUTE")?
                    .unwrap_or(defaults.rate_limit.per_minute),
                burst: parse(get("CHAT_RATE_LIMIT_BURST"), "CHAT_RATE_LIMIT_BURST")?
                    .unwrap_or(defaults.rate_limit.burst),
            },
            send_queue_depth: parse(get("CHAT_SEND_QUEUE_DEPTH"), "CHAT_SEND_QUEUE_DEPTH")?
                .unwrap_or(defaults.send_queue_depth),
            write_timeout: secs("CHAT_WRITE_TIMEOUT_SECS", defaults.write_timeout)?,
            ping_interval: secs("CHAT_PING_INTERVAL_SECS", defaults.ping_interval)?,
            pong_timeout: secs("CHAT_PONG_TIMEOUT_SECS", defaults.pong_timeout)?,
            shutdown_grace: secs("CHAT_SHUTDOWN_GRACE_SECS", defaults.shutdown_grace)?,
            idle_grace: secs("CHAT_IDLE_HUB_GRACE_SECS", defaults.idle_grace)?,
            presence_ttl: secs("CHAT_PRESENCE_TTL_SECS", defaults.presence_ttl)?,
            typing_ttl: secs("CHAT_TYPING_TTL_SECS", defaults.typing_ttl)?,
            maintenance_interval: secs("CHAT_MAINTENANCE_INTERVAL_SECS", defaults.maintenance_interval)?,
            history_limit: parse(get("CHAT_HISTORY_LIMIT"), "CHAT_HISTORY_LIMIT")?
                .unwrap_or(defaults.history_limit),
            ..defaults
        }
        .with_max_participants(max_participants);
        hub.validate()?;

        let allowed_origins: Vec<String> = get("WEBSOCKET_ALLOWED_ORIGINS")
            .unwrap_or_else(|| "http://localhost:5173".into())
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();

        Ok(Self {
            host: get("CLIPPER_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse(get("CLIPPER_PORT"), "CLIPPER_PORT")?.unwrap_or(3000),
            jwt_secret: get("CLIPPER_JWT_SECRET").unwrap_or_else(|| DEV_JWT_SECRET.into()),
            db_path: PathBuf::from(get("CLIPPER_DB_PATH").unwrap_or_else(|| "clipper-chat.db".into())),
            redis_url: get("REDIS_URL"),
            allowed_origins,
            internal_token: get("CHAT_INTERNAL_TOKEN"),
            hub,
        })
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

fn parse<T: FromStr>(value: Option<String>, key: &'static str) -> Result<Option<T>, ConfigError> {
    value
        .map(|v| {
            v.parse()
                .map_err(|_| ConfigError::InvalidEnv(key, format!("cannot parse {:?}", v)))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.redis_url, None);
        assert_eq!(config.internal_token, None);
        assert_eq!(config.allowed_origins, ["http://localhost:5173"]);
        assert_eq!(config.hub.max_participants, 100);
        assert_eq!(config.hub.rate_limit, RateLimitConfig::default());
        assert!(config.uses_dev_secret());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("CLIPPER_PORT", "8080"),
            ("REDIS_URL", "redis://cache:6379"),
            ("WEBSOCKET_ALLOWED_ORIGINS", "https://clpr.tv, *.clpr.tv,"),
            ("CHAT_RATE_LIMIT_PER_MINUTE", "60"),
            ("CHAT_RATE_LIMIT_BURST", "5"),
            ("CHAT_PING_INTERVAL_SECS", "20"),
            ("CHAT_PONG_TIMEOUT_SECS", "30"),
            ("CHAT_INTERNAL_TOKEN", "s3cret"),
            ("CHAT_HISTORY_LIMIT", "0"),
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.allowed_origins, ["https://clpr.tv", "*.clpr.tv"]);
        assert_eq!(config.hub.rate_limit, RateLimitConfig { per_minute: 60, burst: 5 });
        assert_eq!(config.hub.ping_interval, Duration::from_secs(20));
        assert_eq!(config.hub.pong_timeout, Duration::from_secs(30));
        assert_eq!(config.hub.history_limit, 0);
        assert_eq!(config.internal_token.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_participants_are_clamped() {
        let config = load(&[("CHAT_MAX_PARTICIPANTS", "5000")]).unwrap();
        assert_eq!(config.hub.max_participants, 1000);
    }

    #[test]
    fn test_empty_values_use_defaults() {
        let config = load(&[("CLIPPER_PORT", ""), ("REDIS_URL", "  ")]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.redis_url, None);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            load(&[("CLIPPER_PORT", "eighty")]),
            Err(ConfigError::InvalidEnv("CLIPPER_PORT", _))
        ));
        assert!(matches!(
            load(&[("CHAT_PING_INTERVAL_SECS", "60"), ("CHAT_PONG_TIMEOUT_SECS", "60")]),
            Err(ConfigError::Invalid("ping_interval", _))
        ));
        assert!(matches!(
            load(&[("CHAT_PRESENCE_TTL_SECS", "0")]),
            Err(ConfigError::Invalid("presence_ttl", _))
        ));
        assert!(matches!(
            load(&[("CHAT_PRESENCE_TTL_SECS", "40"), ("CHAT_MAINTENANCE_INTERVAL_SECS", "30")]),
            Err(ConfigError::Invalid("presence_ttl", _))
        ));
    }
}
