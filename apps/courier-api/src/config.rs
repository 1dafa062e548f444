//! Environment configuration for the API server.

use std::time::Duration;

use courier_core::DispatcherConfig;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub port: u16,
    pub database_url: String,
    pub poll_interval_secs: u64,
    pub dispatch_batch_size: i64,
    pub dispatch_stale_minutes: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            database_url: "sqlite:courier.db?mode=rwc".to_string(),
            poll_interval_secs: 60,
            dispatch_batch_size: 10,
            dispatch_stale_minutes: 15,
        }
    }
}

impl ApiConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_parse("PORT", defaults.port),
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            poll_interval_secs: env_parse("DISPATCH_POLL_INTERVAL_SECS", defaults.poll_interval_secs),
            dispatch_batch_size: env_parse("DISPATCH_BATCH_SIZE", defaults.dispatch_batch_size),
            dispatch_stale_minutes: env_parse("DISPATCH_STALE_MINUTES", defaults.dispatch_stale_minutes),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            batch_size: self.dispatch_batch_size,
            stale_after: Duration::from_secs(self.dispatch_stale_minutes * 60),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ApiConfig::default();
        assert_eq!(config.poll_interval_secs, 60);
        assert_eq!(config.dispatch_batch_size, 10);

        let dispatch = config.dispatcher_config();
        assert_eq!(dispatch.poll_interval, Duration::from_secs(60));
        assert_eq!(dispatch.stale_after, Duration::from_secs(900));
    }
}
