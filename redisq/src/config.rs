//! # Engine configuration
//!
//! `QueueConfig` carries the store address and the timing knobs of the
//! claim/reclaim protocol. Values can be layered from the environment
//! using the `PREFIX__KEY` convention:
//!
//! ```bash
//! export REDISQ__REDIS_URL=redis://cache:6379
//! export REDISQ__PROCESSING_TIMEOUT_SECS=900
//! export REDISQ__RECLAIM_INTERVAL_SECS=5
//! export REDISQ__MAX_DELIVERIES=10
//! ```

use std::time::Duration;

use crate::{QueueError, QueueResult};

/// Default claim lifetime (1 hour)
pub const DEFAULT_PROCESSING_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Default period of the background reclaim pass
pub const DEFAULT_RECLAIM_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration for a queue engine
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Address of the shared store
    pub redis_url: String,
    /// Claim lifetime used by `Engine::run`
    pub processing_timeout: Duration,
    /// Period of the background reclaim pass
    pub reclaim_interval: Duration,
    /// Expired claims delivered this many times go to the error queue;
    /// `None` requeues forever
    pub max_deliveries: Option<u32>,
    /// Buffer size of the in-process event stream
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost".to_string(),
            processing_timeout: DEFAULT_PROCESSING_TIMEOUT,
            reclaim_interval: DEFAULT_RECLAIM_INTERVAL,
            max_deliveries: None,
            event_capacity: 1000,
        }
    }
}

impl QueueConfig {
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = timeout;
        self
    }

    pub fn with_reclaim_interval(mut self, interval: Duration) -> Self {
        self.reclaim_interval = interval;
        self
    }

    pub fn with_max_deliveries(mut self, max_deliveries: u32) -> Self {
        self.max_deliveries = Some(max_deliveries);
        self
    }

    /// Defaults overridden by `PREFIX__*` environment variables
    pub fn from_env(prefix: &str) -> QueueResult<Self> {
        Self::from_vars(prefix, std::env::vars())
    }

    /// Defaults overridden by `PREFIX__*` pairs from any source
    pub fn from_vars<I, K, V>(prefix: &str, vars: I) -> QueueResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut config = Self::default();
        let prefix = format!("{}__", prefix);

        for (key, value) in vars {
            let Some(stripped) = key.as_ref().strip_prefix(&prefix) else {
                continue;
            };
            let value = value.into();

            match stripped.to_lowercase().as_str() {
                "redis_url" => config.redis_url = value,
                "processing_timeout_secs" => {
                    config.processing_timeout = Duration::from_secs(parse(stripped, &value)?)
                }
                "reclaim_interval_secs" => {
                    config.reclaim_interval = Duration::from_secs(parse(stripped, &value)?)
                }
                "max_deliveries" => {
                    let limit: u32 = parse(stripped, &value)?;
                    config.max_deliveries = (limit > 0).then_some(limit);
                }
                "event_capacity" => config.event_capacity = parse(stripped, &value)?,
                _ => {}
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> QueueResult<()> {
        // Deadlines are stored with second resolution
        if self.processing_timeout < Duration::from_secs(1) {
            return Err(QueueError::Config("processing_timeout must be at least 1s".to_string()));
        }
        if self.reclaim_interval.is_zero() {
            return Err(QueueError::Config("reclaim_interval must be positive".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(QueueError::Config("event_capacity must be positive".to_string()));
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> QueueResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| QueueError::Config(format!("invalid value for {}: {:?}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_timings() {
        let config = QueueConfig::default();
        assert_eq!(config.redis_url, "redis://localhost");
        assert_eq!(config.processing_timeout, Duration::from_secs(3600));
        assert_eq!(config.reclaim_interval, Duration::from_secs(10));
        assert_eq!(config.max_deliveries, None);
    }

    #[test]
    fn env_pairs_override_defaults() {
        let config = QueueConfig::from_vars(
            "REDISQ",
            [
                ("REDISQ__REDIS_URL", "redis://cache:6379"),
                ("REDISQ__PROCESSING_TIMEOUT_SECS", "90"),
                ("REDISQ__MAX_DELIVERIES", "4"),
                ("OTHER__REDIS_URL", "redis://ignored"),
            ],
        )
        .unwrap();

        assert_eq!(config.redis_url, "redis://cache:6379");
        assert_eq!(config.processing_timeout, Duration::from_secs(90));
        assert_eq!(config.max_deliveries, Some(4));
        assert_eq!(config.reclaim_interval, DEFAULT_RECLAIM_INTERVAL);
    }

    #[test]
    fn zero_delivery_limit_means_unlimited() {
        let config = QueueConfig::from_vars("Q", [("Q__MAX_DELIVERIES", "0")]).unwrap();
        assert_eq!(config.max_deliveries, None);
    }

    #[test]
    fn rejects_unparseable_values() {
        let result = QueueConfig::from_vars("Q", [("Q__RECLAIM_INTERVAL_SECS", "soon")]);
        assert!(matches!(result, Err(QueueError::Config(_))));

        let result = QueueConfig::from_vars("Q", [("Q__RECLAIM_INTERVAL_SECS", "0")]);
        assert!(matches!(result, Err(QueueError::Config(_))));
    }
}
