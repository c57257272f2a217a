//! Process configuration read from environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `USE_PERSISTENT_STORES` | `false` |
//! | `DATABASE_URL` | required when persistent |
//! | `REDIS_URL` | `redis://localhost:6379` |
//! | `OUTBOX_POLL_INTERVAL_MS` | `500` |
//! | `OUTBOX_BATCH_SIZE` | `100` |
//! | `OUTBOX_BASE_DELAY_MS` | `1000` |
//! | `OUTBOX_MAX_DELAY_MS` | `60000` |
//! | `CONSUMER_GROUP` | `shopfloor.deliver` |
//! | `CONSUMER_MAX_DELIVERIES` | `5` |

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::outbox::{OutboxPublisherConfig, RetryPolicy};
use crate::workers::IntegrationConsumerConfig;

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
pub const DEFAULT_CONSUMER_GROUP: &str = "shopfloor.deliver";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShopFloorConfig {
    /// Postgres store + Redis broker instead of the in-memory ones.
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub redis_url: String,
    pub outbox_poll_interval: Duration,
    pub outbox_batch_size: usize,
    pub outbox_base_delay: Duration,
    pub outbox_max_delay: Duration,
    pub consumer_group: String,
    pub consumer_max_deliveries: u32,
}

impl Default for ShopFloorConfig {
    fn default() -> Self {
        Self {
            use_persistent_stores: false,
            database_url: None,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            outbox_poll_interval: Duration::from_millis(500),
            outbox_batch_size: 100,
            outbox_base_delay: Duration::from_millis(1_000),
            outbox_max_delay: Duration::from_millis(60_000),
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
            consumer_max_deliveries: 5,
        }
    }
}

impl ShopFloorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source; unset variables take their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let vars = Vars(&lookup);

        let use_persistent_stores =
            vars.parse("USE_PERSISTENT_STORES")?.unwrap_or(defaults.use_persistent_stores);
        let database_url = vars.text("DATABASE_URL");
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let outbox_base_delay = vars
            .millis("OUTBOX_BASE_DELAY_MS")?
            .unwrap_or(defaults.outbox_base_delay);
        let outbox_max_delay = vars
            .millis("OUTBOX_MAX_DELAY_MS")?
            .unwrap_or(defaults.outbox_max_delay);
        if outbox_max_delay < outbox_base_delay {
            return Err(ConfigError::Invalid {
                name: "OUTBOX_MAX_DELAY_MS",
                value: outbox_max_delay.as_millis().to_string(),
                reason: "must not be below OUTBOX_BASE_DELAY_MS".to_string(),
            });
        }

        Ok(Self {
            use_persistent_stores,
            database_url,
            redis_url: vars.text("REDIS_URL").unwrap_or(defaults.redis_url),
            outbox_poll_interval: vars
                .millis("OUTBOX_POLL_INTERVAL_MS")?
                .unwrap_or(defaults.outbox_poll_interval),
            outbox_batch_size: vars
                .positive("OUTBOX_BATCH_SIZE")?
                .unwrap_or(defaults.outbox_batch_size),
            outbox_base_delay,
            outbox_max_delay,
            consumer_group: vars.text("CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            consumer_max_deliveries: vars
                .positive("CONSUMER_MAX_DELIVERIES")?
                .unwrap_or(defaults.consumer_max_deliveries),
        })
    }

    pub fn outbox_publisher(&self) -> OutboxPublisherConfig {
        OutboxPublisherConfig::new()
            .with_poll_interval(self.outbox_poll_interval)
            .with_batch_size(self.outbox_batch_size)
            .with_retry(RetryPolicy::exponential(
                self.outbox_base_delay,
                self.outbox_max_delay,
            ))
    }

    pub fn integration_consumer(&self) -> IntegrationConsumerConfig {
        IntegrationConsumerConfig::new()
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value; blank counts as unset.
    fn text(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, name: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.text(name)
            .map(|value| {
                value.parse::<T>().map_err(|e| ConfigError::Invalid {
                    name,
                    reason: e.to_string(),
                    value,
                })
            })
            .transpose()
    }

    fn positive<T>(&self, name: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr + Default + PartialOrd + ToString,
        T::Err: std::fmt::Display,
    {
        match self.parse::<T>(name)? {
            Some(v) if v <= T::default() => Err(ConfigError::Invalid {
                name,
                value: v.to_string(),
                reason: "must be greater than zero".to_string(),
            }),
            other => Ok(other),
        }
    }

    fn millis(&self, name: &'static str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.positive::<u64>(name)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ShopFloorConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ShopFloorConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn unset_variables_take_defaults() {
        assert_eq!(config(&[]).unwrap(), ShopFloorConfig::default());
    }

    #[test]
    fn persistent_stores_require_a_database_url() {
        assert_eq!(
            config(&[("USE_PERSISTENT_STORES", "true")]).unwrap_err(),
            ConfigError::Missing("DATABASE_URL")
        );

        let cfg = config(&[
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/shopfloor"),
        ])
        .unwrap();
        assert!(cfg.use_persistent_stores);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/shopfloor"));
    }

    #[test]
    fn numeric_values_are_validated() {
        let cfg = config(&[("OUTBOX_POLL_INTERVAL_MS", "50"), ("OUTBOX_BATCH_SIZE", "7")]).unwrap();
        assert_eq!(cfg.outbox_poll_interval, Duration::from_millis(50));
        assert_eq!(cfg.outbox_batch_size, 7);

        assert!(matches!(
            config(&[("OUTBOX_BATCH_SIZE", "0")]).unwrap_err(),
            ConfigError::Invalid { name: "OUTBOX_BATCH_SIZE", .. }
        ));
        assert!(matches!(
            config(&[("CONSUMER_MAX_DELIVERIES", "many")]).unwrap_err(),
            ConfigError::Invalid { name: "CONSUMER_MAX_DELIVERIES", .. }
        ));
        assert!(matches!(
            config(&[("USE_PERSISTENT_STORES", "yes")]).unwrap_err(),
            ConfigError::Invalid { name: "USE_PERSISTENT_STORES", .. }
        ));
    }

    #[test]
    fn max_delay_must_cover_base_delay() {
        assert!(matches!(
            config(&[("OUTBOX_BASE_DELAY_MS", "5000"), ("OUTBOX_MAX_DELAY_MS", "1000")]).unwrap_err(),
            ConfigError::Invalid { name: "OUTBOX_MAX_DELAY_MS", .. }
        ));
    }

    #[test]
    fn publisher_config_uses_the_backoff_window() {
        let cfg = config(&[("OUTBOX_BASE_DELAY_MS", "10"), ("OUTBOX_MAX_DELAY_MS", "40")]).unwrap();
        let retry = cfg.outbox_publisher().retry().clone().with_jitter(0.0);
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(10));
        assert_eq!(retry.delay_for_attempt(10), Duration::from_millis(40));
    }
}
