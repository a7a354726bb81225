//! Process configuration from environment variables.
//!
//! | variable | default |
//! |----------|---------|
//! | `RIPPLE_SERVICE` | required: `user`, `post`, `comment` or `media` |
//! | `REDIS_URL` | unset: in-process stream |
//! | `DATABASE_URL` | unset: in-memory store |
//! | `RIPPLE_CONSUMER_NAME` | `<service>-<HOSTNAME>`, or `<service>-consumer` without `HOSTNAME` |
//! | `RIPPLE_BLOCK_MS` | `0` (block until an entry arrives) |
//! | `RIPPLE_READ_BATCH` | `16` |
//! | `RIPPLE_READ_BACKOFF_MS` / `RIPPLE_READ_BACKOFF_MAX_MS` | `250` / `10000` |
//! | `RIPPLE_PENDING_RETRY_SECS` | `30` (`0` disables) |
//! | `RIPPLE_RECLAIM_IDLE_SECS` | `0` (disabled) |
//!
//! The consumer name must survive restarts: a loop only re-reads entries
//! still pending under its own name.

use core::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use ripple_cascade::{ConsumerSettings, Service};
use ripple_events::{Backoff, ReclaimPolicy};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub service: Service,
    pub redis_url: Option<String>,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub consumer: ConsumerSettings,
}

impl NodeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source (the process environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let service_raw = get("RIPPLE_SERVICE").ok_or(ConfigError::Missing("RIPPLE_SERVICE"))?;
        let service = Service::from_str(&service_raw).map_err(|e| ConfigError::Invalid {
            var: "RIPPLE_SERVICE",
            value: service_raw.clone(),
            reason: e.to_string(),
        })?;

        let name = get("RIPPLE_CONSUMER_NAME").unwrap_or_else(|| {
            let instance = get("HOSTNAME").unwrap_or_else(|| "consumer".to_string());
            format!("{}-{}", service.name(), instance.trim())
        });
        let mut consumer = ConsumerSettings::new(name);

        let block_ms: u64 = parse(&get, "RIPPLE_BLOCK_MS", 0)?;
        consumer.block = (block_ms > 0).then(|| Duration::from_millis(block_ms));

        let batch: usize = parse(&get, "RIPPLE_READ_BATCH", consumer.batch_size)?;
        if batch == 0 {
            return Err(ConfigError::Invalid {
                var: "RIPPLE_READ_BATCH",
                value: batch.to_string(),
                reason: "must be at least 1".into(),
            });
        }
        consumer.batch_size = batch;

        let initial: u64 = parse(&get, "RIPPLE_READ_BACKOFF_MS", 250)?;
        let max: u64 = parse(&get, "RIPPLE_READ_BACKOFF_MAX_MS", 10_000)?;
        if max < initial {
            return Err(ConfigError::Invalid {
                var: "RIPPLE_READ_BACKOFF_MAX_MS",
                value: max.to_string(),
                reason: format!("must not be below RIPPLE_READ_BACKOFF_MS ({initial})"),
            });
        }
        consumer.read_backoff = Backoff {
            initial: Duration::from_millis(initial),
            max: Duration::from_millis(max),
        };

        let retry_secs: u64 = parse(&get, "RIPPLE_PENDING_RETRY_SECS", 30)?;
        consumer.pending_retry_interval = (retry_secs > 0).then(|| Duration::from_secs(retry_secs));

        let reclaim_secs: u64 = parse(&get, "RIPPLE_RECLAIM_IDLE_SECS", 0)?;
        consumer.reclaim = (reclaim_secs > 0).then(|| ReclaimPolicy {
            min_idle: Duration::from_secs(reclaim_secs),
            batch_size: consumer.batch_size,
        });
        if consumer.reclaim.is_some() && consumer.pending_retry_interval.is_none() {
            return Err(ConfigError::Invalid {
                var: "RIPPLE_RECLAIM_IDLE_SECS",
                value: reclaim_secs.to_string(),
                reason: "reclaim runs on the pending sweep; set RIPPLE_PENDING_RETRY_SECS above 0".into(),
            });
        }

        Ok(Self {
            service,
            redis_url: get("REDIS_URL"),
            database_url: get("DATABASE_URL"),
            database_max_connections: parse(&get, "DATABASE_MAX_CONNECTIONS", 5)?,
            consumer,
        })
    }
}

fn parse<T>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<NodeConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        NodeConfig::from_lookup(|var| map.get(var).cloned())
    }

    #[test]
    fn defaults_for_a_dev_run() {
        let cfg = load(&[("RIPPLE_SERVICE", "comment")]).unwrap();

        assert_eq!(cfg.service, Service::Comment);
        assert!(cfg.redis_url.is_none() && cfg.database_url.is_none());
        assert_eq!(cfg.consumer.consumer, "comment-consumer");
        assert_eq!(cfg.consumer.block, None);
        assert_eq!(cfg.consumer.batch_size, 16);
        assert_eq!(cfg.consumer.pending_retry_interval, Some(Duration::from_secs(30)));
        assert_eq!(cfg.consumer.reclaim, None);
    }

    #[test]
    fn default_consumer_name_is_stable_across_loads() {
        let env = [("RIPPLE_SERVICE", "post"), ("HOSTNAME", "post-7f9c")];
        let first = load(&env).unwrap();
        let second = load(&env).unwrap();
        assert_eq!(first.consumer.consumer, "post-post-7f9c");
        assert_eq!(first.consumer.consumer, second.consumer.consumer);

        let bare = [("RIPPLE_SERVICE", "post")];
        assert_eq!(load(&bare).unwrap().consumer.consumer, load(&bare).unwrap().consumer.consumer);
    }

    #[test]
    fn explicit_values_are_applied() {
        let cfg = load(&[
            ("RIPPLE_SERVICE", "media"),
            ("REDIS_URL", "redis://cache:6379"),
            ("RIPPLE_CONSUMER_NAME", "media-a"),
            ("RIPPLE_BLOCK_MS", "5000"),
            ("RIPPLE_READ_BATCH", "4"),
            ("RIPPLE_PENDING_RETRY_SECS", "10"),
            ("RIPPLE_RECLAIM_IDLE_SECS", "120"),
        ])
        .unwrap();

        assert_eq!(cfg.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(cfg.consumer.consumer, "media-a");
        assert_eq!(cfg.consumer.block, Some(Duration::from_secs(5)));
        assert_eq!(
            cfg.consumer.reclaim,
            Some(ReclaimPolicy {
                min_idle: Duration::from_secs(120),
                batch_size: 4,
            })
        );
    }

    #[test]
    fn missing_or_bad_values_are_rejected() {
        assert_eq!(load(&[]).unwrap_err(), ConfigError::Missing("RIPPLE_SERVICE"));
        assert!(matches!(
            load(&[("RIPPLE_SERVICE", "gateway")]),
            Err(ConfigError::Invalid { var: "RIPPLE_SERVICE", .. })
        ));
        assert!(matches!(
            load(&[("RIPPLE_SERVICE", "user"), ("RIPPLE_READ_BATCH", "many")]),
            Err(ConfigError::Invalid { var: "RIPPLE_READ_BATCH", .. })
        ));
        assert!(matches!(
            load(&[
                ("RIPPLE_SERVICE", "user"),
                ("RIPPLE_PENDING_RETRY_SECS", "0"),
                ("RIPPLE_RECLAIM_IDLE_SECS", "60"),
            ]),
            Err(ConfigError::Invalid { var: "RIPPLE_RECLAIM_IDLE_SECS", .. })
        ));
    }
}
