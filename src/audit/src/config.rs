//! Delivery channel configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{DeliveryError, Result};

pub const DEFAULT_BROKER: &str = "localhost:9092";
pub const DEFAULT_TOPIC: &str = "default_audit_topic";

pub const ENV_BROKER_LIST: &str = "WARDEN_AUDIT_BROKER_LIST";
pub const ENV_TOPIC_NAME: &str = "WARDEN_AUDIT_TOPIC_NAME";
pub const ENV_MAX_QUEUE_SIZE: &str = "WARDEN_AUDIT_MAX_QUEUE_SIZE";
pub const ENV_MAX_FLUSH_INTERVAL_MS: &str = "WARDEN_AUDIT_MAX_FLUSH_INTERVAL_MS";
pub const ENV_MAX_BATCH_SIZE: &str = "WARDEN_AUDIT_MAX_BATCH_SIZE";

/// What happens to an entry enqueued while the queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the incoming entry
    #[default]
    DropNewest,

    /// Evict the oldest queued entry to make room
    DropOldest,
}

/// Audit delivery configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Sink connection targets, tried in order
    pub broker_addresses: Vec<String>,

    /// Topic every entry is published to
    pub topic_name: String,

    /// Maximum number of queued entries
    pub max_queue_size: usize,

    /// Longest time an entry waits before a flush
    pub max_flush_interval_ms: u64,

    /// Entries sent to the sink per call
    pub max_batch_size: usize,

    pub overflow_policy: OverflowPolicy,

    /// Per-address connect timeout
    pub connect_timeout_ms: u64,

    /// Upper bound on the final drain in `stop`
    pub shutdown_timeout_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            broker_addresses: vec![DEFAULT_BROKER.to_string()],
            topic_name: DEFAULT_TOPIC.to_string(),
            max_queue_size: 512,
            max_flush_interval_ms: 500,
            max_batch_size: 100,
            overflow_policy: OverflowPolicy::DropNewest,
            connect_timeout_ms: 2_000,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl DeliveryConfig {
    /// Load configuration from environment variables
    ///
    /// Missing or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(brokers) = lookup(ENV_BROKER_LIST) {
            let addresses: Vec<String> = brokers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            if !addresses.is_empty() {
                config.broker_addresses = addresses;
            }
        }

        if let Some(topic) = lookup(ENV_TOPIC_NAME) {
            let topic = topic.trim();
            if !topic.is_empty() {
                config.topic_name = topic.to_string();
            }
        }

        if let Some(size) = lookup(ENV_MAX_QUEUE_SIZE).and_then(|s| s.trim().parse().ok()) {
            config.max_queue_size = size;
        }

        if let Some(ms) = lookup(ENV_MAX_FLUSH_INTERVAL_MS).and_then(|s| s.trim().parse().ok()) {
            config.max_flush_interval_ms = ms;
        }

        if let Some(size) = lookup(ENV_MAX_BATCH_SIZE).and_then(|s| s.trim().parse().ok()) {
            config.max_batch_size = size;
        }

        config
    }

    /// Reject values the delivery loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_queue_size == 0 {
            return Err(DeliveryError::Config("max_queue_size must be positive".into()));
        }
        if self.max_batch_size == 0 {
            return Err(DeliveryError::Config("max_batch_size must be positive".into()));
        }
        if self.max_flush_interval_ms == 0 {
            return Err(DeliveryError::Config(
                "max_flush_interval_ms must be positive".into(),
            ));
        }
        if self.topic_name.is_empty() {
            return Err(DeliveryError::Config("topic_name must not be empty".into()));
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.max_flush_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
