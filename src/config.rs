//! Relay configuration
//!
//! Static for the lifetime of the process. Every field has a default so a
//! partial JSON document deserializes cleanly.

use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default per-subscriber queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default transport write timeout in milliseconds
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5_000;

/// What to do when a subscriber's queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverflowPolicy {
    /// Evict the oldest queued event to make room; never blocks the relay
    #[default]
    DropOldest,
    /// Mark the subscriber disconnecting and stop delivering to it
    DisconnectOnOverflow,
}

/// Identity of the ingest stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestConfig {
    /// Topic (or subject) to consume
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Consumer group (or durable consumer name)
    #[serde(default = "default_group")]
    pub group: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            group: default_group(),
        }
    }
}

/// Process-wide relay configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Per-subscriber queue capacity (events)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default)]
    pub overflow_policy: OverflowPolicy,

    /// Timeout for a single transport send, in milliseconds
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Destination name subscribers listen on at the transport layer
    ///
    /// The relay itself never reads this; it is carried for the transport
    /// adapter that subscribes clients (a STOMP topic, a websocket path).
    #[serde(default = "default_destination")]
    pub destination: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ingest: IngestConfig::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow_policy: OverflowPolicy::default(),
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            destination: default_destination(),
        }
    }
}

impl RelayConfig {
    /// Parse a JSON configuration document and validate it
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the relay cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(RelayError::Config(
                "queueCapacity must be at least 1".to_string(),
            ));
        }
        if self.write_timeout_ms == 0 {
            return Err(RelayError::Config(
                "writeTimeoutMs must be greater than 0".to_string(),
            ));
        }
        if self.ingest.topic.is_empty() {
            return Err(RelayError::Config("ingest.topic must not be empty".to_string()));
        }
        if self.ingest.group.is_empty() {
            return Err(RelayError::Config("ingest.group must not be empty".to_string()));
        }
        Ok(())
    }

    /// Transport write timeout
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    /// Set the write timeout, rounded up to whole milliseconds
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout_ms =
            u64::try_from(timeout.as_micros().div_ceil(1000)).unwrap_or(u64::MAX);
        self
    }
}

fn default_topic() -> String {
    "cal_avg_crypto_currency".to_string()
}

fn default_group() -> String {
    "a3s-relay".to_string()
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_write_timeout_ms() -> u64 {
    DEFAULT_WRITE_TIMEOUT_MS
}

fn default_destination() -> String {
    "/topic/crypto".to_string()
}
