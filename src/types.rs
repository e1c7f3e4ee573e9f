//! Core relay types
//!
//! `DecodedEvent` keeps the snake_case field names emitted by the upstream
//! aggregation job so subscribers receive the same JSON shape it produced.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A raw message as delivered by the ingest source
///
/// Immutable once received. The relay owns it until the message is
/// acknowledged or discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Opaque payload bytes
    pub payload: Bytes,

    /// Partition key (Kafka record key, NATS subject, ...)
    pub partition_key: String,

    /// Source-assigned offset, monotonically increasing per partition key
    pub offset: u64,
}

impl RawMessage {
    /// Create a new raw message
    pub fn new(partition_key: impl Into<String>, offset: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            partition_key: partition_key.into(),
            offset,
        }
    }
}

/// Averaged market figures for one cryptocurrency
///
/// Everything except `cryptocurrency_id` may be omitted or null upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedEvent {
    pub cryptocurrency_id: i64,

    #[serde(default)]
    pub avg_price: Option<f64>,

    #[serde(default)]
    pub avg_market_cap: Option<f64>,

    #[serde(default)]
    pub avg_market_cap_rank: Option<f64>,

    #[serde(default)]
    pub avg_total_volume: Option<f64>,

    #[serde(default)]
    pub avg_high_24h: Option<f64>,

    #[serde(default)]
    pub avg_low_24h: Option<f64>,

    #[serde(default)]
    pub avg_price_change_pct: Option<f64>,

    #[serde(default)]
    pub avg_market_cap_change_pct: Option<f64>,
}

impl DecodedEvent {
    /// Create an event with only the identifier set
    pub fn new(cryptocurrency_id: i64) -> Self {
        Self {
            cryptocurrency_id,
            avg_price: None,
            avg_market_cap: None,
            avg_market_cap_rank: None,
            avg_total_volume: None,
            avg_high_24h: None,
            avg_low_24h: None,
            avg_price_change_pct: None,
            avg_market_cap_change_pct: None,
        }
    }

    /// Set the average price
    pub fn with_price(mut self, price: f64) -> Self {
        self.avg_price = Some(price);
        self
    }

    /// Encode as the JSON text frame sent to subscribers
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Opaque subscriber connection id
///
/// Ids are allocated in increasing order and never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Numeric value of the id
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Backpressure state of a subscriber
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubscriberState {
    /// Keeping up
    #[default]
    Healthy,
    /// Queue hit capacity and events are being evicted
    Throttled,
    /// Overflowed under disconnect-on-overflow; draining before teardown
    Disconnecting,
}

/// Outcome of offering one event to one subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// Appended to the queue
    Accepted,
    /// Appended after evicting the oldest queued event
    DroppedOldest,
    /// Queue was full; the subscriber is now disconnecting
    Disconnected,
    /// Subscriber unknown, already left, or disconnecting
    Gone,
}

/// Why a subscriber left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    /// The client went away or unsubscribed
    ClientLeft,
    /// Queue overflow under disconnect-on-overflow
    Overflow,
    /// A transport write failed or timed out
    WriteFailed,
    /// The relay is shutting down
    Shutdown,
}

impl fmt::Display for LeaveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LeaveReason::ClientLeft => "client_left",
            LeaveReason::Overflow => "overflow",
            LeaveReason::WriteFailed => "write_failed",
            LeaveReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}
