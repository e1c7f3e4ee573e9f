//! # a3s-relay
//!
//! Bounded fan-out from one ordered event stream to live subscriber
//! connections.
//!
//! ## Overview
//!
//! `a3s-relay` consumes raw messages from an ingest source (NATS JetStream,
//! in-memory, ...), decodes them into a fixed-schema event and republishes
//! every event to all currently connected subscribers. Each subscriber has
//! its own bounded queue and delivery task, so a slow connection never
//! holds back ingestion or the other subscribers.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use a3s_relay::{ChannelSink, MemorySource, Relay, RelayConfig};
//!
//! # async fn example() -> a3s_relay::Result<()> {
//! let sink = Arc::new(ChannelSink::new());
//! let relay = Relay::new(RelayConfig::default(), sink.clone())?;
//!
//! // The transport registers a client and forwards its frames
//! let handle = relay.handle();
//! let id = handle.on_join();
//! let mut frames = sink.attach(id, 64);
//!
//! // Feed the relay
//! let (publisher, source) = MemorySource::channel();
//! publisher.publish("1", r#"{"cryptocurrency_id": 1, "avg_price": 64012.5}"#)?;
//!
//! let mut core = relay.core(source);
//! core.step().await?;
//!
//! let frame = frames.recv().await;
//! assert!(frame.is_some());
//! # Ok(())
//! # }
//! ```
//!
//! ## Delivery semantics
//!
//! - **Per-subscriber FIFO**, no ordering promise across subscribers
//! - **At-least-once** from the source: ack only after fan-out
//! - **Overflow policy**: `DropOldest` (default) or `DisconnectOnOverflow`
//! - **Decode failures** are counted, logged and discarded; the loop keeps going
//!
//! ## Architecture
//!
//! - **IngestSource** trait — ordered, individually acknowledged input
//! - **EventDecoder** — raw payload to `DecodedEvent`
//! - **SubscriberRegistry** — bounded per-subscriber queues and backpressure state
//! - **RelayCore** — ingest, decode, fan out, ack
//! - **TransportSink** trait — writes to subscriber connections

pub mod config;
pub mod decoder;
mod delivery;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod relay;
pub mod sink;
pub mod source;
pub mod types;

// Re-export core types
pub use config::{IngestConfig, OverflowPolicy, RelayConfig};
pub use decoder::EventDecoder;
pub use error::{DecodeError, RelayError, Result, WriteError};
pub use metrics::{MetricsSnapshot, RelayMetrics};
pub use registry::{Delivery, QueueReceiver, SubscriberRegistry};
pub use relay::{FanOutReport, Relay, RelayCore, RelayHandle, StepOutcome};
pub use sink::{ChannelSink, TransportSink};
pub use source::{AckHandle, IngestSource};
pub use types::{
    DecodedEvent, EnqueueResult, LeaveReason, RawMessage, SubscriberId, SubscriberState,
};

// Re-export sources for convenience
pub use source::memory::{AckLedger, MemoryPublisher, MemorySource};
pub use source::nats::{NatsSource, NatsSourceConfig, StorageType};
