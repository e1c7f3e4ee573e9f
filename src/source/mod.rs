//! Ingest source trait — the ordered stream the relay consumes
//!
//! Sources hand out one message at a time together with an `AckHandle`.
//! The relay acknowledges only after fan-out, which makes delivery from the
//! source at-least-once.

use crate::error::Result;
use crate::types::RawMessage;
use async_trait::async_trait;
use futures::future::BoxFuture;

pub mod memory;
pub mod nats;

/// Ordered source of raw messages
#[async_trait]
pub trait IngestSource: Send {
    /// Wait for the next message
    ///
    /// Returns `RelayError::SourceUnavailable` once the source is exhausted
    /// or its broker can no longer be reached.
    async fn next(&mut self) -> Result<(RawMessage, AckHandle)>;

    /// Confirm the message has been fanned out
    async fn ack(&mut self, handle: AckHandle) -> Result<()> {
        handle.ack().await
    }

    /// Drop a message that can never be processed
    ///
    /// Not a success ack and not a redelivery request.
    async fn discard(&mut self, handle: AckHandle) -> Result<()> {
        handle.discard().await
    }

    /// Source name (e.g., "nats", "memory")
    fn name(&self) -> &str;
}

type AckFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// Acknowledgement capability for exactly one received message
pub struct AckHandle {
    partition_key: String,
    offset: u64,

    /// Confirms processing
    ack_fn: AckFn,

    /// Rejects the message for good
    discard_fn: AckFn,
}

impl AckHandle {
    /// Create a handle with ack/discard callbacks
    pub fn new(
        partition_key: impl Into<String>,
        offset: u64,
        ack_fn: impl FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static,
        discard_fn: impl FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static,
    ) -> Self {
        Self {
            partition_key: partition_key.into(),
            offset,
            ack_fn: Box::new(ack_fn),
            discard_fn: Box::new(discard_fn),
        }
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Acknowledge successful processing
    pub async fn ack(self) -> Result<()> {
        (self.ack_fn)().await
    }

    /// Reject permanently
    pub async fn discard(self) -> Result<()> {
        (self.discard_fn)().await
    }
}

impl std::fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckHandle")
            .field("partition_key", &self.partition_key)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}
