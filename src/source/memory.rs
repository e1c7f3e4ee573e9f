//! In-memory ingest source for testing and single-process use

use super::{AckHandle, IngestSource};
use crate::error::{RelayError, Result};
use crate::types::RawMessage;
use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// Record of what the relay acknowledged or discarded
#[derive(Debug, Default)]
pub struct AckLedger {
    acked: Mutex<Vec<(String, u64)>>,
    discarded: Mutex<Vec<(String, u64)>>,
}

impl AckLedger {
    /// Acknowledged (partition key, offset) pairs in ack order
    pub fn acked(&self) -> Vec<(String, u64)> {
        self.acked.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Discarded (partition key, offset) pairs in discard order
    pub fn discarded(&self) -> Vec<(String, u64)> {
        self.discarded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push_acked(&self, key: String, offset: u64) {
        self.acked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((key, offset));
    }

    fn push_discarded(&self, key: String, offset: u64) {
        self.discarded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((key, offset));
    }
}

/// Producing half of a `MemorySource`
///
/// Offsets are assigned per partition key, starting at 0.
#[derive(Clone)]
pub struct MemoryPublisher {
    tx: mpsc::UnboundedSender<RawMessage>,
    offsets: Arc<Mutex<HashMap<String, u64>>>,
}

impl MemoryPublisher {
    /// Publish a raw payload, returning its offset
    pub fn publish(&self, partition_key: &str, payload: impl Into<Bytes>) -> Result<u64> {
        let offset = {
            let mut offsets = self.offsets.lock().unwrap_or_else(PoisonError::into_inner);
            let next = offsets.entry(partition_key.to_string()).or_insert(0);
            let offset = *next;
            *next += 1;
            offset
        };

        self.redeliver(RawMessage::new(partition_key, offset, payload))?;
        Ok(offset)
    }

    /// Publish a value serialized as JSON
    pub fn publish_json<T: Serialize>(&self, partition_key: &str, value: &T) -> Result<u64> {
        let payload = serde_json::to_vec(value)?;
        self.publish(partition_key, payload)
    }

    /// Push a message as-is, keeping its offset
    pub fn redeliver(&self, message: RawMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| RelayError::SourceUnavailable("memory source dropped".to_string()))
    }
}

/// Channel-backed ingest source
pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<RawMessage>,
    ledger: Arc<AckLedger>,
}

impl MemorySource {
    /// Create a connected publisher/source pair
    pub fn channel() -> (MemoryPublisher, MemorySource) {
        let (tx, rx) = mpsc::unbounded_channel();
        let publisher = MemoryPublisher {
            tx,
            offsets: Arc::new(Mutex::new(HashMap::new())),
        };
        let source = MemorySource {
            rx,
            ledger: Arc::new(AckLedger::default()),
        };
        (publisher, source)
    }

    /// Shared view of acknowledgements made through this source
    pub fn ledger(&self) -> Arc<AckLedger> {
        self.ledger.clone()
    }
}

#[async_trait]
impl IngestSource for MemorySource {
    async fn next(&mut self) -> Result<(RawMessage, AckHandle)> {
        let message = self.rx.recv().await.ok_or_else(|| {
            RelayError::SourceUnavailable("memory source exhausted".to_string())
        })?;

        let key = message.partition_key.clone();
        let offset = message.offset;
        let ack_ledger = self.ledger.clone();
        let discard_ledger = self.ledger.clone();
        let ack_key = key.clone();

        let handle = AckHandle::new(
            key.clone(),
            offset,
            move || {
                async move {
                    ack_ledger.push_acked(ack_key, offset);
                    Ok(())
                }
                .boxed()
            },
            move || {
                async move {
                    discard_ledger.push_discarded(key, offset);
                    Ok(())
                }
                .boxed()
            },
        );

        Ok((message, handle))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
