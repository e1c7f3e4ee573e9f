//! Relay core — ingest, decode, fan out, acknowledge
//!
//! ```text
//! IngestSource ──► EventDecoder ──► RelayCore ──enqueue──► SubscriberRegistry
//!      ▲                               │                        │
//!      └──────── ack after fan-out ────┘            delivery worker per subscriber
//!                                                               │
//!                                                         TransportSink
//! ```
//!
//! The ingestion loop never performs subscriber I/O. Each round takes a
//! snapshot of subscriber ids, enqueues the event to every one of them and
//! only then acknowledges the message, so a crash between enqueue and ack
//! can redeliver but never silently lose a message.

use crate::config::RelayConfig;
use crate::decoder::EventDecoder;
use crate::delivery::DeliveryWorker;
use crate::error::{DecodeError, Result};
use crate::metrics::RelayMetrics;
use crate::registry::SubscriberRegistry;
use crate::sink::TransportSink;
use crate::source::IngestSource;
use crate::types::{DecodedEvent, EnqueueResult, LeaveReason, RawMessage, SubscriberId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Per-round fan-out tally
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Subscribers in the round's snapshot
    pub subscribers: usize,
    pub accepted: usize,
    pub dropped_oldest: usize,
    pub disconnected: usize,
    /// Left between the snapshot and the enqueue
    pub gone: usize,
}

impl FanOutReport {
    fn record(&mut self, result: EnqueueResult) {
        match result {
            EnqueueResult::Accepted => self.accepted += 1,
            EnqueueResult::DroppedOldest => self.dropped_oldest += 1,
            EnqueueResult::Disconnected => self.disconnected += 1,
            EnqueueResult::Gone => self.gone += 1,
        }
    }
}

/// Result of processing one ingested message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Decoded, fanned out and acknowledged (or ack attempted)
    FannedOut(FanOutReport),
    /// Payload could not be decoded; message discarded
    DecodeFailed(DecodeError),
}

struct HandleInner {
    registry: Arc<SubscriberRegistry>,
    sink: Arc<dyn TransportSink>,
    metrics: Arc<RelayMetrics>,
    write_timeout: Duration,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Join/leave entry points for the transport, shared by clone
///
/// `on_join` spawns a delivery task and must be called from within a
/// tokio runtime.
#[derive(Clone)]
pub struct RelayHandle {
    inner: Arc<HandleInner>,
}

impl RelayHandle {
    /// A client subscribed: register it and start its delivery worker
    pub fn on_join(&self) -> SubscriberId {
        let id = self.inner.registry.join();

        if let Some(rx) = self.inner.registry.receiver(id) {
            let worker = DeliveryWorker {
                rx,
                registry: self.inner.registry.clone(),
                sink: self.inner.sink.clone(),
                metrics: self.inner.metrics.clone(),
                write_timeout: self.inner.write_timeout,
            }
            .spawn();

            let mut workers = self
                .inner
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            workers.retain(|w| !w.is_finished());
            workers.push(worker);
        }

        id
    }

    /// A client went away
    pub fn on_leave(&self, id: SubscriberId) -> bool {
        self.inner.registry.leave(id)
    }

    /// Drop every subscriber, close their connections and wait for the
    /// delivery workers to finish
    pub async fn shutdown(&self) {
        let removed = self.inner.registry.leave_all(LeaveReason::Shutdown);
        let workers: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self
                .inner
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        for worker in workers {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Delivery worker ended abnormally");
            }
        }

        tracing::info!(subscribers = removed.len(), "Relay subscribers shut down");
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.inner.registry
    }

    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.inner.metrics
    }
}

/// Relay assembly: configuration, shared registry and transport
pub struct Relay {
    config: RelayConfig,
    handle: RelayHandle,
}

impl Relay {
    /// Validate the configuration and wire the registry to the transport
    pub fn new(config: RelayConfig, sink: Arc<dyn TransportSink>) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(RelayMetrics::new());
        let registry = Arc::new(SubscriberRegistry::from_config(&config, metrics.clone()));
        let handle = RelayHandle {
            inner: Arc::new(HandleInner {
                registry,
                sink,
                metrics,
                write_timeout: config.write_timeout(),
                workers: Mutex::new(Vec::new()),
            }),
        };

        tracing::info!(
            topic = %config.ingest.topic,
            group = %config.ingest.group,
            capacity = config.queue_capacity,
            policy = ?config.overflow_policy,
            "Relay configured"
        );

        Ok(Self { config, handle })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Handle for the transport's join/leave callbacks
    pub fn handle(&self) -> RelayHandle {
        self.handle.clone()
    }

    /// Ingestion engine bound to a source
    pub fn core<S: IngestSource>(&self, source: S) -> RelayCore<S> {
        RelayCore {
            source,
            decoder: EventDecoder::new(),
            registry: self.handle.inner.registry.clone(),
            metrics: self.handle.inner.metrics.clone(),
            cursors: HashMap::new(),
        }
    }
}

/// Single-task ingestion loop
pub struct RelayCore<S> {
    source: S,
    decoder: EventDecoder,
    registry: Arc<SubscriberRegistry>,
    metrics: Arc<RelayMetrics>,
    cursors: HashMap<String, u64>,
}

impl<S: IngestSource> RelayCore<S> {
    /// Process exactly one message from the source
    ///
    /// Only source failures are returned as errors; decode and ack
    /// failures are recorded and reported through the outcome.
    pub async fn step(&mut self) -> Result<StepOutcome> {
        let (raw, handle) = self.source.next().await?;
        self.metrics.record_received();

        let event = match self.decoder.decode(&raw) {
            Ok(event) => event,
            Err(err) => {
                self.metrics.record_decode_failure();
                tracing::warn!(
                    partition = %raw.partition_key,
                    offset = raw.offset,
                    error = %err,
                    "Discarding undecodable message"
                );
                match self.source.discard(handle).await {
                    Ok(()) => self.metrics.record_discarded(),
                    Err(e) => tracing::warn!(
                        partition = %raw.partition_key,
                        offset = raw.offset,
                        error = %e,
                        "Failed to discard message"
                    ),
                }
                return Ok(StepOutcome::DecodeFailed(err));
            }
        };
        self.metrics.record_decoded();

        if self.is_redelivery(&raw) {
            self.metrics.record_redelivered();
            tracing::debug!(
                partition = %raw.partition_key,
                offset = raw.offset,
                "Redelivered message"
            );
        }

        let report = self.fan_out(Arc::new(event));

        tracing::debug!(
            partition = %raw.partition_key,
            offset = raw.offset,
            subscribers = report.subscribers,
            dropped = report.dropped_oldest,
            disconnected = report.disconnected,
            "Event fanned out"
        );

        match self.source.ack(handle).await {
            Ok(()) => {
                self.metrics.record_acked();
                self.advance_cursor(&raw);
            }
            Err(e) => {
                self.metrics.record_ack_failure();
                tracing::warn!(
                    partition = %raw.partition_key,
                    offset = raw.offset,
                    error = %e,
                    "Ack failed, message may be redelivered"
                );
            }
        }

        Ok(StepOutcome::FannedOut(report))
    }

    /// Enqueue one event to every subscriber in a fresh snapshot
    pub fn fan_out(&self, event: Arc<DecodedEvent>) -> FanOutReport {
        let ids = self.registry.snapshot_ids();
        let mut report = FanOutReport {
            subscribers: ids.len(),
            ..Default::default()
        };

        for id in ids {
            report.record(self.registry.enqueue(id, event.clone()));
        }

        report
    }

    /// Run until the source fails
    pub async fn run(mut self) -> Result<()> {
        tracing::info!(source = self.source.name(), "Relay started");
        loop {
            if let Err(e) = self.step().await {
                tracing::error!(source = self.source.name(), error = %e, "Ingestion stopped");
                return Err(e);
            }
        }
    }

    /// Run until `shutdown` resolves or the source fails
    ///
    /// A message interrupted by shutdown before its ack is left to the
    /// source to redeliver.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(source = self.source.name(), "Relay started");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!(source = self.source.name(), "Relay stopping");
                    return Ok(());
                }
                result = self.step() => {
                    if let Err(e) = result {
                        tracing::error!(source = self.source.name(), error = %e, "Ingestion stopped");
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Highest acknowledged offset for a partition key
    pub fn cursor(&self, partition_key: &str) -> Option<u64> {
        self.cursors.get(partition_key).copied()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn is_redelivery(&self, raw: &RawMessage) -> bool {
        self.cursors
            .get(&raw.partition_key)
            .is_some_and(|cursor| raw.offset <= *cursor)
    }

    fn advance_cursor(&mut self, raw: &RawMessage) {
        let cursor = self
            .cursors
            .entry(raw.partition_key.clone())
            .or_insert(raw.offset);
        *cursor = (*cursor).max(raw.offset);
    }
}
