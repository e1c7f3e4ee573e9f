//! Per-subscriber delivery worker
//!
//! One task per subscriber drains its queue into the transport. The
//! relay's fan-out only enqueues, so a slow connection only ever stalls
//! its own worker.

use crate::error::WriteError;
use crate::metrics::RelayMetrics;
use crate::registry::{Delivery, QueueReceiver, SubscriberRegistry};
use crate::sink::TransportSink;
use crate::types::LeaveReason;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub(crate) struct DeliveryWorker {
    pub(crate) rx: QueueReceiver,
    pub(crate) registry: Arc<SubscriberRegistry>,
    pub(crate) sink: Arc<dyn TransportSink>,
    pub(crate) metrics: Arc<RelayMetrics>,
    pub(crate) write_timeout: Duration,
}

impl DeliveryWorker {
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let id = self.rx.id();
        tracing::debug!(subscriber = %id, "Delivery worker started");

        loop {
            match self.rx.recv().await {
                Delivery::Event(event) => {
                    // A leave arriving mid-write is observed on the next recv.
                    let outcome =
                        match tokio::time::timeout(self.write_timeout, self.sink.send(id, &event))
                            .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(WriteError::Timeout(self.write_timeout)),
                        };

                    match outcome {
                        Ok(()) => self.metrics.record_delivered(),
                        Err(e) => {
                            self.metrics.record_write_failure();
                            tracing::warn!(subscriber = %id, error = %e, "Write failed, dropping subscriber");
                            self.teardown(LeaveReason::WriteFailed).await;
                            break;
                        }
                    }
                }
                Delivery::Drained => {
                    self.teardown(LeaveReason::Overflow).await;
                    break;
                }
                Delivery::Closed(reason) => {
                    self.sink.close(id, reason).await;
                    break;
                }
            }
        }

        tracing::debug!(subscriber = %id, "Delivery worker stopped");
    }

    async fn teardown(&mut self, reason: LeaveReason) {
        let id = self.rx.id();
        if self.registry.leave_with_reason(id, reason) {
            self.sink.close(id, reason).await;
            return;
        }

        // Someone else removed it first; honour their reason instead.
        // The registry marks the slot before unlisting it, so this is
        // already `Closed`.
        loop {
            if let Delivery::Closed(other) = self.rx.recv().await {
                self.sink.close(id, other).await;
                return;
            }
        }
    }
}
