//! Relay counters
//!
//! Lock-free counters updated from the ingestion task and the delivery
//! workers. Overflow outcomes always land here, never only in logs.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct RelayMetrics {
    received: AtomicU64,
    decoded: AtomicU64,
    decode_failures: AtomicU64,
    discarded: AtomicU64,
    redelivered: AtomicU64,
    enqueued: AtomicU64,
    dropped_oldest: AtomicU64,
    overflow_disconnects: AtomicU64,
    delivered: AtomicU64,
    write_failures: AtomicU64,
    acked: AtomicU64,
    ack_failures: AtomicU64,
    joined: AtomicU64,
    left: AtomicU64,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub received: u64,
    pub decoded: u64,
    pub decode_failures: u64,
    pub discarded: u64,
    pub redelivered: u64,
    pub enqueued: u64,
    pub dropped_oldest: u64,
    pub overflow_disconnects: u64,
    pub delivered: u64,
    pub write_failures: u64,
    pub acked: u64,
    pub ack_failures: u64,
    pub joined: u64,
    pub left: u64,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decoded(&self) {
        self.decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_redelivered(&self) {
        self.redelivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped_oldest(&self) {
        self.dropped_oldest.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_overflow_disconnect(&self) {
        self.overflow_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_acked(&self) {
        self.acked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ack_failure(&self) {
        self.ack_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_joined(&self) {
        self.joined.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_left(&self) {
        self.left.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy out the current counter values
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            decoded: self.decoded.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            redelivered: self.redelivered.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped_oldest: self.dropped_oldest.load(Ordering::Relaxed),
            overflow_disconnects: self.overflow_disconnects.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
            left: self.left.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        for counter in [
            &self.received,
            &self.decoded,
            &self.decode_failures,
            &self.discarded,
            &self.redelivered,
            &self.enqueued,
            &self.dropped_oldest,
            &self.overflow_disconnects,
            &self.delivered,
            &self.write_failures,
            &self.acked,
            &self.ack_failures,
            &self.joined,
            &self.left,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
