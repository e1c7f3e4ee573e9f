//! Transport sink — the outbound side of a subscriber connection
//!
//! The relay never touches sockets directly. A persistent-connection
//! server implements `TransportSink`, calls `RelayHandle::on_join` when a
//! client subscribes and `RelayHandle::on_leave` when it goes away.

use crate::error::WriteError;
use crate::types::{DecodedEvent, LeaveReason, SubscriberId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::mpsc;

/// Writes events to subscriber connections
#[async_trait]
pub trait TransportSink: Send + Sync {
    /// Write one event to a subscriber
    ///
    /// Called from that subscriber's delivery worker only, one call at a
    /// time, in queue order.
    async fn send(&self, id: SubscriberId, event: &DecodedEvent) -> Result<(), WriteError>;

    /// Release a subscriber's connection state
    ///
    /// Called exactly once per subscriber after it left the registry. For
    /// `LeaveReason::ClientLeft` the connection is already gone and only
    /// bookkeeping should be released; any other reason means the relay
    /// ended the subscription and the connection should be closed.
    async fn close(&self, id: SubscriberId, reason: LeaveReason) {
        let _ = (id, reason);
    }
}

/// In-process sink backed by one bounded channel per subscriber
///
/// Events are encoded as JSON text frames, ready for a websocket or STOMP
/// handler to forward. The handler owns the receiving half.
#[derive(Default)]
pub struct ChannelSink {
    senders: RwLock<HashMap<SubscriberId, mpsc::Sender<String>>>,
}

impl ChannelSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the outbound channel for a subscriber
    ///
    /// Replaces any previous channel for the same id.
    pub fn attach(&self, id: SubscriberId, capacity: usize) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.senders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        rx
    }

    /// Drop the outbound channel for a subscriber
    pub fn detach(&self, id: SubscriberId) -> bool {
        self.senders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    pub fn is_attached(&self, id: SubscriberId) -> bool {
        self.senders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }
}

#[async_trait]
impl TransportSink for ChannelSink {
    async fn send(&self, id: SubscriberId, event: &DecodedEvent) -> Result<(), WriteError> {
        let sender = self
            .senders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(WriteError::Closed)?;

        let frame = event
            .to_json()
            .map_err(|e| WriteError::Transport(e.to_string()))?;

        sender.send(frame).await.map_err(|_| WriteError::Closed)
    }

    async fn close(&self, id: SubscriberId, reason: LeaveReason) {
        if self.detach(id) {
            tracing::debug!(subscriber = %id, reason = %reason, "Channel detached");
        }
    }
}
