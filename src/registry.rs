//! Subscriber registry — live subscribers and their bounded queues
//!
//! Each subscriber owns a bounded FIFO guarded by its own lock, so queue
//! operations for one subscriber are linearizable while different
//! subscribers never contend. The id map is only write-locked by `join`
//! and `leave`.
//!
//! ```text
//! enqueue(id, ev) ──► [slot id: Mutex<VecDeque>] ──notify──► delivery worker
//!                         │ full?
//!                         ├─ DropOldest: pop_front, push_back, Throttled
//!                         └─ DisconnectOnOverflow: Disconnecting, worker drains then leaves
//! ```

use crate::config::{OverflowPolicy, RelayConfig};
use crate::metrics::RelayMetrics;
use crate::types::{DecodedEvent, EnqueueResult, LeaveReason, SubscriberId, SubscriberState};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::Notify;

struct SlotInner {
    queue: VecDeque<Arc<DecodedEvent>>,
    state: SubscriberState,
    left: Option<LeaveReason>,
}

struct Slot {
    inner: Mutex<SlotInner>,
    notify: Notify,
}

impl Slot {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                queue: VecDeque::with_capacity(capacity.min(64)),
                state: SubscriberState::Healthy,
                left: None,
            }),
            notify: Notify::new(),
        }
    }

    // Every critical section leaves SlotInner consistent, so a poisoned
    // lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, SlotInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// What a delivery worker gets back when it asks for more work
#[derive(Debug)]
pub enum Delivery {
    /// Next event in FIFO order
    Event(Arc<DecodedEvent>),
    /// Subscriber overflowed and its remaining queue is now empty
    Drained,
    /// Subscriber has left; the queue was discarded
    Closed(LeaveReason),
}

/// Receiving half of one subscriber's queue, held by its delivery worker
pub struct QueueReceiver {
    id: SubscriberId,
    slot: Arc<Slot>,
    resume_at: usize,
}

impl QueueReceiver {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next event or for the subscriber to go away
    pub async fn recv(&mut self) -> Delivery {
        loop {
            {
                let mut inner = self.slot.lock();
                if let Some(reason) = inner.left {
                    return Delivery::Closed(reason);
                }
                if let Some(event) = inner.queue.pop_front() {
                    if inner.state == SubscriberState::Throttled
                        && inner.queue.len() <= self.resume_at
                    {
                        inner.state = SubscriberState::Healthy;
                        tracing::debug!(subscriber = %self.id, "Subscriber caught up");
                    }
                    return Delivery::Event(event);
                }
                if inner.state == SubscriberState::Disconnecting {
                    return Delivery::Drained;
                }
            }
            // Notify stores a permit, so a wakeup sent between the check
            // above and this await is not lost.
            self.slot.notify.notified().await;
        }
    }
}

/// Tracks live subscribers, their outbound queues and backpressure state
pub struct SubscriberRegistry {
    capacity: usize,
    policy: OverflowPolicy,
    next_id: AtomicU64,
    slots: RwLock<BTreeMap<SubscriberId, Arc<Slot>>>,
    metrics: Arc<RelayMetrics>,
}

impl SubscriberRegistry {
    /// Create a registry; capacity is clamped to a minimum of 1
    pub fn new(capacity: usize, policy: OverflowPolicy, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            capacity: capacity.max(1),
            policy,
            next_id: AtomicU64::new(1),
            slots: RwLock::new(BTreeMap::new()),
            metrics,
        }
    }

    pub fn from_config(config: &RelayConfig, metrics: Arc<RelayMetrics>) -> Self {
        Self::new(config.queue_capacity, config.overflow_policy, metrics)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Register a new subscriber with an empty queue
    pub fn join(&self) -> SubscriberId {
        let id = SubscriberId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(Slot::new(self.capacity)));
        self.metrics.record_joined();
        tracing::info!(subscriber = %id, capacity = self.capacity, "Subscriber joined");
        id
    }

    /// Remove a subscriber that went away on its own
    pub fn leave(&self, id: SubscriberId) -> bool {
        self.leave_with_reason(id, LeaveReason::ClientLeft)
    }

    /// Remove a subscriber and discard its queue
    ///
    /// Returns `false` if the subscriber had already left. Fan-out calls
    /// racing with this become no-ops.
    pub fn leave_with_reason(&self, id: SubscriberId, reason: LeaveReason) -> bool {
        // Mark the slot while still holding the map lock, so whoever finds
        // the id gone also finds the reason recorded.
        let (slot, discarded) = {
            let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
            let Some(slot) = slots.remove(&id) else {
                return false;
            };
            let discarded = {
                let mut inner = slot.lock();
                inner.left = Some(reason);
                let discarded = inner.queue.len();
                inner.queue.clear();
                discarded
            };
            (slot, discarded)
        };
        slot.notify.notify_one();

        self.metrics.record_left();
        tracing::info!(
            subscriber = %id,
            reason = %reason,
            discarded,
            "Subscriber left"
        );
        true
    }

    /// Remove every subscriber, returning the ids that were removed
    pub fn leave_all(&self, reason: LeaveReason) -> Vec<SubscriberId> {
        let ids: Vec<SubscriberId> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();

        ids.into_iter()
            .filter(|id| self.leave_with_reason(*id, reason))
            .collect()
    }

    /// Offer an event to one subscriber, applying the overflow policy
    pub fn enqueue(&self, id: SubscriberId, event: Arc<DecodedEvent>) -> EnqueueResult {
        let Some(slot) = self.slot(id) else {
            return EnqueueResult::Gone;
        };

        let result = {
            let mut inner = slot.lock();
            if inner.left.is_some() || inner.state == SubscriberState::Disconnecting {
                return EnqueueResult::Gone;
            }

            if inner.queue.len() < self.capacity {
                inner.queue.push_back(event);
                EnqueueResult::Accepted
            } else {
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        inner.queue.pop_front();
                        inner.queue.push_back(event);
                        if inner.state == SubscriberState::Healthy {
                            inner.state = SubscriberState::Throttled;
                            tracing::debug!(subscriber = %id, "Subscriber throttled");
                        }
                        EnqueueResult::DroppedOldest
                    }
                    OverflowPolicy::DisconnectOnOverflow => {
                        inner.state = SubscriberState::Disconnecting;
                        EnqueueResult::Disconnected
                    }
                }
            }
        };
        slot.notify.notify_one();

        match result {
            EnqueueResult::Accepted => self.metrics.record_enqueued(),
            EnqueueResult::DroppedOldest => {
                self.metrics.record_enqueued();
                self.metrics.record_dropped_oldest();
            }
            EnqueueResult::Disconnected => {
                self.metrics.record_overflow_disconnect();
                tracing::warn!(
                    subscriber = %id,
                    capacity = self.capacity,
                    "Subscriber queue overflowed, disconnecting"
                );
            }
            EnqueueResult::Gone => {}
        }

        result
    }

    /// Ids eligible for the next fan-out round, in join order
    pub fn snapshot_ids(&self) -> Vec<SubscriberId> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, slot)| {
                let inner = slot.lock();
                inner.left.is_none() && inner.state != SubscriberState::Disconnecting
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// Receiving half for a subscriber's delivery worker
    pub fn receiver(&self, id: SubscriberId) -> Option<QueueReceiver> {
        self.slot(id).map(|slot| QueueReceiver {
            id,
            slot,
            resume_at: self.capacity / 2,
        })
    }

    /// Number of registered subscribers, including disconnecting ones
    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.slot(id).is_some()
    }

    pub fn state(&self, id: SubscriberId) -> Option<SubscriberState> {
        let slot = self.slot(id)?;
        let state = slot.lock().state;
        Some(state)
    }

    pub fn queue_len(&self, id: SubscriberId) -> Option<usize> {
        let slot = self.slot(id)?;
        let len = slot.lock().queue.len();
        Some(len)
    }

    /// Copy of a subscriber's pending events, oldest first
    pub fn queued_events(&self, id: SubscriberId) -> Option<Vec<Arc<DecodedEvent>>> {
        let slot = self.slot(id)?;
        let events = slot.lock().queue.iter().cloned().collect();
        Some(events)
    }

    fn slot(&self, id: SubscriberId) -> Option<Arc<Slot>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }
}
