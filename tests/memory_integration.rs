//! Memory source integration tests
//!
//! End-to-end tests running the full relay with the in-memory source and
//! the channel sink. Covers fan-out, ordering, decode robustness, overflow
//! policies, write timeouts, dynamic joins/leaves and shutdown.

use a3s_relay::{
    ChannelSink, DecodedEvent, LeaveReason, MemorySource, OverflowPolicy, Relay, RelayConfig,
    RelayError, StepOutcome, SubscriberId, TransportSink, WriteError,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

fn event_json(id: i64) -> String {
    serde_json::json!({
        "cryptocurrency_id": id,
        "avg_price": 100.0 + id as f64,
        "avg_market_cap": 1.0e9,
        "avg_market_cap_rank": 3.0,
        "avg_total_volume": 2.5e8,
        "avg_high_24h": 110.0,
        "avg_low_24h": 90.0,
        "avg_price_change_pct": 0.5,
        "avg_market_cap_change_pct": 0.4
    })
    .to_string()
}

async fn recv_id(rx: &mut mpsc::Receiver<String>) -> Option<i64> {
    let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for frame")?;
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    value["cryptocurrency_id"].as_i64()
}

// ─── Fan-out ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_fan_out_to_all_subscribers_in_order() {
    let sink = Arc::new(ChannelSink::new());
    let relay = Relay::new(RelayConfig::default(), sink.clone()).unwrap();
    let handle = relay.handle();

    let mut receivers = Vec::new();
    for _ in 0..3 {
        let id = handle.on_join();
        receivers.push(sink.attach(id, 256));
    }

    let (publisher, source) = MemorySource::channel();
    let mut core = relay.core(source);
    for i in 0..100 {
        publisher.publish(&i.to_string(), event_json(i)).unwrap();
    }
    for _ in 0..100 {
        core.step().await.unwrap();
    }

    for rx in receivers.iter_mut() {
        for i in 0..100 {
            assert_eq!(recv_id(rx).await, Some(i));
        }
    }

    let snap = handle.metrics().snapshot();
    assert_eq!(snap.received, 100);
    assert_eq!(snap.enqueued, 300);
    assert_eq!(snap.acked, 100);
}

#[tokio::test]
async fn test_frame_carries_full_record() {
    let sink = Arc::new(ChannelSink::new());
    let relay = Relay::new(RelayConfig::default(), sink.clone()).unwrap();
    let id = relay.handle().on_join();
    let mut rx = sink.attach(id, 8);

    let (publisher, source) = MemorySource::channel();
    let mut core = relay.core(source);
    publisher.publish("42", event_json(42)).unwrap();
    core.step().await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let event: DecodedEvent = serde_json::from_str(&frame).unwrap();
    assert_eq!(event.cryptocurrency_id, 42);
    assert_eq!(event.avg_price, Some(142.0));
    assert_eq!(event.avg_market_cap_change_pct, Some(0.4));
}

#[tokio::test]
async fn test_malformed_payloads_never_stop_ingestion() {
    let sink = Arc::new(ChannelSink::new());
    let relay = Relay::new(RelayConfig::default(), sink.clone()).unwrap();
    let id = relay.handle().on_join();
    let mut rx = sink.attach(id, 16);

    let (publisher, source) = MemorySource::channel();
    let ledger = source.ledger();
    publisher.publish("1", event_json(1)).unwrap();
    publisher.publish("bad", "garbage").unwrap();
    publisher.publish("bad", r#"{"avg_price": 3.0}"#).unwrap();
    publisher.publish("2", event_json(2)).unwrap();
    drop(publisher);

    let err = relay.core(source).run().await.unwrap_err();
    assert!(matches!(err, RelayError::SourceUnavailable(_)));

    assert_eq!(recv_id(&mut rx).await, Some(1));
    assert_eq!(recv_id(&mut rx).await, Some(2));
    assert_eq!(ledger.acked().len(), 2);
    assert_eq!(
        ledger.discarded(),
        vec![("bad".to_string(), 0), ("bad".to_string(), 1)]
    );
    assert_eq!(relay.handle().metrics().snapshot().decode_failures, 2);
}

// ─── Overflow ────────────────────────────────────────────────────

#[tokio::test]
async fn test_drop_oldest_scenario() {
    let sink = Arc::new(ChannelSink::new());
    let config = RelayConfig::default().with_queue_capacity(2);
    let relay = Relay::new(config, sink.clone()).unwrap();
    let handle = relay.handle();
    let id = handle.on_join();
    let mut rx = sink.attach(id, 8);

    let (publisher, source) = MemorySource::channel();
    let core = relay.core(source);
    drop(publisher);

    // No await between fan-outs: the delivery worker cannot drain yet.
    for i in 1..=4 {
        core.fan_out(Arc::new(DecodedEvent::new(i)));
    }
    let queued: Vec<i64> = handle
        .registry()
        .queued_events(id)
        .unwrap()
        .iter()
        .map(|e| e.cryptocurrency_id)
        .collect();
    assert_eq!(queued, vec![3, 4]);

    assert_eq!(recv_id(&mut rx).await, Some(3));
    assert_eq!(recv_id(&mut rx).await, Some(4));
    assert_eq!(handle.metrics().snapshot().dropped_oldest, 2);
}

#[tokio::test]
async fn test_disconnect_on_overflow_scenario() {
    let sink = Arc::new(ChannelSink::new());
    let config = RelayConfig::default()
        .with_queue_capacity(2)
        .with_overflow_policy(OverflowPolicy::DisconnectOnOverflow);
    let relay = Relay::new(config, sink.clone()).unwrap();
    let handle = relay.handle();
    let id = handle.on_join();
    let mut rx = sink.attach(id, 8);

    let (_publisher, source) = MemorySource::channel();
    let core = relay.core(source);

    for i in 1..=3 {
        core.fan_out(Arc::new(DecodedEvent::new(i)));
    }

    assert_eq!(recv_id(&mut rx).await, Some(1));
    assert_eq!(recv_id(&mut rx).await, Some(2));
    // Channel closed by the relay before C
    assert_eq!(recv_id(&mut rx).await, None);
    assert!(!handle.registry().contains(id));

    let snap = handle.metrics().snapshot();
    assert_eq!(snap.overflow_disconnects, 1);
    assert_eq!(snap.left, 1);
}

// ─── Transport failures ──────────────────────────────────────────

#[tokio::test]
async fn test_unread_channel_times_out_and_disconnects() {
    let sink = Arc::new(ChannelSink::new());
    let config = RelayConfig::default().with_write_timeout(Duration::from_millis(50));
    let relay = Relay::new(config, sink.clone()).unwrap();
    let handle = relay.handle();
    let stuck = handle.on_join();
    let healthy = handle.on_join();
    let mut stuck_rx = sink.attach(stuck, 1);
    let mut healthy_rx = sink.attach(healthy, 64);

    let (publisher, source) = MemorySource::channel();
    let mut core = relay.core(source);
    for i in 0..5 {
        publisher.publish("k", event_json(i)).unwrap();
        core.step().await.unwrap();
    }

    for i in 0..5 {
        assert_eq!(recv_id(&mut healthy_rx).await, Some(i));
    }

    // The stuck client got the first frame, then the relay gave up on it
    assert_eq!(recv_id(&mut stuck_rx).await, Some(0));
    assert_eq!(recv_id(&mut stuck_rx).await, None);
    assert!(!handle.registry().contains(stuck));
    assert!(handle.registry().contains(healthy));
    assert_eq!(handle.metrics().snapshot().write_failures, 1);
}

#[tokio::test]
async fn test_client_leave_stops_delivery() {
    let sink = Arc::new(ChannelSink::new());
    let relay = Relay::new(RelayConfig::default(), sink.clone()).unwrap();
    let handle = relay.handle();
    let id = handle.on_join();
    let mut rx = sink.attach(id, 16);

    let (publisher, source) = MemorySource::channel();
    let mut core = relay.core(source);
    publisher.publish("k", event_json(1)).unwrap();
    core.step().await.unwrap();
    assert_eq!(recv_id(&mut rx).await, Some(1));

    assert!(handle.on_leave(id));
    publisher.publish("k", event_json(2)).unwrap();
    let outcome = core.step().await.unwrap();
    assert!(matches!(outcome, StepOutcome::FannedOut(r) if r.subscribers == 0));
    assert!(!handle.on_leave(id));

    // The worker releases the channel, so the client sees end of stream
    assert_eq!(recv_id(&mut rx).await, None);
    assert!(!sink.is_attached(id));
}

#[tokio::test]
async fn test_departed_clients_release_their_channels() {
    let sink = Arc::new(ChannelSink::new());
    let relay = Relay::new(RelayConfig::default(), sink.clone()).unwrap();
    let handle = relay.handle();

    let mut ids = Vec::new();
    for _ in 0..100 {
        let id = handle.on_join();
        drop(sink.attach(id, 4));
        assert!(handle.on_leave(id));
        ids.push(id);
    }
    assert!(handle.registry().is_empty());

    tokio::time::timeout(Duration::from_secs(5), async {
        while ids.iter().any(|id| sink.is_attached(*id)) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("departed subscribers still attached");
    assert_eq!(handle.metrics().snapshot().left, 100);
}

/// Sink that records close calls and forwards everything else
struct CloseTracking {
    inner: ChannelSink,
    closed: Mutex<Vec<(SubscriberId, LeaveReason)>>,
}

#[async_trait]
impl TransportSink for CloseTracking {
    async fn send(&self, id: SubscriberId, event: &DecodedEvent) -> Result<(), WriteError> {
        self.inner.send(id, event).await
    }

    async fn close(&self, id: SubscriberId, reason: LeaveReason) {
        self.closed.lock().unwrap().push((id, reason));
        self.inner.close(id, reason).await;
    }
}

#[tokio::test]
async fn test_shutdown_closes_every_connection() {
    let sink = Arc::new(CloseTracking {
        inner: ChannelSink::new(),
        closed: Mutex::new(Vec::new()),
    });
    let relay = Relay::new(RelayConfig::default(), sink.clone()).unwrap();
    let handle = relay.handle();

    let mut receivers = Vec::new();
    for _ in 0..4 {
        let id = handle.on_join();
        receivers.push(sink.inner.attach(id, 4));
    }

    handle.shutdown().await;

    assert!(handle.registry().is_empty());
    let closed = sink.closed.lock().unwrap().clone();
    assert_eq!(closed.len(), 4);
    assert!(closed.iter().all(|(_, r)| *r == LeaveReason::Shutdown));
    for rx in receivers.iter_mut() {
        assert!(rx.recv().await.is_none());
    }
}

// ─── Lifecycle & concurrency ─────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_run_until_with_concurrent_publisher() {
    let sink = Arc::new(ChannelSink::new());
    let relay = Relay::new(RelayConfig::default(), sink.clone()).unwrap();
    let handle = relay.handle();
    let id = handle.on_join();
    let mut rx = sink.attach(id, 1024);

    let (publisher, source) = MemorySource::channel();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let relay_task = tokio::spawn(relay.core(source).run_until(async {
        let _ = stop_rx.await;
    }));

    let producer = tokio::spawn(async move {
        for i in 0..200 {
            publisher.publish("k", event_json(i)).unwrap();
            if i % 50 == 0 {
                tokio::task::yield_now().await;
            }
        }
        publisher
    });
    let _publisher = producer.await.unwrap();

    for i in 0..200 {
        assert_eq!(recv_id(&mut rx).await, Some(i));
    }

    stop_tx.send(()).unwrap();
    relay_task.await.unwrap().unwrap();
    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_late_joiners_receive_contiguous_suffix() {
    let sink = Arc::new(ChannelSink::new());
    let relay = Relay::new(RelayConfig::default(), sink.clone()).unwrap();
    let handle = relay.handle();

    let (publisher, source) = MemorySource::channel();
    let mut core = relay.core(source);

    let mut receivers = Vec::new();
    for round in 0..300i64 {
        if round % 60 == 0 {
            let id = handle.on_join();
            receivers.push((round, sink.attach(id, 512)));
        }
        publisher.publish("k", event_json(round)).unwrap();
        core.step().await.unwrap();
    }

    for (joined_at, rx) in receivers.iter_mut() {
        for expected in *joined_at..300 {
            assert_eq!(recv_id(rx).await, Some(expected));
        }
    }
    assert_eq!(handle.metrics().snapshot().dropped_oldest, 0);
}
