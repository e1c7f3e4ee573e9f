//! NATS JetStream integration tests
//!
//! These tests require a running NATS server with JetStream enabled:
//!   nats-server -js
//!
//! Tests are skipped automatically if NATS is not available.

use a3s_relay::{
    ChannelSink, IngestSource, NatsSource, NatsSourceConfig, Relay, RelayConfig, StepOutcome,
    StorageType,
};
use std::sync::Arc;
use std::time::Duration;

const NATS_URL: &str = "nats://127.0.0.1:4222";

fn test_config(suffix: &str) -> NatsSourceConfig {
    NatsSourceConfig {
        url: NATS_URL.to_string(),
        stream_name: format!("TEST_RELAY_{}", suffix.to_uppercase()),
        subject: format!("test.relay.{}", suffix),
        consumer_name: format!("relay-{}", suffix),
        storage: StorageType::Memory,
        max_age_secs: 60,
        ..Default::default()
    }
}

/// Try to connect to NATS. Returns None if server is unavailable.
async fn try_nats_source(suffix: &str) -> Option<(NatsSource, async_nats::jetstream::Context)> {
    let config = test_config(suffix);
    let source = match NatsSource::connect(config).await {
        Ok(source) => source,
        Err(_) => {
            eprintln!("NATS not available, skipping integration test");
            return None;
        }
    };
    let client = async_nats::connect(NATS_URL).await.ok()?;
    Some((source, async_nats::jetstream::new(client)))
}

/// Connect the source and a publishing context, or skip the test
macro_rules! nats_source {
    ($suffix:expr) => {
        match try_nats_source($suffix).await {
            Some(pair) => pair,
            None => return,
        }
    };
}

async fn publish(js: &async_nats::jetstream::Context, subject: &str, payload: String) {
    js.publish(subject.to_string(), payload.into())
        .await
        .unwrap()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_nats_source_reports_subject_and_sequence() {
    let (mut source, js) = nats_source!("seq");
    let subject = source.config().subject.clone();

    publish(&js, &subject, r#"{"cryptocurrency_id": 1}"#.to_string()).await;

    let (raw, handle) = tokio::time::timeout(Duration::from_secs(5), source.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(raw.partition_key, subject);
    assert_eq!(handle.offset(), raw.offset);
    assert!(raw.offset >= 1);
    assert_eq!(source.name(), "nats");
    source.ack(handle).await.unwrap();
}

#[tokio::test]
async fn test_nats_relay_end_to_end() {
    let (source, js) = nats_source!("e2e");
    let subject = source.config().subject.clone();

    let sink = Arc::new(ChannelSink::new());
    let relay = Relay::new(RelayConfig::default(), sink.clone()).unwrap();
    let handle = relay.handle();
    let a = handle.on_join();
    let b = handle.on_join();
    let mut rx_a = sink.attach(a, 64);
    let mut rx_b = sink.attach(b, 64);

    for i in 0..3 {
        publish(
            &js,
            &subject,
            serde_json::json!({"cryptocurrency_id": i, "avg_price": 1.5}).to_string(),
        )
        .await;
    }
    publish(&js, &subject, "not json".to_string()).await;

    let mut core = relay.core(source);
    let mut fanned = 0;
    let mut failed = 0;
    for _ in 0..4 {
        match tokio::time::timeout(Duration::from_secs(5), core.step())
            .await
            .unwrap()
            .unwrap()
        {
            StepOutcome::FannedOut(_) => fanned += 1,
            StepOutcome::DecodeFailed(_) => failed += 1,
        }
    }
    assert_eq!(fanned, 3);
    assert_eq!(failed, 1);
    assert!(core.cursor(&subject).is_some());

    for rx in [&mut rx_a, &mut rx_b] {
        for i in 0..3 {
            let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
            assert_eq!(value["cryptocurrency_id"], i);
        }
    }

    let snap = handle.metrics().snapshot();
    assert_eq!(snap.acked, 3);
    assert_eq!(snap.discarded, 1);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_nats_missing_stream_without_create() {
    let config = NatsSourceConfig {
        url: NATS_URL.to_string(),
        stream_name: "TEST_RELAY_DOES_NOT_EXIST".to_string(),
        create_stream: false,
        ..Default::default()
    };

    // Only meaningful when a server is reachable
    if async_nats::connect(NATS_URL).await.is_err() {
        eprintln!("NATS not available, skipping integration test");
        return;
    }

    let err = NatsSource::connect(config).await.err().unwrap();
    assert!(matches!(err, a3s_relay::RelayError::Stream(_)));
}
