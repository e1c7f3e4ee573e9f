//! NATS JetStream ingest source
//!
//! Consumes one subject through a durable pull consumer with explicit
//! acks. The subject is the partition key and the stream sequence is the
//! offset.

mod config;

pub use config::{NatsSourceConfig, StorageType};

use super::{AckHandle, IngestSource};
use crate::error::{RelayError, Result};
use crate::types::RawMessage;
use async_nats::jetstream;
use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;

/// JetStream durable pull consumer as an `IngestSource`
pub struct NatsSource {
    /// Kept so the connection outlives the message stream
    _client: async_nats::Client,

    messages: jetstream::consumer::pull::Stream,

    config: Arc<NatsSourceConfig>,
}

impl NatsSource {
    /// Connect, make sure the stream and consumer exist, start pulling
    pub async fn connect(config: NatsSourceConfig) -> Result<Self> {
        let client = build_connect_options(&config)
            .connect(&config.url)
            .await
            .map_err(|e| RelayError::Connection(format!("{}: {}", config.url, e)))?;

        tracing::info!(url = %config.url, "Connected to NATS");

        let js = jetstream::new(client.clone());
        let stream = ensure_stream(&js, &config).await?;

        let consumer = stream
            .get_or_create_consumer(
                &config.consumer_name,
                jetstream::consumer::pull::Config {
                    durable_name: Some(config.consumer_name.clone()),
                    filter_subject: config.subject.clone(),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ack_wait: Duration::from_secs(config.ack_wait_secs),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| {
                RelayError::Consumer(format!(
                    "Failed to create durable consumer '{}': {}",
                    config.consumer_name, e
                ))
            })?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| RelayError::Consumer(format!("Failed to start pulling: {}", e)))?;

        tracing::info!(
            stream = %config.stream_name,
            subject = %config.subject,
            consumer = %config.consumer_name,
            "Ingest consumer ready"
        );

        Ok(Self {
            _client: client,
            messages,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &NatsSourceConfig {
        &self.config
    }
}

#[async_trait]
impl IngestSource for NatsSource {
    async fn next(&mut self) -> Result<(RawMessage, AckHandle)> {
        let message = match self.messages.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                return Err(RelayError::SourceUnavailable(format!(
                    "consumer '{}': {}",
                    self.config.consumer_name, e
                )))
            }
            None => {
                return Err(RelayError::SourceUnavailable(format!(
                    "consumer '{}' message stream ended",
                    self.config.consumer_name
                )))
            }
        };

        let offset = message
            .info()
            .map(|info| info.stream_sequence)
            .map_err(|e| RelayError::Stream(format!("Missing delivery info: {}", e)))?;

        let raw = RawMessage::new(
            message.subject.to_string(),
            offset,
            message.payload.clone(),
        );

        let message = Arc::new(message);
        let for_discard = message.clone();

        let handle = AckHandle::new(
            raw.partition_key.clone(),
            offset,
            move || {
                async move {
                    message
                        .ack()
                        .await
                        .map_err(|e| RelayError::Ack(e.to_string()))
                }
                .boxed()
            },
            move || {
                async move {
                    for_discard
                        .ack_with(jetstream::AckKind::Term)
                        .await
                        .map_err(|e| RelayError::Ack(e.to_string()))
                }
                .boxed()
            },
        );

        Ok((raw, handle))
    }

    fn name(&self) -> &str {
        "nats"
    }
}

/// Build NATS connect options from config
fn build_connect_options(config: &NatsSourceConfig) -> async_nats::ConnectOptions {
    let mut opts = async_nats::ConnectOptions::new()
        .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
        .request_timeout(Some(Duration::from_secs(config.request_timeout_secs)));

    if let Some(ref token) = config.token {
        opts = opts.token(token.clone());
    }

    opts
}

/// Look up (or create) the JetStream stream holding the ingest subject
async fn ensure_stream(
    js: &jetstream::Context,
    config: &NatsSourceConfig,
) -> Result<jetstream::stream::Stream> {
    if !config.create_stream {
        return js.get_stream(&config.stream_name).await.map_err(|e| {
            RelayError::Stream(format!(
                "Failed to get stream '{}': {}",
                config.stream_name, e
            ))
        });
    }

    let storage = match config.storage {
        StorageType::File => jetstream::stream::StorageType::File,
        StorageType::Memory => jetstream::stream::StorageType::Memory,
    };

    let stream_config = jetstream::stream::Config {
        name: config.stream_name.clone(),
        subjects: vec![config.subject.clone()],
        storage,
        max_age: Duration::from_secs(config.max_age_secs),
        retention: jetstream::stream::RetentionPolicy::Limits,
        ..Default::default()
    };

    let stream = js.get_or_create_stream(stream_config).await.map_err(|e| {
        RelayError::Stream(format!(
            "Failed to create/get stream '{}': {}",
            config.stream_name, e
        ))
    })?;

    tracing::info!(
        stream = %config.stream_name,
        subject = %config.subject,
        "JetStream stream ready"
    );

    Ok(stream)
}
