//! NATS JetStream source configuration

use crate::config::IngestConfig;
use serde::{Deserialize, Serialize};

/// JetStream storage backend for a stream the source creates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageType {
    #[default]
    File,
    Memory,
}

/// Connection and consumer settings for `NatsSource`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NatsSourceConfig {
    /// Server URL
    #[serde(default = "default_url")]
    pub url: String,

    /// JetStream stream holding the ingest subject
    #[serde(default = "default_stream_name")]
    pub stream_name: String,

    /// Subject (topic) to consume
    #[serde(default = "default_subject")]
    pub subject: String,

    /// Durable consumer name (consumer group)
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,

    /// Auth token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// How long the server waits for an ack before redelivering (0 = server default)
    #[serde(default)]
    pub ack_wait_secs: u64,

    /// Create the stream if it does not exist yet
    #[serde(default = "default_create_stream")]
    pub create_stream: bool,

    /// Storage for a stream created by the source
    #[serde(default)]
    pub storage: StorageType,

    /// Maximum message age for a stream created by the source (0 = unlimited)
    #[serde(default)]
    pub max_age_secs: u64,
}

impl Default for NatsSourceConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            stream_name: default_stream_name(),
            subject: default_subject(),
            consumer_name: default_consumer_name(),
            token: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            ack_wait_secs: 0,
            create_stream: default_create_stream(),
            storage: StorageType::default(),
            max_age_secs: 0,
        }
    }
}

impl NatsSourceConfig {
    /// Take subject and consumer name from the relay's ingest identity
    pub fn from_ingest(ingest: &IngestConfig) -> Self {
        Self {
            subject: ingest.topic.clone(),
            consumer_name: ingest.group.clone(),
            ..Default::default()
        }
    }
}

fn default_url() -> String {
    "nats://127.0.0.1:4222".to_string()
}

fn default_stream_name() -> String {
    "RELAY_INGEST".to_string()
}

fn default_subject() -> String {
    "cal_avg_crypto_currency".to_string()
}

fn default_consumer_name() -> String {
    "a3s-relay".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_create_stream() -> bool {
    true
}
