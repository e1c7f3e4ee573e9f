//! Error types for a3s-relay

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the relay
#[derive(Debug, Error)]
pub enum RelayError {
    /// Broker connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// The ingest source is exhausted or unreachable
    ///
    /// Fatal for the ingestion task. Retry/backoff belongs to whoever
    /// restarts the relay.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Stream/topic lookup or creation error
    #[error("Stream error: {0}")]
    Stream(String),

    /// Consumer creation or management error
    #[error("Consumer error: {0}")]
    Consumer(String),

    /// Acknowledgement failure
    #[error("Failed to acknowledge message: {0}")]
    Ack(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Why a raw payload could not be turned into a `DecodedEvent`
///
/// Decode failures are terminal for the message: it is discarded and the
/// relay moves on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Payload is not a JSON object or a field has the wrong type
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// A required field is absent or null
    #[error("Schema mismatch: required field '{field}' is missing")]
    SchemaMismatch { field: &'static str },
}

/// Failure writing to a subscriber's connection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    /// The connection is gone
    #[error("Connection closed")]
    Closed,

    /// The write did not complete within the configured timeout
    #[error("Write timed out after {0:?}")]
    Timeout(Duration),

    /// Transport-specific failure
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;
