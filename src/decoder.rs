//! Payload decoding
//!
//! Turns a `RawMessage` into a `DecodedEvent`. Failures come back as
//! values so the relay can count and skip them without unwinding.

use crate::error::DecodeError;
use crate::types::{DecodedEvent, RawMessage};

const REQUIRED_FIELDS: &[&str] = &["cryptocurrency_id"];

/// Stateless JSON decoder for the fixed event schema
#[derive(Debug, Clone, Copy, Default)]
pub struct EventDecoder;

impl EventDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode a raw message
    ///
    /// Required fields are checked before the typed conversion so a missing
    /// identifier reports `SchemaMismatch` rather than a generic parse error.
    pub fn decode(&self, raw: &RawMessage) -> Result<DecodedEvent, DecodeError> {
        if raw.payload.is_empty() {
            return Err(DecodeError::Malformed("empty payload".to_string()));
        }

        let value: serde_json::Value = serde_json::from_slice(&raw.payload)
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;

        let object = value
            .as_object()
            .ok_or_else(|| DecodeError::Malformed(format!("expected JSON object, got {}", kind(&value))))?;

        for &field in REQUIRED_FIELDS {
            match object.get(field) {
                None | Some(serde_json::Value::Null) => {
                    return Err(DecodeError::SchemaMismatch { field });
                }
                Some(_) => {}
            }
        }

        serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))
    }
}

fn kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
