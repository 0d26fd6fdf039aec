// Copyright 2026-Present the telfab authors
// SPDX-License-Identifier: Apache-2.0

//! Kind-specific payload builders and record-to-message routing.
//!
//! Decoders hand the agent normalized records (flat JSON maps with a `type`
//! field); everything here turns those and the agent's own telemetry into
//! enveloped messages.

use serde_json::{json, Value};

use crate::envelope::{Message, SenderId};
use crate::kind::MessageKind;
use crate::Record;

/// Error payload categories. Error payloads always serialize as
/// `{"error": <category>, "data": <anything>}` because the data may be
/// malformed or even accidentally malicious input.
pub const ERROR_RAW: &str = "raw";
pub const ERROR_STRUCTURED: &str = "structured";
pub const ERROR_EXCEPTION: &str = "exception";
pub const ERROR_UNSUPPORTED: &str = "unsupported";

pub fn error_payload(category: &str, data: Value) -> Value {
    json!({ "error": category, "data": data })
}

pub fn heartbeat_payload(name: &str, value: u64, timestamp_us: u64, labels: Value) -> Value {
    json!({
        "name": name,
        "value": value,
        "timestamp": timestamp_us,
        "labels": labels,
    })
}

pub fn registration_payload(hostname: &str, ipv4: &str, timestamp_us: u64) -> Value {
    json!({
        "hostname": hostname,
        "ipv4": ipv4,
        "timestamp": timestamp_us,
    })
}

pub fn counter_payload(name: &str, value: f64, timestamp_us: u64) -> Value {
    json!({
        "type": "counter",
        "name": name,
        "value": value,
        "timestamp": timestamp_us,
    })
}

pub fn gauge_payload(name: &str, value: f64, timestamp_us: u64) -> Value {
    json!({
        "type": "gauge",
        "name": name,
        "value": value,
        "timestamp": timestamp_us,
    })
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record has no 'type' field")]
    MissingType,

    #[error("record type '{0}' is not a known message kind")]
    UnknownType(String),
}

/// Route a normalized record to an outbound message by its `type` field.
/// The record itself becomes the payload.
pub fn record_to_message(
    from: &SenderId,
    record: Record,
    now_us: u64,
) -> Result<Message, RecordError> {
    let kind = match record.get("type") {
        Some(Value::String(name)) => {
            MessageKind::from_name(name).ok_or_else(|| RecordError::UnknownType(name.clone()))?
        }
        Some(other) => return Err(RecordError::UnknownType(other.to_string())),
        None => return Err(RecordError::MissingType),
    };

    let timestamp_us = record
        .get("timestamp")
        .and_then(Value::as_u64)
        .unwrap_or(now_us);

    Ok(Message::new(
        from.clone(),
        kind,
        timestamp_us,
        Value::Object(record),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> SenderId {
        "10c37e99-34df-4ca2-82a1-d68cdd26e1c1".parse().unwrap()
    }

    fn record(fields: Value) -> Record {
        fields.as_object().unwrap().clone()
    }

    #[test]
    fn test_record_routes_by_type() {
        let msg = record_to_message(
            &sender(),
            record(json!({"type": "counter", "name": "reqs", "value": 1})),
            42,
        )
        .unwrap();
        assert_eq!(msg.envelope.kind, MessageKind::Counter);
        assert_eq!(msg.envelope.timestamp_us, 42);
        assert_eq!(msg.payload["name"], "reqs");
    }

    #[test]
    fn test_record_timestamp_wins_over_now() {
        let msg = record_to_message(
            &sender(),
            record(json!({"type": "gauge", "name": "g", "value": 0.5, "timestamp": 7})),
            42,
        )
        .unwrap();
        assert_eq!(msg.envelope.timestamp_us, 7);
    }

    #[test]
    fn test_record_with_unknown_type_rejected() {
        let err =
            record_to_message(&sender(), record(json!({"type": "bogus"})), 0).unwrap_err();
        assert_eq!(err, RecordError::UnknownType("bogus".to_string()));

        let err = record_to_message(&sender(), record(json!({"name": "x"})), 0).unwrap_err();
        assert_eq!(err, RecordError::MissingType);
    }

    #[test]
    fn test_error_payload_shape() {
        let p = error_payload(ERROR_RAW, json!("garbage bytes"));
        assert_eq!(p["error"], "raw");
        assert_eq!(p["data"], "garbage bytes");
    }
}
