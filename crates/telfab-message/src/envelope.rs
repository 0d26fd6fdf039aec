// Copyright 2026-Present the telfab authors
// SPDX-License-Identifier: Apache-2.0

//! The routing envelope and the message it wraps.
//!
//! The envelope is the reliable-delivery contract: who sent the message,
//! what kind it is, when it was created, whether it expects an ack, and how
//! many times it has been resent. The payload is opaque to routing; only
//! the kind-specific consumers interpret it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::kind::MessageKind;
use crate::util::valid_uuid;

/// Validated sender identity: the 36-byte hex-dashed UUID every agent is
/// configured with. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SenderId(String);

impl SenderId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SenderId {
    type Error = InvalidSenderId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if valid_uuid(&value) {
            Ok(SenderId(value))
        } else {
            Err(InvalidSenderId(value))
        }
    }
}

impl std::str::FromStr for SenderId {
    type Err = InvalidSenderId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SenderId::try_from(s.to_string())
    }
}

impl From<SenderId> for String {
    fn from(id: SenderId) -> String {
        id.0
    }
}

impl std::fmt::Display for SenderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("sender id '{0}' is not in 36-byte hex-dashed UUID form")]
pub struct InvalidSenderId(pub String);

/// Routing header carried by every message on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Identity of this message instance; acks reference it.
    pub id: Uuid,
    pub from: SenderId,
    pub kind: MessageKind,
    /// Creation time, microseconds since the Unix epoch.
    pub timestamp_us: u64,
    /// Whether the receiving router must acknowledge this message.
    pub ack: bool,
    /// Number of times this instance has been retransmitted. Monotonically
    /// non-decreasing; never reset.
    pub resend_count: u32,
    /// For ack messages, the id of the message being acknowledged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acked_id: Option<Uuid>,
}

impl Envelope {
    pub fn new(from: SenderId, kind: MessageKind, timestamp_us: u64) -> Self {
        Envelope {
            id: Uuid::new_v4(),
            from,
            kind,
            timestamp_us,
            ack: kind.wants_ack(),
            resend_count: 0,
            acked_id: None,
        }
    }

    /// Record a retransmission of this message instance.
    pub fn incr_resend(&mut self) {
        self.resend_count += 1;
    }
}

/// An envelope plus its opaque payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub envelope: Envelope,
    pub payload: Value,
}

impl Message {
    pub fn new(from: SenderId, kind: MessageKind, timestamp_us: u64, payload: Value) -> Self {
        Message {
            envelope: Envelope::new(from, kind, timestamp_us),
            payload,
        }
    }

    /// Build an ack for a previously received message.
    pub fn ack_for(from: SenderId, acked: &Envelope, timestamp_us: u64) -> Self {
        let mut envelope = Envelope::new(from, MessageKind::Ack, timestamp_us);
        envelope.acked_id = Some(acked.id);
        Message {
            envelope,
            payload: Value::Null,
        }
    }

    /// Serialize to the wire form: one JSON object per message. Link-layer
    /// framing (newline delimiting) is the transport's concern.
    pub fn to_wire(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_wire(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sender() -> SenderId {
        "10c37e99-34df-4ca2-82a1-d68cdd26e1c1".parse().unwrap()
    }

    #[test]
    fn test_sender_id_rejects_bad_form() {
        assert!("not-a-uuid".parse::<SenderId>().is_err());
        assert!("4a259c4d-49aa-a6cd-49bb-fb955482".parse::<SenderId>().is_err());
    }

    #[test]
    fn test_resend_count_monotonic() {
        let mut env = Envelope::new(sender(), MessageKind::Event, 1);
        assert_eq!(env.resend_count, 0);
        env.incr_resend();
        env.incr_resend();
        assert_eq!(env.resend_count, 2);
    }

    #[test]
    fn test_only_events_request_acks_by_default() {
        assert!(Envelope::new(sender(), MessageKind::Event, 1).ack);
        assert!(!Envelope::new(sender(), MessageKind::Counter, 1).ack);
    }

    #[test]
    fn test_wire_round_trip_preserves_envelope() {
        let msg = Message::new(
            sender(),
            MessageKind::Counter,
            1_700_000_000_000_000,
            json!({"name": "reqs", "value": 1}),
        );
        let bytes = msg.to_wire().unwrap();
        let back = Message::from_wire(&bytes).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_ack_references_original_id() {
        let original = Message::new(sender(), MessageKind::Event, 10, json!({}));
        let ack = Message::ack_for(sender(), &original.envelope, 20);
        assert_eq!(ack.envelope.kind, MessageKind::Ack);
        assert_eq!(ack.envelope.acked_id, Some(original.envelope.id));
    }

    #[test]
    fn test_each_message_gets_fresh_id() {
        let a = Message::new(sender(), MessageKind::Log, 1, json!("x"));
        let b = Message::new(sender(), MessageKind::Log, 1, json!("x"));
        assert_ne!(a.envelope.id, b.envelope.id);
    }
}
