// Copyright 2026-Present the telfab authors
// SPDX-License-Identifier: Apache-2.0

//! Reliable-delivery bookkeeping for ack-requiring messages.
//!
//! Every ack-requiring message is tracked from first send until a router
//! acknowledges it. A periodic sweep retransmits entries that have waited
//! longer than the ack interval. The tracker is owned by the agent task.

use std::collections::HashMap;

use uuid::Uuid;

use telfab_message::Message;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("ack for unknown message id {0}")]
pub struct UnexpectedAck(pub Uuid);

#[derive(Debug)]
struct Tracked {
    message: Message,
    last_send_us: u64,
}

/// In-flight messages keyed by message id.
#[derive(Debug, Default)]
pub struct AckTracker {
    entries: HashMap<Uuid, Tracked>,
}

impl AckTracker {
    pub fn new() -> Self {
        AckTracker::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Start tracking a message that was just sent.
    pub fn track(&mut self, message: Message, sent_at_us: u64) {
        self.entries.insert(
            message.envelope.id,
            Tracked {
                message,
                last_send_us: sent_at_us,
            },
        );
    }

    /// Resolve an inbound ack. Unknown ids surface as an error so the agent
    /// can report them; they are not silently dropped.
    pub fn acknowledge(&mut self, acked_id: Uuid) -> Result<Message, UnexpectedAck> {
        self.entries
            .remove(&acked_id)
            .map(|tracked| tracked.message)
            .ok_or(UnexpectedAck(acked_id))
    }

    /// Collect the messages due for retransmission: every entry whose last
    /// send is older than the interval. Each such entry gets its resend
    /// count bumped and its last-send time refreshed, and a clone of the
    /// updated message is returned for the caller to put on the wire.
    ///
    /// Resend counts are cumulative across sweeps; they are never reset.
    pub fn sweep(&mut self, now_us: u64, interval_us: u64) -> Vec<Message> {
        let mut due = Vec::new();
        for tracked in self.entries.values_mut() {
            if now_us.saturating_sub(tracked.last_send_us) > interval_us {
                tracked.message.envelope.incr_resend();
                tracked.last_send_us = now_us;
                due.push(tracked.message.clone());
            }
        }
        due
    }
}
