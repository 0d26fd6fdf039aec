// Copyright 2026-Present the telfab authors
// SPDX-License-Identifier: Apache-2.0

//! The closed set of message kinds carried over the bus.
//!
//! Kinds are a fixed enum with stable numeric ids; unknown kinds are
//! rejected explicitly rather than dispatched through any open-ended
//! registration mechanism.

use serde::{Deserialize, Serialize};

/// Every message class the fabric knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Empty keepalive sent to routers to keep route caches warm.
    Noop,
    /// Acknowledgment referencing an earlier message's id.
    Ack,
    /// Agent registration (host identity, address, timestamp).
    Registration,
    /// Periodic agent liveness, also used for plugin completion reports.
    Heartbeat,
    /// Application event; the only kind that requests acknowledgment.
    Event,
    /// Free-form log line.
    Log,
    /// Error report emitted by the fabric itself.
    Error,
    Counter,
    Gauge,
    Mark,
    /// Command directing an agent to execute a named plugin.
    PluginExec,
}

impl MessageKind {
    /// Stable wire id for this kind. Ids never get reused.
    pub fn type_id(self) -> u32 {
        match self {
            MessageKind::Noop => 1,
            MessageKind::Ack => 2,
            MessageKind::Registration => 3,
            MessageKind::Heartbeat => 4,
            MessageKind::Event => 5,
            MessageKind::Log => 6,
            MessageKind::Error => 7,
            MessageKind::Counter => 8,
            MessageKind::Gauge => 9,
            MessageKind::Mark => 10,
            MessageKind::PluginExec => 11,
        }
    }

    pub fn from_type_id(id: u32) -> Option<Self> {
        Some(match id {
            1 => MessageKind::Noop,
            2 => MessageKind::Ack,
            3 => MessageKind::Registration,
            4 => MessageKind::Heartbeat,
            5 => MessageKind::Event,
            6 => MessageKind::Log,
            7 => MessageKind::Error,
            8 => MessageKind::Counter,
            9 => MessageKind::Gauge,
            10 => MessageKind::Mark,
            11 => MessageKind::PluginExec,
            _ => return None,
        })
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "noop" => MessageKind::Noop,
            "ack" => MessageKind::Ack,
            "registration" => MessageKind::Registration,
            "heartbeat" => MessageKind::Heartbeat,
            "event" => MessageKind::Event,
            "log" => MessageKind::Log,
            "error" => MessageKind::Error,
            "counter" => MessageKind::Counter,
            "gauge" => MessageKind::Gauge,
            "mark" => MessageKind::Mark,
            "plugin_exec" => MessageKind::PluginExec,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageKind::Noop => "noop",
            MessageKind::Ack => "ack",
            MessageKind::Registration => "registration",
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::Event => "event",
            MessageKind::Log => "log",
            MessageKind::Error => "error",
            MessageKind::Counter => "counter",
            MessageKind::Gauge => "gauge",
            MessageKind::Mark => "mark",
            MessageKind::PluginExec => "plugin_exec",
        }
    }

    /// Whether messages of this kind request an acknowledgment from the
    /// receiving router. Only events are tracked for resend.
    pub fn wants_ack(self) -> bool {
        matches!(self, MessageKind::Event)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
