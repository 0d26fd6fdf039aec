// Copyright 2026-Present the telfab authors
// SPDX-License-Identifier: Apache-2.0

//! Internal agent traffic counters, flushed as counter messages on the
//! stats interval.

/// Owned by the agent task; no synchronization needed.
#[derive(Debug, Default)]
pub struct AgentCounters {
    pub udp_packets: u64,
    pub link_send: u64,
    pub link_recv: u64,
    pub errors: u64,
    pub noops: u64,
    pub events: u64,
}

impl AgentCounters {
    pub fn new() -> Self {
        AgentCounters::default()
    }

    /// Take the non-zero counters as (name, value) pairs and reset every
    /// counter to zero. Zero-valued counters are not reported.
    pub fn drain_nonzero(&mut self) -> Vec<(&'static str, u64)> {
        let snapshot = [
            ("udp_packets", std::mem::take(&mut self.udp_packets)),
            ("link_send", std::mem::take(&mut self.link_send)),
            ("link_recv", std::mem::take(&mut self.link_recv)),
            ("errors", std::mem::take(&mut self.errors)),
            ("noops", std::mem::take(&mut self.noops)),
            ("events", std::mem::take(&mut self.events)),
        ];
        snapshot.into_iter().filter(|(_, v)| *v > 0).collect()
    }
}
