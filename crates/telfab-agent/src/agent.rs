// Copyright 2026-Present the telfab authors
// SPDX-License-Identifier: Apache-2.0

//! The agent event loop.
//!
//! One cooperative task polls every concern in a fixed order each cycle:
//! noop keepalives, registration, heartbeat, ack timeouts, plugin reaping,
//! UDP ingestion, router traffic, stats flush, then a short idle delay.
//! Per-message failures are reported as error-kind messages or log lines;
//! they never terminate the loop.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use telfab_message::payload::{
    counter_payload, error_payload, gauge_payload, heartbeat_payload, record_to_message,
    registration_payload, ERROR_EXCEPTION, ERROR_RAW, ERROR_STRUCTURED, ERROR_UNSUPPORTED,
};
use telfab_message::util::timestamp_us;
use telfab_message::{Message, MessageKind};

use crate::ack::AckTracker;
use crate::config::AgentConfig;
use crate::counters::AgentCounters;
use crate::decode::{decode_any, DecodeError};
use crate::link::{IngestSocket, RouterLink};
use crate::plugin::{PluginExecRequest, PluginHandle};
use crate::proc::{self, cpu_times};

const REGISTRATION_INTERVAL_US: u64 = 86_400 * 1_000_000;
// seeding the registration timer 1.5 days in the past makes the first
// registration fire on the first cycle
const REGISTRATION_SEED_BACK_US: u64 = 129_600 * 1_000_000;
const IDLE_DELAY: Duration = Duration::from_millis(100);

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// All agent state. Owned by the loop task; nothing here is shared.
pub struct Agent {
    config: AgentConfig,
    link: RouterLink,
    ingest: IngestSocket,
    ack_tracker: AckTracker,
    plugins: HashMap<u32, PluginHandle>,
    counters: AgentCounters,
    hostname: String,
    ipv4: String,
    last_noop_us: u64,
    last_registration_us: u64,
    last_heartbeat_us: u64,
    last_ack_sweep_us: u64,
    last_stats_us: u64,
}

impl Agent {
    /// Timers other than registration are seeded exactly one interval back,
    /// so each needs a full interval to elapse before its first firing.
    pub fn new(config: AgentConfig, link: RouterLink, ingest: IngestSocket, now_us: u64) -> Self {
        let hostname = proc::hostname();
        let ipv4 = proc::first_ipv4(&hostname);
        Agent {
            last_noop_us: now_us.saturating_sub(config.noop_interval_us()),
            last_registration_us: now_us.saturating_sub(REGISTRATION_SEED_BACK_US),
            last_heartbeat_us: now_us.saturating_sub(config.heartbeat_us()),
            last_ack_sweep_us: now_us.saturating_sub(config.ack_interval_us()),
            last_stats_us: now_us,
            config,
            link,
            ingest,
            ack_tracker: AckTracker::new(),
            plugins: HashMap::new(),
            counters: AgentCounters::new(),
            hostname,
            ipv4,
        }
    }

    /// Run until the token is cancelled, then flush one exit notice.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(sender = %self.config.sender, "agent loop starting");
        while !shutdown.is_cancelled() {
            self.tick(timestamp_us()).await;
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(IDLE_DELAY) => {}
            }
        }

        let now_us = timestamp_us();
        let notice = Message::new(
            self.config.sender.clone(),
            MessageKind::Log,
            now_us,
            Value::from(format!("agent {} exiting.", self.config.sender)),
        );
        self.transmit(&notice).await;
        info!(sender = %self.config.sender, "agent loop stopped");
    }

    /// One poll cycle. The step order is fixed.
    pub async fn tick(&mut self, now_us: u64) {
        self.poll_noop(now_us).await;
        self.poll_registration(now_us).await;
        self.poll_heartbeat(now_us).await;
        self.poll_ack_timeouts(now_us).await;
        self.poll_plugins(now_us).await;
        self.poll_udp(now_us).await;
        self.poll_router(now_us).await;
        self.flush_stats(now_us).await;
    }

    /// Send one message over the link, counting the outcome. Send failures
    /// are reported and absorbed.
    async fn transmit(&mut self, message: &Message) -> bool {
        match self.link.send(message).await {
            Ok(()) => {
                self.counters.link_send += 1;
                true
            }
            Err(e) => {
                self.counters.errors += 1;
                warn!("router link send failed: {e}");
                false
            }
        }
    }

    /// Send a fresh message, starting ack tracking if it requests one.
    async fn dispatch(&mut self, message: Message, now_us: u64) {
        let sent = self.transmit(&message).await;
        if sent && message.envelope.ack {
            self.ack_tracker.track(message, now_us);
        }
    }

    async fn report_error(&mut self, category: &str, data: Value, now_us: u64) {
        self.counters.errors += 1;
        let message = Message::new(
            self.config.sender.clone(),
            MessageKind::Error,
            now_us,
            error_payload(category, data),
        );
        self.transmit(&message).await;
    }

    /// Step 1: one noop per router to keep route caches warm.
    async fn poll_noop(&mut self, now_us: u64) {
        if now_us.saturating_sub(self.last_noop_us) <= self.config.noop_interval_us() {
            return;
        }
        for _ in 0..self.link.router_count() {
            let noop = Message::new(
                self.config.sender.clone(),
                MessageKind::Noop,
                now_us,
                Value::Null,
            );
            if self.transmit(&noop).await {
                self.counters.noops += 1;
            }
        }
        self.last_noop_us = now_us;
    }

    /// Step 2: re-register the agent's identity once a day.
    async fn poll_registration(&mut self, now_us: u64) {
        if now_us.saturating_sub(self.last_registration_us) <= REGISTRATION_INTERVAL_US {
            return;
        }
        let payload = registration_payload(&self.hostname, &self.ipv4, now_us);
        let message = Message::new(
            self.config.sender.clone(),
            MessageKind::Registration,
            now_us,
            payload,
        );
        debug!(hostname = %self.hostname, ipv4 = %self.ipv4, "registering agent");
        self.transmit(&message).await;
        self.last_registration_us = now_us;
    }

    /// Step 3: liveness heartbeat. Fires only when the elapsed time is
    /// strictly greater than the period.
    async fn poll_heartbeat(&mut self, now_us: u64) {
        let elapsed = now_us.saturating_sub(self.last_heartbeat_us);
        if elapsed <= self.config.heartbeat_us() {
            return;
        }
        let payload = heartbeat_payload(
            "agent.heartbeat",
            elapsed,
            now_us,
            json!({ "version": VERSION, "period": self.config.heartbeat_secs }),
        );
        let message = Message::new(
            self.config.sender.clone(),
            MessageKind::Heartbeat,
            now_us,
            payload,
        );
        self.transmit(&message).await;
        self.last_heartbeat_us = now_us;
    }

    /// Step 4: retransmit tracked messages that have gone unacked for more
    /// than the ack interval. The sweep itself only runs when something is
    /// tracked and the interval has passed since the last sweep.
    async fn poll_ack_timeouts(&mut self, now_us: u64) {
        if self.ack_tracker.is_empty()
            || now_us.saturating_sub(self.last_ack_sweep_us) <= self.config.ack_interval_us()
        {
            return;
        }
        for message in self
            .ack_tracker
            .sweep(now_us, self.config.ack_interval_us())
        {
            debug!(
                id = %message.envelope.id,
                resend_count = message.envelope.resend_count,
                "resending unacked message"
            );
            self.transmit(&message).await;
        }
        self.last_ack_sweep_us = now_us;
    }

    /// Step 5: reap finished plugins and report their results as
    /// heartbeat-kind completion messages.
    async fn poll_plugins(&mut self, now_us: u64) {
        let pids: Vec<u32> = self.plugins.keys().copied().collect();
        for pid in pids {
            let Some(handle) = self.plugins.get_mut(&pid) else {
                continue;
            };
            match handle.try_finish().await {
                Ok(None) => {}
                Ok(Some(result)) => {
                    self.plugins.remove(&pid);
                    info!(plugin = %result.name, pid, exit_code = ?result.exit_code, "plugin finished");
                    let message = Message::new(
                        self.config.sender.clone(),
                        MessageKind::Heartbeat,
                        now_us,
                        result.to_payload(now_us),
                    );
                    self.transmit(&message).await;
                }
                Err(e) => {
                    self.plugins.remove(&pid);
                    self.report_error(
                        ERROR_EXCEPTION,
                        json!({ "plugin_pid": pid, "message": e.to_string() }),
                        now_us,
                    )
                    .await;
                }
            }
        }
    }

    /// Step 6: one datagram from the local socket, decoded through the
    /// chain. Undecodable input is reported, never dropped silently.
    async fn poll_udp(&mut self, now_us: u64) {
        let datagram = match self.ingest.try_recv() {
            Ok(Some(datagram)) => datagram,
            Ok(None) => return,
            Err(e) => {
                self.report_error(
                    ERROR_EXCEPTION,
                    json!({ "message": format!("error reading from udp socket: {e}") }),
                    now_us,
                )
                .await;
                return;
            }
        };
        self.counters.udp_packets += 1;

        match decode_any(&datagram) {
            Ok(records) => {
                for record in records {
                    match record_to_message(&self.config.sender, record, now_us) {
                        Ok(message) => {
                            if message.envelope.kind == MessageKind::Event {
                                self.counters.events += 1;
                            }
                            self.dispatch(message, now_us).await;
                        }
                        Err(e) => {
                            self.report_error(
                                ERROR_STRUCTURED,
                                json!({ "message": e.to_string() }),
                                now_us,
                            )
                            .await;
                        }
                    }
                }
            }
            Err(DecodeError::Unrecognized(_)) => {
                let data = Value::from(String::from_utf8_lossy(&datagram).into_owned());
                self.report_error(ERROR_RAW, data, now_us).await;
            }
        }
    }

    /// Step 7: one inbound message from the routers.
    async fn poll_router(&mut self, now_us: u64) {
        let Some(message) = self.link.try_recv() else {
            return;
        };
        self.counters.link_recv += 1;

        match message.envelope.kind {
            MessageKind::Ack => match message.envelope.acked_id {
                Some(acked_id) => match self.ack_tracker.acknowledge(acked_id) {
                    Ok(original) => {
                        debug!(id = %acked_id, kind = %original.envelope.kind, "message acknowledged");
                    }
                    Err(e) => {
                        self.report_error(
                            ERROR_STRUCTURED,
                            json!({ "unexpected_ack": acked_id.to_string(), "message": e.to_string() }),
                            now_us,
                        )
                        .await;
                    }
                },
                None => {
                    self.report_error(
                        ERROR_STRUCTURED,
                        json!({ "message": "ack carries no acked message id" }),
                        now_us,
                    )
                    .await;
                }
            },
            MessageKind::PluginExec => match PluginExecRequest::from_payload(&message.payload) {
                Some(request) => match PluginHandle::spawn(&request) {
                    Ok(handle) => {
                        info!(plugin = %handle.name, pid = handle.pid, "plugin started");
                        self.plugins.insert(handle.pid, handle);
                    }
                    Err(e) => {
                        self.report_error(
                            ERROR_EXCEPTION,
                            json!({ "plugin": request.name(), "message": e.to_string() }),
                            now_us,
                        )
                        .await;
                    }
                },
                None => {
                    self.report_error(ERROR_STRUCTURED, message.payload.clone(), now_us)
                        .await;
                }
            },
            other => {
                self.report_error(ERROR_UNSUPPORTED, json!({ "kind": other.name() }), now_us)
                    .await;
            }
        }
    }

    /// Step 8: CPU-time gauges plus one counter per non-zero internal
    /// counter, each reset after emission.
    async fn flush_stats(&mut self, now_us: u64) {
        if now_us.saturating_sub(self.last_stats_us) <= self.config.stats_interval_us() {
            return;
        }

        let cpu = cpu_times();
        let gauges = [
            ("agent.utime", cpu.utime),
            ("agent.stime", cpu.stime),
            ("agent.cutime", cpu.cutime),
            ("agent.cstime", cpu.cstime),
        ];
        for (name, value) in gauges {
            let message = Message::new(
                self.config.sender.clone(),
                MessageKind::Gauge,
                now_us,
                gauge_payload(name, value, now_us),
            );
            self.transmit(&message).await;
        }

        for (name, value) in self.counters.drain_nonzero() {
            let message = Message::new(
                self.config.sender.clone(),
                MessageKind::Counter,
                now_us,
                counter_payload(&format!("agent.{name}"), value as f64, now_us),
            );
            self.transmit(&message).await;
        }

        self.last_stats_us = now_us;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::RouterPeer;
    use telfab_message::SenderId;
    use tokio::sync::mpsc;

    const SENDER: &str = "10c37e99-34df-4ca2-82a1-d68cdd26e1c1";
    // a realistic epoch base so the registration seed cannot underflow
    const T0: u64 = 1_700_000_000_000_000;

    fn sender() -> SenderId {
        SENDER.parse().unwrap()
    }

    fn test_agent() -> (Agent, RouterPeer, mpsc::UnboundedSender<Vec<u8>>) {
        let config = AgentConfig::new(SENDER, &["tcp://localhost:8126"]).unwrap();
        let (link, peer) = RouterLink::in_process();
        let (ingest, udp) = IngestSocket::in_process();
        (Agent::new(config, link, ingest, T0), peer, udp)
    }

    fn drain(peer: &mut RouterPeer) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(message) = peer.from_agent.try_recv() {
            out.push(message);
        }
        out
    }

    fn of_kind(messages: &[Message], kind: MessageKind) -> Vec<Message> {
        messages
            .iter()
            .filter(|m| m.envelope.kind == kind)
            .cloned()
            .collect()
    }

    #[tokio::test]
    async fn test_first_cycle_sends_registration_only() {
        let (mut agent, mut peer, _udp) = test_agent();
        agent.tick(T0).await;

        let sent = drain(&mut peer);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].envelope.kind, MessageKind::Registration);
        assert!(sent[0].payload.get("hostname").is_some());
        assert!(sent[0].payload.get("ipv4").is_some());
    }

    #[tokio::test]
    async fn test_heartbeat_fires_strictly_after_period() {
        let (mut agent, mut peer, _udp) = test_agent();
        agent.tick(T0).await;
        drain(&mut peer);

        // elapsed equals the period exactly: no heartbeat
        agent.tick(T0).await;
        assert!(of_kind(&drain(&mut peer), MessageKind::Heartbeat).is_empty());

        // one microsecond past the period: heartbeat fires
        agent.tick(T0 + 1).await;
        let beats = of_kind(&drain(&mut peer), MessageKind::Heartbeat);
        assert_eq!(beats.len(), 1);
        assert_eq!(beats[0].payload["name"], "agent.heartbeat");
        assert_eq!(beats[0].payload["value"], 30_000_001u64);
    }

    #[tokio::test]
    async fn test_noop_burst_after_interval() {
        let (mut agent, mut peer, _udp) = test_agent();
        agent.tick(T0).await;
        drain(&mut peer);

        agent.tick(T0 + agent.config.noop_interval_us() + 1).await;
        let noops = of_kind(&drain(&mut peer), MessageKind::Noop);
        // one per router; the in-process link counts as one router
        assert_eq!(noops.len(), 1);
    }

    #[tokio::test]
    async fn test_event_is_tracked_and_resent_after_timeout() {
        let (mut agent, mut peer, udp) = test_agent();
        udp.send(br#"{"type": "event", "name": "deploy"}"#.to_vec())
            .unwrap();
        agent.tick(T0).await;

        let events = of_kind(&drain(&mut peer), MessageKind::Event);
        assert_eq!(events.len(), 1);
        assert!(events[0].envelope.ack);
        assert_eq!(events[0].envelope.resend_count, 0);
        assert_eq!(agent.ack_tracker.len(), 1);

        // unacked past the ack interval: the same instance goes out again
        agent.tick(T0 + agent.config.ack_interval_us() + 1).await;
        let resent = of_kind(&drain(&mut peer), MessageKind::Event);
        assert_eq!(resent.len(), 1);
        assert_eq!(resent[0].envelope.id, events[0].envelope.id);
        assert_eq!(resent[0].envelope.resend_count, 1);
        assert_eq!(agent.ack_tracker.len(), 1);
    }

    #[tokio::test]
    async fn test_ack_stops_resends() {
        let (mut agent, mut peer, udp) = test_agent();
        udp.send(br#"{"type": "event", "name": "deploy"}"#.to_vec())
            .unwrap();
        agent.tick(T0).await;
        let event = of_kind(&drain(&mut peer), MessageKind::Event).remove(0);

        peer.to_agent
            .send(Message::ack_for(sender(), &event.envelope, T0 + 1))
            .unwrap();
        agent.tick(T0 + 1).await;
        assert!(agent.ack_tracker.is_empty());

        agent.tick(T0 + agent.config.ack_interval_us() + 2).await;
        assert!(of_kind(&drain(&mut peer), MessageKind::Event).is_empty());
    }

    #[tokio::test]
    async fn test_unexpected_ack_reports_error() {
        let (mut agent, mut peer, _udp) = test_agent();
        let bogus = Message::new(sender(), MessageKind::Event, T0, json!({}));
        peer.to_agent
            .send(Message::ack_for(sender(), &bogus.envelope, T0))
            .unwrap();
        agent.tick(T0).await;

        let errors = of_kind(&drain(&mut peer), MessageKind::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].payload["error"], "structured");
    }

    #[tokio::test]
    async fn test_statsd_counter_keeps_arrival_timestamp() {
        let (mut agent, mut peer, udp) = test_agent();
        udp.send(b"reqs:1|c".to_vec()).unwrap();
        agent.tick(T0).await;

        let counters = of_kind(&drain(&mut peer), MessageKind::Counter);
        assert_eq!(counters.len(), 1);
        assert_eq!(counters[0].envelope.timestamp_us, T0);
        assert_eq!(counters[0].payload["name"], "reqs");
        assert_eq!(counters[0].payload["value"], 1.0);
        assert!(!counters[0].envelope.ack);
    }

    #[tokio::test]
    async fn test_collectd_packet_yields_message_per_value() {
        let (mut agent, mut peer, udp) = test_agent();

        // plugin name part + values part carrying two gauges
        let mut packet = Vec::new();
        packet.extend_from_slice(&[0x00, 0x02, 0x00, 0x08]);
        packet.extend_from_slice(b"cpu\0");
        packet.extend_from_slice(&[0x00, 0x06, 0x00, 0x18, 0x00, 0x02, 0x01, 0x01]);
        packet.extend_from_slice(&1.0f64.to_le_bytes());
        packet.extend_from_slice(&2.0f64.to_le_bytes());

        udp.send(packet).unwrap();
        agent.tick(T0).await;

        let gauges = of_kind(&drain(&mut peer), MessageKind::Gauge);
        assert_eq!(gauges.len(), 2);
        assert_eq!(gauges[0].payload["name"], "collectd.cpu");
        assert_eq!(gauges[1].payload["value"], 2.0);
    }

    #[tokio::test]
    async fn test_unrecognized_datagram_reports_raw_error() {
        let (mut agent, mut peer, udp) = test_agent();
        udp.send(b"complete garbage".to_vec()).unwrap();
        agent.tick(T0).await;

        let errors = of_kind(&drain(&mut peer), MessageKind::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].payload["error"], "raw");
        assert_eq!(errors[0].payload["data"], "complete garbage");
    }

    #[tokio::test]
    async fn test_dead_ingest_socket_reports_exception() {
        let (mut agent, mut peer, udp) = test_agent();
        drop(udp);
        agent.tick(T0).await;

        let errors = of_kind(&drain(&mut peer), MessageKind::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].payload["error"], "exception");
        assert!(errors[0].payload["data"]["message"]
            .as_str()
            .unwrap()
            .contains("udp socket"));
    }

    #[tokio::test]
    async fn test_unsupported_inbound_kind_reports_error() {
        let (mut agent, mut peer, _udp) = test_agent();
        peer.to_agent
            .send(Message::new(sender(), MessageKind::Mark, T0, json!({})))
            .unwrap();
        agent.tick(T0).await;

        let errors = of_kind(&drain(&mut peer), MessageKind::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].payload["error"], "unsupported");
        assert_eq!(errors[0].payload["data"]["kind"], "mark");
    }

    #[tokio::test]
    async fn test_plugin_exec_spawns_and_reports_completion() {
        let (mut agent, mut peer, _udp) = test_agent();
        peer.to_agent
            .send(Message::new(
                sender(),
                MessageKind::PluginExec,
                T0,
                json!({ "plugin_path": "/bin/echo", "plugin_args": ["pong"], "plugin": "echo" }),
            ))
            .unwrap();
        agent.tick(T0).await;
        assert_eq!(agent.plugins.len(), 1);

        let mut report = None;
        for i in 1..=100u64 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            agent.tick(T0 + i).await;
            let beats = of_kind(&drain(&mut peer), MessageKind::Heartbeat);
            if let Some(beat) = beats
                .into_iter()
                .find(|b| b.payload["name"] == "plugin.echo")
            {
                report = Some(beat);
                break;
            }
        }
        let report = report.expect("plugin completion was never reported");
        assert_eq!(report.payload["exit_code"], 0);
        assert_eq!(report.payload["stdout"][0], "pong");
        assert!(agent.plugins.is_empty());
    }

    #[tokio::test]
    async fn test_stats_flush_emits_and_resets_counters() {
        let (mut agent, mut peer, udp) = test_agent();
        udp.send(b"reqs:1|c".to_vec()).unwrap();
        agent.tick(T0).await;
        drain(&mut peer);

        agent.tick(T0 + agent.config.stats_interval_us() + 1).await;
        let sent = drain(&mut peer);

        let gauge_names: Vec<String> = of_kind(&sent, MessageKind::Gauge)
            .iter()
            .map(|m| m.payload["name"].as_str().unwrap().to_string())
            .collect();
        for name in ["agent.utime", "agent.stime", "agent.cutime", "agent.cstime"] {
            assert!(gauge_names.iter().any(|n| n == name), "missing gauge {name}");
        }

        let stats = of_kind(&sent, MessageKind::Counter);
        let udp_stat = stats
            .iter()
            .find(|m| m.payload["name"] == "agent.udp_packets")
            .expect("udp_packets counter missing");
        assert_eq!(udp_stat.payload["value"], 1.0);

        // counters were reset, so the next flush has no udp_packets stat
        agent
            .tick(T0 + 2 * agent.config.stats_interval_us() + 2)
            .await;
        let again = of_kind(&drain(&mut peer), MessageKind::Counter);
        assert!(again
            .iter()
            .all(|m| m.payload["name"] != "agent.udp_packets"));
    }

    #[tokio::test]
    async fn test_exit_notice_after_shutdown() {
        let (agent, mut peer, _udp) = test_agent();
        let token = CancellationToken::new();
        token.cancel();
        agent.run(token).await;

        let sent = drain(&mut peer);
        let logs = of_kind(&sent, MessageKind::Log);
        assert_eq!(logs.len(), 1);
        assert_eq!(
            logs[0].payload,
            Value::from(format!("agent {SENDER} exiting."))
        );
    }
}
