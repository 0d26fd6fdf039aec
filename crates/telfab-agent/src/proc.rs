// Copyright 2026-Present the telfab authors
// SPDX-License-Identifier: Apache-2.0

//! Host facts for registration payloads and the agent's own CPU gauges.

use std::net::ToSocketAddrs;

use nix::sys::resource::{getrusage, UsageWho};

pub fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "localhost".to_string())
}

/// First IPv4 address the hostname resolves to, `127.0.0.1` when
/// resolution fails.
pub fn first_ipv4(hostname: &str) -> String {
    (hostname, 0u16)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.find(|addr| addr.is_ipv4()))
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

/// CPU seconds for this process and its reaped children.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuTimes {
    pub utime: f64,
    pub stime: f64,
    pub cutime: f64,
    pub cstime: f64,
}

pub fn cpu_times() -> CpuTimes {
    let mut times = CpuTimes::default();
    if let Ok(usage) = getrusage(UsageWho::RUSAGE_SELF) {
        times.utime = timeval_secs(usage.user_time());
        times.stime = timeval_secs(usage.system_time());
    }
    if let Ok(usage) = getrusage(UsageWho::RUSAGE_CHILDREN) {
        times.cutime = timeval_secs(usage.user_time());
        times.cstime = timeval_secs(usage.system_time());
    }
    times
}

fn timeval_secs(tv: nix::sys::time::TimeVal) -> f64 {
    tv.tv_sec() as f64 + tv.tv_usec() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hostname_nonempty() {
        assert!(!hostname().is_empty());
    }

    #[test]
    fn test_first_ipv4_falls_back() {
        assert_eq!(first_ipv4("no.such.host.invalid"), "127.0.0.1");
        assert_eq!(first_ipv4("localhost"), "127.0.0.1");
    }

    #[test]
    fn test_cpu_times_sane() {
        let times = cpu_times();
        assert!(times.utime >= 0.0);
        assert!(times.stime >= 0.0);
    }
}
