// Copyright 2026-Present the telfab authors
// SPDX-License-Identifier: Apache-2.0

//! Agent daemon: config from the environment, a fmt subscriber for logs,
//! ctrl-c wired to the loop's cancellation token.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

use std::env;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use telfab_agent::{Agent, AgentConfig, IngestSocket, RouterLink};
use telfab_message::util::timestamp_us;

/// An unparseable level falls back to `info`; it must never produce an
/// empty filter that silences everything.
fn log_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

#[tokio::main]
async fn main() {
    let log_level = env::var("TELFAB_LOG_LEVEL")
        .map(|level| level.to_lowercase())
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(&log_level))
        .with_level(true)
        .without_time()
        .init();

    let config = match AgentConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("invalid agent configuration: {e}");
            return;
        }
    };

    let link = match RouterLink::connect(&config.routers).await {
        Ok(link) => link,
        Err(e) => {
            error!("could not connect to routers {:?}: {e}", config.routers);
            return;
        }
    };

    let ingest = match IngestSocket::bind(config.port).await {
        Ok(socket) => socket,
        Err(e) => {
            error!("could not bind udp port {}: {e}", config.port);
            return;
        }
    };

    info!(
        sender = %config.sender,
        port = config.port,
        routers = config.routers.len(),
        "telfab agent starting"
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    let agent = Agent::new(config, link, ingest, timestamp_us());
    agent.run(shutdown).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_falls_back_to_info() {
        assert_eq!(log_filter("foo=notalevel").to_string(), "info");
        assert_eq!(log_filter("debug").to_string(), "debug");
    }
}
