// Copyright 2026-Present the telfab authors
// SPDX-License-Identifier: Apache-2.0

//! Agent configuration: sender identity, router endpoints, listen port and
//! timer intervals. Everything is validated at construction; an invalid
//! value fails construction immediately rather than surfacing later in the
//! event loop.

use std::env;

use telfab_message::envelope::InvalidSenderId;
use telfab_message::util::{normalize_router_uri, UriError};
use telfab_message::SenderId;

pub const ENV_SENDER_ID: &str = "TELFAB_SENDER_ID";
pub const ENV_ROUTERS: &str = "TELFAB_ROUTERS";
pub const ENV_PORT: &str = "TELFAB_PORT";
pub const ENV_HEARTBEAT_SECS: &str = "TELFAB_HEARTBEAT_SECS";
pub const ENV_ACK_INTERVAL_SECS: &str = "TELFAB_ACK_INTERVAL_SECS";
pub const ENV_NOOP_INTERVAL_SECS: &str = "TELFAB_NOOP_INTERVAL_SECS";
pub const ENV_STATS_INTERVAL_SECS: &str = "TELFAB_STATS_INTERVAL_SECS";

pub const DEFAULT_PORT: u16 = 8125;
pub const DEFAULT_HEARTBEAT_SECS: u64 = 30;
pub const DEFAULT_ACK_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_NOOP_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 5;

// unprivileged ports only
const PORT_MIN: u16 = 1025;
const HEARTBEAT_MIN_SECS: u64 = 1;
const HEARTBEAT_MAX_SECS: u64 = 300;
// the microsecond form of an interval must fit in u64
const INTERVAL_MIN_SECS: u64 = 1;
const INTERVAL_MAX_SECS: u64 = 86_400;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error(transparent)]
    Sender(#[from] InvalidSenderId),

    #[error("at least one router endpoint is required")]
    NoRouters,

    #[error(transparent)]
    Router(#[from] UriError),

    #[error("listen port {0} is outside 1025-65535")]
    PortOutOfRange(u16),

    #[error("heartbeat period {0}s is outside 1-300s")]
    HeartbeatOutOfRange(u64),

    #[error("{0} interval {1}s is outside 1-86400s")]
    IntervalOutOfRange(&'static str, u64),

    #[error("required environment variable {0} is not set")]
    MissingEnv(&'static str),

    #[error("environment variable {0} has unparseable value '{1}'")]
    BadNumber(&'static str, String),
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub sender: SenderId,
    /// Normalized `tcp://host:port` endpoints.
    pub routers: Vec<String>,
    pub port: u16,
    pub heartbeat_secs: u64,
    pub ack_interval_secs: u64,
    pub noop_interval_secs: u64,
    pub stats_interval_secs: u64,
}

impl AgentConfig {
    /// Validated construction with default port and intervals.
    pub fn new(sender_id: &str, routers: &[&str]) -> Result<Self, ConfigError> {
        let sender: SenderId = sender_id.parse()?;
        if routers.is_empty() {
            return Err(ConfigError::NoRouters);
        }
        let routers = routers
            .iter()
            .map(|uri| normalize_router_uri(uri))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AgentConfig {
            sender,
            routers,
            port: DEFAULT_PORT,
            heartbeat_secs: DEFAULT_HEARTBEAT_SECS,
            ack_interval_secs: DEFAULT_ACK_INTERVAL_SECS,
            noop_interval_secs: DEFAULT_NOOP_INTERVAL_SECS,
            stats_interval_secs: DEFAULT_STATS_INTERVAL_SECS,
        })
    }

    pub fn with_port(mut self, port: u16) -> Result<Self, ConfigError> {
        if port < PORT_MIN {
            return Err(ConfigError::PortOutOfRange(port));
        }
        self.port = port;
        Ok(self)
    }

    pub fn with_heartbeat_secs(mut self, secs: u64) -> Result<Self, ConfigError> {
        if !(HEARTBEAT_MIN_SECS..=HEARTBEAT_MAX_SECS).contains(&secs) {
            return Err(ConfigError::HeartbeatOutOfRange(secs));
        }
        self.heartbeat_secs = secs;
        Ok(self)
    }

    /// Build from `TELFAB_*` environment variables. Sender id and router
    /// list are required; everything else falls back to the defaults.
    /// Routers are a comma-separated list of `tcp://host:port` URIs.
    pub fn from_env() -> Result<Self, ConfigError> {
        let sender = env::var(ENV_SENDER_ID).map_err(|_| ConfigError::MissingEnv(ENV_SENDER_ID))?;
        let routers_raw =
            env::var(ENV_ROUTERS).map_err(|_| ConfigError::MissingEnv(ENV_ROUTERS))?;
        let routers: Vec<&str> = routers_raw
            .split(',')
            .map(str::trim)
            .filter(|uri| !uri.is_empty())
            .collect();

        let mut config = AgentConfig::new(&sender, &routers)?;
        if let Some(port) = env_parse::<u16>(ENV_PORT)? {
            config = config.with_port(port)?;
        }
        if let Some(secs) = env_parse(ENV_HEARTBEAT_SECS)? {
            config = config.with_heartbeat_secs(secs)?;
        }
        if let Some(secs) = env_parse(ENV_ACK_INTERVAL_SECS)? {
            config.ack_interval_secs = checked_interval("ack", secs)?;
        }
        if let Some(secs) = env_parse(ENV_NOOP_INTERVAL_SECS)? {
            config.noop_interval_secs = checked_interval("noop", secs)?;
        }
        if let Some(secs) = env_parse(ENV_STATS_INTERVAL_SECS)? {
            config.stats_interval_secs = checked_interval("stats", secs)?;
        }
        Ok(config)
    }

    pub fn heartbeat_us(&self) -> u64 {
        self.heartbeat_secs * 1_000_000
    }

    pub fn ack_interval_us(&self) -> u64 {
        self.ack_interval_secs * 1_000_000
    }

    pub fn noop_interval_us(&self) -> u64 {
        self.noop_interval_secs * 1_000_000
    }

    pub fn stats_interval_us(&self) -> u64 {
        self.stats_interval_secs * 1_000_000
    }
}

fn checked_interval(name: &'static str, secs: u64) -> Result<u64, ConfigError> {
    if !(INTERVAL_MIN_SECS..=INTERVAL_MAX_SECS).contains(&secs) {
        return Err(ConfigError::IntervalOutOfRange(name, secs));
    }
    Ok(secs)
}

fn env_parse<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::BadNumber(name, raw)),
        Err(_) => Ok(None),
    }
}
