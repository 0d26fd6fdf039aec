// Copyright 2026-Present the telfab authors
// SPDX-License-Identifier: Apache-2.0

//! The telemetry agent: a single cooperative event loop that ingests local
//! UDP traffic, wraps it in reliable-delivery envelopes, forwards it to
//! routers, tracks acks with timeout-based resend, and runs the periodic
//! noop/registration/heartbeat/stats timers.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod ack;
pub mod agent;
pub mod config;
pub mod counters;
pub mod decode;
pub mod link;
pub mod plugin;
pub mod proc;

pub use agent::Agent;
pub use config::{AgentConfig, ConfigError};
pub use link::{IngestSocket, LinkError, RouterLink};
