// Copyright 2026-Present the telfab authors
// SPDX-License-Identifier: Apache-2.0

//! Filter-driven pub/sub fan-out for bus traffic.
//!
//! A syndicator owns a set of registered filters and, per filter, a list of
//! destination sinks. Each inbound message is matched against every filter
//! and forwarded to all destinations of the filters that match.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod filter;
pub mod syndicator;

pub use filter::{Filter, FilterError};
pub use syndicator::{
    DeliveryFailure, RegistrationError, SinkError, SubscriberSink, Syndicator, TcpSink,
};
