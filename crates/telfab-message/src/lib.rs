// Copyright 2026-Present the telfab authors
// SPDX-License-Identifier: Apache-2.0

//! Message model shared by every telfab component: the routing envelope,
//! the closed set of message kinds, kind-specific payload builders, and the
//! id/timestamp/URI validation helpers the agent and syndicator both need.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod envelope;
pub mod kind;
pub mod payload;
pub mod util;

pub use envelope::{Envelope, Message, SenderId};
pub use kind::MessageKind;

/// A normalized message hash: what ingestion decoders produce and what the
/// syndicator's filters match against.
pub type Record = serde_json::Map<String, serde_json::Value>;
