// Copyright 2026-Present the telfab authors
// SPDX-License-Identifier: Apache-2.0

//! Ingestion decoders for the local UDP socket.
//!
//! Each decoder inspects the raw datagram and returns `None` when the bytes
//! are not in its format; `decode_any` tries them in a fixed order and the
//! first success wins. A datagram no decoder claims is reported as
//! unrecognized, never dropped silently.

pub mod collectd;
pub mod json;
pub mod statsd;

use telfab_message::Record;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("datagram ({0} bytes) matched no known encoding")]
    Unrecognized(usize),
}

/// Decode one datagram into normalized records. JSON is tried first, then
/// statsd, then the collectd binary protocol; a collectd packet may carry
/// several values and so yields several records.
pub fn decode_any(buf: &[u8]) -> Result<Vec<Record>, DecodeError> {
    if let Some(record) = json::decode(buf) {
        return Ok(vec![record]);
    }
    if let Some(record) = statsd::decode(buf) {
        return Ok(vec![record]);
    }
    if let Some(records) = collectd::decode(buf) {
        return Ok(records);
    }
    Err(DecodeError::Unrecognized(buf.len()))
}
