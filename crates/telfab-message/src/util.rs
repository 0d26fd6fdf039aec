// Copyright 2026-Present the telfab authors
// SPDX-License-Identifier: Apache-2.0

//! Id, timestamp and router-URI helpers.

use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;

static UUID_RE: OnceLock<Regex> = OnceLock::new();

fn uuid_re() -> &'static Regex {
    UUID_RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)] // literal pattern
        Regex::new(
            r"\A[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\z",
        )
        .unwrap()
    })
}

/// Check the 36-byte hex-dashed UUID form. Truncated UUIDs used to slip
/// through an earlier length check and caused misrouted acks, so the full
/// 8-4-4-4-12 shape is enforced.
pub fn valid_uuid(s: &str) -> bool {
    uuid_re().is_match(s)
}

/// Microseconds since the Unix epoch. Every timer and envelope timestamp in
/// the fabric uses this resolution.
pub fn timestamp_us() -> u64 {
    #[allow(clippy::expect_used)] // a pre-1970 clock is not a recoverable state
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch");
    elapsed.as_micros() as u64
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UriError {
    #[error("router URI '{0}' has no scheme, expected tcp://host:port")]
    MissingScheme(String),

    #[error("router URI '{0}' uses scheme '{1}', only tcp is supported")]
    UnsupportedScheme(String, String),

    #[error("router URI '{0}' has no host")]
    MissingHost(String),

    #[error("router URI '{0}' has no port, expected tcp://host:port")]
    MissingPort(String),

    #[error("router URI '{0}' has a non-numeric port")]
    BadPort(String),
}

/// Validate and normalize a router endpoint URI.
///
/// Accepts `tcp://host:port` only. The wildcard host `*` normalizes to
/// `0.0.0.0` and `localhost` to `127.0.0.1` so the same URI can be used on
/// both the bind and connect sides.
pub fn normalize_router_uri(uri: &str) -> Result<String, UriError> {
    let (scheme, rest) = uri
        .split_once("://")
        .ok_or_else(|| UriError::MissingScheme(uri.to_string()))?;

    if scheme != "tcp" {
        return Err(UriError::UnsupportedScheme(
            uri.to_string(),
            scheme.to_string(),
        ));
    }

    if rest.is_empty() || rest.starts_with('/') || rest.starts_with(':') {
        return Err(UriError::MissingHost(uri.to_string()));
    }

    let (host, port) = rest
        .split_once(':')
        .ok_or_else(|| UriError::MissingPort(uri.to_string()))?;

    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(UriError::BadPort(uri.to_string()));
    }

    let host = match host {
        "*" => "0.0.0.0",
        "localhost" => "127.0.0.1",
        other => other,
    };

    Ok(format!("tcp://{host}:{port}"))
}

/// The `host:port` authority of an already-normalized router URI, suitable
/// for handing to a socket connect call.
pub fn router_authority(normalized: &str) -> &str {
    normalized.strip_prefix("tcp://").unwrap_or(normalized)
}
