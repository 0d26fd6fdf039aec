// Copyright 2026-Present the telfab authors
// SPDX-License-Identifier: Apache-2.0

//! The syndicator: registered filters, their destination sinks, and the
//! per-message fan-out.
//!
//! Registration and dispatch may run from different threads: the filter and
//! destination maps sit behind an `RwLock` (write on registration, read on
//! fan-out) and the message counters are atomics.

use std::collections::HashMap;
use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use telfab_message::util::valid_uuid;
use telfab_message::Record;

use crate::filter::{Filter, FilterError};

/// Destination capability: deliver a pair of frames, the matching filter's
/// id and the serialized message. This is the only method the syndicator
/// ever calls on a destination.
pub trait SubscriberSink: Send + Sync {
    fn send_pair(&self, filter_id: &str, payload: &[u8]) -> Result<(), SinkError>;
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SinkError(pub String);

/// One failed delivery, surfaced to the fan-out caller. A failure to one
/// destination never blocks delivery to the others.
#[derive(Debug)]
pub struct DeliveryFailure {
    pub filter_id: String,
    /// Index of the destination in the filter's registration order.
    pub destination: usize,
    pub error: SinkError,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("filter id '{0}' is not a 36-byte UUID")]
    BadFilterId(String),

    #[error("no filter registered under id '{0}'")]
    UnknownFilterId(String),
}

#[derive(Default)]
struct Registry {
    filters: HashMap<String, Filter>,
    sinks: HashMap<String, Vec<Box<dyn SubscriberSink>>>,
}

/// Owns the filter set and destination lists and fans inbound messages out
/// to every destination whose filter matches.
#[derive(Default)]
pub struct Syndicator {
    registry: RwLock<Registry>,
    messages_processed: AtomicU64,
    messages_forwarded: AtomicU64,
    messages_dropped: AtomicU64,
}

impl Syndicator {
    pub fn new() -> Self {
        Syndicator::default()
    }

    /// Register a filter from user-supplied options. Validation is
    /// all-or-nothing; on success the compiled filter is frozen and stored
    /// under a freshly generated id, paired with an empty destination list.
    ///
    /// Returns the new filter's id.
    pub fn add_filter(&self, opts: &Map<String, Value>) -> Result<String, RegistrationError> {
        let filter = Filter::compile(opts)?;
        let id = Uuid::new_v4().to_string();

        #[allow(clippy::expect_used)] // lock poisoning is unrecoverable here
        let mut registry = self.registry.write().expect("syndicator registry poisoned");
        registry.sinks.insert(id.clone(), Vec::new());
        registry.filters.insert(id.clone(), filter);
        debug!(filter_id = %id, "registered syndicator filter");

        Ok(id)
    }

    /// Attach a destination sink to a registered filter.
    pub fn add_sink(
        &self,
        sink: Box<dyn SubscriberSink>,
        filter_id: &str,
    ) -> Result<(), RegistrationError> {
        if !valid_uuid(filter_id) {
            return Err(RegistrationError::BadFilterId(filter_id.to_string()));
        }

        #[allow(clippy::expect_used)]
        let mut registry = self.registry.write().expect("syndicator registry poisoned");
        match registry.sinks.get_mut(filter_id) {
            Some(sinks) => {
                sinks.push(sink);
                Ok(())
            }
            None => Err(RegistrationError::UnknownFilterId(filter_id.to_string())),
        }
    }

    /// A copy of the filter registered under this id, if any.
    pub fn filter_for_id(&self, id: &str) -> Option<Filter> {
        #[allow(clippy::expect_used)]
        let registry = self.registry.read().expect("syndicator registry poisoned");
        registry.filters.get(id).cloned()
    }

    pub fn filter_count(&self) -> usize {
        #[allow(clippy::expect_used)]
        let registry = self.registry.read().expect("syndicator registry poisoned");
        registry.filters.len()
    }

    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    pub fn messages_forwarded(&self) -> u64 {
        self.messages_forwarded.load(Ordering::Relaxed)
    }

    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    /// Run every registered filter against a message and forward it to all
    /// destinations of the filters that match. Delivery failures go to
    /// `on_error`; they never abort the remaining deliveries.
    ///
    /// Returns the number of successful forwards.
    pub fn apply_all_filters(
        &self,
        record: &Record,
        on_error: &mut dyn FnMut(DeliveryFailure),
    ) -> usize {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);

        let payload = match serde_json::to_vec(record) {
            Ok(bytes) => bytes,
            Err(e) => {
                // a record that cannot re-serialize forwards nowhere
                warn!("could not serialize record for fan-out: {e}");
                self.messages_dropped.fetch_add(1, Ordering::Relaxed);
                return 0;
            }
        };

        let mut times_forwarded = 0;

        #[allow(clippy::expect_used)]
        let registry = self.registry.read().expect("syndicator registry poisoned");
        for (id, filter) in &registry.filters {
            if !filter.matches(record) {
                continue;
            }
            let Some(sinks) = registry.sinks.get(id) else {
                continue;
            };
            for (destination, sink) in sinks.iter().enumerate() {
                match sink.send_pair(id, &payload) {
                    Ok(()) => times_forwarded += 1,
                    Err(error) => on_error(DeliveryFailure {
                        filter_id: id.clone(),
                        destination,
                        error,
                    }),
                }
            }
        }
        drop(registry);

        self.messages_forwarded
            .fetch_add(times_forwarded as u64, Ordering::Relaxed);
        if times_forwarded == 0 {
            self.messages_dropped.fetch_add(1, Ordering::Relaxed);
        }

        times_forwarded
    }
}

/// In-process destination: hand frames to a channel. Used by tests and by
/// co-located subscribers.
impl SubscriberSink for std::sync::mpsc::Sender<(String, Vec<u8>)> {
    fn send_pair(&self, filter_id: &str, payload: &[u8]) -> Result<(), SinkError> {
        self.send((filter_id.to_string(), payload.to_vec()))
            .map_err(|e| SinkError(e.to_string()))
    }
}

/// Remote destination: two newline-terminated frames per delivery over a
/// shared TCP stream.
pub struct TcpSink {
    stream: Mutex<TcpStream>,
}

impl TcpSink {
    pub fn new(stream: TcpStream) -> Self {
        TcpSink {
            stream: Mutex::new(stream),
        }
    }
}

impl SubscriberSink for TcpSink {
    fn send_pair(&self, filter_id: &str, payload: &[u8]) -> Result<(), SinkError> {
        #[allow(clippy::expect_used)]
        let mut stream = self.stream.lock().expect("tcp sink lock poisoned");
        let mut frame = Vec::with_capacity(filter_id.len() + payload.len() + 2);
        frame.extend_from_slice(filter_id.as_bytes());
        frame.push(b'\n');
        frame.extend_from_slice(payload);
        frame.push(b'\n');
        stream
            .write_all(&frame)
            .and_then(|_| stream.flush())
            .map_err(|e| SinkError(e.to_string()))
    }
}
