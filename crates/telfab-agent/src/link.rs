// Copyright 2026-Present the telfab authors
// SPDX-License-Identifier: Apache-2.0

//! Transport plumbing: the router link and the local ingestion socket.
//!
//! Both come in two flavors behind one enum, the real network transport and
//! an in-process channel pair, so the agent loop can be driven entirely
//! in-memory by tests.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use telfab_message::util::router_authority;
use telfab_message::Message;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialize(#[from] serde_json::Error),

    #[error("router link peer is gone")]
    Closed,
}

/// Test-harness side of an in-process router link: what the agent sends
/// arrives on `from_agent`; frames pushed into `to_agent` show up on the
/// agent's inbound path.
pub struct RouterPeer {
    pub from_agent: mpsc::UnboundedReceiver<Message>,
    pub to_agent: mpsc::UnboundedSender<Message>,
}

/// Connections to the configured routers. Outbound messages round-robin
/// across endpoints; inbound frames from all endpoints arrive multiplexed
/// on one queue.
pub enum RouterLink {
    Tcp {
        writers: Vec<OwnedWriteHalf>,
        next: usize,
        inbound: mpsc::UnboundedReceiver<Message>,
    },
    Channel {
        outbound: mpsc::UnboundedSender<Message>,
        inbound: mpsc::UnboundedReceiver<Message>,
    },
}

impl RouterLink {
    /// Connect to every normalized `tcp://host:port` endpoint. One reader
    /// task per connection feeds the shared inbound queue; wire frames are
    /// newline-delimited JSON, one message per line.
    pub async fn connect(endpoints: &[String]) -> Result<Self, LinkError> {
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let mut writers = Vec::with_capacity(endpoints.len());

        for endpoint in endpoints {
            let authority = router_authority(endpoint);
            let stream = TcpStream::connect(authority).await?;
            debug!(router = %endpoint, "connected to router");
            let (read_half, write_half) = stream.into_split();
            writers.push(write_half);

            let tx = inbound_tx.clone();
            let endpoint = endpoint.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(read_half).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => match Message::from_wire(line.as_bytes()) {
                            Ok(message) => {
                                if tx.send(message).is_err() {
                                    return;
                                }
                            }
                            Err(e) => warn!(router = %endpoint, "undecodable router frame: {e}"),
                        },
                        Ok(None) => {
                            warn!(router = %endpoint, "router closed the connection");
                            return;
                        }
                        Err(e) => {
                            warn!(router = %endpoint, "router read failed: {e}");
                            return;
                        }
                    }
                }
            });
        }

        Ok(RouterLink::Tcp {
            writers,
            next: 0,
            inbound,
        })
    }

    /// In-process link plus its peer handle.
    pub fn in_process() -> (Self, RouterPeer) {
        let (outbound, from_agent) = mpsc::unbounded_channel();
        let (to_agent, inbound) = mpsc::unbounded_channel();
        (
            RouterLink::Channel { outbound, inbound },
            RouterPeer {
                from_agent,
                to_agent,
            },
        )
    }

    /// Number of attached routers; the noop burst sends one per router.
    pub fn router_count(&self) -> usize {
        match self {
            RouterLink::Tcp { writers, .. } => writers.len(),
            RouterLink::Channel { .. } => 1,
        }
    }

    /// Send one message to the next router in round-robin order.
    pub async fn send(&mut self, message: &Message) -> Result<(), LinkError> {
        match self {
            RouterLink::Tcp { writers, next, .. } => {
                if writers.is_empty() {
                    return Err(LinkError::Closed);
                }
                let mut frame = message.to_wire()?;
                frame.push(b'\n');
                let idx = *next % writers.len();
                *next = (*next + 1) % writers.len();
                writers[idx].write_all(&frame).await?;
                Ok(())
            }
            RouterLink::Channel { outbound, .. } => outbound
                .send(message.clone())
                .map_err(|_| LinkError::Closed),
        }
    }

    /// One non-blocking read from the inbound queue.
    pub fn try_recv(&mut self) -> Option<Message> {
        match self {
            RouterLink::Tcp { inbound, .. } => inbound.try_recv().ok(),
            RouterLink::Channel { inbound, .. } => inbound.try_recv().ok(),
        }
    }
}

/// Local ingestion socket for client traffic.
pub enum IngestSocket {
    Udp(UdpSocket),
    Channel(mpsc::UnboundedReceiver<Vec<u8>>),
}

/// Largest datagram the agent will accept.
pub const INGEST_BUFFER_SIZE: usize = 65_536;

impl IngestSocket {
    pub async fn bind(port: u16) -> Result<Self, LinkError> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
        Ok(IngestSocket::Udp(socket))
    }

    /// In-process datagram source plus the sender tests push packets into.
    pub fn in_process() -> (Self, mpsc::UnboundedSender<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (IngestSocket::Channel(rx), tx)
    }

    /// One non-blocking receive; `Ok(None)` when no datagram is waiting.
    /// Receive failures are surfaced so the agent can report them outward.
    pub fn try_recv(&mut self) -> Result<Option<Vec<u8>>, std::io::Error> {
        match self {
            IngestSocket::Udp(socket) => {
                let mut buf = [0u8; INGEST_BUFFER_SIZE];
                match socket.try_recv_from(&mut buf) {
                    Ok((len, _from)) => Ok(Some(buf[..len].to_vec())),
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
                    Err(e) => Err(e),
                }
            }
            IngestSocket::Channel(rx) => match rx.try_recv() {
                Ok(datagram) => Ok(Some(datagram)),
                Err(mpsc::error::TryRecvError::Empty) => Ok(None),
                // a gone producer is a dead socket, not an idle one
                Err(mpsc::error::TryRecvError::Disconnected) => Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "ingest channel closed",
                )),
            },
        }
    }
}
