//! # Transport layer.
//!
//! Moves framed messages between channels in different processes or hosts.
//!
//! ```text
//!                ┌──────────────┐  bind/connect   ┌────────────────┐
//!  Channel ◄──── │ inbound pump │ ◄── receive ─── │  dyn Link      │ ◄── socket(s)
//!          ────► │ pattern ops  │ ──── send ────► │  (per binding) │ ──► socket(s)
//!                └──────────────┘                 └────────────────┘
//!                                                        ▲
//!                               Transport::bind/connect ─┘  (one per Protocol)
//! ```
//!
//! ## Backends
//! - `inproc`: no link at all; peers are wired inside the context registry
//! - `ipc`, `tcp`: length-prefixed stream framing through a shared peer hub
//! - `udp`: one frame per datagram, best effort
//! - `rmcast`: sequenced datagrams with NAK-driven retransmission
//!
//! Backends are pluggable through
//! [`RuntimeContext::register_transport`](crate::RuntimeContext::register_transport).

mod endpoint;
mod hub;
pub(crate) mod inproc;
#[cfg(unix)]
mod ipc;
mod multicast;
mod tcp;
mod udp;

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::error::TransportError;
use crate::message::Message;

pub use endpoint::{Endpoint, IntoEndpoint, Protocol};
#[cfg(unix)]
pub use ipc::IpcTransport;
pub use multicast::MulticastTransport;
pub use tcp::TcpTransport;
pub use udp::UdpTransport;

/// Which peers of a link an outbound message goes to.
///
/// A message that arrived from a specific peer of a bound link (a request being
/// answered) is routed back to that peer regardless of the dispatch mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Every connected peer (pub/sub).
    All,
    /// One peer, round-robin; parts of a multi-part body stay on one peer.
    One,
}

/// Delivery counters of one link.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Bytes written to the wire.
    pub bytes_sent: u64,
    /// Bytes read from the wire.
    pub bytes_received: u64,
    /// Messages written.
    pub messages_sent: u64,
    /// Messages delivered inbound.
    pub messages_received: u64,
    /// Datagrams sent again after a NAK (reliable multicast).
    pub retransmitted: u64,
    /// Datagrams given up on after the retry budget (reliable multicast).
    pub lost: u64,
}

/// Shared atomic counters behind [`LinkStats`].
#[derive(Debug, Default)]
pub(crate) struct Counters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    retransmitted: AtomicU64,
    lost: AtomicU64,
}

impl Counters {
    pub(crate) fn sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn retransmitted(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.retransmitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn lost(&self, n: u64) {
        self.lost.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> LinkStats {
        LinkStats {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            retransmitted: self.retransmitted.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
        }
    }
}

/// A protocol backend.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Protocol this backend serves.
    fn protocol(&self) -> Protocol;

    /// Starts listening/receiving on `endpoint`.
    async fn bind(&self, endpoint: &Endpoint) -> Result<Box<dyn Link>, TransportError>;

    /// Initiates a connection to `endpoint`.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Link>, TransportError>;
}

/// One bound or connected transport endpoint.
///
/// `receive` is driven by a single pump task; `send` may be called concurrently.
#[async_trait]
pub trait Link: Send + Sync + 'static {
    /// Sends one message to the peers selected by `dispatch`.
    async fn send(&self, msg: Message, dispatch: Dispatch) -> Result<(), TransportError>;

    /// Waits for the next inbound message; `Closed` once the link is gone.
    async fn receive(&self) -> Result<Message, TransportError>;

    /// Actual local address (with the OS-assigned port after binding to port 0).
    fn local_endpoint(&self) -> Endpoint;

    /// Delivery counters.
    fn stats(&self) -> LinkStats;

    /// Stops background I/O and releases the socket. Idempotent.
    fn close(&self);
}
