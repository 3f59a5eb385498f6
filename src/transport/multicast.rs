//! # Reliable multicast transport.
//!
//! UDP datagrams with a per-sender sequence number and NAK-driven retransmission.
//!
//! ```text
//! DATA: [1][sender u64][seq u64][frame ...]
//! NAK:  [2][sender u64][seq u64]          sent to the source of the gap
//! ```
//!
//! ## Rules
//! - The sender keeps the last `window` datagrams and resends one sequence at most
//!   `retry_budget` times, to whoever NAKed it.
//! - A receiver tracks the next expected sequence per sender, holds out-of-order
//!   datagrams, NAKs the gap every `nak_interval` and skips it after `retry_budget`
//!   rounds (counted as `lost`).
//! - Loss of the newest datagrams is not detected: a gap is only visible once a later
//!   sequence arrives.
//! - Group addresses are joined on bind; unicast addresses behave the same without the
//!   group membership.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::{MulticastConfig, TransportConfig};
use crate::error::TransportError;
use crate::message::Message;
use crate::message::codec::{decode_frame, to_bytes};

use super::{Counters, Dispatch, Endpoint, Link, LinkStats, Protocol, Transport};

const KIND_DATA: u8 = 1;
const KIND_NAK: u8 = 2;
const HEADER: usize = 1 + 8 + 8;
const MAX_NAKS_PER_ROUND: usize = 64;

/// Sequenced datagrams with NAK-based retransmission.
#[derive(Clone, Debug)]
pub struct MulticastTransport {
    cfg: TransportConfig,
}

impl MulticastTransport {
    /// Creates the backend.
    pub fn new(cfg: TransportConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl Transport for MulticastTransport {
    fn protocol(&self) -> Protocol {
        Protocol::ReliableMulticast
    }

    async fn bind(&self, endpoint: &Endpoint) -> Result<Box<dyn Link>, TransportError> {
        let bind_err = |source| TransportError::Bind {
            endpoint: endpoint.to_string(),
            source,
        };
        let addr = resolve(endpoint).await.map_err(bind_err)?;
        let group = addr.ip().is_multicast();
        let listen: SocketAddr = match (group, addr) {
            (true, SocketAddr::V4(_)) => (Ipv4Addr::UNSPECIFIED, addr.port()).into(),
            (true, SocketAddr::V6(_)) => (Ipv6Addr::UNSPECIFIED, addr.port()).into(),
            (false, _) => addr,
        };
        let socket = UdpSocket::bind(listen).await.map_err(bind_err)?;
        if group {
            join(&socket, addr.ip(), &self.cfg.multicast).map_err(bind_err)?;
        }
        let bound = socket.local_addr().map_err(bind_err)?;
        let local = if group {
            SocketAddr::new(addr.ip(), bound.port())
        } else {
            bound
        };
        let dest = if group {
            Destination::Fixed(local)
        } else {
            Destination::Seen
        };
        Ok(Box::new(MulticastLink::start(
            socket,
            Endpoint::from_socket_addr(Protocol::ReliableMulticast, local),
            dest,
            &self.cfg,
        )))
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Link>, TransportError> {
        let connect_err = |source| TransportError::Connect {
            endpoint: endpoint.to_string(),
            source,
        };
        let remote = resolve(endpoint).await.map_err(connect_err)?;
        let any: SocketAddr = match remote {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(any).await.map_err(connect_err)?;
        if remote.ip().is_multicast() {
            set_sender_options(&socket, remote.ip(), &self.cfg.multicast).map_err(connect_err)?;
        }
        let local = socket.local_addr().map_err(connect_err)?;
        Ok(Box::new(MulticastLink::start(
            socket,
            Endpoint::from_socket_addr(Protocol::ReliableMulticast, local),
            Destination::Fixed(remote),
            &self.cfg,
        )))
    }
}

async fn resolve(endpoint: &Endpoint) -> io::Result<SocketAddr> {
    tokio::net::lookup_host(endpoint.host_port())
        .await?
        .next()
        .ok_or_else(|| io::ErrorKind::AddrNotAvailable.into())
}

fn join(socket: &UdpSocket, group: IpAddr, cfg: &MulticastConfig) -> io::Result<()> {
    match group {
        IpAddr::V4(v4) => socket.join_multicast_v4(v4, Ipv4Addr::UNSPECIFIED)?,
        IpAddr::V6(v6) => socket.join_multicast_v6(&v6, 0)?,
    }
    set_sender_options(socket, group, cfg)
}

fn set_sender_options(socket: &UdpSocket, group: IpAddr, cfg: &MulticastConfig) -> io::Result<()> {
    match group {
        IpAddr::V4(_) => {
            socket.set_multicast_ttl_v4(cfg.ttl)?;
            socket.set_multicast_loop_v4(cfg.loopback)
        }
        IpAddr::V6(_) => socket.set_multicast_loop_v6(cfg.loopback),
    }
}

/// Datagrams a sender keeps for retransmission.
#[derive(Debug)]
pub(crate) struct SendWindow {
    next_seq: u64,
    cap: usize,
    frames: VecDeque<(u64, Bytes, u32)>,
}

impl SendWindow {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            next_seq: 0,
            cap: cap.max(1),
            frames: VecDeque::new(),
        }
    }

    /// Next sequence number to stamp on a datagram.
    pub(crate) fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Records an outgoing datagram and returns its sequence.
    pub(crate) fn push(&mut self, datagram: Bytes) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.frames.push_back((seq, datagram, 0));
        if self.frames.len() > self.cap {
            self.frames.pop_front();
        }
        seq
    }

    /// Datagram for `seq` if it is still held and under its retransmit budget.
    pub(crate) fn retransmit(&mut self, seq: u64, budget: u32) -> Option<Bytes> {
        let (_, datagram, sent) = self.frames.iter_mut().find(|(s, _, _)| *s == seq)?;
        if *sent >= budget {
            return None;
        }
        *sent += 1;
        Some(datagram.clone())
    }
}

/// Outcome of one NAK round of a [`ReceiveWindow`].
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Round {
    pub(crate) naks: Vec<u64>,
    pub(crate) ready: Vec<Bytes>,
    pub(crate) lost: u64,
}

/// Reorders one sender's datagrams.
#[derive(Debug)]
pub(crate) struct ReceiveWindow {
    expected: Option<u64>,
    pending: BTreeMap<u64, Bytes>,
    cap: usize,
    attempts: u32,
}

impl ReceiveWindow {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            expected: None,
            pending: BTreeMap::new(),
            cap: cap.max(1),
            attempts: 0,
        }
    }

    /// Takes one datagram; returns the frames now deliverable in order.
    ///
    /// The first sequence seen from a sender starts the stream (late joiners do not
    /// ask for history). Duplicates are ignored.
    pub(crate) fn accept(&mut self, seq: u64, frame: Bytes) -> Vec<Bytes> {
        let expected = *self.expected.get_or_insert(seq);
        if seq < expected {
            return Vec::new();
        }
        if seq > expected {
            if self.pending.len() < self.cap {
                self.pending.insert(seq, frame);
            }
            return Vec::new();
        }
        self.attempts = 0;
        let mut ready = vec![frame];
        self.expected = Some(seq + 1);
        self.drain(&mut ready);
        ready
    }

    /// One NAK round: either the missing sequences to request, or, once `budget`
    /// rounds went unanswered, the frames behind the skipped gap.
    pub(crate) fn round(&mut self, budget: u32) -> Round {
        let (Some(expected), Some(&first)) = (self.expected, self.pending.keys().next()) else {
            return Round::default();
        };
        if self.attempts < budget {
            self.attempts += 1;
            let naks = (expected..first).take(MAX_NAKS_PER_ROUND).collect();
            return Round {
                naks,
                ..Round::default()
            };
        }

        self.attempts = 0;
        self.expected = Some(first);
        let mut ready = Vec::new();
        self.drain(&mut ready);
        Round {
            naks: Vec::new(),
            ready,
            lost: first - expected,
        }
    }

    fn drain(&mut self, ready: &mut Vec<Bytes>) {
        while let Some(expected) = self.expected {
            match self.pending.remove(&expected) {
                Some(frame) => {
                    ready.push(frame);
                    self.expected = Some(expected + 1);
                }
                None => break,
            }
        }
    }
}

enum Destination {
    /// Group address or the connected remote.
    Fixed(SocketAddr),
    /// Every sender heard so far (unicast bind).
    Seen,
}

struct Shared {
    socket: UdpSocket,
    local: Endpoint,
    sender_id: u64,
    dest: Destination,
    seen: Mutex<Vec<SocketAddr>>,
    window: Mutex<SendWindow>,
    cfg: MulticastConfig,
    datagram_size: usize,
    max_frame_len: usize,
    counters: Counters,
    cancel: CancellationToken,
}

struct Remote {
    window: ReceiveWindow,
    addr: SocketAddr,
}

enum Wake {
    Datagram(io::Result<(usize, SocketAddr)>),
    Round,
}

impl Shared {
    async fn run(self: Arc<Self>, inbound: mpsc::Sender<Message>) {
        let mut buf = vec![0u8; self.datagram_size + HEADER];
        let mut remotes: HashMap<u64, Remote> = HashMap::new();
        let mut ticker = tokio::time::interval(self.cfg.nak_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let wake = tokio::select! {
                _ = self.cancel.cancelled() => break,
                got = self.socket.recv_from(&mut buf) => Wake::Datagram(got),
                _ = ticker.tick() => Wake::Round,
            };
            let frames = match wake {
                Wake::Datagram(Ok((n, from))) => {
                    let datagram = Bytes::copy_from_slice(&buf[..n]);
                    self.on_datagram(datagram, from, &mut remotes).await
                }
                Wake::Datagram(Err(err)) => {
                    tracing::debug!(endpoint = %self.local, error = %err, "multicast receive failed");
                    continue;
                }
                Wake::Round => self.on_round(&mut remotes).await,
            };
            for frame in frames {
                let Some(msg) = self.decode(frame) else { continue };
                let sent = tokio::select! {
                    _ = self.cancel.cancelled() => false,
                    sent = inbound.send(msg) => sent.is_ok(),
                };
                if !sent {
                    return;
                }
            }
        }
    }

    async fn on_datagram(&self, mut datagram: Bytes, from: SocketAddr, remotes: &mut HashMap<u64, Remote>) -> Vec<Bytes> {
        if datagram.len() < HEADER {
            tracing::debug!(endpoint = %self.local, %from, "short datagram skipped");
            return Vec::new();
        }
        let kind = datagram.get_u8();
        let sender = datagram.get_u64();
        let seq = datagram.get_u64();

        match kind {
            KIND_DATA if sender == self.sender_id => Vec::new(),
            KIND_DATA => {
                self.remember(from);
                let remote = remotes.entry(sender).or_insert_with(|| Remote {
                    window: ReceiveWindow::new(self.cfg.window),
                    addr: from,
                });
                remote.addr = from;
                remote.window.accept(seq, datagram)
            }
            KIND_NAK if sender == self.sender_id => {
                let resend = self.window.lock().retransmit(seq, self.cfg.retry_budget);
                if let Some(resend) = resend {
                    match self.socket.send_to(&resend, from).await {
                        Ok(_) => self.counters.retransmitted(resend.len()),
                        Err(err) => {
                            tracing::debug!(endpoint = %self.local, seq, error = %err, "retransmit failed")
                        }
                    }
                }
                Vec::new()
            }
            KIND_NAK => Vec::new(),
            other => {
                tracing::debug!(endpoint = %self.local, kind = other, "unknown datagram kind skipped");
                Vec::new()
            }
        }
    }

    async fn on_round(&self, remotes: &mut HashMap<u64, Remote>) -> Vec<Bytes> {
        let mut ready = Vec::new();
        for (sender, remote) in remotes.iter_mut() {
            let round = remote.window.round(self.cfg.retry_budget);
            for seq in round.naks {
                let nak = header(KIND_NAK, *sender, seq).freeze();
                if let Err(err) = self.socket.send_to(&nak, remote.addr).await {
                    tracing::debug!(endpoint = %self.local, seq, error = %err, "nak failed");
                }
            }
            if round.lost > 0 {
                tracing::debug!(endpoint = %self.local, sender, lost = round.lost, "gap skipped after retry budget");
                self.counters.lost(round.lost);
            }
            ready.extend(round.ready);
        }
        ready
    }

    fn decode(&self, frame: Bytes) -> Option<Message> {
        let len = frame.len();
        let mut buf = BytesMut::from(frame.as_ref());
        match decode_frame(&mut buf, self.max_frame_len) {
            Ok(Some(msg)) => {
                self.counters.received(len);
                Some(msg)
            }
            Ok(None) => {
                tracing::debug!(endpoint = %self.local, len, "truncated frame skipped");
                None
            }
            Err(err) => {
                tracing::debug!(endpoint = %self.local, error = %err, "malformed frame skipped");
                None
            }
        }
    }

    fn remember(&self, from: SocketAddr) {
        if !matches!(self.dest, Destination::Seen) {
            return;
        }
        let mut seen = self.seen.lock();
        if !seen.contains(&from) {
            seen.push(from);
        }
    }
}

fn header(kind: u8, sender: u64, seq: u64) -> BytesMut {
    let mut buf = BytesMut::with_capacity(HEADER);
    buf.put_u8(kind);
    buf.put_u64(sender);
    buf.put_u64(seq);
    buf
}

struct MulticastLink {
    shared: Arc<Shared>,
    inbound: tokio::sync::Mutex<mpsc::Receiver<Message>>,
}

impl MulticastLink {
    fn start(socket: UdpSocket, local: Endpoint, dest: Destination, cfg: &TransportConfig) -> Self {
        let (tx, rx) = mpsc::channel(cfg.link_queue.max(1));
        let shared = Arc::new(Shared {
            socket,
            local,
            sender_id: rand::random(),
            dest,
            seen: Mutex::new(Vec::new()),
            window: Mutex::new(SendWindow::new(cfg.multicast.window)),
            cfg: cfg.multicast.clone(),
            datagram_size: cfg.datagram_size.max(HEADER + 1),
            max_frame_len: cfg.max_frame_len,
            counters: Counters::default(),
            cancel: CancellationToken::new(),
        });
        tokio::spawn(Arc::clone(&shared).run(tx));
        Self {
            shared,
            inbound: tokio::sync::Mutex::new(rx),
        }
    }
}

#[async_trait]
impl Link for MulticastLink {
    /// Every send reaches the whole group; `dispatch` has no effect here.
    async fn send(&self, msg: Message, _dispatch: Dispatch) -> Result<(), TransportError> {
        let shared = &self.shared;
        if shared.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let frame = to_bytes(&msg)?;
        if HEADER + frame.len() > shared.datagram_size {
            return Err(TransportError::Frame(format!(
                "frame of {} bytes exceeds datagram size {}",
                frame.len(),
                shared.datagram_size - HEADER
            )));
        }

        let targets = match shared.dest {
            Destination::Fixed(addr) => vec![addr],
            Destination::Seen => shared.seen.lock().clone(),
        };
        let datagram = {
            let mut window = shared.window.lock();
            let mut datagram = header(KIND_DATA, shared.sender_id, window.next_seq());
            datagram.put_slice(&frame);
            let datagram = datagram.freeze();
            window.push(datagram.clone());
            datagram
        };
        for addr in targets {
            shared
                .socket
                .send_to(&datagram, addr)
                .await
                .map_err(TransportError::Send)?;
            shared.counters.sent(datagram.len());
        }
        Ok(())
    }

    async fn receive(&self) -> Result<Message, TransportError> {
        let mut rx = self.inbound.lock().await;
        tokio::select! {
            _ = self.shared.cancel.cancelled() => Err(TransportError::Closed),
            msg = rx.recv() => msg.ok_or(TransportError::Closed),
        }
    }

    fn local_endpoint(&self) -> Endpoint {
        self.shared.local.clone()
    }

    fn stats(&self) -> LinkStats {
        self.shared.counters.snapshot()
    }

    fn close(&self) {
        self.shared.cancel.cancel();
    }
}

impl Drop for MulticastLink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: &'static str) -> Bytes {
        Bytes::from_static(tag.as_bytes())
    }

    #[test]
    fn send_window_bounds_retransmits() {
        let mut window = SendWindow::new(2);
        assert_eq!(window.push(frame("a")), 0);
        assert_eq!(window.push(frame("b")), 1);
        assert_eq!(window.push(frame("c")), 2);

        // evicted
        assert_eq!(window.retransmit(0, 3), None);
        assert_eq!(window.retransmit(1, 2), Some(frame("b")));
        assert_eq!(window.retransmit(1, 2), Some(frame("b")));
        assert_eq!(window.retransmit(1, 2), None);
    }

    #[test]
    fn gap_is_naked_then_filled() {
        let mut window = ReceiveWindow::new(16);
        assert_eq!(window.accept(10, frame("a")), vec![frame("a")]);
        assert!(window.accept(13, frame("d")).is_empty());
        assert!(window.accept(13, frame("d")).is_empty());

        let round = window.round(3);
        assert_eq!(round.naks, vec![11, 12]);
        assert!(round.ready.is_empty());

        assert_eq!(window.accept(11, frame("b")), vec![frame("b")]);
        assert_eq!(window.accept(12, frame("c")), vec![frame("c"), frame("d")]);
        assert_eq!(window.round(3), Round::default());

        // duplicate of an already delivered sequence
        assert!(window.accept(12, frame("c")).is_empty());
    }

    #[test]
    fn gap_is_skipped_after_budget() {
        let mut window = ReceiveWindow::new(16);
        window.accept(0, frame("a"));
        window.accept(3, frame("d"));
        window.accept(4, frame("e"));

        assert_eq!(window.round(2).naks, vec![1, 2]);
        assert_eq!(window.round(2).naks, vec![1, 2]);
        let round = window.round(2);
        assert_eq!(round.lost, 2);
        assert_eq!(round.ready, vec![frame("d"), frame("e")]);
        assert_eq!(window.accept(5, frame("f")), vec![frame("f")]);
    }

    #[tokio::test]
    async fn unicast_sender_reaches_bound_receiver_in_order() {
        let transport = MulticastTransport::new(TransportConfig::default());
        let receiver = transport
            .bind(&Endpoint::new(Protocol::ReliableMulticast, "127.0.0.1", 0))
            .await
            .unwrap();
        let sender = transport.connect(&receiver.local_endpoint()).await.unwrap();

        for text in ["one", "two", "three"] {
            sender.send(Message::text(text), Dispatch::All).await.unwrap();
        }
        for expected in ["one", "two", "three"] {
            assert_eq!(receiver.receive().await.unwrap().as_text(), Some(expected));
        }
        assert_eq!(sender.stats().messages_sent, 3);
        assert_eq!(receiver.stats().messages_received, 3);
        assert_eq!(receiver.stats().lost, 0);
    }
}
