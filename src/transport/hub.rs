//! # Peer hub shared by the stream transports (TCP, IPC).
//!
//! Every accepted or established stream becomes a peer with one reader task and one
//! writer task, both framed by [`MessageCodec`]:
//!
//! ```text
//!             ┌────────── Hub ───────────┐
//! Link::send ─┼─► pick peer(s) ─► [queue]─┼─► writer ─► Framed sink ─► socket
//!             │                           │
//! Link::recv ◄┼── [inbound] ◄── reader ◄──┼── Framed stream ◄────────── socket
//!             └───────────────────────────┘
//! ```
//!
//! ## Rules
//! - Inbound messages are tagged with their peer id so replies can be routed back.
//! - Parts of a multi-part body (`MORE`) stick to the peer that got the first part.
//! - A connected hub has a single peer; losing it surfaces as `Closed` on receive.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::events::{Bus, Event, EventKind};
use crate::message::codec::frame_len;
use crate::message::{Message, MessageCodec};

use super::{Counters, Dispatch, Endpoint, Link, LinkStats};

type Inbound = Result<Message, TransportError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Role {
    Bound,
    Connected,
}

#[derive(Default)]
struct Peers {
    list: Vec<(u64, mpsc::Sender<Message>)>,
    cursor: usize,
    sticky: Option<u64>,
}

pub(crate) struct Hub {
    local: Endpoint,
    role: Role,
    max_frame_len: usize,
    queue: usize,
    peers: Mutex<Peers>,
    next_peer: AtomicU64,
    inbound_tx: mpsc::Sender<Inbound>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<Inbound>>,
    counters: Counters,
    cancel: CancellationToken,
    bus: Option<Bus>,
}

impl Hub {
    pub(crate) fn new(local: Endpoint, role: Role, cfg: &TransportConfig, bus: Option<Bus>) -> Arc<Self> {
        let queue = cfg.link_queue.max(1);
        let (inbound_tx, inbound_rx) = mpsc::channel(queue);
        Arc::new(Self {
            local,
            role,
            max_frame_len: cfg.max_frame_len,
            queue,
            peers: Mutex::new(Peers::default()),
            next_peer: AtomicU64::new(1),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            counters: Counters::default(),
            cancel: CancellationToken::new(),
            bus,
        })
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Reports an accept failure to the receiving side.
    pub(crate) async fn fail(&self, err: TransportError) {
        self.forward(&self.cancel, Err(err)).await;
    }

    /// Adopts a connected stream as a new peer.
    pub(crate) fn attach<S>(self: &Arc<Self>, stream: S, remote: &str)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let id = self.next_peer.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel::<Message>(self.queue);
        self.peers.lock().list.push((id, tx));

        if self.role == Role::Bound {
            tracing::debug!(endpoint = %self.local, peer = remote, "peer connected");
            if let Some(bus) = &self.bus {
                bus.publish(
                    Event::new(EventKind::PeerConnected)
                        .with_endpoint(self.local.to_string())
                        .with_reason(remote),
                );
            }
        }

        let framed = Framed::new(stream, MessageCodec::new(self.max_frame_len));
        let (sink, stream): (SplitSink<Framed<S, MessageCodec>, Message>, _) = framed.split();
        let token = self.cancel.child_token();

        tokio::spawn(Arc::clone(self).write_loop(id, sink, rx, token.clone()));

        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut stream = stream;
            loop {
                let next = tokio::select! {
                    _ = token.cancelled() => break,
                    next = stream.next() => next,
                };
                match next {
                    Some(Ok(msg)) => {
                        hub.counters.received(frame_len(&msg));
                        if !hub.forward(&token, Ok(msg.with_origin(Some(id)))).await {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        tracing::debug!(endpoint = %hub.local, peer = id, error = %err, "peer read failed");
                        hub.forward(&token, Err(err)).await;
                        break;
                    }
                    None => break,
                }
            }
            token.cancel();
            hub.drop_peer(id);
            if hub.role == Role::Connected && !hub.cancel.is_cancelled() {
                hub.forward(&hub.cancel, Err(TransportError::Closed)).await;
            }
        });
    }

    async fn write_loop<S>(
        self: Arc<Self>,
        id: u64,
        mut sink: SplitSink<Framed<S, MessageCodec>, Message>,
        mut rx: mpsc::Receiver<Message>,
        token: CancellationToken,
    ) where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        loop {
            let msg = tokio::select! {
                _ = token.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            let len = frame_len(&msg);
            if let Err(err) = sink.send(msg).await {
                tracing::debug!(endpoint = %self.local, peer = id, error = %err, "peer write failed");
                break;
            }
            self.counters.sent(len);
        }
        let _ = sink.close().await;
        token.cancel();
        self.drop_peer(id);
    }

    /// Queues an inbound item unless `token` fires first; false when nobody listens.
    async fn forward(&self, token: &CancellationToken, item: Inbound) -> bool {
        tokio::select! {
            _ = token.cancelled() => false,
            sent = self.inbound_tx.send(item) => sent.is_ok(),
        }
    }

    fn drop_peer(&self, id: u64) {
        let mut peers = self.peers.lock();
        peers.list.retain(|(peer, _)| *peer != id);
        if peers.sticky == Some(id) {
            peers.sticky = None;
        }
    }

    fn pick(&self, msg: &Message, dispatch: Dispatch) -> Result<Vec<mpsc::Sender<Message>>, TransportError> {
        let mut peers = self.peers.lock();
        if let Some(origin) = msg.origin() {
            return peers
                .list
                .iter()
                .find(|(id, _)| *id == origin)
                .map(|(_, tx)| vec![tx.clone()])
                .ok_or(TransportError::Closed);
        }
        if peers.list.is_empty() {
            return match (dispatch, self.role) {
                (Dispatch::All, Role::Bound) => Ok(Vec::new()),
                (_, Role::Connected) => Err(TransportError::Closed),
                (Dispatch::One, Role::Bound) => Err(TransportError::NoPeers),
            };
        }
        match dispatch {
            Dispatch::All => Ok(peers.list.iter().map(|(_, tx)| tx.clone()).collect()),
            Dispatch::One => {
                let sticky = peers
                    .sticky
                    .and_then(|id| peers.list.iter().position(|(peer, _)| *peer == id));
                let idx = match sticky {
                    Some(idx) => idx,
                    None => {
                        let idx = peers.cursor % peers.list.len();
                        peers.cursor = idx + 1;
                        idx
                    }
                };
                let (peer, tx) = &peers.list[idx];
                let (peer, tx) = (*peer, tx.clone());
                peers.sticky = msg.has_more().then_some(peer);
                Ok(vec![tx])
            }
        }
    }

    pub(crate) async fn send(&self, msg: Message, dispatch: Dispatch) -> Result<(), TransportError> {
        crate::message::codec::validate(&msg)?;
        let targets = self.pick(&msg, dispatch)?;
        let single = (targets.len() == 1 && dispatch == Dispatch::One) || msg.origin().is_some();
        for tx in targets {
            if tx.send(msg.clone()).await.is_err() && single {
                return Err(TransportError::Closed);
            }
        }
        Ok(())
    }

    pub(crate) async fn receive(&self) -> Result<Message, TransportError> {
        let mut rx = self.inbound_rx.lock().await;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(TransportError::Closed),
            item = rx.recv() => item.unwrap_or(Err(TransportError::Closed)),
        }
    }
}

/// [`Link`] over a [`Hub`]; optionally removes a socket file on close.
pub(crate) struct StreamLink {
    hub: Arc<Hub>,
    cleanup: Mutex<Option<PathBuf>>,
}

impl StreamLink {
    pub(crate) fn new(hub: Arc<Hub>, cleanup: Option<PathBuf>) -> Self {
        Self {
            hub,
            cleanup: Mutex::new(cleanup),
        }
    }
}

#[async_trait]
impl Link for StreamLink {
    async fn send(&self, msg: Message, dispatch: Dispatch) -> Result<(), TransportError> {
        self.hub.send(msg, dispatch).await
    }

    async fn receive(&self) -> Result<Message, TransportError> {
        self.hub.receive().await
    }

    fn local_endpoint(&self) -> Endpoint {
        self.hub.local.clone()
    }

    fn stats(&self) -> LinkStats {
        self.hub.counters.snapshot()
    }

    fn close(&self) {
        self.hub.cancel.cancel();
        if let Some(path) = self.cleanup.lock().take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

impl Drop for StreamLink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Protocol;

    fn hub(role: Role) -> Arc<Hub> {
        Hub::new(
            Endpoint::new(Protocol::Tcp, "test", 0),
            role,
            &TransportConfig::default(),
            None,
        )
    }

    #[tokio::test]
    async fn duplex_peers_exchange_frames() {
        let server = hub(Role::Bound);
        let client = hub(Role::Connected);
        let (a, b) = tokio::io::duplex(1024);
        server.attach(a, "client");
        client.attach(b, "server");

        client.send(Message::text("hello"), Dispatch::One).await.unwrap();
        let got = server.receive().await.unwrap();
        assert_eq!(got.as_text(), Some("hello"));

        // reply follows the origin tag back to the client
        server
            .send(Message::text("hi").with_origin(got.origin()), Dispatch::All)
            .await
            .unwrap();
        assert_eq!(client.receive().await.unwrap().as_text(), Some("hi"));
        assert_eq!(client.counters.snapshot().messages_sent, 1);
    }

    #[tokio::test]
    async fn multi_part_bodies_stick_to_one_peer() {
        let server = hub(Role::Bound);
        let first = hub(Role::Connected);
        let second = hub(Role::Connected);
        let (a1, b1) = tokio::io::duplex(1024);
        let (a2, b2) = tokio::io::duplex(1024);
        server.attach(a1, "first");
        server.attach(a2, "second");
        first.attach(b1, "server");
        second.attach(b2, "server");

        let parts = [
            Message::text("p1").with_flags(crate::message::Flags::MORE),
            Message::text("p2").with_flags(crate::message::Flags::MORE),
            Message::text("p3"),
        ];
        for part in parts {
            server.send(part, Dispatch::One).await.unwrap();
        }
        for expected in ["p1", "p2", "p3"] {
            assert_eq!(first.receive().await.unwrap().as_text(), Some(expected));
        }
        server.send(Message::text("next"), Dispatch::One).await.unwrap();
        assert_eq!(second.receive().await.unwrap().as_text(), Some("next"));
    }

    #[tokio::test]
    async fn connected_side_sees_close_when_peer_goes_away() {
        let server = hub(Role::Bound);
        let client = hub(Role::Connected);
        let (a, b) = tokio::io::duplex(64);
        server.attach(a, "client");
        client.attach(b, "server");

        server.cancel.cancel();
        assert!(matches!(client.receive().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn one_without_peers_is_reported() {
        let server = hub(Role::Bound);
        assert!(matches!(
            server.send(Message::text("x"), Dispatch::One).await,
            Err(TransportError::NoPeers)
        ));
        server.send(Message::text("x"), Dispatch::All).await.unwrap();
    }
}
