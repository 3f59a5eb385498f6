//! # UDP transport.
//!
//! One encoded frame per datagram, no acknowledgement and no ordering. A bound link
//! learns its peers from the datagrams it receives; a connected link talks to exactly
//! one remote address.
//!
//! Malformed datagrams are logged and skipped. A frame larger than
//! `TransportConfig::datagram_size` is refused on send.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::message::Message;
use crate::message::codec::{decode_frame, to_bytes};

use super::{Counters, Dispatch, Endpoint, Link, LinkStats, Protocol, Transport};

/// Best-effort datagram transport.
#[derive(Clone, Debug)]
pub struct UdpTransport {
    cfg: TransportConfig,
}

impl UdpTransport {
    /// Creates the backend.
    pub fn new(cfg: TransportConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn protocol(&self) -> Protocol {
        Protocol::Udp
    }

    async fn bind(&self, endpoint: &Endpoint) -> Result<Box<dyn Link>, TransportError> {
        let bind_err = |source| TransportError::Bind {
            endpoint: endpoint.to_string(),
            source,
        };
        let socket = UdpSocket::bind(endpoint.host_port()).await.map_err(bind_err)?;
        let local = socket.local_addr().map_err(bind_err)?;
        Ok(Box::new(UdpLink::new(
            socket,
            Endpoint::from_socket_addr(Protocol::Udp, local),
            false,
            &self.cfg,
        )))
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Link>, TransportError> {
        let connect_err = |source| TransportError::Connect {
            endpoint: endpoint.to_string(),
            source,
        };
        let remote = tokio::net::lookup_host(endpoint.host_port())
            .await
            .map_err(connect_err)?
            .next()
            .ok_or_else(|| connect_err(std::io::ErrorKind::AddrNotAvailable.into()))?;
        let any: SocketAddr = match remote {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(any).await.map_err(connect_err)?;
        socket.connect(remote).await.map_err(connect_err)?;
        let local = socket.local_addr().map_err(connect_err)?;
        Ok(Box::new(UdpLink::new(
            socket,
            Endpoint::from_socket_addr(Protocol::Udp, local),
            true,
            &self.cfg,
        )))
    }
}

/// Remote addresses seen by a bound link.
#[derive(Default)]
struct Peers {
    ids: HashMap<SocketAddr, u64>,
    list: Vec<(u64, SocketAddr)>,
    cursor: usize,
}

impl Peers {
    fn observe(&mut self, addr: SocketAddr) -> u64 {
        if let Some(id) = self.ids.get(&addr) {
            return *id;
        }
        let id = self.list.len() as u64 + 1;
        self.ids.insert(addr, id);
        self.list.push((id, addr));
        id
    }

    fn targets(&mut self, origin: Option<u64>, dispatch: Dispatch) -> Result<Vec<SocketAddr>, TransportError> {
        if let Some(origin) = origin {
            return self
                .list
                .iter()
                .find(|(id, _)| *id == origin)
                .map(|(_, addr)| vec![*addr])
                .ok_or(TransportError::Closed);
        }
        match dispatch {
            Dispatch::All => Ok(self.list.iter().map(|(_, addr)| *addr).collect()),
            Dispatch::One if self.list.is_empty() => Err(TransportError::NoPeers),
            Dispatch::One => {
                let idx = self.cursor % self.list.len();
                self.cursor = idx + 1;
                Ok(vec![self.list[idx].1])
            }
        }
    }
}

struct UdpLink {
    socket: Arc<UdpSocket>,
    local: Endpoint,
    connected: bool,
    datagram_size: usize,
    max_frame_len: usize,
    peers: Mutex<Peers>,
    counters: Counters,
    cancel: CancellationToken,
}

impl UdpLink {
    fn new(socket: UdpSocket, local: Endpoint, connected: bool, cfg: &TransportConfig) -> Self {
        Self {
            socket: Arc::new(socket),
            local,
            connected,
            datagram_size: cfg.datagram_size.max(1),
            max_frame_len: cfg.max_frame_len,
            peers: Mutex::new(Peers::default()),
            counters: Counters::default(),
            cancel: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl Link for UdpLink {
    async fn send(&self, msg: Message, dispatch: Dispatch) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let frame = to_bytes(&msg)?;
        if frame.len() > self.datagram_size {
            return Err(TransportError::Frame(format!(
                "frame of {} bytes exceeds datagram size {}",
                frame.len(),
                self.datagram_size
            )));
        }

        if self.connected {
            self.socket.send(&frame).await.map_err(TransportError::Send)?;
            self.counters.sent(frame.len());
            return Ok(());
        }

        let targets = self.peers.lock().targets(msg.origin(), dispatch)?;
        for addr in targets {
            self.socket
                .send_to(&frame, addr)
                .await
                .map_err(TransportError::Send)?;
            self.counters.sent(frame.len());
        }
        Ok(())
    }

    async fn receive(&self) -> Result<Message, TransportError> {
        let mut buf = vec![0u8; self.datagram_size];
        loop {
            let (n, addr) = tokio::select! {
                _ = self.cancel.cancelled() => return Err(TransportError::Closed),
                got = self.socket.recv_from(&mut buf) => got.map_err(TransportError::Receive)?,
            };
            let mut datagram = BytesMut::from(&buf[..n]);
            let msg = match decode_frame(&mut datagram, self.max_frame_len) {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    tracing::debug!(endpoint = %self.local, from = %addr, len = n, "truncated datagram skipped");
                    continue;
                }
                Err(err) => {
                    tracing::debug!(endpoint = %self.local, from = %addr, error = %err, "malformed datagram skipped");
                    continue;
                }
            };
            self.counters.received(n);
            if self.connected {
                return Ok(msg);
            }
            let id = self.peers.lock().observe(addr);
            return Ok(msg.with_origin(Some(id)));
        }
    }

    fn local_endpoint(&self) -> Endpoint {
        self.local.clone()
    }

    fn stats(&self) -> LinkStats {
        self.counters.snapshot()
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Endpoint {
        Endpoint::new(Protocol::Udp, "127.0.0.1", 0)
    }

    #[tokio::test]
    async fn datagrams_round_trip_and_reply_by_origin() {
        let transport = UdpTransport::new(TransportConfig::default());
        let server = transport.bind(&endpoint()).await.unwrap();
        let client = transport.connect(&server.local_endpoint()).await.unwrap();

        client
            .send(Message::text("ping").with_topic("t"), Dispatch::One)
            .await
            .unwrap();
        let got = server.receive().await.unwrap();
        assert_eq!(got.as_text(), Some("ping"));
        assert_eq!(got.topic(), Some("t"));
        assert!(got.origin().is_some());

        server
            .send(Message::text("pong").with_origin(got.origin()), Dispatch::One)
            .await
            .unwrap();
        assert_eq!(client.receive().await.unwrap().as_text(), Some("pong"));
        assert_eq!(server.stats().messages_received, 1);
        assert_eq!(client.stats().messages_sent, 1);
    }

    #[tokio::test]
    async fn oversized_frames_are_refused() {
        let transport = UdpTransport::new(TransportConfig {
            datagram_size: 32,
            ..TransportConfig::default()
        });
        let server = transport.bind(&endpoint()).await.unwrap();
        let client = transport.connect(&server.local_endpoint()).await.unwrap();
        let err = client
            .send(Message::new(vec![0u8; 64]), Dispatch::One)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Frame(_)));
    }

    #[tokio::test]
    async fn bound_link_without_peers() {
        let transport = UdpTransport::new(TransportConfig::default());
        let server = transport.bind(&endpoint()).await.unwrap();
        assert!(matches!(
            server.send(Message::text("x"), Dispatch::One).await,
            Err(TransportError::NoPeers)
        ));
        server.send(Message::text("x"), Dispatch::All).await.unwrap();

        server.close();
        assert!(matches!(server.receive().await, Err(TransportError::Closed)));
    }
}
