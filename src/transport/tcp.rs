//! TCP transport: one framed stream per peer, see [`hub`](super::hub).

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::events::Bus;

use super::hub::{Hub, Role, StreamLink};
use super::{Endpoint, Link, Protocol, Transport};

/// Pause after a failed accept (fd exhaustion and the like).
pub(crate) const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Stream transport over TCP.
#[derive(Clone, Debug)]
pub struct TcpTransport {
    cfg: TransportConfig,
    bus: Option<Bus>,
}

impl TcpTransport {
    /// Creates the backend.
    pub fn new(cfg: TransportConfig) -> Self {
        Self { cfg, bus: None }
    }

    /// Publishes `PeerConnected` events on `bus`.
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn protocol(&self) -> Protocol {
        Protocol::Tcp
    }

    async fn bind(&self, endpoint: &Endpoint) -> Result<Box<dyn Link>, TransportError> {
        let bind_err = |source| TransportError::Bind {
            endpoint: endpoint.to_string(),
            source,
        };
        let listener = TcpListener::bind(endpoint.host_port())
            .await
            .map_err(bind_err)?;
        let addr = listener.local_addr().map_err(bind_err)?;
        let local = Endpoint::from_socket_addr(Protocol::Tcp, addr);

        let hub = Hub::new(local, Role::Bound, &self.cfg, self.bus.clone());
        let accept = hub.clone();
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = accept.token().cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((stream, remote)) => {
                        let _ = stream.set_nodelay(true);
                        accept.attach(stream, &remote.to_string());
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "tcp accept failed");
                        accept.fail(TransportError::Receive(err)).await;
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
        });
        Ok(Box::new(StreamLink::new(hub, None)))
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Link>, TransportError> {
        let connect = TcpStream::connect(endpoint.host_port());
        let stream = match self.cfg.connect_timeout() {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .unwrap_or_else(|_| Err(io::Error::from(io::ErrorKind::TimedOut))),
            None => connect.await,
        }
        .map_err(|source| TransportError::Connect {
            endpoint: endpoint.to_string(),
            source,
        })?;
        let _ = stream.set_nodelay(true);

        let local = match stream.local_addr() {
            Ok(addr) => Endpoint::from_socket_addr(Protocol::Tcp, addr),
            Err(_) => endpoint.clone(),
        };
        let hub = Hub::new(local, Role::Connected, &self.cfg, None);
        hub.attach(stream, &endpoint.to_string());
        Ok(Box::new(StreamLink::new(hub, None)))
    }
}
