//! IPC transport over unix domain sockets.
//!
//! The socket file is created on bind and removed when the bound link closes. A
//! stale file left by a crashed process makes bind fail with `AddrInUse`; remove it
//! before binding again.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::net::{UnixListener, UnixStream};

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::events::Bus;

use super::hub::{Hub, Role, StreamLink};
use super::tcp::ACCEPT_BACKOFF;
use super::{Endpoint, Link, Protocol, Transport};

/// Stream transport over unix domain sockets.
#[derive(Clone, Debug)]
pub struct IpcTransport {
    cfg: TransportConfig,
    bus: Option<Bus>,
}

impl IpcTransport {
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
impl Transport for IpcTransport {
    fn protocol(&self) -> Protocol {
        Protocol::Ipc
    }

    async fn bind(&self, endpoint: &Endpoint) -> Result<Box<dyn Link>, TransportError> {
        let path = PathBuf::from(endpoint.address());
        let listener = UnixListener::bind(&path).map_err(|source| TransportError::Bind {
            endpoint: endpoint.to_string(),
            source,
        })?;

        let hub = Hub::new(endpoint.clone(), Role::Bound, &self.cfg, self.bus.clone());
        let accept = hub.clone();
        tokio::spawn(async move {
            let mut peers = 0u64;
            loop {
                let accepted = tokio::select! {
                    _ = accept.token().cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((stream, _)) => {
                        peers += 1;
                        accept.attach(stream, &format!("local#{peers}"));
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "ipc accept failed");
                        accept.fail(TransportError::Receive(err)).await;
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
        });
        Ok(Box::new(StreamLink::new(hub, Some(path))))
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Link>, TransportError> {
        let stream = UnixStream::connect(endpoint.address())
            .await
            .map_err(|source| TransportError::Connect {
                endpoint: endpoint.to_string(),
                source,
            })?;
        let hub = Hub::new(endpoint.clone(), Role::Connected, &self.cfg, None);
        hub.attach(stream, &endpoint.to_string());
        Ok(Box::new(StreamLink::new(hub, None)))
    }
}
