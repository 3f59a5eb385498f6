//! # Runtime context.
//!
//! [`RuntimeContext`] is the explicit owner of everything that would otherwise be a
//! process-wide singleton: the event bus, the subscriber set, the in-process endpoint
//! registry, the transport table and the channel id allocator.
//!
//! ```text
//!  RuntimeContext::builder(cfg).with_subscribers(..).build()
//!        │
//!        ├─► Bus ──► fan-out task ──► SubscriberSet (one worker per subscriber)
//!        ├─► Registry            inproc://name → channel
//!        ├─► transports          Protocol → Arc<dyn Transport>
//!        └─► channels            weak list, closed on teardown()
//! ```
//!
//! The context is cheap to clone; clones share all of the above.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::{Attachment, Channel, ChannelId, Pattern, WeakChannel};
use crate::config::{RuntimeConfig, SupervisorConfig};
use crate::error::{ChannelError, TransportError};
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::supervisor::Supervisor;
use crate::transport::inproc::Registry;
use crate::transport::{
    Endpoint, IntoEndpoint, Link, MulticastTransport, Protocol, TcpTransport, Transport,
    UdpTransport,
};

use super::pump;

/// Builder for [`RuntimeContext`].
pub struct RuntimeContextBuilder {
    cfg: RuntimeConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl RuntimeContextBuilder {
    /// Sets event subscribers.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the context and starts the event fan-out.
    ///
    /// Must be called within a tokio runtime.
    pub fn build(self) -> RuntimeContext {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));
        let token = CancellationToken::new();
        let listener = spawn_listener(&bus, Arc::clone(&subs), token.clone());

        let mut transports: HashMap<Protocol, Arc<dyn Transport>> = HashMap::new();
        let tcp = TcpTransport::new(self.cfg.transport.clone()).with_bus(bus.clone());
        transports.insert(Protocol::Tcp, Arc::new(tcp));
        #[cfg(unix)]
        {
            let ipc = crate::transport::IpcTransport::new(self.cfg.transport.clone())
                .with_bus(bus.clone());
            transports.insert(Protocol::Ipc, Arc::new(ipc));
        }
        transports.insert(
            Protocol::Udp,
            Arc::new(UdpTransport::new(self.cfg.transport.clone())),
        );
        transports.insert(
            Protocol::ReliableMulticast,
            Arc::new(MulticastTransport::new(self.cfg.transport.clone())),
        );

        RuntimeContext {
            inner: Arc::new(Inner {
                cfg: self.cfg,
                bus,
                subs,
                registry: Registry::default(),
                transports: RwLock::new(transports),
                next_id: AtomicU64::new(1),
                channels: Mutex::new(Vec::new()),
                token,
                listener: Mutex::new(Some(listener)),
                torn_down: AtomicBool::new(false),
            }),
        }
    }
}

struct Inner {
    cfg: RuntimeConfig,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    registry: Registry,
    transports: RwLock<HashMap<Protocol, Arc<dyn Transport>>>,
    next_id: AtomicU64,
    channels: Mutex<Vec<WeakChannel>>,
    token: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
    torn_down: AtomicBool,
}

/// Explicit runtime context passed to every API that needs shared state.
///
/// ```rust
/// use chanvisor::{Flags, Pattern, RuntimeConfig, RuntimeContext};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let ctx = RuntimeContext::builder(RuntimeConfig::default()).build();
///
///     let jobs = ctx.channel(Pattern::Pull, 8)?;
///     ctx.bind(&jobs, "inproc://jobs").await?;
///
///     let producer = ctx.channel(Pattern::Push, 8)?;
///     ctx.connect(&producer, "inproc://jobs").await?;
///
///     chanvisor::push(&producer, "job-1", Flags::empty()).await?;
///     let msg = chanvisor::pull(&jobs, Flags::empty()).await?;
///     assert_eq!(msg.payload().as_ref(), b"job-1");
///
///     ctx.teardown().await;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct RuntimeContext {
    inner: Arc<Inner>,
}

impl RuntimeContext {
    /// Starts building a context (`init`).
    pub fn builder(cfg: RuntimeConfig) -> RuntimeContextBuilder {
        RuntimeContextBuilder {
            cfg,
            subscribers: Vec::new(),
        }
    }

    /// Configuration the context was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.cfg
    }

    /// The event bus shared by channels, transports and supervisors of this context.
    pub fn bus(&self) -> &Bus {
        &self.inner.bus
    }

    /// True once [`teardown`](Self::teardown) has started.
    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::Acquire)
    }

    /// Creates a channel.
    ///
    /// # Errors
    /// - `CapacityExceeded`: `capacity == 0`
    /// - `OutOfMemory`: the ring buffer could not be reserved
    /// - `Closed`: the context has been torn down
    pub fn channel(&self, pattern: Pattern, capacity: usize) -> Result<Channel, ChannelError> {
        if self.is_torn_down() {
            return Err(ChannelError::Closed);
        }
        let id = ChannelId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let channel = Channel::open(id, pattern, capacity, self.inner.bus.clone())?;

        let mut channels = self.inner.channels.lock();
        channels.retain(|weak| weak.upgrade().is_some_and(|ch| !ch.is_closed()));
        channels.push(channel.downgrade());
        Ok(channel)
    }

    /// Creates a channel with [`RuntimeConfig::default_capacity`].
    pub fn default_channel(&self, pattern: Pattern) -> Result<Channel, ChannelError> {
        self.channel(pattern, self.inner.cfg.default_capacity)
    }

    /// Installs `transport` as the backend for its protocol, replacing the built-in one.
    ///
    /// `inproc` endpoints are always wired through the context registry and ignore
    /// this table.
    pub fn register_transport(&self, transport: Arc<dyn Transport>) {
        let protocol = transport.protocol();
        tracing::debug!(protocol = protocol.scheme(), "transport registered");
        self.inner.transports.write().insert(protocol, transport);
    }

    /// Backend currently serving `protocol`.
    pub fn transport(&self, protocol: Protocol) -> Option<Arc<dyn Transport>> {
        self.inner.transports.read().get(&protocol).cloned()
    }

    /// Binds `channel` to `endpoint` and returns the actual local endpoint
    /// (with the OS-assigned port after binding to port 0).
    ///
    /// # Errors
    /// - `AlreadyAttached` / `Closed`: the channel cannot take an endpoint
    /// - `Transport(..)`: address parse, bind or registry failure
    pub async fn bind(
        &self,
        channel: &Channel,
        endpoint: impl IntoEndpoint,
    ) -> Result<Endpoint, ChannelError> {
        let endpoint = endpoint.into_endpoint()?;
        channel.ensure_detached()?;

        let local = if endpoint.protocol() == Protocol::InProcess {
            let name = endpoint.address();
            self.inner.registry.bind(name, channel)?;
            let attached = channel.set_attachment(Attachment {
                endpoint: endpoint.clone(),
                link: None,
                pump: CancellationToken::new(),
            });
            if let Err(err) = attached {
                self.inner.registry.release(name, channel);
                return Err(err);
            }
            endpoint
        } else {
            let transport = self.socket_transport(&endpoint)?;
            let link: Arc<dyn Link> = Arc::from(transport.bind(&endpoint).await?);
            self.attach_link(channel, link)?
        };

        tracing::info!(channel = channel.id().get(), endpoint = %local, "bound");
        channel.emit(Event::new(EventKind::TransportBound).with_endpoint(local.to_string()));
        Ok(local)
    }

    /// Connects `channel` to `endpoint`.
    ///
    /// For `inproc` the bound channel must exist and the two patterns must be
    /// compatible; the upstream side gets the downstream side as a peer.
    ///
    /// # Errors
    /// - `AlreadyAttached` / `Closed`: the channel cannot take an endpoint
    /// - `IncompatiblePatterns`: `inproc` pair that cannot be wired
    /// - `Transport(..)`: address parse, refused or failed connection
    pub async fn connect(
        &self,
        channel: &Channel,
        endpoint: impl IntoEndpoint,
    ) -> Result<(), ChannelError> {
        let endpoint = endpoint.into_endpoint()?;
        channel.ensure_detached()?;

        if endpoint.protocol() == Protocol::InProcess {
            let bound = self.inner.registry.lookup(endpoint.address())?;
            if channel.pattern().upstream_of(bound.pattern()).is_none() {
                return Err(ChannelError::IncompatiblePatterns {
                    upstream: channel.pattern(),
                    downstream: bound.pattern(),
                });
            }
            channel.set_attachment(Attachment {
                endpoint: endpoint.clone(),
                link: None,
                pump: CancellationToken::new(),
            })?;
            channel.attach(&bound)?;
        } else {
            let transport = self.socket_transport(&endpoint)?;
            let link: Arc<dyn Link> = Arc::from(transport.connect(&endpoint).await?);
            self.attach_link(channel, link)?;
        }

        tracing::info!(channel = channel.id().get(), %endpoint, "connected");
        channel.emit(Event::new(EventKind::TransportConnected).with_endpoint(endpoint.to_string()));
        Ok(())
    }

    /// Creates a supervisor that publishes on this context's bus.
    pub fn supervisor(&self, name: impl Into<String>, cfg: SupervisorConfig) -> Arc<Supervisor> {
        Supervisor::builder(name, cfg)
            .with_bus(self.inner.bus.clone())
            .build()
    }

    /// Closes every channel created here, empties the endpoint registry and drains
    /// subscribers (`teardown`). Idempotent.
    pub async fn teardown(&self) {
        if self.inner.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let channels: Vec<Channel> = self
            .inner
            .channels
            .lock()
            .drain(..)
            .filter_map(|weak| weak.upgrade())
            .collect();
        let closed = channels.len();
        for channel in channels {
            channel.close();
        }
        self.inner.registry.clear();
        tracing::debug!(channels = closed, "runtime context torn down");

        self.inner.token.cancel();
        let listener = self.inner.listener.lock().take();
        if let Some(listener) = listener {
            let _ = listener.await;
        }
        self.inner.subs.shutdown().await;
    }

    fn socket_transport(&self, endpoint: &Endpoint) -> Result<Arc<dyn Transport>, TransportError> {
        self.transport(endpoint.protocol())
            .ok_or_else(|| TransportError::Unsupported(endpoint.protocol().scheme().to_string()))
    }

    fn attach_link(&self, channel: &Channel, link: Arc<dyn Link>) -> Result<Endpoint, ChannelError> {
        let local = link.local_endpoint();
        let token = self.inner.token.child_token();
        channel.set_attachment(Attachment {
            endpoint: local.clone(),
            link: Some(Arc::clone(&link)),
            pump: token.clone(),
        })?;
        pump::spawn(channel, link, token);
        Ok(local)
    }
}

impl std::fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("channels", &self.inner.channels.lock().len())
            .field("subscribers", &self.inner.subs.len())
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

/// Forwards bus events to the subscriber set until the token fires, then drains
/// what is already queued.
fn spawn_listener(bus: &Bus, subs: Arc<SubscriberSet>, token: CancellationToken) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                biased;
                received = rx.recv() => received,
                _ = token.cancelled() => break,
            };
            match received {
                Ok(ev) => subs.emit(&ev),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event listener lagged");
                }
                Err(RecvError::Closed) => return,
            }
        }
        loop {
            match rx.try_recv() {
                Ok(ev) => subs.emit(&ev),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    })
}
