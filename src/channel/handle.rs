//! # Channel core: bounded buffer with two wait points.
//!
//! Each channel owns one [`parking_lot::Mutex`] around its state and two
//! [`Notify`] wait points:
//!
//! ```text
//!            send ─┐                              ┌─ receive
//!                  ▼                              ▼
//!   space.notified() ◄── receive frees a slot     data.notified() ◄── send fills a slot
//!                  │                              │
//!                  └──────── close wakes both ────┘
//! ```
//!
//! ## Rules
//! - The state lock is never held across an `.await` and never while another
//!   channel's lock is taken; cross-channel paths snapshot peers first.
//! - Waiters register (`enable`) before inspecting state, so a wakeup between the
//!   check and the wait is never lost.
//! - `closed` is monotonic; every state change wakes all waiters of the affected side.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ChannelError, TransportError};
use crate::events::{Bus, Event, EventKind};
use crate::message::{Flags, Message};
use crate::transport::{Dispatch, Endpoint, Link, LinkStats};

use super::Pattern;

/// Timed-out request ids remembered per Req channel.
const ABANDONED_LIMIT: usize = 256;

/// Identifier of a channel, unique within one runtime context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw numeric id.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Absolute deadline plus the bound it was derived from (for error reporting).
pub(crate) type Deadline = Option<(Instant, Duration)>;

pub(crate) fn deadline(timeout: Duration) -> Deadline {
    Some((Instant::now() + timeout, timeout))
}

/// Runs `fut` until `deadline`, mapping expiry to [`ChannelError::Timeout`].
pub(crate) async fn within<F: Future>(deadline: Deadline, fut: F) -> Result<F::Output, ChannelError> {
    match deadline {
        None => Ok(fut.await),
        Some((at, timeout)) => tokio::time::timeout_at(at, fut)
            .await
            .map_err(|_| ChannelError::Timeout { timeout }),
    }
}

async fn wait(notified: Pin<&mut Notified<'_>>, deadline: Deadline) -> Result<(), ChannelError> {
    within(deadline, notified).await
}

/// Result of a non-waiting enqueue attempt; rejected messages are handed back.
pub(crate) enum Offer {
    Accepted,
    Full(Message),
    Closed(Message),
}

/// Endpoint a channel is bound or connected to.
pub(crate) struct Attachment {
    pub(crate) endpoint: Endpoint,
    /// `None` for in-process wiring.
    pub(crate) link: Option<Arc<dyn Link>>,
    /// Stops the inbound pump.
    pub(crate) pump: CancellationToken,
}

enum Outbound {
    Peer(Channel),
    Link(Arc<dyn Link>),
}

struct State {
    buffer: VecDeque<Message>,
    subscriptions: HashSet<Arc<str>>,
    peers: Vec<Channel>,
    cursor: usize,
    abandoned: VecDeque<Arc<str>>,
    /// Correlation ids of multi-part bodies a receiver is assembling.
    claims: HashSet<Arc<str>>,
    fault: Option<TransportError>,
    attachment: Option<Attachment>,
}

struct Inner {
    id: ChannelId,
    pattern: Pattern,
    capacity: usize,
    nonce: u32,
    requests: AtomicU64,
    bus: Bus,
    /// Written under `state`, readable without it.
    closed: AtomicBool,
    destroyed: AtomicBool,
    state: Mutex<State>,
    space: Notify,
    data: Notify,
}

/// Handle to a bounded, thread-safe message queue.
///
/// Cloning is cheap; all clones refer to the same channel. Channels are created by
/// [`RuntimeContext::channel`](crate::RuntimeContext::channel).
///
/// ## Example
/// ```rust
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), chanvisor::ChannelError> {
/// use chanvisor::{Flags, Message, Pattern, RuntimeConfig, RuntimeContext};
///
/// let ctx = RuntimeContext::builder(RuntimeConfig::default()).build();
/// let ch = ctx.channel(Pattern::Point2Point, 2)?;
///
/// ch.send(Message::text("a"), Flags::empty()).await?;
/// ch.send(Message::text("b"), Flags::empty()).await?;
/// assert!(ch.send(Message::text("c"), Flags::NON_BLOCKING).await.is_err());
///
/// ch.close();
/// assert_eq!(ch.receive(Flags::empty()).await?.as_text(), Some("a"));
/// assert_eq!(ch.receive(Flags::empty()).await?.as_text(), Some("b"));
/// assert!(ch.receive(Flags::empty()).await.is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

/// Non-owning channel reference held by registries and pumps.
#[derive(Clone)]
pub(crate) struct WeakChannel(Weak<Inner>);

impl WeakChannel {
    pub(crate) fn upgrade(&self) -> Option<Channel> {
        self.0.upgrade().map(|inner| Channel { inner })
    }
}

impl Channel {
    /// Creates a channel with `capacity` reserved slots.
    pub(crate) fn open(
        id: ChannelId,
        pattern: Pattern,
        capacity: usize,
        bus: Bus,
    ) -> Result<Self, ChannelError> {
        if capacity == 0 {
            return Err(ChannelError::CapacityExceeded {
                requested: capacity,
            });
        }
        let mut buffer = VecDeque::new();
        buffer
            .try_reserve_exact(capacity)
            .map_err(|_| ChannelError::OutOfMemory { capacity })?;

        let channel = Self {
            inner: Arc::new(Inner {
                id,
                pattern,
                capacity,
                nonce: rand::random(),
                requests: AtomicU64::new(0),
                bus,
                closed: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                state: Mutex::new(State {
                    buffer,
                    subscriptions: HashSet::new(),
                    peers: Vec::new(),
                    cursor: 0,
                    abandoned: VecDeque::new(),
                    claims: HashSet::new(),
                    fault: None,
                    attachment: None,
                }),
                space: Notify::new(),
                data: Notify::new(),
            }),
        };
        channel.emit(Event::new(EventKind::ChannelOpened).with_pattern(pattern.as_str()));
        Ok(channel)
    }

    /// Channel id.
    pub fn id(&self) -> ChannelId {
        self.inner.id
    }

    /// Messaging pattern.
    pub fn pattern(&self) -> Pattern {
        self.inner.pattern
    }

    /// Maximum number of buffered messages.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of buffered messages.
    pub fn len(&self) -> usize {
        self.inner.state.lock().buffer.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// True once [`destroy`](Self::destroy) has run.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Endpoint the channel is bound or connected to.
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.inner
            .state
            .lock()
            .attachment
            .as_ref()
            .map(|a| a.endpoint.clone())
    }

    /// Delivery statistics of the attached socket transport.
    pub fn transport_stats(&self) -> Option<LinkStats> {
        self.link().map(|link| link.stats())
    }

    /// Sends a message, waiting for space unless `NON_BLOCKING` is set.
    ///
    /// Enqueues into this channel's buffer. A `Point2Point` channel wired to a peer
    /// or connected through a transport forwards there instead.
    ///
    /// # Errors
    /// - `WouldBlock`: buffer full and `NON_BLOCKING` set (nothing enqueued)
    /// - `Closed`: the channel (or its peer) is closed
    /// - `Transport`: the attached link rejected the message
    pub async fn send(&self, msg: impl Into<Message>, flags: Flags) -> Result<(), ChannelError> {
        self.send_until(msg.into(), flags, None).await
    }

    /// Sends a message, waiting at most `timeout` for space.
    pub async fn send_timeout(
        &self,
        msg: impl Into<Message>,
        timeout: Duration,
    ) -> Result<(), ChannelError> {
        self.send_until(msg.into(), Flags::empty(), deadline(timeout))
            .await
    }

    /// Enqueues into this channel's buffer without waiting.
    pub fn try_send(&self, msg: impl Into<Message>) -> Result<(), ChannelError> {
        match self.offer(msg.into()) {
            Offer::Accepted => Ok(()),
            Offer::Full(_) => Err(ChannelError::WouldBlock),
            Offer::Closed(_) => Err(ChannelError::Closed),
        }
    }

    /// Receives the head message, waiting for one unless `NON_BLOCKING` is set.
    ///
    /// With `PEEK` the head is copied and left in place. A closed channel keeps
    /// returning buffered messages until it is drained, then `Closed`.
    ///
    /// # Errors
    /// - `WouldBlock`: buffer empty and `NON_BLOCKING` set
    /// - `Closed`: closed and drained
    /// - `Transport`: the inbound side of the attached link failed (reported once)
    pub async fn receive(&self, flags: Flags) -> Result<Message, ChannelError> {
        if flags.contains(Flags::NON_BLOCKING) {
            return self.try_receive(flags);
        }
        self.receive_until(flags, None).await
    }

    /// Receives the head message, waiting at most `timeout`.
    pub async fn receive_timeout(&self, timeout: Duration) -> Result<Message, ChannelError> {
        self.receive_until(Flags::empty(), deadline(timeout)).await
    }

    /// Receives without waiting (`PEEK` honoured).
    pub fn try_receive(&self, flags: Flags) -> Result<Message, ChannelError> {
        self.take(flags)?.ok_or(ChannelError::WouldBlock)
    }

    /// Closes the channel. Idempotent.
    ///
    /// Wakes every blocked sender and receiver, stops the inbound pump and closes
    /// the attached link.
    pub fn close(&self) {
        let detached = {
            let mut st = self.inner.state.lock();
            if self.inner.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            st.attachment.take()
        };
        self.inner.space.notify_waiters();
        self.inner.data.notify_waiters();

        if let Some(att) = detached {
            att.pump.cancel();
            if let Some(link) = att.link {
                link.close();
            }
        }
        self.emit(Event::new(EventKind::ChannelClosed).with_pattern(self.inner.pattern.as_str()));
    }

    /// Frees buffered messages and peer links of a closed channel.
    ///
    /// Returns the number of messages freed.
    ///
    /// # Errors
    /// - `NotClosed`: [`close`](Self::close) has not run
    /// - `Destroyed`: already destroyed
    pub fn destroy(&self) -> Result<usize, ChannelError> {
        let freed = {
            let mut st = self.inner.state.lock();
            if !self.is_closed() {
                return Err(ChannelError::NotClosed);
            }
            if self.inner.destroyed.swap(true, Ordering::SeqCst) {
                return Err(ChannelError::Destroyed);
            }
            let freed = st.buffer.len();
            st.buffer = VecDeque::new();
            st.peers.clear();
            st.subscriptions.clear();
            st.abandoned.clear();
            st.claims.clear();
            st.fault = None;
            freed
        };
        self.inner.space.notify_waiters();
        self.inner.data.notify_waiters();
        self.emit(Event::new(EventKind::ChannelDestroyed).with_count(freed as u64));
        Ok(freed)
    }

    /// Wires two channels in-process without an endpoint.
    ///
    /// The upstream side of the pair (Pub, Push, Req, or `self` for two
    /// `Point2Point` channels) gets the other as a peer.
    pub fn attach(&self, other: &Channel) -> Result<(), ChannelError> {
        match self.pattern().upstream_of(other.pattern()) {
            Some(true) => self.add_peer(other.clone()),
            Some(false) => other.add_peer(self.clone()),
            None => {
                return Err(ChannelError::IncompatiblePatterns {
                    upstream: self.pattern(),
                    downstream: other.pattern(),
                });
            }
        }
        Ok(())
    }

    pub(crate) fn downgrade(&self) -> WeakChannel {
        WeakChannel(Arc::downgrade(&self.inner))
    }

    pub(crate) fn same(&self, other: &Channel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn bus(&self) -> &Bus {
        &self.inner.bus
    }

    pub(crate) fn emit(&self, ev: Event) {
        self.inner.bus.publish(ev.with_channel(self.inner.id.get()));
    }

    pub(crate) fn report_drop(&self, reason: &'static str) {
        self.emit(Event::new(EventKind::MessageDropped).with_reason(reason));
    }

    pub(crate) fn ensure_pattern(&self, expected: Pattern) -> Result<(), ChannelError> {
        if self.inner.pattern == expected {
            Ok(())
        } else {
            Err(ChannelError::PatternMismatch {
                expected,
                actual: self.inner.pattern,
            })
        }
    }

    // === buffer ===

    /// Non-waiting enqueue that hands rejected messages back.
    pub(crate) fn offer(&self, msg: Message) -> Offer {
        let mut st = self.inner.state.lock();
        if self.is_closed() {
            return Offer::Closed(msg);
        }
        if self.inner.pattern == Pattern::Req {
            let late = msg.correlation_id().and_then(|corr| {
                st.abandoned.iter().position(|id| id.as_ref() == corr)
            });
            if let Some(pos) = late {
                st.abandoned.remove(pos);
                drop(st);
                self.report_drop("late_reply");
                return Offer::Accepted;
            }
        }
        if st.buffer.len() >= self.inner.capacity {
            return Offer::Full(msg);
        }
        st.buffer.push_back(msg);
        drop(st);
        self.inner.data.notify_waiters();
        Offer::Accepted
    }

    /// Enqueues into this buffer, honouring `NON_BLOCKING` and `deadline`.
    pub(crate) async fn deliver(
        &self,
        msg: Message,
        flags: Flags,
        deadline: Deadline,
    ) -> Result<(), ChannelError> {
        if flags.contains(Flags::NON_BLOCKING) {
            return self.try_send(msg);
        }
        self.enqueue(msg, deadline).await
    }

    /// Waits for space, then enqueues.
    pub(crate) async fn enqueue(&self, mut msg: Message, deadline: Deadline) -> Result<(), ChannelError> {
        loop {
            let space = self.inner.space.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            msg = match self.offer(msg) {
                Offer::Accepted => return Ok(()),
                Offer::Closed(_) => return Err(ChannelError::Closed),
                Offer::Full(back) => back,
            };
            wait(space, deadline).await?;
        }
    }

    /// Future resolving on the next change in free space.
    pub(crate) fn space_changed(&self) -> Notified<'_> {
        self.inner.space.notified()
    }

    async fn send_until(&self, msg: Message, flags: Flags, deadline: Deadline) -> Result<(), ChannelError> {
        match self.outbound()? {
            Some(Outbound::Peer(peer)) => peer.deliver(msg, flags, deadline).await,
            Some(Outbound::Link(link)) => Ok(within(deadline, link.send(msg, Dispatch::One)).await??),
            None => self.deliver(msg, flags, deadline).await,
        }
    }

    fn outbound(&self) -> Result<Option<Outbound>, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        if self.inner.pattern != Pattern::Point2Point {
            return Ok(None);
        }
        let peers = self.peers();
        if !peers.is_empty() {
            return peers
                .into_iter()
                .find(|p| !p.is_closed())
                .map(|p| Some(Outbound::Peer(p)))
                .ok_or(ChannelError::Closed);
        }
        Ok(self.link().map(Outbound::Link))
    }

    async fn receive_until(&self, flags: Flags, deadline: Deadline) -> Result<Message, ChannelError> {
        loop {
            let data = self.inner.data.notified();
            tokio::pin!(data);
            data.as_mut().enable();

            if let Some(msg) = self.take(flags)? {
                return Ok(msg);
            }
            wait(data, deadline).await?;
        }
    }

    fn take(&self, flags: Flags) -> Result<Option<Message>, ChannelError> {
        let mut st = self.inner.state.lock();
        let peek = flags.contains(Flags::PEEK);
        let head = if peek {
            st.buffer.front().cloned()
        } else {
            st.buffer.pop_front()
        };
        match head {
            Some(msg) => {
                drop(st);
                if !peek {
                    self.inner.space.notify_waiters();
                }
                Ok(Some(msg))
            }
            None if self.is_closed() => Err(ChannelError::Closed),
            None => match st.fault.take() {
                Some(err) => Err(ChannelError::Transport(err)),
                None => Ok(None),
            },
        }
    }

    /// Removes the first buffered message matching `pred`, waiting for one to arrive.
    ///
    /// Non-matching messages stay where they are.
    pub(crate) async fn take_matching<P>(&self, pred: P, deadline: Deadline) -> Result<Message, ChannelError>
    where
        P: Fn(&Message) -> bool,
    {
        loop {
            let data = self.inner.data.notified();
            tokio::pin!(data);
            data.as_mut().enable();

            {
                let mut st = self.inner.state.lock();
                let pos = st.buffer.iter().position(|m| pred(m));
                let found = pos.and_then(|pos| st.buffer.remove(pos));
                if let Some(msg) = found {
                    drop(st);
                    self.inner.space.notify_waiters();
                    return Ok(msg);
                }
                if self.is_closed() {
                    return Err(ChannelError::Closed);
                }
                if let Some(err) = st.fault.take() {
                    return Err(ChannelError::Transport(err));
                }
            }
            wait(data, deadline).await?;
        }
    }

    /// Removes the first message that does not continue a body another receiver
    /// is assembling, waiting unless `NON_BLOCKING` is set.
    ///
    /// A head carrying `MORE` claims its correlation id until
    /// [`release_claim`](Self::release_claim).
    pub(crate) async fn take_request(&self, flags: Flags) -> Result<Message, ChannelError> {
        loop {
            let data = self.inner.data.notified();
            tokio::pin!(data);
            data.as_mut().enable();

            {
                let mut st = self.inner.state.lock();
                let pos = st
                    .buffer
                    .iter()
                    .position(|m| m.correlation_id().is_none_or(|corr| !st.claims.contains(corr)));
                if let Some(msg) = pos.and_then(|pos| st.buffer.remove(pos)) {
                    if msg.has_more() {
                        if let Some(corr) = msg.correlation_id() {
                            st.claims.insert(Arc::from(corr));
                        }
                    }
                    drop(st);
                    self.inner.space.notify_waiters();
                    return Ok(msg);
                }
                if self.is_closed() {
                    return Err(ChannelError::Closed);
                }
                if let Some(err) = st.fault.take() {
                    return Err(ChannelError::Transport(err));
                }
            }
            if flags.contains(Flags::NON_BLOCKING) {
                return Err(ChannelError::WouldBlock);
            }
            wait(data, None).await?;
        }
    }

    /// Ends a claim taken by [`take_request`](Self::take_request).
    pub(crate) fn release_claim(&self, corr: &str) {
        if self.inner.state.lock().claims.remove(corr) {
            self.inner.data.notify_waiters();
        }
    }

    /// Parks an inbound transport failure for the next receive on an empty buffer.
    pub(crate) fn park_fault(&self, err: TransportError) {
        self.inner.state.lock().fault = Some(err);
        self.inner.data.notify_waiters();
    }

    // === request/reply ===

    pub(crate) fn next_correlation_id(&self) -> Arc<str> {
        let n = self.inner.requests.fetch_add(1, Ordering::Relaxed);
        Arc::from(format!("{:08x}-{}-{}", self.inner.nonce, self.inner.id.get(), n))
    }

    /// Forgets a request that timed out; its reply is dropped on arrival.
    pub(crate) fn abandon(&self, corr: &str) {
        let mut st = self.inner.state.lock();
        let pos = st.buffer.iter().position(|m| m.correlation_id() == Some(corr));
        let arrived = pos.and_then(|pos| st.buffer.remove(pos));
        if arrived.is_some() {
            drop(st);
            self.inner.space.notify_waiters();
            self.report_drop("late_reply");
            return;
        }
        if st.abandoned.len() == ABANDONED_LIMIT {
            st.abandoned.pop_front();
        }
        st.abandoned.push_back(Arc::from(corr));
    }

    // === peers ===

    pub(crate) fn add_peer(&self, peer: Channel) {
        let mut st = self.inner.state.lock();
        if !st.peers.iter().any(|p| p.same(&peer)) {
            st.peers.push(peer);
        }
    }

    /// Snapshot of live peers.
    pub(crate) fn peers(&self) -> Vec<Channel> {
        let mut st = self.inner.state.lock();
        st.peers.retain(|p| !p.is_destroyed());
        st.peers.clone()
    }

    /// Peers starting at the round-robin cursor; advances the cursor by one.
    pub(crate) fn rotation(&self) -> Vec<Channel> {
        let mut st = self.inner.state.lock();
        st.peers.retain(|p| !p.is_destroyed());
        let n = st.peers.len();
        if n == 0 {
            return Vec::new();
        }
        let start = st.cursor % n;
        st.cursor = (start + 1) % n;
        st.peers[start..]
            .iter()
            .chain(st.peers[..start].iter())
            .cloned()
            .collect()
    }

    // === subscriptions ===

    pub(crate) fn add_subscription(&self, topic: &str) -> bool {
        self.inner.state.lock().subscriptions.insert(Arc::from(topic))
    }

    pub(crate) fn remove_subscription(&self, topic: &str) -> bool {
        self.inner.state.lock().subscriptions.remove(topic)
    }

    pub(crate) fn subscription_list(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .inner
            .state
            .lock()
            .subscriptions
            .iter()
            .map(|t| t.to_string())
            .collect();
        topics.sort();
        topics
    }

    /// Exact topic match; an absent topic matches the empty subscription.
    pub(crate) fn accepts(&self, topic: Option<&str>) -> bool {
        self.inner
            .state
            .lock()
            .subscriptions
            .contains(topic.unwrap_or(""))
    }

    // === attachment ===

    pub(crate) fn ensure_detached(&self) -> Result<(), ChannelError> {
        let st = self.inner.state.lock();
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        match &st.attachment {
            Some(att) => Err(ChannelError::AlreadyAttached {
                endpoint: att.endpoint.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Records the endpoint; on conflict the new link is closed and the pump stopped.
    pub(crate) fn set_attachment(&self, att: Attachment) -> Result<(), ChannelError> {
        let err = {
            let mut st = self.inner.state.lock();
            if self.is_closed() {
                ChannelError::Closed
            } else if let Some(cur) = &st.attachment {
                ChannelError::AlreadyAttached {
                    endpoint: cur.endpoint.to_string(),
                }
            } else {
                st.attachment = Some(att);
                return Ok(());
            }
        };
        att.pump.cancel();
        if let Some(link) = &att.link {
            link.close();
        }
        Err(err)
    }

    pub(crate) fn link(&self) -> Option<Arc<dyn Link>> {
        self.inner
            .state
            .lock()
            .attachment
            .as_ref()
            .and_then(|a| a.link.clone())
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("pattern", &self.inner.pattern)
            .field("capacity", &self.inner.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}
