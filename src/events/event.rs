//! # Events emitted by channels, transports and supervisors.
//!
//! The [`EventKind`] enum is the fixed vocabulary of the listener interface:
//! - **Channel events**: opened, closed, destroyed, message dropped
//! - **Transport events**: bound, connected, peer connected, transport error
//! - **Supervision events**: supervisor/child lifecycle, restarts, escalation
//! - **Subscriber events**: overflow and panic of a listener itself
//!
//! The [`Event`] struct carries optional metadata depending on the kind.
//!
//! ## Ordering guarantees
//! The [`Bus`](crate::events::Bus) stamps every published event with a sequence
//! number that increases monotonically per bus. Use `seq` to restore the exact
//! order when events reach subscribers through independent queues.
//!
//! ## Example
//! ```rust
//! use chanvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::ChildRestarted)
//!     .with_supervisor("root")
//!     .with_child("db")
//!     .with_attempt(2);
//!
//! assert_eq!(ev.kind, EventKind::ChildRestarted);
//! assert_eq!(ev.child.as_deref(), Some("db"));
//! ```

use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Channel events ===
    /// Channel created.
    ///
    /// Sets: `channel`, `pattern`
    ChannelOpened,

    /// Channel closed (first `close` only).
    ///
    /// Sets: `channel`, `pattern`
    ChannelClosed,

    /// Channel destroyed; buffered messages freed.
    ///
    /// Sets: `channel`, `count` (messages freed)
    ChannelDestroyed,

    /// A message was not delivered.
    ///
    /// Sets: `channel` (intended receiver), `reason` (`full`, `closed`, `late_reply`, ...)
    MessageDropped,

    // === Transport events ===
    /// Channel bound to an endpoint.
    ///
    /// Sets: `channel`, `endpoint`
    TransportBound,

    /// Channel connected to an endpoint.
    ///
    /// Sets: `channel`, `endpoint`
    TransportConnected,

    /// A remote peer attached to a bound endpoint.
    ///
    /// Sets: `endpoint`, `reason` (peer address)
    PeerConnected,

    /// Transport operation failed outside of a caller's call (pump, accept loop).
    ///
    /// Sets: `channel`, `endpoint`, `reason`
    TransportFailed,

    // === Supervision events ===
    /// Supervisor started its children.
    ///
    /// Sets: `supervisor`, `count` (children started)
    SupervisorStarted,

    /// Supervisor stopped every child and ran the cleanup hook.
    ///
    /// Sets: `supervisor`
    SupervisorStopped,

    /// Shared-state init hook completed.
    ///
    /// Sets: `supervisor`
    SharedStateInitialized,

    /// Shared-state cleanup hook completed.
    ///
    /// Sets: `supervisor`
    SharedStateCleaned,

    /// Child task spawned.
    ///
    /// Sets: `supervisor`, `child`, `attempt` (spawn count, 1-based)
    ChildStarted,

    /// Child task terminated.
    ///
    /// Sets: `supervisor`, `child`, `reason` (exit cause)
    ChildExited,

    /// Child respawned after a failure.
    ///
    /// Sets: `supervisor`, `child`, `attempt`, `delay_ms`
    ChildRestarted,

    /// Child will not run again.
    ///
    /// Sets: `supervisor`, `child`, `reason`
    ChildPermanentlyFailed,

    /// Restart intensity exceeded; the tree is stopping.
    ///
    /// Sets: `supervisor`, `count` (restarts in window), `reason`
    RestartIntensityExceeded,

    // === Subscriber events ===
    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `reason`
    SubscriberOverflow,

    /// Subscriber panicked during event processing.
    ///
    /// Sets: `reason`
    SubscriberPanicked,
}

impl EventKind {
    /// Short stable label (kebab-case) for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            EventKind::ChannelOpened => "channel-opened",
            EventKind::ChannelClosed => "channel-closed",
            EventKind::ChannelDestroyed => "channel-destroyed",
            EventKind::MessageDropped => "message-dropped",
            EventKind::TransportBound => "transport-bound",
            EventKind::TransportConnected => "transport-connected",
            EventKind::PeerConnected => "peer-connected",
            EventKind::TransportFailed => "transport-failed",
            EventKind::SupervisorStarted => "supervisor-started",
            EventKind::SupervisorStopped => "supervisor-stopped",
            EventKind::SharedStateInitialized => "shared-state-initialized",
            EventKind::SharedStateCleaned => "shared-state-cleaned",
            EventKind::ChildStarted => "child-started",
            EventKind::ChildExited => "child-exited",
            EventKind::ChildRestarted => "child-restarted",
            EventKind::ChildPermanentlyFailed => "child-permanently-failed",
            EventKind::RestartIntensityExceeded => "restart-intensity-exceeded",
            EventKind::SubscriberOverflow => "subscriber-overflow",
            EventKind::SubscriberPanicked => "subscriber-panicked",
        }
    }
}

/// Runtime event with optional metadata.
///
/// - `seq`: per-bus monotonic sequence, stamped on publish
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Monotonically increasing sequence number (0 until published).
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Channel id, if applicable.
    pub channel: Option<u64>,
    /// Channel pattern name, if applicable.
    pub pattern: Option<&'static str>,
    /// Endpoint as text, if applicable.
    pub endpoint: Option<Arc<str>>,
    /// Supervisor name, if applicable.
    pub supervisor: Option<Arc<str>>,
    /// Child name, if applicable.
    pub child: Option<Arc<str>>,
    /// Human-readable reason (exit cause, drop reason, error text).
    pub reason: Option<Arc<str>>,
    /// Spawn count of a child (starting from 1).
    pub attempt: Option<u32>,
    /// Generic counter (messages freed, restarts in window, children started).
    pub count: Option<u64>,
    /// Restart delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: 0,
            at: SystemTime::now(),
            kind,
            channel: None,
            pattern: None,
            endpoint: None,
            supervisor: None,
            child: None,
            reason: None,
            attempt: None,
            count: None,
            delay_ms: None,
        }
    }

    /// Attaches a channel id.
    #[inline]
    pub fn with_channel(mut self, id: u64) -> Self {
        self.channel = Some(id);
        self
    }

    /// Attaches a pattern name.
    #[inline]
    pub fn with_pattern(mut self, pattern: &'static str) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Attaches an endpoint.
    #[inline]
    pub fn with_endpoint(mut self, endpoint: impl Into<Arc<str>>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Attaches a supervisor name.
    #[inline]
    pub fn with_supervisor(mut self, name: impl Into<Arc<str>>) -> Self {
        self.supervisor = Some(name.into());
        self
    }

    /// Attaches a child name.
    #[inline]
    pub fn with_child(mut self, name: impl Into<Arc<str>>) -> Self {
        self.child = Some(name.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a spawn count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a counter.
    #[inline]
    pub fn with_count(mut self, n: u64) -> Self {
        self.count = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_reason(format!("subscriber={subscriber} info={info}"))
    }

    /// True for events produced by the subscriber machinery itself.
    #[inline]
    pub fn is_subscriber_internal(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_is_stored_compactly() {
        let ev = Event::new(EventKind::ChildRestarted).with_delay(Duration::from_secs(u64::MAX));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
    }

    #[test]
    fn subscriber_events_are_flagged() {
        assert!(Event::subscriber_overflow("log", "full").is_subscriber_internal());
        assert!(!Event::new(EventKind::ChannelOpened).is_subscriber_internal());
    }
}
