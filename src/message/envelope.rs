//! # Message envelope.
//!
//! [`Message`] is built once by the sender and never mutated afterwards: fields are
//! private, builders consume `self`, readers only borrow. The payload is a
//! [`Bytes`] so pub/sub fan-out shares one allocation between subscribers.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use bytes::Bytes;

use crate::channel::{Channel, WeakChannel};

bitflags! {
    /// Operation and message flags.
    ///
    /// `NON_BLOCKING` and `PEEK` steer a single `send`/`receive` call; `MORE` marks a
    /// message as a non-final part of a multi-part body and travels with the message.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Flags: u8 {
        /// Return `WouldBlock` instead of waiting.
        const NON_BLOCKING = 0x01;
        /// Receive a copy of the head without removing it.
        const PEEK = 0x02;
        /// More parts of the same body follow.
        const MORE = 0x04;
    }
}

/// Payload interpretation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Opaque bytes.
    #[default]
    Bytes,
    /// UTF-8 text.
    Text,
}

/// Immutable message envelope.
///
/// ## Example
/// ```rust
/// use chanvisor::{Flags, Message, MessageKind};
///
/// let msg = Message::text("hello")
///     .with_topic("greetings")
///     .with_flags(Flags::MORE);
///
/// assert_eq!(msg.kind(), MessageKind::Text);
/// assert_eq!(msg.as_text(), Some("hello"));
/// assert_eq!(msg.topic(), Some("greetings"));
/// assert!(msg.has_more());
/// ```
#[derive(Clone, Default)]
pub struct Message {
    kind: MessageKind,
    payload: Bytes,
    topic: Option<Arc<str>>,
    correlation_id: Option<Arc<str>>,
    flags: Flags,
    route: Route,
}

/// Routing metadata that never goes on the wire.
#[derive(Clone, Default)]
pub(crate) struct Route {
    /// Peer of a bound link the message arrived from.
    pub(crate) origin: Option<u64>,
    /// In-process channel the reply goes to (Req/Rep). Weak, so a buffered
    /// request does not keep its requester alive.
    pub(crate) reply_to: Option<WeakChannel>,
}

impl Message {
    /// Creates a `Bytes` message.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            ..Self::default()
        }
    }

    /// Creates a `Text` message.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Text,
            payload: Bytes::from(text.into()),
            ..Self::default()
        }
    }

    /// Creates a message of the given kind from raw parts.
    pub fn from_parts(kind: MessageKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
            ..Self::default()
        }
    }

    /// Attaches a topic.
    #[inline]
    pub fn with_topic(mut self, topic: impl Into<Arc<str>>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Attaches a correlation id.
    #[inline]
    pub fn with_correlation_id(mut self, id: impl Into<Arc<str>>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Replaces the flag set.
    #[inline]
    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    #[inline]
    pub(crate) fn with_origin(mut self, peer: Option<u64>) -> Self {
        self.route.origin = peer;
        self
    }

    #[inline]
    pub(crate) fn with_reply_to(mut self, channel: &Channel) -> Self {
        self.route.reply_to = Some(channel.downgrade());
        self
    }

    /// Payload interpretation.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Raw payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload as text, when the message is `Text` and valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        match self.kind {
            MessageKind::Text => std::str::from_utf8(&self.payload).ok(),
            MessageKind::Bytes => None,
        }
    }

    /// Topic, if any.
    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    /// Correlation id, if any.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Flag set.
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// True when further parts of the same body follow.
    pub fn has_more(&self) -> bool {
        self.flags.contains(Flags::MORE)
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// True for an empty payload.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Consumes the message, returning its payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub(crate) fn origin(&self) -> Option<u64> {
        self.route.origin
    }

    pub(crate) fn reply_to(&self) -> Option<&WeakChannel> {
        self.route.reply_to.as_ref()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("kind", &self.kind)
            .field("len", &self.payload.len())
            .field("topic", &self.topic)
            .field("correlation_id", &self.correlation_id)
            .field("flags", &self.flags)
            .field("origin", &self.route.origin)
            .finish()
    }
}

impl PartialEq for Message {
    /// Compares wire-visible content; routing metadata is ignored.
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.payload == other.payload
            && self.topic == other.topic
            && self.correlation_id == other.correlation_id
            && self.flags == other.flags
    }
}

impl Eq for Message {}

impl From<&'static str> for Message {
    fn from(s: &'static str) -> Self {
        Message::text(s)
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::text(s)
    }
}

impl From<Vec<u8>> for Message {
    fn from(v: Vec<u8>) -> Self {
        Message::new(v)
    }
}

impl From<Bytes> for Message {
    fn from(b: Bytes) -> Self {
        Message::new(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_message_has_no_text_view() {
        let msg = Message::new(vec![0xff, 0x00]);
        assert_eq!(msg.kind(), MessageKind::Bytes);
        assert_eq!(msg.as_text(), None);
        assert_eq!(msg.len(), 2);
    }

    #[test]
    fn equality_ignores_routing() {
        let a = Message::text("x").with_topic("t");
        let b = a.clone().with_origin(Some(7));
        assert_eq!(a, b);
        assert_eq!(b.origin(), Some(7));
    }
}
