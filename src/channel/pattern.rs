//! # Messaging patterns.
//!
//! A [`Pattern`] fixes the discipline a channel takes part in. Patterns come in
//! upstream/downstream pairs; wiring (in-process `bind`/`connect` or
//! [`Channel::attach`](crate::Channel::attach)) always gives the upstream side the
//! downstream side as a peer, whichever of the two bound first.
//!
//! ```text
//! upstream      downstream     delivery
//! ──────────    ──────────     ──────────────────────────────────
//! Pub        ─► Sub            copy to every subscriber of the topic
//! Push       ─► Pull           exactly one peer (round-robin)
//! Req        ─► Rep            one peer, reply routed back by correlation id
//! Point2Point─► Point2Point    forward to the single peer
//! ```

use std::fmt;

/// Messaging discipline of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// Plain FIFO between a sender and a receiver.
    Point2Point,
    /// Publisher side of pub/sub.
    Pub,
    /// Subscriber side of pub/sub (topic filter).
    Sub,
    /// Work distributor.
    Push,
    /// Work consumer.
    Pull,
    /// Requester.
    Req,
    /// Replier.
    Rep,
}

impl Pattern {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Pattern::Point2Point => "p2p",
            Pattern::Pub => "pub",
            Pattern::Sub => "sub",
            Pattern::Push => "push",
            Pattern::Pull => "pull",
            Pattern::Req => "req",
            Pattern::Rep => "rep",
        }
    }

    /// Pattern this one delivers to, for upstream patterns.
    pub fn downstream(&self) -> Option<Pattern> {
        match self {
            Pattern::Pub => Some(Pattern::Sub),
            Pattern::Push => Some(Pattern::Pull),
            Pattern::Req => Some(Pattern::Rep),
            Pattern::Point2Point => Some(Pattern::Point2Point),
            Pattern::Sub | Pattern::Pull | Pattern::Rep => None,
        }
    }

    /// Decides which side of a compatible pair is upstream.
    ///
    /// Returns `Some(true)` when `self` is upstream of `other`, `Some(false)` when
    /// `other` is upstream of `self`, `None` when they cannot be wired.
    pub fn upstream_of(&self, other: Pattern) -> Option<bool> {
        if self.downstream() == Some(other) {
            Some(true)
        } else if other.downstream() == Some(*self) {
            Some(false)
        } else {
            None
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wiring_direction() {
        assert_eq!(Pattern::Pub.upstream_of(Pattern::Sub), Some(true));
        assert_eq!(Pattern::Pull.upstream_of(Pattern::Push), Some(false));
        assert_eq!(Pattern::Point2Point.upstream_of(Pattern::Point2Point), Some(true));
        assert_eq!(Pattern::Pub.upstream_of(Pattern::Pull), None);
        assert_eq!(Pattern::Sub.upstream_of(Pattern::Sub), None);
    }
}
