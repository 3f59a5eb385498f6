//! Bounded channels and their messaging patterns.
//!
//! ## Contents
//! - [`Channel`] the bounded queue handle (send/receive/close/destroy)
//! - [`Pattern`] the discipline a channel takes part in
//! - [`ChannelId`] context-unique id
//!
//! Pattern operations (publish, push, request...) live in [`crate::patterns`] and
//! build on the crate-private primitives exposed here.

mod handle;
mod pattern;

pub(crate) use handle::{Attachment, Deadline, Offer, WeakChannel, deadline, within};
pub use handle::{Channel, ChannelId};
pub use pattern::Pattern;
