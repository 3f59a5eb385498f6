//! Messaging patterns built on the channel core.
//!
//! | Pattern   | Operations                                          |
//! |-----------|-----------------------------------------------------|
//! | Pub/Sub   | [`publish`], [`subscribe`], [`unsubscribe`], [`subscriptions`] |
//! | Push/Pull | [`push`], [`pull`]                                  |
//! | Req/Rep   | [`request`], [`request_parts`], [`recv_request`], [`Request::reply`] |
//!
//! Every operation checks the channel's [`Pattern`](crate::Pattern) and returns
//! `PatternMismatch` when called on the wrong kind of channel.

mod pubsub;
mod pushpull;
mod reqrep;

pub use pubsub::{PublishReport, publish, subscribe, subscriptions, unsubscribe};
pub use pushpull::{pull, push};
pub use reqrep::{Request, recv_request, request, request_parts};
