//! Runtime events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] the fixed event vocabulary and its metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast` with sequence stamping
//!
//! ## Quick reference
//! - **Publishers**: `Channel`, link pumps in `RuntimeContext`, `Supervisor` monitor,
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the context's fan-out task feeding [`SubscriberSet`](crate::SubscriberSet),
//!   and anyone holding a receiver from [`Bus::subscribe`].

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
