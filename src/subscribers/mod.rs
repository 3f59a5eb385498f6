//! # Event listeners.
//!
//! The typed listener interface of the runtime: implement [`Subscribe`] and pass it
//! to [`RuntimeContext::builder`](crate::RuntimeContext::builder). Every
//! [`Event`](crate::Event) published on the context bus reaches each subscriber
//! through its own bounded queue ([`SubscriberSet`]).
//!
//! ```text
//!   Channel / Supervisor ── publish(Event) ──► Bus ──► fan-out task ──► SubscriberSet
//!                                                                  ┌──────┼──────┐
//!                                                                  ▼      ▼      ▼
//!                                                            LogWriter Metrics Custom
//! ```

#[cfg(feature = "logging")]
mod embedded;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
pub(crate) use set::panic_message;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
