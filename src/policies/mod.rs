//! Per-child restart policies.
//!
//! ## Contents
//! - [`RestartPolicy`] whether an exit restarts the child (never / on-failure / always)
//! - [`BackoffPolicy`] delay before the restart (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization of that delay
//!
//! ## Quick wiring
//! ```text
//! ChildSpec { restart: RestartPolicy, backoff: BackoffPolicy, .. }
//!      └─► supervisor monitor uses:
//!           - restart.should_restart(cause) to decide whether the strategy runs
//!           - backoff.next(consecutive) to delay the restart
//! ```
//!
//! The strategy that picks *which* siblings restart lives in
//! [`RestartStrategy`](crate::RestartStrategy).

mod backoff;
mod jitter;
mod restart;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use restart::RestartPolicy;
