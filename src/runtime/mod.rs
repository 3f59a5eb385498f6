//! # Runtime glue.
//!
//! - [`RuntimeContext`]: explicit owner of the bus, subscribers, endpoint registry,
//!   transport table and channel ids.
//! - [`Runtime`]: fixed worker pool that carries a context.
//! - [`wait_for_shutdown_signal`]: OS termination signals.

mod context;
mod pool;
mod pump;
mod signal;

pub use context::{RuntimeContext, RuntimeContextBuilder};
pub use pool::Runtime;
pub use signal::wait_for_shutdown_signal;
