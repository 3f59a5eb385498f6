//! Shared state handed to every child of a supervisor.
//!
//! `init` completes before any child starts; every child has stopped before
//! `cleanup` runs. Access in between is not serialized: guard mutable parts with a
//! lock of your own.

use async_trait::async_trait;

use crate::error::TaskError;

/// Init and cleanup hooks of a supervisor's shared state.
///
/// ```rust
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use async_trait::async_trait;
/// use chanvisor::{SharedState, TaskError};
///
/// #[derive(Default)]
/// struct Pool { ready: AtomicBool }
///
/// #[async_trait]
/// impl SharedState for Pool {
///     async fn init(&self) -> Result<(), TaskError> {
///         self.ready.store(true, Ordering::SeqCst);
///         Ok(())
///     }
///
///     async fn cleanup(&self) {
///         self.ready.store(false, Ordering::SeqCst);
///     }
/// }
/// ```
#[async_trait]
pub trait SharedState: Send + Sync + 'static {
    /// Runs once per `start`, before the first child. An error aborts the start.
    async fn init(&self) -> Result<(), TaskError> {
        Ok(())
    }

    /// Runs once per stop, after the last child.
    async fn cleanup(&self) {}
}
