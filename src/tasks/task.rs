//! # Task abstraction.
//!
//! The [`Task`] trait is the calling convention for supervised work: a stable name and
//! a `spawn` that produces a fresh future per run. The future receives a
//! [`CancellationToken`], the cooperative running flag. A body that never checks it
//! cannot be stopped, and `Supervisor::stop` waits for it indefinitely.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::TaskError;

/// Boxed future returned by [`Task::spawn`].
pub type BoxTaskFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send + 'static>>;

/// Shared handle to a task.
pub type TaskRef = Arc<dyn Task>;

/// # Asynchronous, cancelable unit of supervised work.
///
/// ```
/// use tokio_util::sync::CancellationToken;
/// use chanvisor::{BoxTaskFuture, Task};
///
/// struct Ticker;
///
/// impl Task for Ticker {
///     fn name(&self) -> &str { "ticker" }
///
///     fn spawn(&self, ctx: CancellationToken) -> BoxTaskFuture {
///         Box::pin(async move {
///             ctx.cancelled().await;
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait Task: Send + Sync + 'static {
    /// Returns a stable, human-readable task name (unique within a supervisor).
    fn name(&self) -> &str;

    /// Creates a new run of the task.
    ///
    /// Called once per start and once per restart; every call must produce an
    /// independent future.
    fn spawn(&self, ctx: CancellationToken) -> BoxTaskFuture;
}
