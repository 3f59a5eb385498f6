//! # Function-backed tasks (`TaskFn`)
//!
//! [`TaskFn`] wraps a closure that builds a fresh future per spawn. With
//! [`TaskFn::with_args`] the closure also receives a clone of an argument value,
//! the typed counterpart of a `taskFn(args)` entry point: restarts get the same
//! arguments the first run got.
//!
//! ```rust
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use chanvisor::{TaskFn, TaskRef, TaskError};
//!
//! let t: TaskRef = TaskFn::arc("worker", |ctx: CancellationToken| async move {
//!     while !ctx.is_cancelled() {
//!         tokio::time::sleep(Duration::from_millis(10)).await;
//!     }
//!     Ok::<_, TaskError>(())
//! });
//! assert_eq!(t.name(), "worker");
//!
//! let with_args: TaskRef = TaskFn::with_args("sender", 42u32, |n, _ctx| async move {
//!     assert_eq!(n, 42);
//!     Ok(())
//! });
//! assert_eq!(with_args.name(), "sender");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::TaskError;
use crate::tasks::task::{BoxTaskFuture, Task};

/// Function-backed task implementation.
#[derive(Debug)]
pub struct TaskFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> TaskFn<F> {
    /// Creates a new function-backed task.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the task and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

impl<F, Fut> Task for TaskFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn spawn(&self, ctx: CancellationToken) -> BoxTaskFuture {
        Box::pin((self.f)(ctx))
    }
}

/// Function-backed task with an argument cloned into every run.
#[derive(Debug)]
pub struct TaskWithArgs<A, F> {
    name: Cow<'static, str>,
    args: A,
    f: F,
}

impl TaskFn<()> {
    /// Creates a task whose closure receives a clone of `args` on every spawn.
    pub fn with_args<A, F, Fut>(
        name: impl Into<Cow<'static, str>>,
        args: A,
        f: F,
    ) -> Arc<TaskWithArgs<A, F>>
    where
        A: Clone + Send + Sync + 'static,
        F: Fn(A, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Arc::new(TaskWithArgs {
            name: name.into(),
            args,
            f,
        })
    }
}

impl<A, F, Fut> Task for TaskWithArgs<A, F>
where
    A: Clone + Send + Sync + 'static,
    F: Fn(A, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn spawn(&self, ctx: CancellationToken) -> BoxTaskFuture {
        Box::pin((self.f)(self.args.clone(), ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn every_spawn_is_a_fresh_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = TaskFn::with_args("count", runs.clone(), |runs: Arc<AtomicUsize>, _ctx| async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        task.spawn(CancellationToken::new()).await.unwrap();
        task.spawn(CancellationToken::new()).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancellation_reaches_the_body() {
        let task = TaskFn::arc("wait", |ctx: CancellationToken| async move {
            ctx.cancelled().await;
            Err(TaskError::Canceled)
        });
        let token = CancellationToken::new();
        let run = task.spawn(token.clone());
        token.cancel();
        assert!(matches!(run.await, Err(TaskError::Canceled)));
    }
}
