//! Fixed worker pool owning a [`RuntimeContext`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::subscribers::Subscribe;

use super::RuntimeContext;
use super::signal::wait_for_shutdown_signal;

/// How long [`Runtime::shutdown`] lets detached tasks finish after teardown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// A fixed-size pool of worker threads plus the context its tasks share.
///
/// Task bodies, supervisor monitors, inbound pumps and subscriber workers all run
/// on the pool.
///
/// ```rust
/// use chanvisor::{Flags, Pattern, Runtime, RuntimeConfig};
///
/// let rt = Runtime::new(RuntimeConfig { worker_threads: 2, ..RuntimeConfig::default() }).unwrap();
/// let ctx = rt.context().clone();
/// let got = rt.block_on(async move {
///     let ch = ctx.channel(Pattern::Point2Point, 1)?;
///     ch.send("hello", Flags::empty()).await?;
///     ch.receive(Flags::empty()).await
/// });
/// assert_eq!(got.unwrap().payload().as_ref(), b"hello");
/// rt.shutdown();
/// ```
pub struct Runtime {
    rt: tokio::runtime::Runtime,
    ctx: RuntimeContext,
}

impl Runtime {
    /// Builds the worker pool and its context (`init`).
    pub fn new(cfg: RuntimeConfig) -> Result<Self, RuntimeError> {
        Self::with_subscribers(cfg, Vec::new())
    }

    /// Like [`new`](Self::new), with event subscribers attached to the context.
    pub fn with_subscribers(
        cfg: RuntimeConfig,
        subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> Result<Self, RuntimeError> {
        let workers = cfg.worker_threads();
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name("chanvisor-worker")
            .enable_all()
            .build()
            .map_err(RuntimeError::Build)?;

        let ctx = {
            let _entered = rt.enter();
            RuntimeContext::builder(cfg)
                .with_subscribers(subscribers)
                .build()
        };
        tracing::debug!(workers, "worker pool started");
        Ok(Self { rt, ctx })
    }

    /// Context shared by everything running on this pool.
    pub fn context(&self) -> &RuntimeContext {
        &self.ctx
    }

    /// Handle for spawning from outside the pool.
    pub fn handle(&self) -> &Handle {
        self.rt.handle()
    }

    /// Runs `fut` to completion on the pool, blocking the current thread.
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.rt.block_on(fut)
    }

    /// Spawns `fut` onto the pool.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.rt.spawn(fut)
    }

    /// Blocks until the process receives a termination signal.
    pub fn block_until_signal(&self) -> Result<(), RuntimeError> {
        self.rt.block_on(wait_for_shutdown_signal())
    }

    /// Tears the context down (`teardown`) and stops the pool.
    pub fn shutdown(self) {
        self.rt.block_on(self.ctx.teardown());
        self.rt.shutdown_timeout(SHUTDOWN_TIMEOUT);
        tracing::debug!("worker pool stopped");
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime").field("ctx", &self.ctx).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Pattern;
    use crate::message::Flags;

    #[test]
    fn tasks_run_on_the_pool_and_shutdown_closes_channels() {
        let rt = Runtime::new(RuntimeConfig {
            worker_threads: 2,
            ..RuntimeConfig::default()
        })
        .unwrap();
        let ch = rt.context().channel(Pattern::Point2Point, 4).unwrap();

        let tx = ch.clone();
        let sent = rt.spawn(async move { tx.send("ping", Flags::empty()).await });
        rt.block_on(sent).unwrap().unwrap();
        assert_eq!(ch.len(), 1);

        rt.shutdown();
        assert!(ch.is_closed());
    }
}
