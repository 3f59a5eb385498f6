//! # Supervisor: runs children, restarts them, escalates.
//!
//! ## Architecture
//! ```text
//! start():
//!   SharedState::init ─► spawn children in dependency order ─► spawn monitor
//!
//! per child run (fresh HandleId):
//!   tokio::spawn(task.spawn(token)) ─► watcher ─► Notice::Exited{index, handle, cause}
//!                                                      │
//! monitor loop:                                        ▼
//!   stale handle?          ─► ignore (the run was stopped on purpose)
//!   policy says no restart ─► Stopped / PermanentlyFailed
//!   RestartWindow::record  ─► over the limit: escalate, stop the tree
//!   strategy restart set   ─► stop siblings (reverse) ─► backoff ─► spawn (in order)
//!
//! stop() / escalation:
//!   stop running children in reverse start order (bounded by grace)
//!   SharedState::cleanup ─► SupervisorStopped ─► outcome to the first stop()/wait()
//! ```
//!
//! ## Rules
//! - Cancellation is cooperative: a body that ignores its token keeps `stop` waiting
//!   (or produces `GraceExceeded` when a grace period is configured).
//! - Tree mutations happen under one lock that is never held across an await.
//! - The outcome is reported once.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::SupervisorConfig;
use crate::error::{SupervisorError, TaskError};
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::panic_message;
use crate::tasks::{BoxTaskFuture, Task, TaskRef};

use super::child::{ChildSnapshot, ChildSpec, ChildState, ExitCause, HandleId};
use super::dag::Dag;
use super::intensity::RestartWindow;
use super::shared::SharedState;

enum Notice {
    Exited {
        index: usize,
        handle: HandleId,
        cause: ExitCause,
    },
}

struct Run {
    id: HandleId,
    token: CancellationToken,
    watcher: JoinHandle<ExitCause>,
}

struct Slot {
    spec: ChildSpec,
    state: ChildState,
    run: Option<Run>,
    spawns: u32,
    restarts: u32,
    /// Failures since the last clean exit; drives the backoff.
    streak: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    /// Init hook in flight; dynamic registrations wait in `Tree::late`.
    Starting,
    Running,
}

struct Tree {
    phase: Phase,
    slots: Vec<Slot>,
    dag: Dag,
    order: Vec<usize>,
    late: Vec<usize>,
    notices: Option<mpsc::UnboundedSender<Notice>>,
    stop: CancellationToken,
    next_handle: u64,
}

/// Builder for a [`Supervisor`].
pub struct SupervisorBuilder {
    name: String,
    cfg: SupervisorConfig,
    bus: Option<Bus>,
    shared: Option<Arc<dyn SharedState>>,
}

impl SupervisorBuilder {
    /// Publishes lifecycle events on `bus` (normally the runtime context bus).
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Installs shared state with init/cleanup hooks.
    pub fn with_shared_state(mut self, shared: Arc<dyn SharedState>) -> Self {
        self.shared = Some(shared);
        self
    }

    /// Builds the supervisor.
    pub fn build(self) -> Arc<Supervisor> {
        Arc::new(Supervisor {
            name: Arc::from(self.name),
            cfg: self.cfg,
            bus: self.bus.unwrap_or_else(|| Bus::new(256)),
            shared: self.shared,
            tree: Mutex::new(Tree {
                phase: Phase::Idle,
                slots: Vec::new(),
                dag: Dag::default(),
                order: Vec::new(),
                late: Vec::new(),
                notices: None,
                stop: CancellationToken::new(),
                next_handle: 0,
            }),
            outcome: tokio::sync::Mutex::new(None),
        })
    }
}

/// A supervision tree node.
///
/// ```rust
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
/// use chanvisor::{ChildSpec, Supervisor, SupervisorConfig, TaskFn};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     let sup = Supervisor::builder("root", SupervisorConfig::default()).build();
///     sup.register(ChildSpec::new(TaskFn::arc("ticker", |ctx: CancellationToken| async move {
///         while !ctx.is_cancelled() {
///             tokio::time::sleep(Duration::from_millis(5)).await;
///         }
///         Ok(())
///     })))
///     .unwrap();
///
///     sup.start().await.unwrap();
///     sup.stop().await.unwrap();
/// }
/// ```
pub struct Supervisor {
    name: Arc<str>,
    cfg: SupervisorConfig,
    bus: Bus,
    shared: Option<Arc<dyn SharedState>>,
    tree: Mutex<Tree>,
    outcome: tokio::sync::Mutex<Option<JoinHandle<Result<(), SupervisorError>>>>,
}

impl Supervisor {
    /// Starts building a supervisor.
    pub fn builder(name: impl Into<String>, cfg: SupervisorConfig) -> SupervisorBuilder {
        SupervisorBuilder {
            name: name.into(),
            cfg,
            bus: None,
            shared: None,
        }
    }

    /// Supervisor name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration.
    pub fn config(&self) -> &SupervisorConfig {
        &self.cfg
    }

    /// True between `start` and the end of the stop sequence.
    pub fn is_running(&self) -> bool {
        self.tree.lock().phase == Phase::Running
    }

    /// Adds a child and returns its index.
    ///
    /// Before `start` dependencies may name children registered later. After `start`
    /// (only with `dynamic_children`) the child starts immediately and its
    /// dependencies must already be running. A child registered while the init hook
    /// is still running starts right after the initial children.
    ///
    /// # Errors
    /// `DuplicateChild`, `DependencyCycle`, `DynamicChildrenDisabled`,
    /// `UnknownDependency` (dynamic registration only).
    pub fn register(&self, spec: ChildSpec) -> Result<usize, SupervisorError> {
        let mut tree = self.tree.lock();
        let phase = tree.phase;
        if phase != Phase::Idle && !self.cfg.dynamic_children {
            return Err(SupervisorError::DynamicChildrenDisabled);
        }
        if phase != Phase::Idle {
            for dep in spec.dependencies() {
                let up = tree.slots.iter().any(|s| {
                    s.spec.name() == dep
                        && (phase == Phase::Starting || s.state == ChildState::Running)
                });
                if !up {
                    return Err(SupervisorError::UnknownDependency {
                        child: spec.name().to_string(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let index = tree.dag.add(spec.name(), spec.dependencies())?;
        tree.slots.push(Slot {
            spec,
            state: ChildState::Registered,
            run: None,
            spawns: 0,
            restarts: 0,
            streak: 0,
        });
        match phase {
            Phase::Running => {
                tree.order.push(index);
                self.spawn_child(&mut tree, index);
            }
            Phase::Starting => tree.late.push(index),
            Phase::Idle => {}
        }
        Ok(index)
    }

    /// Runs the init hook, then starts every child in dependency order.
    ///
    /// # Errors
    /// `AlreadyRunning`, `UnknownDependency`, `InitFailed` (no child started).
    pub async fn start(self: &Arc<Self>) -> Result<(), SupervisorError> {
        let (stop, notices) = {
            let mut tree = self.tree.lock();
            if tree.phase != Phase::Idle {
                return Err(SupervisorError::AlreadyRunning);
            }
            tree.order = tree.dag.order()?;
            tree.late.clear();
            let (tx, rx) = mpsc::unbounded_channel();
            tree.phase = Phase::Starting;
            tree.notices = Some(tx);
            tree.stop = CancellationToken::new();
            for slot in &mut tree.slots {
                slot.state = ChildState::Registered;
                slot.restarts = 0;
                slot.streak = 0;
            }
            (tree.stop.clone(), rx)
        };

        if let Some(shared) = &self.shared {
            if let Err(err) = shared.init().await {
                tracing::warn!(supervisor = %self.name, error = %err, "shared state init failed");
                let mut tree = self.tree.lock();
                tree.phase = Phase::Idle;
                tree.notices = None;
                tree.late.clear();
                return Err(SupervisorError::InitFailed(err));
            }
            self.publish(Event::new(EventKind::SharedStateInitialized));
        }

        let started = {
            let mut tree = self.tree.lock();
            let order = tree.order.clone();
            for &index in &order {
                self.spawn_child(&mut tree, index);
            }
            let late = std::mem::take(&mut tree.late);
            for &index in &late {
                tree.order.push(index);
                self.spawn_child(&mut tree, index);
            }
            tree.phase = Phase::Running;
            order.len() + late.len()
        };
        tracing::info!(supervisor = %self.name, children = started, "supervisor started");
        self.publish(Event::new(EventKind::SupervisorStarted).with_count(started as u64));

        let monitor = tokio::spawn(Arc::clone(self).monitor(notices, stop));
        *self.outcome.lock().await = Some(monitor);
        Ok(())
    }

    /// Stops every child in reverse start order, runs the cleanup hook, and returns
    /// the outcome of this run of the tree.
    ///
    /// # Errors
    /// `NotRunning` when the outcome was already reported; otherwise the escalation
    /// that stopped the tree, or `GraceExceeded`.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let stop = self.tree.lock().stop.clone();
        stop.cancel();
        self.outcome().await
    }

    /// Waits until the tree stops (escalation or a `stop` elsewhere) and returns the
    /// outcome.
    pub async fn wait(&self) -> Result<(), SupervisorError> {
        self.outcome().await
    }

    /// Snapshots of every registered child, by index.
    pub fn children(&self) -> Vec<ChildSnapshot> {
        let tree = self.tree.lock();
        tree.slots
            .iter()
            .enumerate()
            .map(|(index, slot)| ChildSnapshot {
                index,
                name: slot.spec.name().to_string(),
                state: slot.state,
                handle: slot.run.as_ref().map(|run| run.id),
                restarts: slot.restarts,
            })
            .collect()
    }

    /// Wraps this supervisor as a child task of another supervisor.
    ///
    /// The task starts the tree, stops it when cancelled, and fails when the tree
    /// escalates.
    pub fn into_task(self: Arc<Self>) -> TaskRef {
        Arc::new(SupervisorTask { sup: self })
    }

    async fn outcome(&self) -> Result<(), SupervisorError> {
        let mut outcome = self.outcome.lock().await;
        let Some(monitor) = outcome.as_mut() else {
            return Err(SupervisorError::NotRunning);
        };
        // Taken only once joined; a cancelled waiter leaves the handle in place.
        let joined = monitor.await;
        *outcome = None;
        match joined {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(supervisor = %self.name, error = %err, "supervisor monitor died");
                Err(SupervisorError::NotRunning)
            }
        }
    }

    fn publish(&self, event: Event) {
        self.bus.publish(event.with_supervisor(Arc::clone(&self.name)));
    }

    fn spawn_child(&self, tree: &mut Tree, index: usize) {
        tree.next_handle += 1;
        let id = HandleId(tree.next_handle);
        let notices = tree.notices.clone();
        let slot = &mut tree.slots[index];

        let token = CancellationToken::new();
        let task = Arc::clone(&slot.spec.task);
        let body = tokio::spawn({
            let token = token.clone();
            async move { task.spawn(token).await }
        });
        let watcher = tokio::spawn(async move {
            let cause = match body.await {
                Ok(Ok(())) => ExitCause::Normal,
                Ok(Err(TaskError::Canceled)) => ExitCause::Canceled,
                Ok(Err(err)) => ExitCause::Failed(err),
                Err(err) if err.is_panic() => ExitCause::Panicked(panic_message(err.into_panic().as_ref())),
                Err(_) => ExitCause::Aborted,
            };
            if let Some(notices) = notices {
                let _ = notices.send(Notice::Exited {
                    index,
                    handle: id,
                    cause: cause.clone(),
                });
            }
            cause
        });

        slot.spawns += 1;
        slot.state = ChildState::Running;
        slot.run = Some(Run { id, token, watcher });
        tracing::debug!(supervisor = %self.name, child = slot.spec.name(), handle = %id, "child started");
        self.publish(
            Event::new(EventKind::ChildStarted)
                .with_child(slot.spec.name())
                .with_attempt(slot.spawns),
        );
    }

    async fn monitor(
        self: Arc<Self>,
        mut notices: mpsc::UnboundedReceiver<Notice>,
        stop: CancellationToken,
    ) -> Result<(), SupervisorError> {
        let mut window = RestartWindow::new(self.cfg.max_restarts, self.cfg.window);
        let escalation = loop {
            let notice = tokio::select! {
                _ = stop.cancelled() => break None,
                notice = notices.recv() => match notice {
                    Some(notice) => notice,
                    None => break None,
                },
            };
            let Notice::Exited { index, handle, cause } = notice;
            if let Some(escalated) = self.on_exit(index, handle, cause, &mut window, &stop).await {
                break Some(escalated);
            }
        };

        let stopped = self.stop_all().await;
        let escalation = {
            let mut tree = self.tree.lock();
            tree.notices = None;
            escalation.map(|(err, affected)| {
                for index in affected {
                    tree.slots[index].state = ChildState::PermanentlyFailed;
                }
                err
            })
        };

        let result = match (escalation, stopped) {
            (Some(err), _) => Err(err),
            (None, Err(err)) => Err(err),
            (None, Ok(())) => Ok(()),
        };
        let skip_cleanup = matches!(result, Err(SupervisorError::GraceExceeded { .. }));
        if let (Some(shared), false) = (&self.shared, skip_cleanup) {
            shared.cleanup().await;
            self.publish(Event::new(EventKind::SharedStateCleaned));
        }

        self.tree.lock().phase = Phase::Idle;
        match &result {
            Ok(()) => tracing::info!(supervisor = %self.name, "supervisor stopped"),
            Err(err) => tracing::error!(supervisor = %self.name, error = %err, "supervisor stopped"),
        }
        let mut event = Event::new(EventKind::SupervisorStopped);
        if let Err(err) = &result {
            event = event.with_reason(err.to_string());
        }
        self.publish(event);
        result
    }

    /// Applies policy, intensity and strategy to one exit.
    ///
    /// On escalation returns the error and the children it leaves permanently failed.
    async fn on_exit(
        &self,
        index: usize,
        handle: HandleId,
        cause: ExitCause,
        window: &mut RestartWindow,
        stop: &CancellationToken,
    ) -> Option<(SupervisorError, Vec<usize>)> {
        let (name, restart_set, delay) = {
            let mut tree = self.tree.lock();
            let slot = &mut tree.slots[index];
            if slot.run.as_ref().map(|run| run.id) != Some(handle) {
                return None;
            }
            slot.run = None;
            let name = slot.spec.name().to_string();
            tracing::debug!(supervisor = %self.name, child = %name, %cause, "child exited");
            self.publish(
                Event::new(EventKind::ChildExited)
                    .with_child(name.as_str())
                    .with_reason(cause.to_string()),
            );

            let policy = slot.spec.restart.unwrap_or(self.cfg.restart);
            if !policy.should_restart(&cause) {
                if cause.is_abnormal() {
                    slot.state = ChildState::PermanentlyFailed;
                    tracing::warn!(supervisor = %self.name, child = %name, %cause, "child permanently failed");
                    self.publish(
                        Event::new(EventKind::ChildPermanentlyFailed)
                            .with_child(name.as_str())
                            .with_reason(cause.to_string()),
                    );
                } else {
                    slot.state = ChildState::Stopped;
                }
                if !cause.is_abnormal() {
                    slot.streak = 0;
                }
                return None;
            }

            slot.state = ChildState::Failed;
            let backoff = slot.spec.backoff.unwrap_or(self.cfg.backoff);
            let delay = if cause.is_abnormal() {
                let delay = backoff.next(slot.streak);
                slot.streak = slot.streak.saturating_add(1);
                delay
            } else {
                slot.streak = 0;
                backoff.next(0)
            };
            let set = self.cfg.strategy.restart_set(&tree.order, index);
            (name, set, delay)
        };

        if let Err(restarts) = window.record(Instant::now()) {
            let err = SupervisorError::RestartIntensityExceeded {
                supervisor: self.name.to_string(),
                restarts,
                max_restarts: self.cfg.max_restarts,
                window: self.cfg.window,
            };
            tracing::error!(supervisor = %self.name, child = %name, restarts, "restart intensity exceeded");
            self.publish(
                Event::new(EventKind::RestartIntensityExceeded)
                    .with_child(name.as_str())
                    .with_count(restarts as u64)
                    .with_reason(err.to_string()),
            );
            self.tree.lock().slots[index].state = ChildState::PermanentlyFailed;
            self.publish(
                Event::new(EventKind::ChildPermanentlyFailed)
                    .with_child(name.as_str())
                    .with_reason("restart intensity exceeded"),
            );
            return Some((err, restart_set));
        }

        for &sibling in restart_set.iter().rev() {
            if sibling != index {
                self.stop_child(sibling, None).await;
            }
        }

        if !delay.is_zero() {
            tokio::select! {
                _ = stop.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if stop.is_cancelled() {
            return None;
        }

        let mut tree = self.tree.lock();
        for &member in &restart_set {
            if tree.slots[member].state == ChildState::PermanentlyFailed {
                continue;
            }
            tree.slots[member].restarts += 1;
            self.spawn_child(&mut tree, member);
            let slot = &tree.slots[member];
            tracing::info!(supervisor = %self.name, child = slot.spec.name(), attempt = slot.spawns, "child restarted");
            self.publish(
                Event::new(EventKind::ChildRestarted)
                    .with_child(slot.spec.name())
                    .with_attempt(slot.spawns)
                    .with_delay(delay),
            );
        }
        None
    }

    /// Cancels one child and waits for it; `None` deadline waits indefinitely.
    ///
    /// Returns false when the deadline passed first.
    async fn stop_child(&self, index: usize, deadline: Option<Instant>) -> bool {
        let (name, run) = {
            let mut tree = self.tree.lock();
            let slot = &mut tree.slots[index];
            let Some(run) = slot.run.take() else {
                return true;
            };
            slot.state = ChildState::Stopped;
            (slot.spec.name().to_string(), run)
        };
        run.token.cancel();

        let cause = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, run.watcher).await {
                Ok(joined) => joined,
                Err(_) => return false,
            },
            None => run.watcher.await,
        };
        let cause = cause.unwrap_or(ExitCause::Aborted);
        tracing::debug!(supervisor = %self.name, child = %name, %cause, "child stopped");
        self.publish(
            Event::new(EventKind::ChildExited)
                .with_child(name)
                .with_reason(cause.to_string()),
        );
        true
    }

    /// Stops running children in reverse start order within the grace period.
    async fn stop_all(&self) -> Result<(), SupervisorError> {
        let order: Vec<usize> = self.tree.lock().order.iter().rev().copied().collect();
        let deadline = self.cfg.grace().map(|grace| Instant::now() + grace);

        let mut stuck = Vec::new();
        for index in order {
            if !self.stop_child(index, deadline).await {
                stuck.push(self.tree.lock().slots[index].spec.name().to_string());
            }
        }
        if stuck.is_empty() {
            return Ok(());
        }
        tracing::warn!(supervisor = %self.name, ?stuck, "children ignored cancellation within grace");
        Err(SupervisorError::GraceExceeded {
            grace: self.cfg.grace,
            stuck,
        })
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("name", &self.name)
            .field("strategy", &self.cfg.strategy)
            .field("running", &self.is_running())
            .finish()
    }
}

struct SupervisorTask {
    sup: Arc<Supervisor>,
}

impl Task for SupervisorTask {
    fn name(&self) -> &str {
        self.sup.name()
    }

    fn spawn(&self, ctx: CancellationToken) -> BoxTaskFuture {
        let sup = Arc::clone(&self.sup);
        Box::pin(async move {
            sup.start()
                .await
                .map_err(|err| TaskError::fail(err.to_string()))?;
            let finished = tokio::select! {
                _ = ctx.cancelled() => None,
                outcome = sup.wait() => Some(outcome),
            };
            match finished {
                None => {
                    sup.stop()
                        .await
                        .map_err(|err| TaskError::fail(err.to_string()))?;
                    Err(TaskError::Canceled)
                }
                Some(Ok(())) => Ok(()),
                Some(Err(err)) => Err(TaskError::fail(err.to_string())),
            }
        })
    }
}
