//! # Children of a supervisor.
//!
//! A child is described by a [`ChildSpec`] and moves through [`ChildState`]:
//!
//! ```text
//! Registered ──► Running ──► Stopped
//!                  │  ▲
//!          exit    ▼  │ restart
//!                Failed ──► PermanentlyFailed
//! ```
//!
//! Every spawn gets a fresh [`HandleId`], so an exit report can be matched against
//! the run that produced it.

use std::fmt;

use crate::error::TaskError;
use crate::policies::{BackoffPolicy, RestartPolicy};
use crate::tasks::TaskRef;

/// How a child run ended.
#[derive(Clone, Debug)]
pub enum ExitCause {
    /// The body returned `Ok(())`.
    Normal,
    /// The body returned [`TaskError::Canceled`] after observing its token.
    Canceled,
    /// The body returned an error.
    Failed(TaskError),
    /// The body panicked.
    Panicked(String),
    /// The run was torn down without finishing (runtime shutdown).
    Aborted,
}

impl ExitCause {
    /// True when the child must never be restarted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExitCause::Failed(TaskError::Fatal { .. }))
    }

    /// True for exits that count as failures.
    pub fn is_abnormal(&self) -> bool {
        matches!(
            self,
            ExitCause::Failed(_) | ExitCause::Panicked(_) | ExitCause::Aborted
        )
    }

    /// Short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            ExitCause::Normal => "normal",
            ExitCause::Canceled => "canceled",
            ExitCause::Failed(_) => "failed",
            ExitCause::Panicked(_) => "panicked",
            ExitCause::Aborted => "aborted",
        }
    }
}

impl fmt::Display for ExitCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitCause::Failed(err) => write!(f, "failed: {err}"),
            ExitCause::Panicked(info) => write!(f, "panicked: {info}"),
            other => f.write_str(other.as_label()),
        }
    }
}

/// Lifecycle state of a child.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChildState {
    /// Registered, not started yet.
    Registered,
    /// Its task is executing.
    Running,
    /// Stopped by the supervisor, or exited without a restart being due.
    Stopped,
    /// Exited abnormally; a restart is pending.
    Failed,
    /// Will not run again until the supervisor is restarted.
    PermanentlyFailed,
}

/// Identity of one child run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub(crate) u64);

impl HandleId {
    /// Raw value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// # Child specification.
///
/// Per-child policies override the supervisor defaults from
/// [`SupervisorConfig`](crate::SupervisorConfig).
///
/// ```rust
/// use tokio_util::sync::CancellationToken;
/// use chanvisor::{ChildSpec, RestartPolicy, TaskFn};
///
/// let db = ChildSpec::new(TaskFn::arc("db", |ctx: CancellationToken| async move {
///     ctx.cancelled().await;
///     Ok(())
/// }));
/// let api = ChildSpec::new(TaskFn::arc("api", |_ctx: CancellationToken| async { Ok(()) }))
///     .depends_on("db")
///     .with_restart(RestartPolicy::Always);
///
/// assert_eq!(api.name(), "api");
/// assert_eq!(api.dependencies(), ["db".to_string()]);
/// # drop(db);
/// ```
#[derive(Clone)]
pub struct ChildSpec {
    pub(crate) task: TaskRef,
    pub(crate) depends_on: Vec<String>,
    pub(crate) restart: Option<RestartPolicy>,
    pub(crate) backoff: Option<BackoffPolicy>,
}

impl ChildSpec {
    /// Child running `task`, named after it.
    pub fn new(task: TaskRef) -> Self {
        Self {
            task,
            depends_on: Vec::new(),
            restart: None,
            backoff: None,
        }
    }

    /// Starts this child only after `name` has started. May be repeated.
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.depends_on.contains(&name) {
            self.depends_on.push(name);
        }
        self
    }

    /// Overrides the restart policy.
    pub fn with_restart(mut self, policy: RestartPolicy) -> Self {
        self.restart = Some(policy);
        self
    }

    /// Overrides the restart delay.
    pub fn with_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.backoff = Some(policy);
        self
    }

    /// Child name (the task name).
    pub fn name(&self) -> &str {
        self.task.name()
    }

    /// Names this child depends on.
    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }
}

impl fmt::Debug for ChildSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildSpec")
            .field("name", &self.name())
            .field("depends_on", &self.depends_on)
            .field("restart", &self.restart)
            .field("backoff", &self.backoff)
            .finish()
    }
}

/// Point-in-time view of one child.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChildSnapshot {
    /// Registration index.
    pub index: usize,
    /// Child name.
    pub name: String,
    /// Current state.
    pub state: ChildState,
    /// Current run, while running.
    pub handle: Option<HandleId>,
    /// Restarts since the supervisor started.
    pub restarts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn causes_classify() {
        assert!(!ExitCause::Normal.is_abnormal());
        assert!(!ExitCause::Canceled.is_abnormal());
        assert!(ExitCause::Aborted.is_abnormal());
        assert!(ExitCause::Failed(TaskError::fatal("x")).is_fatal());
        assert!(!ExitCause::Failed(TaskError::fail("x")).is_fatal());
        assert_eq!(
            ExitCause::Panicked("boom".into()).to_string(),
            "panicked: boom"
        );
    }
}
