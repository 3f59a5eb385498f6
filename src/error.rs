//! Error types used by channels, transports, supervisors and tasks.
//!
//! This module defines the error enums of the crate:
//!
//! - [`ChannelError`]: outcome of channel and pattern operations.
//! - [`TransportError`]: bind/connect/send/receive failures at the network layer.
//! - [`SupervisorError`]: misuse and escalation of a supervision tree.
//! - [`TaskError`]: errors raised by individual task bodies.
//! - [`RuntimeError`]: failures building or tearing down the runtime glue.
//!
//! All of them provide `as_label` (stable snake_case) for logs/metrics.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::channel::Pattern;

/// # Errors produced by channel and pattern operations.
///
/// `WouldBlock` and `Timeout` are expected outcomes of non-blocking and bounded
/// operations; see [`ChannelError::is_recoverable`].
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ChannelError {
    /// A non-blocking operation could not proceed (buffer full on send, empty on receive).
    #[error("operation would block")]
    WouldBlock,

    /// The channel is closed (and, for receive, drained).
    #[error("channel closed")]
    Closed,

    /// A bounded wait expired.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The bound that expired.
        timeout: Duration,
    },

    /// The transport attached to this channel failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Channel was created with a capacity of zero.
    #[error("capacity must be at least 1 (got {requested})")]
    CapacityExceeded {
        /// The rejected capacity.
        requested: usize,
    },

    /// The ring buffer could not be allocated.
    #[error("out of memory reserving {capacity} slots")]
    OutOfMemory {
        /// Requested slot count.
        capacity: usize,
    },

    /// The operation needs a different channel pattern.
    #[error("operation requires {expected:?} channel, got {actual:?}")]
    PatternMismatch {
        /// Pattern the operation works on.
        expected: Pattern,
        /// Pattern of the channel it was called with.
        actual: Pattern,
    },

    /// The two patterns cannot be wired together.
    #[error("{upstream:?} cannot be connected to {downstream:?}")]
    IncompatiblePatterns {
        /// Bound or connecting side.
        upstream: Pattern,
        /// The other side.
        downstream: Pattern,
    },

    /// A distributing pattern has nowhere to deliver.
    #[error("channel has no connected peers")]
    NoPeers,

    /// `destroy` called on a channel that is still open.
    #[error("channel must be closed before it is destroyed")]
    NotClosed,

    /// `destroy` already ran for this channel.
    #[error("channel destroyed")]
    Destroyed,

    /// Message violates framing limits (topic/correlation length).
    #[error("invalid frame: {0}")]
    Frame(String),

    /// The channel is already bound or connected.
    #[error("channel already attached to {endpoint}")]
    AlreadyAttached {
        /// Endpoint the channel is attached to.
        endpoint: String,
    },
}

impl ChannelError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use chanvisor::ChannelError;
    ///
    /// assert_eq!(ChannelError::WouldBlock.as_label(), "channel_would_block");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ChannelError::WouldBlock => "channel_would_block",
            ChannelError::Closed => "channel_closed",
            ChannelError::Timeout { .. } => "channel_timeout",
            ChannelError::Transport(_) => "channel_transport",
            ChannelError::CapacityExceeded { .. } => "channel_capacity_exceeded",
            ChannelError::OutOfMemory { .. } => "channel_out_of_memory",
            ChannelError::PatternMismatch { .. } => "channel_pattern_mismatch",
            ChannelError::IncompatiblePatterns { .. } => "channel_incompatible_patterns",
            ChannelError::NoPeers => "channel_no_peers",
            ChannelError::NotClosed => "channel_not_closed",
            ChannelError::Destroyed => "channel_destroyed",
            ChannelError::Frame(_) => "channel_frame",
            ChannelError::AlreadyAttached { .. } => "channel_already_attached",
        }
    }

    /// True for outcomes the caller is expected to handle locally (retry, back off).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ChannelError::WouldBlock | ChannelError::Timeout { .. })
    }

    /// True when the channel is permanently unavailable.
    pub fn is_closed(&self) -> bool {
        matches!(self, ChannelError::Closed | ChannelError::Destroyed)
    }
}

/// # Errors produced by transport backends.
///
/// Each variant keeps the OS-level cause as its `source`.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TransportError {
    /// Listening socket could not be created (address in use, permission...).
    #[error("bind {endpoint} failed: {source}")]
    Bind {
        /// Endpoint as written by the caller.
        endpoint: String,
        /// OS cause.
        #[source]
        source: io::Error,
    },

    /// Outbound connection failed (refused, unreachable, timed out...).
    #[error("connect {endpoint} failed: {source}")]
    Connect {
        /// Endpoint as written by the caller.
        endpoint: String,
        /// OS cause.
        #[source]
        source: io::Error,
    },

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(#[source] io::Error),

    /// Reading a frame failed.
    #[error("receive failed: {0}")]
    Receive(#[source] io::Error),

    /// Endpoint string could not be parsed.
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint {
        /// Offending input.
        endpoint: String,
        /// What was wrong.
        reason: &'static str,
    },

    /// Malformed or oversized frame on the wire.
    #[error("frame error: {0}")]
    Frame(String),

    /// In-process endpoint is already bound.
    #[error("address in use: {0}")]
    AddressInUse(String),

    /// In-process endpoint has nothing bound to it.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// No backend registered for the protocol.
    #[error("no transport registered for {0}")]
    Unsupported(String),

    /// A single-destination send found no connected peer.
    #[error("link has no connected peers")]
    NoPeers,

    /// The link (or the remote side) is gone.
    #[error("link closed")]
    Closed,
}

impl TransportError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TransportError::Bind { .. } => "transport_bind",
            TransportError::Connect { .. } => "transport_connect",
            TransportError::Send(_) => "transport_send",
            TransportError::Receive(_) => "transport_receive",
            TransportError::InvalidEndpoint { .. } => "transport_invalid_endpoint",
            TransportError::Frame(_) => "transport_frame",
            TransportError::AddressInUse(_) => "transport_address_in_use",
            TransportError::ConnectionRefused(_) => "transport_connection_refused",
            TransportError::Unsupported(_) => "transport_unsupported",
            TransportError::NoPeers => "transport_no_peers",
            TransportError::Closed => "transport_closed",
        }
    }
}

impl From<io::Error> for TransportError {
    /// Stream codecs surface read failures through this conversion.
    fn from(err: io::Error) -> Self {
        TransportError::Receive(err)
    }
}

impl From<TransportError> for io::Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Bind { source, .. }
            | TransportError::Connect { source, .. }
            | TransportError::Send(source)
            | TransportError::Receive(source) => source,
            other => io::Error::other(other.to_string()),
        }
    }
}

/// # Errors produced by a supervision tree.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// More restarts than `max_restarts` happened inside `window`; the tree stopped.
    #[error(
        "supervisor {supervisor:?}: {restarts} restarts within {window:?} exceed limit {max_restarts}"
    )]
    RestartIntensityExceeded {
        /// Supervisor name.
        supervisor: String,
        /// Restarts counted in the window (including the rejected one).
        restarts: usize,
        /// Configured limit.
        max_restarts: usize,
        /// Configured window.
        window: Duration,
    },

    /// Registering the child would close a dependency cycle.
    #[error("dependency cycle: {}", cycle.join(" -> "))]
    DependencyCycle {
        /// Names along the cycle, starting and ending with the rejected child.
        cycle: Vec<String>,
    },

    /// A child depends on a name that is not registered (or not running).
    #[error("child {child:?} depends on unknown child {dependency:?}")]
    UnknownDependency {
        /// Dependent child.
        child: String,
        /// Missing dependency.
        dependency: String,
    },

    /// Child names are unique within one supervisor.
    #[error("child {0:?} already registered")]
    DuplicateChild(String),

    /// Registration after `start` without `dynamic_children`.
    #[error("supervisor is running and dynamic children are disabled")]
    DynamicChildrenDisabled,

    /// `start` while the tree is running.
    #[error("supervisor already running")]
    AlreadyRunning,

    /// `stop`/`wait` without a running tree (or outcome already reported).
    #[error("supervisor not running")]
    NotRunning,

    /// The shared-state init hook failed; no child was started.
    #[error("shared state init failed: {0}")]
    InitFailed(#[source] TaskError),

    /// Children did not observe cancellation within the grace period.
    #[error("stop grace {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// Configured grace.
        grace: Duration,
        /// Names of children still running.
        stuck: Vec<String>,
    },
}

impl SupervisorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::RestartIntensityExceeded { .. } => "supervisor_restart_intensity",
            SupervisorError::DependencyCycle { .. } => "supervisor_dependency_cycle",
            SupervisorError::UnknownDependency { .. } => "supervisor_unknown_dependency",
            SupervisorError::DuplicateChild(_) => "supervisor_duplicate_child",
            SupervisorError::DynamicChildrenDisabled => "supervisor_dynamic_disabled",
            SupervisorError::AlreadyRunning => "supervisor_already_running",
            SupervisorError::NotRunning => "supervisor_not_running",
            SupervisorError::InitFailed(_) => "supervisor_init_failed",
            SupervisorError::GraceExceeded { .. } => "supervisor_grace_exceeded",
        }
    }

    /// True for errors that terminated the tree.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SupervisorError::RestartIntensityExceeded { .. } | SupervisorError::GraceExceeded { .. }
        )
    }
}

/// # Errors produced by task execution.
///
/// Returned by task bodies to the supervisor. `Fail` and `Timeout` are retryable,
/// `Fatal` never restarts the child, `Canceled` is a graceful exit.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    /// Task execution exceeded a bounded wait.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Non-recoverable fatal error (should not be retried).
    #[error("fatal error (no retry): {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// Task execution failed but may succeed if retried.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Task observed its cancellation token and returned.
    #[error("context cancelled")]
    Canceled,
}

impl TaskError {
    /// Shorthand for [`TaskError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        TaskError::Fail {
            error: error.into(),
        }
    }

    /// Shorthand for [`TaskError::Fatal`].
    pub fn fatal(error: impl Into<String>) -> Self {
        TaskError::Fatal {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use chanvisor::TaskError;
    /// use std::time::Duration;
    ///
    /// let err = TaskError::Timeout { timeout: Duration::from_secs(1) };
    /// assert_eq!(err.as_label(), "task_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Timeout { .. } => "task_timeout",
            TaskError::Fatal { .. } => "task_fatal",
            TaskError::Fail { .. } => "task_failed",
            TaskError::Canceled => "task_canceled",
        }
    }

    /// Indicates whether the error type is safe to retry.
    ///
    /// # Example
    /// ```
    /// use chanvisor::TaskError;
    ///
    /// assert!(TaskError::fail("boom").is_retryable());
    /// assert!(!TaskError::fatal("nope").is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Fail { .. } | TaskError::Timeout { .. })
    }
}

impl From<ChannelError> for TaskError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Timeout { timeout } => TaskError::Timeout { timeout },
            other => TaskError::Fail {
                error: other.to_string(),
            },
        }
    }
}

/// # Errors produced by the runtime glue.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The worker pool could not be built.
    #[error("failed to build worker pool: {0}")]
    Build(#[source] io::Error),

    /// Waiting for an OS shutdown signal failed.
    #[error("signal handler registration failed: {0}")]
    Signal(#[source] io::Error),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Build(_) => "runtime_build",
            RuntimeError::Signal(_) => "runtime_signal",
        }
    }
}
