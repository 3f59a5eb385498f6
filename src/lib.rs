//! # chanvisor
//!
//! **Chanvisor** is the concurrency core of an async runtime: bounded channels with
//! messaging patterns on top, pluggable transports that carry those channels across
//! processes and hosts, and supervision trees that restart failed tasks.
//!
//! ## Architecture
//! ```text
//!            ┌──────────────────────── RuntimeContext ────────────────────────┐
//!            │ Bus · SubscriberSet · inproc registry · transports · channel ids│
//!            └───────┬───────────────────────┬───────────────────────┬────────┘
//!                    ▼                       ▼                       ▼
//!             ┌─────────────┐        ┌──────────────┐        ┌──────────────┐
//!             │   Channel   │◄──────►│  dyn Link    │        │  Supervisor  │
//!             │ ring buffer │  pump  │ tcp ipc udp  │        │  DAG · policy│
//!             │ + Pattern   │  send  │ rmcast       │        │  · intensity │
//!             └──────┬──────┘        └──────────────┘        └──────┬───────┘
//!                    │ publish / push / request                     │ spawn · watch
//!                    ▼                                              ▼
//!             peers (in-process)                           child tasks (TaskRef)
//!
//!  every component ── publish(Event) ──► Bus ──► fan-out ──► Subscribe::on_event
//! ```
//!
//! ### Supervision
//! ```text
//! start ─► SharedState::init ─► spawn children in dependency order
//!
//! child exit ─► watcher ─► monitor:
//!   ├─ RestartPolicy says no / Fatal ─► Stopped | PermanentlyFailed
//!   └─ restart:
//!        ├─ restart set from RestartStrategy (OneForOne | OneForAll | RestForOne)
//!        ├─ intensity window full ─► stop tree, escalate (RestartIntensityExceeded)
//!        └─ stop set (reverse order) ─► backoff ─► respawn (fresh HandleId)
//!
//! stop ─► cancel children in reverse order (bounded by grace) ─► SharedState::cleanup
//! ```
//!
//! ## Features
//! | Area            | Description                                              | Key types / functions                          |
//! |-----------------|----------------------------------------------------------|------------------------------------------------|
//! | **Channels**    | Bounded FIFO queues with blocking/non-blocking ops.      | [`Channel`], [`Flags`], [`Message`]            |
//! | **Patterns**    | Pub/Sub, Push/Pull, Req/Rep on top of channels.          | [`publish`], [`push`], [`request`]             |
//! | **Transports**  | inproc, ipc, tcp, udp, reliable multicast.               | [`Endpoint`], [`Transport`], [`Link`]          |
//! | **Supervision** | Restart strategies, intensity limits, dependencies.      | [`Supervisor`], [`ChildSpec`], [`SharedState`] |
//! | **Policies**    | Per-child restart and backoff.                           | [`RestartPolicy`], [`BackoffPolicy`]           |
//! | **Events**      | Lifecycle events for logging and metrics.                | [`Event`], [`Subscribe`]                       |
//! | **Runtime**     | Explicit context and a fixed worker pool.                | [`RuntimeContext`], [`Runtime`]                |
//!
//! ## Optional features
//! - `logging` (default): exports the built-in [`LogWriter`] subscriber.
//!
//! ## Example
//! ```rust
//! use tokio_util::sync::CancellationToken;
//! use chanvisor::{
//!     ChildSpec, Flags, Pattern, RuntimeConfig, RuntimeContext, SupervisorConfig, TaskError,
//!     TaskFn, TaskRef,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = RuntimeContext::builder(RuntimeConfig::default()).build();
//!
//!     let results = ctx.channel(Pattern::Pull, 16)?;
//!     ctx.bind(&results, "inproc://results").await?;
//!     let out = ctx.channel(Pattern::Push, 16)?;
//!     ctx.connect(&out, "inproc://results").await?;
//!
//!     let worker: TaskRef = TaskFn::with_args("worker", out, |out, ctx: CancellationToken| async move {
//!         chanvisor::push(&out, "done", Flags::empty())
//!             .await
//!             .map_err(|e| TaskError::fail(e.to_string()))?;
//!         ctx.cancelled().await;
//!         Ok::<_, TaskError>(())
//!     });
//!
//!     let sup = ctx.supervisor("app", SupervisorConfig::default());
//!     sup.register(ChildSpec::new(worker))?;
//!     sup.start().await?;
//!
//!     let msg = chanvisor::pull(&results, Flags::empty()).await?;
//!     assert_eq!(msg.payload().as_ref(), b"done");
//!
//!     sup.stop().await?;
//!     ctx.teardown().await;
//!     Ok(())
//! }
//! ```
mod channel;
mod config;
mod error;
mod events;
mod policies;
mod runtime;
mod subscribers;
mod tasks;

pub mod message;
pub mod patterns;
pub mod supervisor;
pub mod transport;

// ---- Public re-exports ----

pub use channel::{Channel, ChannelId, Pattern};
pub use config::{
    DEFAULT_MAX_FRAME_LEN, MulticastConfig, RuntimeConfig, SupervisorConfig, TransportConfig,
};
pub use error::{ChannelError, RuntimeError, SupervisorError, TaskError, TransportError};
pub use events::{Bus, Event, EventKind};
pub use message::{Flags, Message, MessageKind};
pub use patterns::{
    PublishReport, Request, publish, pull, push, recv_request, request, request_parts, subscribe,
    subscriptions, unsubscribe,
};
pub use policies::{BackoffPolicy, JitterPolicy, RestartPolicy};
pub use runtime::{Runtime, RuntimeContext, RuntimeContextBuilder, wait_for_shutdown_signal};
pub use subscribers::{Subscribe, SubscriberSet};
pub use supervisor::{
    ChildSnapshot, ChildSpec, ChildState, ExitCause, HandleId, RestartStrategy, SharedState,
    Supervisor, SupervisorBuilder,
};
pub use tasks::{BoxTaskFuture, Task, TaskFn, TaskRef, TaskWithArgs};
pub use transport::{Dispatch, Endpoint, IntoEndpoint, Link, LinkStats, Protocol, Transport};

// Optional: built-in logger subscriber.
// Enable with: `--features logging` (on by default)
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
