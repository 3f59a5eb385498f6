//! # Supervision trees.
//!
//! A [`Supervisor`] runs a set of named children ([`ChildSpec`]), detects their
//! exits, and restarts them according to:
//! - the per-child [`RestartPolicy`](crate::RestartPolicy) (does this exit count?)
//! - the supervisor's [`RestartStrategy`] (which siblings go with it?)
//! - the restart intensity limit (`max_restarts` within `window`, else escalate)
//! - the per-child [`BackoffPolicy`](crate::BackoffPolicy) (how long to wait)
//!
//! Children may depend on each other by name; start order is dependency-first and
//! stop order is its reverse. Supervisors nest through [`Supervisor::into_task`].

mod child;
mod dag;
mod intensity;
mod shared;
mod strategy;
mod tree;

pub use child::{ChildSnapshot, ChildSpec, ChildState, ExitCause, HandleId};
pub use shared::SharedState;
pub use strategy::RestartStrategy;
pub use tree::{Supervisor, SupervisorBuilder};
