//! # Task abstractions.
//!
//! - [`Task`] trait for cancelable units of supervised work
//! - [`TaskFn`] / [`TaskWithArgs`] closure-backed implementations
//! - [`TaskRef`] shared reference (`Arc<dyn Task>`)

mod task;
mod task_fn;

pub use task::{BoxTaskFuture, Task, TaskRef};
pub use task_fn::{TaskFn, TaskWithArgs};
