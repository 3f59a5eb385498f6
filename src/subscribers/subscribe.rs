//! # Listener trait
//!
//! `Subscribe` is the typed extension point for observing the runtime. Each
//! subscriber is driven by a dedicated worker fed by a bounded queue owned by the
//! [`SubscriberSet`](crate::SubscriberSet).
//!
//! ## Contract
//! - Implementations may be slow (I/O, batching); they block neither the
//!   publisher nor other subscribers.
//! - On queue overflow, events for that subscriber are **dropped**.

use async_trait::async_trait;

use crate::events::Event;

/// Contract for event subscribers.
///
/// ```rust
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use async_trait::async_trait;
/// use chanvisor::{Event, EventKind, Subscribe};
///
/// #[derive(Default)]
/// struct RestartCounter(AtomicUsize);
///
/// #[async_trait]
/// impl Subscribe for RestartCounter {
///     async fn on_event(&self, ev: &Event) {
///         if ev.kind == EventKind::ChildRestarted {
///             self.0.fetch_add(1, Ordering::Relaxed);
///         }
///     }
///     fn name(&self) -> &'static str { "restart-counter" }
/// }
/// ```
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handle a single event.
    async fn on_event(&self, event: &Event);

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred capacity of this subscriber's queue.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
