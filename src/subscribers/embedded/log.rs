//! # LogWriter: events as `tracing` records
//!
//! Renders every [`Event`] through the `tracing` facade so the host application's
//! subscriber (fmt, json, OpenTelemetry...) decides where it goes. Failures and
//! escalations log at `warn`/`error`, lifecycle at `info`, message-level noise at
//! `debug`.

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let label = e.kind.as_label();
        match e.kind {
            EventKind::ChannelOpened | EventKind::ChannelClosed | EventKind::ChannelDestroyed => {
                tracing::debug!(seq = e.seq, channel = ?e.channel, pattern = ?e.pattern, count = ?e.count, "{label}");
            }
            EventKind::MessageDropped => {
                tracing::debug!(seq = e.seq, channel = ?e.channel, reason = ?e.reason, "{label}");
            }
            EventKind::TransportBound | EventKind::TransportConnected | EventKind::PeerConnected => {
                tracing::info!(seq = e.seq, channel = ?e.channel, endpoint = ?e.endpoint, peer = ?e.reason, "{label}");
            }
            EventKind::TransportFailed => {
                tracing::warn!(seq = e.seq, channel = ?e.channel, endpoint = ?e.endpoint, err = ?e.reason, "{label}");
            }
            EventKind::SupervisorStarted
            | EventKind::SupervisorStopped
            | EventKind::SharedStateInitialized
            | EventKind::SharedStateCleaned => {
                tracing::info!(seq = e.seq, supervisor = ?e.supervisor, children = ?e.count, "{label}");
            }
            EventKind::ChildStarted => {
                tracing::info!(seq = e.seq, supervisor = ?e.supervisor, child = ?e.child, attempt = ?e.attempt, "{label}");
            }
            EventKind::ChildExited => {
                tracing::info!(seq = e.seq, supervisor = ?e.supervisor, child = ?e.child, cause = ?e.reason, "{label}");
            }
            EventKind::ChildRestarted => {
                tracing::warn!(
                    seq = e.seq,
                    supervisor = ?e.supervisor,
                    child = ?e.child,
                    attempt = ?e.attempt,
                    delay_ms = ?e.delay_ms,
                    "{label}"
                );
            }
            EventKind::ChildPermanentlyFailed | EventKind::RestartIntensityExceeded => {
                tracing::error!(
                    seq = e.seq,
                    supervisor = ?e.supervisor,
                    child = ?e.child,
                    restarts = ?e.count,
                    reason = ?e.reason,
                    "{label}"
                );
            }
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked => {
                tracing::warn!(seq = e.seq, reason = ?e.reason, "{label}");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
