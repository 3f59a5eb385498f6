//! Inbound pump: moves messages received on a link into the channel buffer.
//!
//! One pump per attached link. The pump holds the channel weakly, so dropping the
//! last handle ends it; closing the channel cancels its token.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::channel::{Channel, Pattern};
use crate::error::TransportError;
use crate::events::{Event, EventKind};
use crate::transport::Link;

pub(crate) fn spawn(channel: &Channel, link: Arc<dyn Link>, token: CancellationToken) {
    let weak = channel.downgrade();
    let endpoint = link.local_endpoint().to_string();

    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                _ = token.cancelled() => break,
                received = link.receive() => received,
            };
            let Some(channel) = weak.upgrade() else {
                break;
            };

            match received {
                Ok(msg) => {
                    if channel.pattern() == Pattern::Sub && !channel.accepts(msg.topic()) {
                        continue;
                    }
                    let queued = tokio::select! {
                        _ = token.cancelled() => break,
                        queued = channel.enqueue(msg, None) => queued,
                    };
                    if queued.is_err() {
                        break;
                    }
                }
                Err(TransportError::Closed) => {
                    if !token.is_cancelled() && !channel.is_closed() {
                        tracing::debug!(channel = channel.id().get(), %endpoint, "link closed");
                        channel.park_fault(TransportError::Closed);
                    }
                    break;
                }
                Err(err) => {
                    tracing::debug!(channel = channel.id().get(), %endpoint, error = %err, "inbound transport failure");
                    channel.emit(
                        Event::new(EventKind::TransportFailed)
                            .with_endpoint(endpoint.as_str())
                            .with_reason(err.to_string()),
                    );
                    channel.park_fault(err);
                }
            }
        }
    });
}
