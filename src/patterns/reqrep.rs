//! # Request/reply with correlation ids.
//!
//! ```text
//! requester                             replier
//! ─────────                             ───────
//! request(req, body, timeout)
//!   ├─ corr = req.next_correlation_id()
//!   ├─ send part(s) ───────────────────► recv_request(rep)
//!   │   (MORE on all but the last)         ├─ first part
//!   │                                      └─ parts with the same corr until !MORE
//!   └─ wait for reply with corr ◄─────── request.reply(payload)   (consumes the request)
//! ```
//!
//! ## Rules
//! - While waiting, replies carrying other correlation ids stay buffered for the
//!   requesters they belong to.
//! - A request that times out is abandoned: its reply, if it ever comes, is dropped
//!   on arrival (`MessageDropped`, reason `late_reply`).
//! - All parts of one request go to the same replier. With several tasks calling
//!   `recv_request` on one Rep channel, the task that took the first part claims
//!   the rest of the body.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::channel::{Channel, Deadline, Pattern, deadline, within};
use crate::error::ChannelError;
use crate::message::{Flags, Message};
use crate::transport::Dispatch;

/// Sends a single-part request and waits for the correlated reply.
///
/// # Errors
/// - `Timeout`: no reply within `timeout` (the request is abandoned)
/// - `Closed`: the Req channel or the replier is closed
/// - `NoPeers`: nothing is wired or attached
pub async fn request(
    req: &Channel,
    payload: impl Into<Message>,
    timeout: Duration,
) -> Result<Message, ChannelError> {
    request_parts(req, [payload.into()], timeout).await
}

/// Sends a multi-part request body and waits for the correlated reply.
///
/// `MORE` is set on every part but the last; an empty body is sent as one empty
/// part.
pub async fn request_parts<I>(req: &Channel, parts: I, timeout: Duration) -> Result<Message, ChannelError>
where
    I: IntoIterator,
    I::Item: Into<Message>,
{
    req.ensure_pattern(Pattern::Req)?;
    if req.is_closed() {
        return Err(ChannelError::Closed);
    }

    let mut parts: Vec<Message> = parts.into_iter().map(Into::into).collect();
    if parts.is_empty() {
        parts.push(Message::default());
    }
    let corr = req.next_correlation_id();
    let until = deadline(timeout);

    let outcome = async {
        send_parts(req, &corr, parts, until).await?;
        req.take_matching(|m| m.correlation_id() == Some(&*corr), until)
            .await
    }
    .await;

    if matches!(outcome, Err(ChannelError::Timeout { .. })) {
        req.abandon(&corr);
    }
    outcome
}

async fn send_parts(
    req: &Channel,
    corr: &Arc<str>,
    parts: Vec<Message>,
    until: Deadline,
) -> Result<(), ChannelError> {
    let last = parts.len() - 1;
    let framed = parts.into_iter().enumerate().map(|(i, part)| {
        let flags = if i < last { Flags::MORE } else { Flags::empty() };
        part.with_correlation_id(Arc::clone(corr)).with_flags(flags)
    });

    let peers = req.rotation();
    if peers.is_empty() {
        let link = req.link().ok_or(ChannelError::NoPeers)?;
        for part in framed {
            within(until, link.send(part, Dispatch::One)).await??;
        }
        return Ok(());
    }

    let rep = peers
        .into_iter()
        .find(|p| !p.is_closed())
        .ok_or(ChannelError::Closed)?;
    for part in framed {
        rep.enqueue(part.with_reply_to(req), until).await?;
    }
    Ok(())
}

/// A request taken off a Rep channel, answered with [`Request::reply`].
#[derive(Debug)]
pub struct Request {
    rep: Channel,
    correlation_id: Option<Arc<str>>,
    parts: Vec<Message>,
}

impl Request {
    /// Correlation id the reply will carry.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Body parts in arrival order (one for single-part requests).
    pub fn parts(&self) -> &[Message] {
        &self.parts
    }

    /// Payload of all parts concatenated.
    pub fn body(&self) -> Bytes {
        if let [single] = self.parts.as_slice() {
            return single.payload().clone();
        }
        let mut buf = BytesMut::with_capacity(self.parts.iter().map(Message::len).sum());
        for part in &self.parts {
            buf.extend_from_slice(part.payload());
        }
        buf.freeze()
    }

    /// Body as text, when every part is text.
    pub fn text(&self) -> Option<String> {
        self.parts
            .iter()
            .map(Message::as_text)
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.concat())
    }

    /// Sends the one reply to this request.
    ///
    /// In-process requests are answered into the requester's channel (waiting for
    /// space); requests that arrived over a transport are answered through the
    /// Rep channel's link, to the peer they came from.
    ///
    /// # Errors
    /// `Closed` when the in-process requester is closed or already dropped.
    pub async fn reply(self, payload: impl Into<Message>) -> Result<(), ChannelError> {
        let mut reply = payload.into();
        if let Some(corr) = &self.correlation_id {
            reply = reply.with_correlation_id(Arc::clone(corr));
        }

        let first = &self.parts[0];
        if let Some(requester) = first.reply_to() {
            let requester = requester.upgrade().ok_or(ChannelError::Closed)?;
            return requester.enqueue(reply, None).await;
        }
        let link = self.rep.link().ok_or(ChannelError::NoPeers)?;
        link.send(reply.with_origin(first.origin()), Dispatch::One)
            .await?;
        Ok(())
    }
}

/// Takes the next request off a Rep channel, collecting all of its parts.
///
/// `NON_BLOCKING` applies to the first part only; remaining parts of a started
/// request are awaited.
pub async fn recv_request(rep: &Channel, flags: Flags) -> Result<Request, ChannelError> {
    rep.ensure_pattern(Pattern::Rep)?;
    let first = rep.take_request(flags).await?;
    let correlation_id: Option<Arc<str>> = first.correlation_id().map(Arc::from);
    let _claim = match &correlation_id {
        Some(corr) if first.has_more() => Some(Claim {
            rep,
            corr: Arc::clone(corr),
        }),
        _ => None,
    };

    let mut more = first.has_more();
    let mut parts = vec![first];
    while more {
        let corr = correlation_id.as_deref();
        let next = rep
            .take_matching(|m| m.correlation_id() == corr, None)
            .await?;
        more = next.has_more();
        parts.push(next);
    }

    Ok(Request {
        rep: rep.clone(),
        correlation_id,
        parts,
    })
}

/// Released when the body is assembled or the receive is abandoned.
struct Claim<'a> {
    rep: &'a Channel,
    corr: Arc<str>,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.rep.release_claim(&self.corr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelId;
    use crate::events::Bus;

    fn chan(id: u64, pattern: Pattern, capacity: usize) -> Channel {
        Channel::open(ChannelId::new(id), pattern, capacity, Bus::new(64)).unwrap()
    }

    #[tokio::test]
    async fn reply_carries_the_request_correlation_id() {
        let req = chan(1, Pattern::Req, 4);
        let rep = chan(2, Pattern::Rep, 4);
        req.attach(&rep).unwrap();

        let server = {
            let rep = rep.clone();
            tokio::spawn(async move {
                let request = recv_request(&rep, Flags::empty()).await.unwrap();
                let echo = format!("echo:{}", request.text().unwrap());
                request.reply(Message::text(echo)).await.unwrap();
            })
        };

        let reply = request(&req, "ping", Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply.as_text(), Some("echo:ping"));
        assert!(reply.correlation_id().is_some());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn multi_part_body_is_assembled() {
        let req = chan(1, Pattern::Req, 4);
        let rep = chan(2, Pattern::Rep, 8);
        req.attach(&rep).unwrap();

        let server = {
            let rep = rep.clone();
            tokio::spawn(async move {
                let request = recv_request(&rep, Flags::empty()).await.unwrap();
                assert_eq!(request.parts().len(), 3);
                assert!(request.parts()[0].has_more());
                assert!(!request.parts()[2].has_more());
                let body = request.body();
                request.reply(Message::new(body)).await.unwrap();
            })
        };

        let reply = request_parts(&req, ["ab", "cd", "ef"], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(&reply.payload()[..], b"abcdef");
        server.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_repliers_never_split_a_body() {
        let req = chan(1, Pattern::Req, 4);
        let rep = chan(2, Pattern::Rep, 1);
        req.attach(&rep).unwrap();

        let workers: Vec<_> = (0..2)
            .map(|_| {
                let rep = rep.clone();
                tokio::spawn(async move {
                    while let Ok(request) = recv_request(&rep, Flags::empty()).await {
                        let body = request.text().unwrap_or_default();
                        if request.reply(Message::text(body)).await.is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();

        for _ in 0..200 {
            let reply = request_parts(&req, ["ab", "cd", "ef"], Duration::from_secs(5))
                .await
                .unwrap();
            assert_eq!(reply.as_text(), Some("abcdef"));
        }
        rep.close();
        for worker in workers {
            worker.await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_request_drops_its_late_reply() {
        let req = chan(1, Pattern::Req, 4);
        let rep = chan(2, Pattern::Rep, 4);
        req.attach(&rep).unwrap();

        let err = request(&req, "slow", Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, ChannelError::Timeout { .. }));

        let pending = recv_request(&rep, Flags::NON_BLOCKING).await.unwrap();
        pending.reply("too late").await.unwrap();
        assert!(req.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn buffered_request_does_not_keep_its_requester_alive() {
        let req = chan(1, Pattern::Req, 4);
        let rep = chan(2, Pattern::Rep, 4);
        req.attach(&rep).unwrap();

        let err = request(&req, "orphan", Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, ChannelError::Timeout { .. }));
        assert_eq!(rep.len(), 1);

        let weak = req.downgrade();
        drop(req);
        assert!(weak.upgrade().is_none());

        let pending = recv_request(&rep, Flags::NON_BLOCKING).await.unwrap();
        assert!(matches!(pending.reply("nobody").await, Err(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn request_without_replier_fails() {
        let req = chan(1, Pattern::Req, 1);
        assert!(matches!(
            request(&req, "x", Duration::from_millis(10)).await,
            Err(ChannelError::NoPeers)
        ));
    }
}
