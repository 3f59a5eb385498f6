//! # Push/pull work distribution.
//!
//! Each pushed message reaches exactly one Pull peer. Peers are tried in
//! round-robin order starting one past the previous push; the first one with room
//! takes the message.
//!
//! ```text
//! push(msg) ─► rotation [p1, p2, p3] ─► offer p1 ─ full ─► offer p2 ─ ok ─► done
//!                                        (all full) ─► NON_BLOCKING ? WouldBlock
//!                                                               : wait for any p ─► retry
//! ```

use futures::future::select_all;

use crate::channel::{Channel, Offer, Pattern};
use crate::error::ChannelError;
use crate::message::{Flags, Message};
use crate::transport::Dispatch;

/// Hands one message to exactly one Pull peer.
///
/// Without in-process peers the message goes out through the attached transport.
///
/// # Errors
/// - `WouldBlock`: every open peer is full and `NON_BLOCKING` is set
/// - `Closed`: the Push channel or every peer is closed
/// - `NoPeers`: nothing is wired or attached
pub async fn push(
    pusher: &Channel,
    payload: impl Into<Message>,
    flags: Flags,
) -> Result<(), ChannelError> {
    pusher.ensure_pattern(Pattern::Push)?;
    let mut msg = payload.into();

    loop {
        if pusher.is_closed() {
            return Err(ChannelError::Closed);
        }
        let peers = pusher.rotation();
        if peers.is_empty() {
            return match pusher.link() {
                Some(link) => Ok(link.send(msg, Dispatch::One).await?),
                None => Err(ChannelError::NoPeers),
            };
        }

        // register before offering so space freed mid-pass is not missed
        let mut waits = Vec::with_capacity(peers.len());
        for peer in &peers {
            let mut space = Box::pin(peer.space_changed());
            space.as_mut().enable();
            waits.push(space);
        }

        let mut open = 0;
        for peer in &peers {
            msg = match peer.offer(msg) {
                Offer::Accepted => return Ok(()),
                Offer::Full(back) => {
                    open += 1;
                    back
                }
                Offer::Closed(back) => back,
            };
        }

        if open == 0 {
            return Err(ChannelError::Closed);
        }
        if flags.contains(Flags::NON_BLOCKING) {
            return Err(ChannelError::WouldBlock);
        }
        select_all(waits).await;
    }
}

/// Takes the next work item from a Pull channel.
pub async fn pull(puller: &Channel, flags: Flags) -> Result<Message, ChannelError> {
    puller.ensure_pattern(Pattern::Pull)?;
    puller.receive(flags).await
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
    async fn round_robin_across_pullers() {
        let pusher = chan(1, Pattern::Push, 1);
        let a = chan(2, Pattern::Pull, 8);
        let b = chan(3, Pattern::Pull, 8);
        pusher.attach(&a).unwrap();
        pusher.attach(&b).unwrap();

        for i in 0..6 {
            push(&pusher, Message::text(format!("job-{i}")), Flags::empty())
                .await
                .unwrap();
        }
        assert_eq!(a.len(), 3);
        assert_eq!(b.len(), 3);
        assert_eq!(pull(&a, Flags::empty()).await.unwrap().as_text(), Some("job-0"));
        assert_eq!(pull(&b, Flags::empty()).await.unwrap().as_text(), Some("job-1"));
    }

    #[tokio::test]
    async fn full_peer_is_skipped() {
        let pusher = chan(1, Pattern::Push, 1);
        let busy = chan(2, Pattern::Pull, 1);
        let idle = chan(3, Pattern::Pull, 4);
        pusher.attach(&busy).unwrap();
        pusher.attach(&idle).unwrap();
        busy.try_send(Message::text("backlog")).unwrap();

        push(&pusher, "a", Flags::NON_BLOCKING).await.unwrap();
        push(&pusher, "b", Flags::NON_BLOCKING).await.unwrap();
        assert_eq!(idle.len(), 2);
    }

    #[tokio::test]
    async fn all_full_would_block_then_waits() {
        let pusher = chan(1, Pattern::Push, 1);
        let only = chan(2, Pattern::Pull, 1);
        pusher.attach(&only).unwrap();
        push(&pusher, "first", Flags::empty()).await.unwrap();

        assert!(matches!(
            push(&pusher, "second", Flags::NON_BLOCKING).await,
            Err(ChannelError::WouldBlock)
        ));

        let blocked = {
            let pusher = pusher.clone();
            tokio::spawn(async move { push(&pusher, "second", Flags::empty()).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(only.receive(Flags::empty()).await.unwrap().as_text(), Some("first"));
        blocked.await.unwrap().unwrap();
        assert_eq!(only.receive(Flags::empty()).await.unwrap().as_text(), Some("second"));
    }

    #[tokio::test]
    async fn peerless_push_fails_fast() {
        let pusher = chan(1, Pattern::Push, 1);
        assert!(matches!(push(&pusher, "x", Flags::empty()).await, Err(ChannelError::NoPeers)));

        let gone = chan(2, Pattern::Pull, 1);
        pusher.attach(&gone).unwrap();
        gone.close();
        assert!(matches!(push(&pusher, "x", Flags::empty()).await, Err(ChannelError::Closed)));
    }
}
