//! # Publish/subscribe.
//!
//! A Pub channel fans each message out to every Sub peer whose filter set contains
//! the topic (exact string match). Delivery to one subscriber failing never aborts
//! delivery to the others; each failure is counted in the [`PublishReport`] and
//! reported as a `MessageDropped` event on the subscriber.

use crate::channel::{Channel, Offer, Pattern};
use crate::error::ChannelError;
use crate::message::{Flags, Message};
use crate::transport::Dispatch;

/// Outcome of one [`publish`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Destinations that accepted the message. An attached transport counts once.
    pub delivered: usize,
    /// Interested destinations that did not (full, closed, link failure).
    pub dropped: usize,
}

/// Adds `topic` to a Sub channel's filter set. Subscribing twice is a no-op.
pub fn subscribe(sub: &Channel, topic: &str) -> Result<(), ChannelError> {
    sub.ensure_pattern(Pattern::Sub)?;
    sub.add_subscription(topic);
    Ok(())
}

/// Removes `topic` from the filter set; returns whether it was present.
pub fn unsubscribe(sub: &Channel, topic: &str) -> Result<bool, ChannelError> {
    sub.ensure_pattern(Pattern::Sub)?;
    Ok(sub.remove_subscription(topic))
}

/// Current filter set, sorted.
pub fn subscriptions(sub: &Channel) -> Result<Vec<String>, ChannelError> {
    sub.ensure_pattern(Pattern::Sub)?;
    Ok(sub.subscription_list())
}

/// Publishes one message to every interested subscriber.
///
/// `topic = None` reaches subscribers of the empty topic. With `NON_BLOCKING`, a
/// full subscriber is skipped; otherwise the call waits for space at each
/// subscriber in turn. Publishing to nobody is not an error.
///
/// ## Example
/// ```rust
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), chanvisor::ChannelError> {
/// use chanvisor::{Flags, Message, Pattern, RuntimeConfig, RuntimeContext, publish, subscribe};
///
/// let ctx = RuntimeContext::builder(RuntimeConfig::default()).build();
/// let publisher = ctx.channel(Pattern::Pub, 4)?;
/// let sub = ctx.channel(Pattern::Sub, 4)?;
/// publisher.attach(&sub)?;
/// subscribe(&sub, "news")?;
///
/// let report = publish(&publisher, Some("news"), Message::text("hi"), Flags::empty()).await?;
/// assert_eq!(report.delivered, 1);
/// assert_eq!(sub.receive(Flags::empty()).await?.topic(), Some("news"));
/// # Ok(())
/// # }
/// ```
pub async fn publish(
    publisher: &Channel,
    topic: Option<&str>,
    payload: impl Into<Message>,
    flags: Flags,
) -> Result<PublishReport, ChannelError> {
    publisher.ensure_pattern(Pattern::Pub)?;
    if publisher.is_closed() {
        return Err(ChannelError::Closed);
    }

    let mut msg = payload.into();
    if let Some(topic) = topic {
        msg = msg.with_topic(topic);
    }
    let mut report = PublishReport::default();

    for sub in publisher.peers() {
        if !sub.accepts(topic) {
            continue;
        }
        let outcome = if flags.contains(Flags::NON_BLOCKING) {
            match sub.offer(msg.clone()) {
                Offer::Accepted => Ok(()),
                Offer::Full(_) => Err("full"),
                Offer::Closed(_) => Err("closed"),
            }
        } else {
            sub.enqueue(msg.clone(), None).await.map_err(|_| "closed")
        };
        match outcome {
            Ok(()) => report.delivered += 1,
            Err(reason) => {
                report.dropped += 1;
                sub.report_drop(reason);
            }
        }
    }

    if let Some(link) = publisher.link() {
        match link.send(msg, Dispatch::All).await {
            Ok(()) => report.delivered += 1,
            Err(err) => {
                tracing::debug!(channel = %publisher.id(), error = %err, "publish over link failed");
                report.dropped += 1;
                publisher.report_drop("transport");
            }
        }
    }
    Ok(report)
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
    async fn delivers_only_to_matching_subscribers() {
        let publisher = chan(1, Pattern::Pub, 1);
        let news = chan(2, Pattern::Sub, 4);
        let sport = chan(3, Pattern::Sub, 4);
        publisher.attach(&news).unwrap();
        publisher.attach(&sport).unwrap();
        subscribe(&news, "news").unwrap();
        subscribe(&news, "news").unwrap();
        subscribe(&sport, "sport").unwrap();

        let report = publish(&publisher, Some("news"), "headline", Flags::empty())
            .await
            .unwrap();
        assert_eq!(report, PublishReport { delivered: 1, dropped: 0 });
        assert_eq!(news.len(), 1);
        assert!(sport.is_empty());
        assert_eq!(subscriptions(&news).unwrap(), vec!["news".to_string()]);
    }

    #[tokio::test]
    async fn full_subscriber_does_not_block_the_rest() {
        let publisher = chan(1, Pattern::Pub, 1);
        let slow = chan(2, Pattern::Sub, 1);
        let fast = chan(3, Pattern::Sub, 4);
        for sub in [&slow, &fast] {
            publisher.attach(sub).unwrap();
            subscribe(sub, "t").unwrap();
        }
        slow.try_send(Message::text("backlog")).unwrap();

        let report = publish(&publisher, Some("t"), "x", Flags::NON_BLOCKING)
            .await
            .unwrap();
        assert_eq!(report, PublishReport { delivered: 1, dropped: 1 });
        assert_eq!(fast.len(), 1);
        assert_eq!(slow.len(), 1);
    }

    #[tokio::test]
    async fn absent_topic_matches_empty_subscription() {
        let publisher = chan(1, Pattern::Pub, 1);
        let sub = chan(2, Pattern::Sub, 2);
        publisher.attach(&sub).unwrap();

        let report = publish(&publisher, None, "a", Flags::empty()).await.unwrap();
        assert_eq!(report.delivered, 0);

        subscribe(&sub, "").unwrap();
        let report = publish(&publisher, None, "b", Flags::empty()).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(sub.try_receive(Flags::empty()).unwrap().as_text(), Some("b"));
    }

    #[test]
    fn subscribe_requires_sub_channel() {
        let publisher = chan(1, Pattern::Pub, 1);
        assert!(matches!(
            subscribe(&publisher, "t"),
            Err(ChannelError::PatternMismatch { expected: Pattern::Sub, .. })
        ));
    }
}
