use std::collections::BTreeSet;
use std::time::Duration;

use chanvisor::{
    ChannelError, Flags, Message, Pattern, RuntimeConfig, RuntimeContext, publish, pull, push,
    recv_request, request, subscribe, unsubscribe,
};

fn ctx() -> RuntimeContext {
    RuntimeContext::builder(RuntimeConfig::default()).build()
}

fn text(msg: &Message) -> String {
    String::from_utf8_lossy(msg.payload()).into_owned()
}

#[tokio::test]
async fn messages_come_out_in_send_order() {
    let ctx = ctx();
    let ch = ctx.channel(Pattern::Point2Point, 16).unwrap();

    for i in 0..16 {
        ch.send(format!("m{i}"), Flags::empty()).await.unwrap();
    }
    for i in 0..16 {
        let msg = ch.receive(Flags::empty()).await.unwrap();
        assert_eq!(text(&msg), format!("m{i}"));
    }
    assert!(ch.is_empty());
}

#[tokio::test]
async fn non_blocking_send_on_full_channel_leaves_buffer_alone() {
    let ctx = ctx();
    let ch = ctx.channel(Pattern::Point2Point, 2).unwrap();
    ch.send("a", Flags::empty()).await.unwrap();
    ch.send("b", Flags::empty()).await.unwrap();

    let res = ch.send("c", Flags::NON_BLOCKING).await;
    assert!(matches!(res, Err(ChannelError::WouldBlock)));
    assert_eq!(ch.len(), 2);

    assert_eq!(text(&ch.receive(Flags::empty()).await.unwrap()), "a");
    assert_eq!(text(&ch.receive(Flags::empty()).await.unwrap()), "b");
}

#[tokio::test]
async fn close_drains_buffered_messages_then_reports_closed() {
    let ctx = ctx();
    let full = ctx.channel(Pattern::Point2Point, 3).unwrap();
    for i in 0..3 {
        full.send(format!("{i}"), Flags::empty()).await.unwrap();
    }
    let empty = ctx.channel(Pattern::Point2Point, 1).unwrap();

    let blocked_sender = {
        let full = full.clone();
        tokio::spawn(async move { full.send("late", Flags::empty()).await })
    };
    let blocked_receiver = {
        let empty = empty.clone();
        tokio::spawn(async move { empty.receive(Flags::empty()).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    full.close();
    empty.close();

    let sender = tokio::time::timeout(Duration::from_secs(1), blocked_sender)
        .await
        .expect("sender woken")
        .unwrap();
    assert!(matches!(sender, Err(ChannelError::Closed)));
    let receiver = tokio::time::timeout(Duration::from_secs(1), blocked_receiver)
        .await
        .expect("receiver woken")
        .unwrap();
    assert!(matches!(receiver, Err(ChannelError::Closed)));

    for i in 0..3 {
        assert_eq!(text(&full.receive(Flags::empty()).await.unwrap()), format!("{i}"));
    }
    assert!(matches!(full.receive(Flags::empty()).await, Err(ChannelError::Closed)));
    assert!(matches!(full.send("x", Flags::empty()).await, Err(ChannelError::Closed)));
    assert_eq!(full.destroy().unwrap(), 0);
}

#[tokio::test]
async fn publish_reaches_only_current_subscribers() {
    let ctx = ctx();
    let publisher = ctx.channel(Pattern::Pub, 4).unwrap();
    let news = ctx.channel(Pattern::Sub, 4).unwrap();
    let sports = ctx.channel(Pattern::Sub, 4).unwrap();
    publisher.attach(&news).unwrap();
    publisher.attach(&sports).unwrap();
    subscribe(&news, "news").unwrap();
    subscribe(&sports, "sports").unwrap();

    let report = publish(&publisher, Some("news"), "headline", Flags::empty())
        .await
        .unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(text(&news.try_receive(Flags::empty()).unwrap()), "headline");
    assert!(matches!(
        sports.try_receive(Flags::empty()),
        Err(ChannelError::WouldBlock)
    ));

    assert!(unsubscribe(&news, "news").unwrap());
    let report = publish(&publisher, Some("news"), "again", Flags::empty())
        .await
        .unwrap();
    assert_eq!(report.delivered, 0);
    assert!(news.is_empty());
    assert!(sports.is_empty());
}

#[tokio::test]
async fn concurrent_requesters_get_their_own_replies() {
    let ctx = ctx();
    let rep = ctx.channel(Pattern::Rep, 8).unwrap();
    ctx.bind(&rep, "inproc://echo").await.unwrap();
    let req = ctx.channel(Pattern::Req, 8).unwrap();
    ctx.connect(&req, "inproc://echo").await.unwrap();

    // Replies go out in reverse arrival order so they interleave at the requesters.
    let server = tokio::spawn(async move {
        let first = recv_request(&rep, Flags::empty()).await.unwrap();
        let second = recv_request(&rep, Flags::empty()).await.unwrap();
        for r in [second, first] {
            let body = r.text().unwrap();
            r.reply(format!("re:{body}")).await.unwrap();
        }
    });

    let r1 = {
        let req = req.clone();
        tokio::spawn(async move { request(&req, "one", Duration::from_secs(2)).await })
    };
    let r2 = {
        let req = req.clone();
        tokio::spawn(async move { request(&req, "two", Duration::from_secs(2)).await })
    };

    assert_eq!(text(&r1.await.unwrap().unwrap()), "re:one");
    assert_eq!(text(&r2.await.unwrap().unwrap()), "re:two");
    server.await.unwrap();
}

#[tokio::test]
async fn request_without_replier_times_out() {
    let ctx = ctx();
    let rep = ctx.channel(Pattern::Rep, 1).unwrap();
    let req = ctx.channel(Pattern::Req, 1).unwrap();
    req.attach(&rep).unwrap();

    let res = request(&req, "ping", Duration::from_millis(30)).await;
    assert!(matches!(res, Err(ChannelError::Timeout { .. })));
}

#[tokio::test]
async fn push_distributes_each_message_to_exactly_one_pull() {
    let ctx = ctx();
    let pusher = ctx.channel(Pattern::Push, 5).unwrap();
    ctx.bind(&pusher, "inproc://work").await.unwrap();

    let mut workers = Vec::new();
    let mut pulls = Vec::new();
    for _ in 0..2 {
        let pull_ch = ctx.channel(Pattern::Pull, 5).unwrap();
        ctx.connect(&pull_ch, "inproc://work").await.unwrap();
        pulls.push(pull_ch.clone());
        workers.push(tokio::spawn(async move {
            let mut got = Vec::new();
            while let Ok(msg) = pull(&pull_ch, Flags::empty()).await {
                got.push(text(&msg));
                tokio::task::yield_now().await;
            }
            got
        }));
    }

    let sent: BTreeSet<String> = (0..10).map(|i| format!("job-{i}")).collect();
    for job in &sent {
        push(&pusher, job.clone(), Flags::empty()).await.unwrap();
    }
    for p in &pulls {
        p.close();
    }

    let mut received = Vec::new();
    for w in workers {
        received.extend(w.await.unwrap());
    }
    assert_eq!(received.len(), 10);
    let unique: BTreeSet<String> = received.into_iter().collect();
    assert_eq!(unique, sent);
}

#[tokio::test]
async fn pattern_operations_check_the_channel_kind() {
    let ctx = ctx();
    let ch = ctx.channel(Pattern::Point2Point, 1).unwrap();
    assert!(matches!(
        push(&ch, "x", Flags::empty()).await,
        Err(ChannelError::PatternMismatch { .. })
    ));
    assert!(matches!(
        ctx.channel(Pattern::Point2Point, 0),
        Err(ChannelError::CapacityExceeded { .. })
    ));
}
