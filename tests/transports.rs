use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;

use chanvisor::{
    Channel, ChannelError, Endpoint, Flags, MulticastConfig, Pattern, Protocol, RuntimeConfig,
    RuntimeContext, TransportConfig, TransportError, publish, pull, push, recv_request, request,
    subscribe,
};

const WAIT: Duration = Duration::from_secs(3);

fn ctx() -> RuntimeContext {
    RuntimeContext::builder(RuntimeConfig::default()).build()
}

#[tokio::test]
async fn tcp_request_reply_round_trip() {
    let ctx = ctx();
    let rep = ctx.channel(Pattern::Rep, 8).unwrap();
    let local = ctx.bind(&rep, "tcp://127.0.0.1:0").await.unwrap();
    assert_eq!(local.protocol(), Protocol::Tcp);
    assert_ne!(local.port(), 0);
    assert_eq!(rep.endpoint(), Some(local.clone()));

    let server = tokio::spawn(async move {
        for _ in 0..2 {
            let req = recv_request(&rep, Flags::empty()).await.unwrap();
            let body = req.text().unwrap();
            req.reply(body.to_uppercase()).await.unwrap();
        }
    });

    let req = ctx.channel(Pattern::Req, 8).unwrap();
    ctx.connect(&req, &local).await.unwrap();
    for word in ["hello", "world"] {
        let reply = request(&req, word, WAIT).await.unwrap();
        assert_eq!(reply.payload().as_ref(), word.to_uppercase().as_bytes());
    }
    server.await.unwrap();

    let stats = req.transport_stats().unwrap();
    assert_eq!(stats.messages_sent, 2);
    assert_eq!(stats.messages_received, 2);
    ctx.teardown().await;
}

#[tokio::test]
async fn tcp_subscriber_filters_inbound_topics() {
    let ctx = ctx();
    let sub = ctx.channel(Pattern::Sub, 8).unwrap();
    subscribe(&sub, "keep").unwrap();
    let local = ctx.bind(&sub, "tcp://127.0.0.1:0").await.unwrap();

    let publisher = ctx.channel(Pattern::Pub, 8).unwrap();
    ctx.connect(&publisher, local).await.unwrap();
    for (topic, body) in [("drop", "a"), ("keep", "b"), ("drop", "c"), ("keep", "d")] {
        publish(&publisher, Some(topic), body, Flags::empty())
            .await
            .unwrap();
    }

    for expected in ["b", "d"] {
        let msg = sub.receive_timeout(WAIT).await.unwrap();
        assert_eq!(msg.topic(), Some("keep"));
        assert_eq!(msg.payload().as_ref(), expected.as_bytes());
    }
    assert!(sub.is_empty());
}

#[tokio::test]
async fn tcp_connect_to_closed_port_is_refused() {
    let ctx = ctx();
    let scratch = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = scratch.local_addr().unwrap().port();
    drop(scratch);

    let push_ch = ctx.channel(Pattern::Push, 1).unwrap();
    let res = ctx.connect(&push_ch, format!("tcp://127.0.0.1:{port}")).await;
    assert!(matches!(
        res,
        Err(ChannelError::Transport(TransportError::Connect { .. }))
    ));
    assert!(!push_ch.is_closed());
}

#[cfg(unix)]
#[tokio::test]
async fn ipc_push_pull_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = format!("ipc://{}", dir.path().join("work.sock").display());
    let ctx = ctx();

    let pull_ch = ctx.channel(Pattern::Pull, 8).unwrap();
    ctx.bind(&pull_ch, endpoint.as_str()).await.unwrap();
    let push_ch = ctx.channel(Pattern::Push, 8).unwrap();
    ctx.connect(&push_ch, endpoint.as_str()).await.unwrap();

    for i in 0..5 {
        push(&push_ch, format!("job-{i}"), Flags::empty()).await.unwrap();
    }
    for i in 0..5 {
        let msg = tokio::time::timeout(WAIT, pull(&pull_ch, Flags::empty()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload().as_ref(), format!("job-{i}").as_bytes());
    }

    pull_ch.close();
    assert!(!dir.path().join("work.sock").exists());
}

#[tokio::test]
async fn udp_datagrams_reach_the_bound_pull() {
    let ctx = ctx();
    let pull_ch = ctx.channel(Pattern::Pull, 8).unwrap();
    let local = ctx.bind(&pull_ch, "udp://127.0.0.1:0").await.unwrap();

    let push_ch = ctx.channel(Pattern::Push, 8).unwrap();
    ctx.connect(&push_ch, &local).await.unwrap();
    for body in ["one", "two", "three"] {
        push(&push_ch, body, Flags::empty()).await.unwrap();
    }
    for body in ["one", "two", "three"] {
        let msg = pull_ch.receive_timeout(WAIT).await.unwrap();
        assert_eq!(msg.payload().as_ref(), body.as_bytes());
    }
}

#[tokio::test]
async fn reliable_multicast_unicast_delivery_with_stats() {
    let ctx = ctx();
    let sub = ctx.channel(Pattern::Sub, 16).unwrap();
    subscribe(&sub, "ticks").unwrap();
    let local = ctx.bind(&sub, "rmcast://127.0.0.1:0").await.unwrap();
    assert_eq!(local.protocol(), Protocol::ReliableMulticast);

    let publisher = ctx.channel(Pattern::Pub, 16).unwrap();
    ctx.connect(&publisher, Endpoint::parse(&local.to_string()).unwrap())
        .await
        .unwrap();
    for i in 0..10 {
        publish(&publisher, Some("ticks"), format!("{i}"), Flags::empty())
            .await
            .unwrap();
    }
    for i in 0..10 {
        let msg = sub.receive_timeout(WAIT).await.unwrap();
        assert_eq!(msg.payload().as_ref(), format!("{i}").as_bytes());
    }

    let sent = publisher.transport_stats().unwrap();
    assert_eq!(sent.messages_sent, 10);
    let received = sub.transport_stats().unwrap();
    assert_eq!(received.messages_received, 10);
    assert_eq!(received.lost, 0);
}

/// UDP relay between one sender and `receiver` that drops DATA datagrams with
/// sequence `seq`: only the first copy, or every copy when `always` is set.
async fn lossy_relay(receiver: SocketAddr, seq: u64, always: bool) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65_536];
        let mut sender = None;
        let mut dropped = false;
        while let Ok((n, from)) = socket.recv_from(&mut buf).await {
            let datagram = &buf[..n];
            if from == receiver {
                if let Some(sender) = sender {
                    let _ = socket.send_to(datagram, sender).await;
                }
                continue;
            }
            sender = Some(from);
            let is_data = datagram.first() == Some(&1);
            let hit = datagram
                .get(9..17)
                .is_some_and(|raw| raw == seq.to_be_bytes().as_slice());
            if is_data && hit && (always || !dropped) {
                dropped = true;
                continue;
            }
            let _ = socket.send_to(datagram, receiver).await;
        }
    });
    addr
}

async fn rmcast_through_relay(
    cfg: RuntimeConfig,
    always: bool,
) -> (RuntimeContext, Channel, Channel) {
    let ctx = RuntimeContext::builder(cfg).build();
    let sub = ctx.channel(Pattern::Sub, 16).unwrap();
    subscribe(&sub, "ticks").unwrap();
    let local = ctx.bind(&sub, "rmcast://127.0.0.1:0").await.unwrap();
    let receiver: SocketAddr = format!("127.0.0.1:{}", local.port()).parse().unwrap();
    let relay = lossy_relay(receiver, 1, always).await;

    let publisher = ctx.channel(Pattern::Pub, 16).unwrap();
    ctx.connect(
        &publisher,
        Endpoint::new(Protocol::ReliableMulticast, "127.0.0.1", relay.port()),
    )
    .await
    .unwrap();
    for body in ["zero", "one", "two"] {
        publish(&publisher, Some("ticks"), body, Flags::empty())
            .await
            .unwrap();
    }
    (ctx, sub, publisher)
}

#[tokio::test]
async fn reliable_multicast_retransmits_a_dropped_datagram_in_order() {
    let (_ctx, sub, publisher) = rmcast_through_relay(RuntimeConfig::default(), false).await;

    for body in ["zero", "one", "two"] {
        let msg = sub.receive_timeout(WAIT).await.unwrap();
        assert_eq!(msg.payload().as_ref(), body.as_bytes());
    }
    let sent = publisher.transport_stats().unwrap();
    assert_eq!(sent.messages_sent, 3);
    assert_eq!(sent.retransmitted, 1);
    let received = sub.transport_stats().unwrap();
    assert_eq!(received.messages_received, 3);
    assert_eq!(received.lost, 0);
}

#[tokio::test]
async fn reliable_multicast_skips_a_gap_after_the_retry_budget() {
    let cfg = RuntimeConfig {
        transport: TransportConfig {
            multicast: MulticastConfig {
                retry_budget: 2,
                nak_interval: Duration::from_millis(20),
                ..MulticastConfig::default()
            },
            ..TransportConfig::default()
        },
        ..RuntimeConfig::default()
    };
    let (_ctx, sub, publisher) = rmcast_through_relay(cfg, true).await;

    for body in ["zero", "two"] {
        let msg = sub.receive_timeout(WAIT).await.unwrap();
        assert_eq!(msg.payload().as_ref(), body.as_bytes());
    }
    assert!(sub.is_empty());
    assert_eq!(sub.transport_stats().unwrap().lost, 1);
    assert_eq!(publisher.transport_stats().unwrap().retransmitted, 2);
}

#[tokio::test]
async fn bind_twice_on_one_channel_is_rejected() {
    let ctx = ctx();
    let ch = ctx.channel(Pattern::Pull, 1).unwrap();
    ctx.bind(&ch, "tcp://127.0.0.1:0").await.unwrap();
    assert!(matches!(
        ctx.bind(&ch, "udp://127.0.0.1:0").await,
        Err(ChannelError::AlreadyAttached { .. })
    ));
    assert!(matches!(
        ctx.bind(&ch, "bogus://x").await,
        Err(ChannelError::Transport(TransportError::InvalidEndpoint { .. }))
    ));
}
