//! Integration tests for the bound SP PUB and SUB sockets.
//!
//! Peers are dialed with `Pipe::connect`, the same way nanomsg producers and
//! consumers attach to the daemon.

use bytes::Bytes;
use sprelay_core::endpoint::Endpoint;
use sprelay_core::error::RelayError;
use sprelay_core::options::SocketOptions;
use sprelay_sp::{Pipe, Protocol, PubSocket, SubSocket};
use std::time::Duration;

fn loopback() -> Endpoint {
    Endpoint::parse("tcp://127.0.0.1:0").unwrap()
}

fn endpoint_of(addr: std::net::SocketAddr) -> Endpoint {
    Endpoint::Tcp(addr)
}

/// Poll `cond` for up to two seconds.
async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        compio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

#[compio::test]
async fn test_pub_fans_out_to_every_subscriber() {
    let mut publisher = PubSocket::bind_with_options(&loopback(), 2, SocketOptions::default())
        .await
        .unwrap();
    let ep = endpoint_of(publisher.local_addr());
    let opts = SocketOptions::default();

    let mut first = Pipe::connect(&ep, Protocol::Sub, &opts).await.unwrap();
    let mut second = Pipe::connect(&ep, Protocol::Sub, &opts).await.unwrap();
    wait_until(|| publisher.subscriber_count() == 2).await;

    publisher.send(Bytes::from_static(b"tick")).await.unwrap();
    publisher.send(Bytes::from_static(b"tock")).await.unwrap();

    for pipe in [&mut first, &mut second] {
        assert_eq!(pipe.recv().await.unwrap().unwrap(), "tick");
        assert_eq!(pipe.recv().await.unwrap().unwrap(), "tock");
    }
}

#[compio::test]
async fn test_late_subscriber_gets_no_history() {
    let mut publisher = PubSocket::bind_with_options(&loopback(), 1, SocketOptions::default())
        .await
        .unwrap();
    let ep = endpoint_of(publisher.local_addr());
    let opts = SocketOptions::default();

    let mut early = Pipe::connect(&ep, Protocol::Sub, &opts).await.unwrap();
    wait_until(|| publisher.subscriber_count() == 1).await;
    publisher.send(Bytes::from_static(b"before")).await.unwrap();
    assert_eq!(early.recv().await.unwrap().unwrap(), "before");

    let mut late = Pipe::connect(&ep, Protocol::Sub, &opts).await.unwrap();
    wait_until(|| publisher.subscriber_count() == 2).await;
    publisher.send(Bytes::from_static(b"after")).await.unwrap();

    assert_eq!(late.recv().await.unwrap().unwrap(), "after");
    assert_eq!(early.recv().await.unwrap().unwrap(), "after");
}

#[compio::test]
async fn test_send_without_subscribers_is_discarded() {
    let mut publisher = PubSocket::bind(&loopback()).await.unwrap();
    assert_eq!(publisher.subscriber_count(), 0);
    assert!(publisher.send(Bytes::from_static(b"void")).await.is_ok());
}

#[compio::test]
async fn test_idle_publisher_notices_departed_subscribers() {
    let publisher = PubSocket::bind_with_options(&loopback(), 2, SocketOptions::default())
        .await
        .unwrap();
    let ep = endpoint_of(publisher.local_addr());
    let opts = SocketOptions::default();

    let mut pipes = Vec::new();
    for _ in 0..3 {
        pipes.push(Pipe::connect(&ep, Protocol::Sub, &opts).await.unwrap());
    }
    wait_until(|| publisher.subscriber_count() == 3).await;

    // No message is ever sent: the hang-up alone must release them
    drop(pipes);
    wait_until(|| publisher.subscriber_count() == 0).await;
}

#[compio::test]
async fn test_stalled_subscriber_loses_messages_beyond_hwm() {
    const COUNT: u32 = 128;
    const SIZE: usize = 256 * 1024;

    let opts = SocketOptions::default().with_send_hwm(1);
    let mut publisher = PubSocket::bind_with_options(&loopback(), 2, opts)
        .await
        .unwrap();
    let ep = endpoint_of(publisher.local_addr());
    let peer_opts = SocketOptions::default();

    let mut stalled = Pipe::connect(&ep, Protocol::Sub, &peer_opts).await.unwrap();
    wait_until(|| publisher.subscriber_count() == 1).await;
    let mut reader = Pipe::connect(&ep, Protocol::Sub, &peer_opts).await.unwrap();
    wait_until(|| publisher.subscriber_count() == 2).await;

    // Far more than the kernel buffers of the stalled connection can hold
    let sending = async {
        for i in 0..COUNT {
            let mut msg = vec![0u8; SIZE];
            msg[..4].copy_from_slice(&i.to_be_bytes());
            publisher.send(Bytes::from(msg)).await.unwrap();

            let got = reader.recv().await.unwrap().unwrap();
            assert_eq!(&got[..4], &i.to_be_bytes());
        }
    };
    compio::time::timeout(Duration::from_secs(20), sending)
        .await
        .expect("a stalled subscriber held up the publisher");

    let mut seen = Vec::new();
    while let Ok(next) = compio::time::timeout(Duration::from_millis(500), stalled.recv()).await {
        let msg = next.unwrap().unwrap();
        assert_eq!(msg.len(), SIZE);
        seen.push(u32::from_be_bytes([msg[0], msg[1], msg[2], msg[3]]));
    }

    assert!(!seen.is_empty());
    assert!(seen.len() < COUNT as usize, "nothing dropped: got {}", seen.len());
    assert!(seen.windows(2).all(|w| w[0] < w[1]), "out of order: {:?}", seen);
}

#[compio::test]
async fn test_recv_survives_cancelled_read() {
    let mut publisher = PubSocket::bind_with_options(&loopback(), 1, SocketOptions::default())
        .await
        .unwrap();
    let ep = endpoint_of(publisher.local_addr());

    let mut consumer = Pipe::connect(&ep, Protocol::Sub, &SocketOptions::default())
        .await
        .unwrap();
    wait_until(|| publisher.subscriber_count() == 1).await;

    let idle = compio::time::timeout(Duration::from_millis(50), consumer.recv()).await;
    assert!(idle.is_err());

    publisher.send(Bytes::from_static(b"after timeout")).await.unwrap();
    assert_eq!(consumer.recv().await.unwrap().unwrap(), "after timeout");
}

#[compio::test]
async fn test_pub_rejects_pub_peer() {
    let publisher = PubSocket::bind_with_options(&loopback(), 1, SocketOptions::default())
        .await
        .unwrap();
    let ep = endpoint_of(publisher.local_addr());

    let result = Pipe::connect(&ep, Protocol::Pub, &SocketOptions::default()).await;
    assert!(matches!(result, Err(RelayError::IncompatiblePeer { .. })));

    compio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(publisher.subscriber_count(), 0);
}

#[compio::test]
async fn test_sub_receives_verbatim_in_order() {
    let mut subscriber = SubSocket::bind(&loopback()).await.unwrap();
    subscriber.subscribe(Bytes::new());
    let ep = endpoint_of(subscriber.local_addr());

    let producer = Pipe::connect(&ep, Protocol::Pub, &SocketOptions::default())
        .await
        .unwrap();

    let large: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();
    let messages: Vec<Vec<u8>> = vec![
        b"first".to_vec(),
        Vec::new(),
        vec![0x00, 0xFF, 0x00, b'S', b'P'],
        large,
        b"last".to_vec(),
    ];

    for msg in &messages {
        producer.send(msg).await.unwrap();
    }

    for expected in &messages {
        let got = subscriber.recv().await.unwrap();
        assert_eq!(got.as_ref(), expected.as_slice());
    }
}

#[compio::test]
async fn test_sub_filters_by_prefix() {
    let mut subscriber = SubSocket::bind(&loopback()).await.unwrap();
    subscriber.subscribe(Bytes::from_static(b"keep."));
    let ep = endpoint_of(subscriber.local_addr());

    let producer = Pipe::connect(&ep, Protocol::Pub, &SocketOptions::default())
        .await
        .unwrap();
    producer.send(b"drop.me").await.unwrap();
    producer.send(b"keep.me").await.unwrap();

    assert_eq!(subscriber.recv().await.unwrap(), "keep.me");
}

#[compio::test]
async fn test_sub_drops_oversized_peer_but_keeps_serving() {
    let opts = SocketOptions::default().with_max_msg_size(Some(16));
    let mut subscriber = SubSocket::bind_with_options(&loopback(), opts).await.unwrap();
    subscriber.subscribe(Bytes::new());
    let ep = endpoint_of(subscriber.local_addr());

    let greedy = Pipe::connect(&ep, Protocol::Pub, &SocketOptions::default())
        .await
        .unwrap();
    greedy.send(&[0u8; 64]).await.unwrap();

    let polite = Pipe::connect(&ep, Protocol::Pub, &SocketOptions::default())
        .await
        .unwrap();
    polite.send(b"small").await.unwrap();

    assert_eq!(subscriber.recv().await.unwrap(), "small");
}
