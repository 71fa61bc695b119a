// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::{Duration, Instant};

use agents_config::{AgentsConfig, OverflowPolicy, SetupFailurePolicy};
use agents_core::{Agent, AgentError, SocketHandle, SocketOption, SocketOptions, SocketType};
use crossbeam::channel;

fn config() -> AgentsConfig {
    let mut config = AgentsConfig::default();
    config.agent.install_signal_handlers = false;
    config.agent.setup_failure = SetupFailurePolicy::Report;
    config.agent.poll_interval_ms = 10;
    config
}

fn start_with_pair(
    config: AgentsConfig,
    bind: (SocketType, &'static str, SocketOptions),
    connect: (SocketType, &'static str, SocketOptions),
) -> (Agent, SocketHandle, SocketHandle) {
    let (tx, rx) = channel::bounded(1);
    let agent = Agent::start(config, move |agent| {
        let bound = agent.bind_socket(bind.0, bind.1, &bind.2)?;
        let connected = agent.connect_socket(connect.0, connect.1, &connect.2)?;
        let _ = tx.send((bound, connected));
        Ok(())
    })
    .expect("agent starts");
    let (bound, connected) = rx.recv_timeout(Duration::from_secs(1)).expect("sockets opened");
    (agent, bound, connected)
}

#[test]
fn published_frames_reach_subscriber() {
    let address = "tcp://127.0.0.1:5500";
    let (agent, publisher, subscriber) = start_with_pair(
        config(),
        (SocketType::Pub, address, SocketOptions::new()),
        (
            SocketType::Sub,
            address,
            SocketOptions::new().with(SocketOption::Subscribe, ""),
        ),
    );

    // Wait out the subscription handshake
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut ready = false;
    while !ready && Instant::now() < deadline {
        publisher.send(vec![b"warmup".to_vec()]).unwrap();
        ready = subscriber.recv_timeout(Duration::from_millis(50)).unwrap().is_some();
    }
    assert!(ready, "subscriber never connected");
    std::thread::sleep(Duration::from_millis(100));
    while subscriber.try_recv().unwrap().is_some() {}

    let started = Instant::now();
    publisher
        .send(vec![b"t".to_vec(), b"hello world".to_vec()])
        .unwrap();
    let frames = subscriber
        .recv_timeout(Duration::from_millis(500))
        .unwrap()
        .expect("frames within 500ms");
    assert!(started.elapsed() <= Duration::from_millis(500));
    assert_eq!(frames, vec![b"t".to_vec(), b"hello world".to_vec()]);

    agent.shutdown();
    assert!(publisher.is_closed());
    assert!(matches!(subscriber.try_recv(), Err(AgentError::QueueClosed)));
}

#[test]
fn push_pull_preserves_order() {
    let address = "tcp://127.0.0.1:56301";
    let (agent, pull, push) = start_with_pair(
        config(),
        (SocketType::Pull, address, SocketOptions::new()),
        (SocketType::Push, address, SocketOptions::new()),
    );

    for i in 0..50u32 {
        push.send(vec![i.to_string().into_bytes()]).unwrap();
    }
    for i in 0..50u32 {
        let frames = pull
            .recv_timeout(Duration::from_secs(2))
            .unwrap()
            .expect("message arrives");
        assert_eq!(frames, vec![i.to_string().into_bytes()]);
    }
    agent.shutdown();
}

#[test]
fn bounded_queue_rejects_when_full() {
    let mut config = config();
    config.queues.outbound_capacity = 2;
    config.queues.overflow = OverflowPolicy::Reject;
    // Never started, so nothing drains the queue
    config.agent.boot_timeout_ms = 200;

    let (tx, rx) = channel::bounded(1);
    let (release_tx, release_rx) = channel::bounded::<()>(1);
    let agent = Agent::start(config, move |agent| {
        let push = agent.connect_socket(SocketType::Push, "tcp://127.0.0.1:56302", &SocketOptions::new())?;
        let _ = tx.send(push);
        // Hold boot open so the poller stays parked
        let _ = release_rx.recv_timeout(Duration::from_secs(5));
        Ok(())
    })
    .unwrap();

    let push = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    push.send(vec![b"1".to_vec()]).unwrap();
    push.send(vec![b"2".to_vec()]).unwrap();
    assert!(matches!(
        push.send(vec![b"3".to_vec()]),
        Err(AgentError::QueueFull(_))
    ));
    assert_eq!(push.queue_len(), 2);

    let _ = release_tx.send(());
    agent.shutdown();
}
