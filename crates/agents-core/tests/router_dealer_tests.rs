// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::{Duration, Instant};

use agents_config::{AgentsConfig, SetupFailurePolicy};
use agents_core::{Agent, Dealer, SocketKey, SocketOptions, SocketType};
use crossbeam::channel;
use serde_json::json;

const ROUTER_ADDRESS: &str = "tcp://127.0.0.1:56101";

fn config(uid: &str) -> AgentsConfig {
    let mut config = AgentsConfig::default();
    config.agent.uid = Some(uid.to_string());
    config.agent.install_signal_handlers = false;
    config.agent.setup_failure = SetupFailurePolicy::Report;
    config.agent.poll_interval_ms = 10;
    config
}

fn start_dealer(uid: &str) -> (Agent, Dealer) {
    let (tx, rx) = channel::bounded(1);
    let agent = Agent::start(config(uid), move |agent| {
        let dealer = agent.create_dealer(ROUTER_ADDRESS, &SocketOptions::new())?;
        let _ = tx.send(dealer);
        Ok(())
    })
    .expect("dealer agent starts");
    assert!(agent.boot_succeeded());
    let dealer = rx.recv_timeout(Duration::from_secs(1)).expect("dealer created");
    (agent, dealer)
}

#[test]
fn directed_message_reaches_only_its_target() {
    let router = Agent::start(config("router"), |agent| {
        agent.create_router(ROUTER_ADDRESS, &SocketOptions::new())?;
        Ok(())
    })
    .expect("router agent starts");
    assert!(router.has_socket(&SocketKey::new(SocketType::Router, ROUTER_ADDRESS)));

    let (d1_agent, d1) = start_dealer("d1");
    let (d2_agent, d2) = start_dealer("d2");
    assert_eq!(d1.identity(), "d1");

    // Both dealers are routable once a ping from d2 reaches d1
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut connected = false;
    while Instant::now() < deadline {
        d2.send("d1", &json!("ping")).unwrap();
        if let Some(message) = d1.recv_timeout(Duration::from_millis(100)).unwrap() {
            assert_eq!(message.target, "d2");
            connected = true;
            break;
        }
    }
    assert!(connected, "dealers never became routable");
    std::thread::sleep(Duration::from_millis(200));
    while d1.try_recv().unwrap().is_some() {}

    let payload = json!({"op": "add", "args": [1, 2]});
    d1.send("d2", &payload).unwrap();

    let received = d2
        .recv_timeout(Duration::from_secs(1))
        .unwrap()
        .expect("d2 receives the payload");
    assert_eq!(received.target, "d1");
    assert_eq!(received.payload, payload);
    assert!(d2.recv_timeout(Duration::from_millis(200)).unwrap().is_none());
    assert!(d1.recv_timeout(Duration::from_millis(200)).unwrap().is_none());

    d1_agent.shutdown();
    d2_agent.shutdown();
    router.shutdown();
}

#[test]
fn message_to_missing_dealer_is_dropped() {
    let address = "tcp://127.0.0.1:56102";
    let (tx, rx) = channel::bounded(1);
    let agent = Agent::start(config("lonely"), move |agent| {
        agent.create_router(address, &SocketOptions::new())?;
        let _ = tx.send(agent.create_dealer(address, &SocketOptions::new())?);
        Ok(())
    })
    .unwrap();
    let dealer = rx.recv_timeout(Duration::from_secs(1)).unwrap();

    dealer.send("nobody", &json!(1)).unwrap();
    assert!(dealer.recv_timeout(Duration::from_millis(300)).unwrap().is_none());
    assert_eq!(dealer.socket().queue_len(), 0);

    let started = Instant::now();
    agent.shutdown();
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn same_socket_cannot_be_registered_twice() {
    let address = "tcp://127.0.0.1:56103";
    let agent = Agent::start(config("twice"), move |agent| {
        agent.create_router(address, &SocketOptions::new())?;
        Ok(())
    })
    .unwrap();

    assert!(matches!(
        agent.create_router(address, &SocketOptions::new()),
        Err(agents_core::AgentError::SocketExists(_))
    ));
    agent.shutdown();
}
