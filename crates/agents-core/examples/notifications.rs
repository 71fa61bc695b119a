// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Notification broker with one sender and one listener
//!
//! The sender publishes a `news` notification every second. The listener
//! subscribes to every topic and prints what arrives. Stop with Ctrl+C.
//!
//! Run with:
//! ```bash
//! cargo run -p agents-core --example notifications
//! ```

use std::time::Duration;

use agents_config::AgentsConfig;
use agents_core::{Agent, SocketOptions};
use agents_observability::{init_logging, parse_debug_flags};
use serde_json::json;
use tracing::{info, warn};

const PUB_ADDRESS: &str = "tcp://127.0.0.1:5001";
const SUB_ADDRESS: &str = "tcp://127.0.0.1:5002";

fn main() -> anyhow::Result<()> {
    let config = AgentsConfig::default();
    let _guard = init_logging(&config.logging, &parse_debug_flags())?;

    // Each client lives in its own agent; a client never sees its own publishes.
    // Only the broker reacts to Ctrl+C, which ends the process.
    let mut client_config = config.clone();
    client_config.agent.install_signal_handlers = false;

    let broker = Agent::start(config, |agent| {
        agent.create_notification_broker(PUB_ADDRESS, SUB_ADDRESS, &SocketOptions::new())?;
        Ok(())
    })?;

    let sender = Agent::start(client_config.clone(), |agent| {
        let client = agent.create_notification_client(PUB_ADDRESS, SUB_ADDRESS, &SocketOptions::new(), "")?;
        agent.spawn_thread("sender", move |exit| {
            let mut sequence = 0u64;
            while !exit.wait_timeout(Duration::from_secs(1)) {
                if let Err(e) = client.publish("news", &json!({ "sequence": sequence })) {
                    warn!("sender stopped: {}", e);
                    return;
                }
                sequence += 1;
            }
        })
    })?;

    let listener = Agent::start(client_config, |agent| {
        let client = agent.create_notification_client(PUB_ADDRESS, SUB_ADDRESS, &SocketOptions::new(), "")?;
        agent.spawn_thread("listener", move |exit| {
            while !exit.is_set() {
                match client.recv_timeout(Duration::from_millis(200)) {
                    Ok(Some(n)) => println!("listener <- [{}] {}", n.topic, n.payload),
                    Ok(None) => {}
                    Err(_) => return,
                }
            }
        })
    })?;

    for agent in [&broker, &sender, &listener] {
        if !agent.boot_succeeded() {
            anyhow::bail!("{} failed to boot: {:?}", agent.uid(), agent.boot_error());
        }
    }

    info!(broker = %broker.uid(), "notifications running (press Ctrl+C to stop)");
    let exit = broker.exit_signal();
    while !exit.wait_timeout(Duration::from_secs(1)) {}
    Ok(())
}
