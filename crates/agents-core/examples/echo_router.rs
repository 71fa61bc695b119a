// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Router with two dealers trading a counter
//!
//! `d1` and `d2` each send an increasing counter to the other once per
//! second and print what they receive. Stop with Ctrl+C.
//!
//! Run with:
//! ```bash
//! cargo run -p agents-core --example echo_router
//! ```

use std::time::{Duration, Instant};

use agents_config::AgentsConfig;
use agents_core::{Agent, Dealer, ExitSignal, SocketOption, SocketOptions};
use agents_observability::{init_logging, parse_debug_flags};
use crossbeam::channel;
use serde_json::json;
use tracing::info;

const ADDRESS: &str = "tcp://127.0.0.1:5000";

fn main() -> anyhow::Result<()> {
    let config = AgentsConfig::default();
    let _guard = init_logging(&config.logging, &parse_debug_flags())?;

    let (dealers_tx, dealers_rx) = channel::bounded(1);
    let agent = Agent::start(config, move |agent| {
        agent.create_router(ADDRESS, &SocketOptions::new())?;
        let d1 = agent.create_dealer(ADDRESS, &SocketOptions::new().with(SocketOption::Identity, "d1"))?;
        let d2 = agent.create_dealer(ADDRESS, &SocketOptions::new().with(SocketOption::Identity, "d2"))?;
        let _ = dealers_tx.send((d1, d2));
        Ok(())
    })?;
    if !agent.boot_succeeded() {
        anyhow::bail!("boot failed: {:?}", agent.boot_error());
    }
    let (d1, d2) = dealers_rx.recv_timeout(Duration::from_secs(5))?;

    for (me, peer) in [(d1, "d2"), (d2, "d1")] {
        agent.spawn_thread(&format!("counter-{}", me.identity()), move |exit| {
            run_counter(&me, peer, exit)
        })?;
    }

    info!(agent = %agent.uid(), "router at {} (press Ctrl+C to stop)", ADDRESS);
    let exit = agent.exit_signal();
    while !exit.wait_timeout(Duration::from_secs(1)) {}
    Ok(())
}

fn run_counter(dealer: &Dealer, peer: &str, exit: ExitSignal) {
    let mut counter = 0u64;
    while !exit.is_set() {
        if let Err(e) = dealer.send(peer, &json!({ "counter": counter })) {
            info!("{} stopped sending: {}", dealer.identity(), e);
            return;
        }
        counter += 1;

        // Drain replies for the rest of the second
        let deadline = Instant::now() + Duration::from_secs(1);
        while Instant::now() < deadline {
            match dealer.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                Ok(Some(message)) => {
                    println!("{} <- {}: {}", dealer.identity(), message.target, message.payload)
                }
                Ok(None) => break,
                Err(_) => return,
            }
        }
    }
}
