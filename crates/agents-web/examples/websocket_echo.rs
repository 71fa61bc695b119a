// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Websocket echo server
//!
//! Every JSON message received on `ws://127.0.0.1:8080/ws` is sent back to
//! the socket it came from. `GET /` answers with a short status line.
//!
//! Run with:
//! ```bash
//! cargo run -p agents-web --example websocket_echo
//! ```

use std::time::Duration;

use agents_config::AgentsConfig;
use agents_core::Agent;
use agents_observability::{init_logging, parse_debug_flags};
use agents_web::{websocket_frame, WebSocketModule};
use axum::http::Method;
use tracing::info;

async fn status() -> &'static str {
    "websocket echo is running"
}

fn main() -> anyhow::Result<()> {
    let config = AgentsConfig::default();
    let _guard = init_logging(&config.logging, &parse_debug_flags())?;

    let mut module = WebSocketModule::new(config.web.clone(), config.pool.clone())?;
    module.server().create_route(Method::GET, "/", status)?;
    let pool = module.pool();

    let agent = Agent::start(config, move |agent| agent.register_module(Box::new(module)))?;
    if !agent.boot_succeeded() {
        anyhow::bail!("boot failed: {:?}", agent.boot_error());
    }

    agent.spawn_thread("echo", move |exit| {
        while !exit.is_set() {
            if let Ok(message) = pool.inbound().recv_timeout(Duration::from_millis(100)) {
                let frame = websocket_frame(message);
                info!(connection = %frame.connection_id, "echo {}", frame.payload);
                pool.send_to(&frame.connection_id, frame.payload);
            }
        }
    })?;

    info!(agent = %agent.uid(), "listening on ws://{}{} (press Ctrl+C to stop)", agent.config().web.bind_address(), agent.config().web.websocket_route);
    let exit = agent.exit_signal();
    while !exit.wait_timeout(Duration::from_secs(1)) {}
    Ok(())
}
