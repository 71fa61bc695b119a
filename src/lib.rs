// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # agents
//!
//! Lightweight agent runtime: one supervised unit multiplexes ZeroMQ
//! sockets, Router/Dealer and pub/sub relays, daemon workers and
//! transport-agnostic connection pools.
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! agents = "0.3"  # Default: core + web modules
//! ```
//!
//! ## Feature Flags
//!
//! - **`web`** (default): webserver and websocket modules (axum)
//! - **`file-logging`**: JSON log files with rotation
//!
//! ## Usage
//!
//! ```rust,no_run
//! use agents::prelude::*;
//! use serde_json::json;
//!
//! let config = load_config(None, None)?;
//! let agent = Agent::start(config, |agent| {
//!     agent.create_notification_broker(
//!         "tcp://127.0.0.1:5001",
//!         "tcp://127.0.0.1:5002",
//!         &SocketOptions::new(),
//!     )?;
//!     let client = agent.create_notification_client(
//!         "tcp://127.0.0.1:5001",
//!         "tcp://127.0.0.1:5002",
//!         &SocketOptions::new(),
//!         "",
//!     )?;
//!     client.publish("status", &json!({"ready": true}))?;
//!     Ok(())
//! })?;
//!
//! agent.shutdown();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Foundation
pub use agents_config as config;
pub use agents_observability as observability;

// Runtime
pub use agents_core as core;

// Outer surfaces
#[cfg(feature = "web")]
pub use agents_web as web;

/// Prelude - commonly used types and traits
pub mod prelude {
    pub use crate::config::{load_config, AgentsConfig, PoolConfig, WebConfig};
    pub use crate::core::messaging::{
        AsyncConnection, AsyncConnectionPool, Connection, ConnectionInfo, ConnectionPool,
        SyncConnectionPool,
    };
    pub use crate::core::{
        Agent, AgentError, AgentResult, AgentState, DaemonJob, Dealer, ExitSignal, Module,
        NotificationClient, Router, SocketOption, SocketOptions, SocketType,
    };
    pub use crate::observability::{init_logging, parse_debug_flags};

    #[cfg(feature = "web")]
    pub use crate::web::{WebSocketModule, WebServerModule};
}
