// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Web surfaces for agents
//!
//! - [`WebServerModule`]: HTTP routes served on an agent thread
//! - [`WebSocketModule`]: a web server whose websocket route feeds an async
//!   connection pool
//!
//! ```no_run
//! use agents_config::{AgentsConfig, PoolConfig};
//! use agents_core::Agent;
//! use agents_web::WebSocketModule;
//!
//! let config = AgentsConfig::default();
//! let module = WebSocketModule::new(config.web.clone(), PoolConfig::default())?;
//! let pool = module.pool();
//!
//! let agent = Agent::start(config, move |agent| agent.register_module(Box::new(module)))?;
//! while let Ok((uid, message)) = pool.inbound().recv() {
//!     pool.send_to(&uid, message);
//! }
//! # agent.shutdown();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod error;
pub mod webserver;
pub mod websocket;

pub use error::{WebError, WebResult};
pub use webserver::{ServerHandle, WebServerModule};
pub use websocket::{websocket_frame, WebSocketModule, WebsocketConnection};
