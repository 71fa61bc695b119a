// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Agent runtime core
//!
//! An [`Agent`] multiplexes ZeroMQ sockets and connection pools inside one
//! supervised unit.
//!
//! # Architecture
//!
//! - **`socket` / `poller`**: every raw socket is owned by the agent's single
//!   poller thread. Everyone else enqueues outbound frames on a
//!   [`SocketHandle`] and reads inbound frames from its channel.
//! - **`codec`**: the 3-frame wire format `[routing][tag][json]`.
//! - **`router`, `notifications`**: Router/Dealer and XSUB/XPUB relays that
//!   run inside the poller loop.
//! - **`auth`**: CURVE certificates and the ZAP handler.
//! - **`daemon`**: worker threads with pigeon-hole results.
//! - **`messaging`**: transport-agnostic connections, pools and pollers.
//!
//! # Example
//!
//! ```no_run
//! use agents_config::AgentsConfig;
//! use agents_core::{Agent, SocketOptions};
//! use serde_json::json;
//!
//! let agent = Agent::start(AgentsConfig::default(), |agent| {
//!     agent.create_router("tcp://127.0.0.1:5000", &SocketOptions::new())?;
//!     let dealer = agent.create_dealer("tcp://127.0.0.1:5000", &SocketOptions::new())?;
//!     dealer.send("someone", &json!({"hello": "world"}))?;
//!     Ok(())
//! })?;
//!
//! agent.shutdown();
//! # Ok::<(), agents_core::AgentError>(())
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod agent;
pub mod auth;
pub mod codec;
pub mod daemon;
pub mod error;
pub mod messaging;
pub mod module;
pub mod notifications;
mod poller;
pub mod router;
pub mod socket;

pub use agent::{generate_uid, Agent, AgentState, ExitSignal};
pub use auth::{
    create_certificates, curve_client_options, curve_keypair, curve_server_options,
    load_certificate, load_certificates, AuthConfig, Authenticator, Certificate, CurveLocation,
    ZAP_ENDPOINT,
};
pub use codec::{
    Directed, Envelope, JsonMessage, JsonSerializer, MessageKind, MessageSerializer, Multipart,
    Notification, WebsocketFrame,
};
pub use daemon::{DaemonJob, PigeonHoles};
pub use error::{AgentError, AgentResult, CodecError, ConnectionError};
pub use module::{module_uid, Module};
pub use notifications::{NotificationBroker, NotificationClient};
pub use router::{swap_route, Dealer, Router};
pub use socket::{
    ConnectMode, OptionValue, SocketHandle, SocketKey, SocketOption, SocketOptions, SocketType,
};
