// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! This module defines all configuration structs that map to sections in
//! `agents.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub agent: AgentConfig,
    pub queues: QueueConfig,
    pub pool: PoolConfig,
    pub web: WebConfig,
    pub logging: LoggingConfig,
}

/// What the boot thread does when user setup fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupFailurePolicy {
    /// Raise SIGTERM on the process; the agent cannot be considered running
    Terminate,
    /// Record the failure and let the caller inspect `boot_succeeded()`
    Report,
}

/// Agent supervisor and poller loop settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Explicit agent uid (generated when absent)
    pub uid: Option<String>,
    /// Bounded wait of one poller tick
    pub poll_interval_ms: u64,
    /// Run the shutdown sequence on SIGINT/SIGTERM
    pub install_signal_handlers: bool,
    pub setup_failure: SetupFailurePolicy,
    /// Consecutive I/O errors after which a socket is closed and deregistered
    pub max_socket_errors: u32,
    /// ZMQ linger applied to every socket created by the agent
    pub linger_ms: i32,
    /// Upper bound on waiting for the boot thread (0 = wait forever)
    pub boot_timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            uid: None,
            poll_interval_ms: 50,
            install_signal_handlers: true,
            setup_failure: SetupFailurePolicy::Terminate,
            max_socket_errors: 10,
            linger_ms: 0,
            boot_timeout_ms: 0,
        }
    }
}

impl AgentConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn boot_timeout(&self) -> Option<Duration> {
        (self.boot_timeout_ms > 0).then(|| Duration::from_millis(self.boot_timeout_ms))
    }
}

/// Overflow behaviour of a bounded outbound queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// The enqueuing caller blocks until the poller drains the queue
    Block,
    /// The oldest queued message is discarded (with a warning) to make room
    DropOldest,
    /// The enqueue call fails with a queue-full error
    Reject,
}

/// Outbound queue settings shared by every socket handle of an agent
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// 0 = unbounded
    pub outbound_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 0,
            overflow: OverflowPolicy::Block,
        }
    }
}

impl QueueConfig {
    pub fn is_bounded(&self) -> bool {
        self.outbound_capacity > 0
    }
}

/// Connection pool poller settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Sleep between sync poller cycles
    pub sync_poll_interval_ms: u64,
    /// Sleep between async poller cycles
    pub async_cycle_sleep_ms: u64,
    /// Per-connection receive timeout used by async backends
    pub receive_timeout_ms: u64,
    /// Consecutive receive failures before a connection is removed
    pub error_threshold: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            sync_poll_interval_ms: 1,
            async_cycle_sleep_ms: 5,
            receive_timeout_ms: 5,
            error_threshold: 1,
        }
    }
}

impl PoolConfig {
    pub fn sync_poll_interval(&self) -> Duration {
        Duration::from_millis(self.sync_poll_interval_ms)
    }

    pub fn async_cycle_sleep(&self) -> Duration {
        Duration::from_millis(self.async_cycle_sleep_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

/// Webserver / websocket module settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WebConfig {
    pub host: String,
    /// 0 = ephemeral port
    pub port: u16,
    pub websocket_route: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            websocket_route: "/ws".to_string(),
        }
    }
}

impl WebConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level directive (trace, debug, info, warn, error)
    pub level: String,
    /// Emit JSON lines on the console instead of human-readable text
    pub json: bool,
    /// Base directory for file logs (only used with file logging enabled)
    pub log_dir: PathBuf,
    pub retention_runs: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            log_dir: PathBuf::from("./logs"),
            retention_runs: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentsConfig::default();
        assert_eq!(config.agent.poll_interval_ms, 50);
        assert!(config.agent.install_signal_handlers);
        assert_eq!(config.agent.setup_failure, SetupFailurePolicy::Terminate);
        assert!(!config.queues.is_bounded());
        assert_eq!(config.pool.error_threshold, 1);
        assert_eq!(config.web.bind_address(), "127.0.0.1:8080");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AgentsConfig = toml::from_str(
            r#"
            [agent]
            uid = "relay"
            setup_failure = "report"

            [queues]
            outbound_capacity = 16
            overflow = "drop_oldest"
            "#,
        )
        .unwrap();

        assert_eq!(config.agent.uid.as_deref(), Some("relay"));
        assert_eq!(config.agent.setup_failure, SetupFailurePolicy::Report);
        assert_eq!(config.agent.poll_interval_ms, 50);
        assert_eq!(config.queues.outbound_capacity, 16);
        assert_eq!(config.queues.overflow, OverflowPolicy::DropOldest);
        assert_eq!(config.pool, PoolConfig::default());
    }
}
