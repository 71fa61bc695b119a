// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration validation
//!
//! Catches values that would make the runtime spin, never time out, or
//! listen somewhere it should not, before any thread is started.

use crate::{AgentsConfig, ConfigError, ConfigResult};

/// Validation errors that can occur during config validation
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    InvalidPortRange { port_name: String, port: u16 },
    MustBeNonZero { field: String },
    InvalidValue { field: String, reason: String },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPortRange { port_name, port } => write!(
                f,
                "Port {} = {} is outside valid range (1024-65535, or 0 for ephemeral)",
                port_name, port
            ),
            Self::MustBeNonZero { field } => write!(f, "{} must be greater than zero", field),
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid configuration value for {}: {}", field, reason)
            }
        }
    }
}

/// Validate the complete configuration
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` listing every problem found
pub fn validate_config(config: &AgentsConfig) -> ConfigResult<()> {
    let errors = collect_errors(config);
    if errors.is_empty() {
        return Ok(());
    }

    let error_messages = errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::ValidationError(format!(
        "Configuration validation failed:\n{}",
        error_messages
    )))
}

fn collect_errors(config: &AgentsConfig) -> Vec<ConfigValidationError> {
    let mut errors = Vec::new();

    let non_zero = [
        ("agent.poll_interval_ms", config.agent.poll_interval_ms),
        ("pool.receive_timeout_ms", config.pool.receive_timeout_ms),
        ("pool.error_threshold", u64::from(config.pool.error_threshold)),
        ("agent.max_socket_errors", u64::from(config.agent.max_socket_errors)),
    ];
    for (field, value) in non_zero {
        if value == 0 {
            errors.push(ConfigValidationError::MustBeNonZero {
                field: field.to_string(),
            });
        }
    }

    if config.web.port != 0 && config.web.port < 1024 {
        errors.push(ConfigValidationError::InvalidPortRange {
            port_name: "web.port".to_string(),
            port: config.web.port,
        });
    }

    if config.web.host.trim().is_empty() {
        errors.push(ConfigValidationError::InvalidValue {
            field: "web.host".to_string(),
            reason: "must not be empty".to_string(),
        });
    }

    let route = &config.web.websocket_route;
    if route.is_empty() || !route.starts_with('/') {
        errors.push(ConfigValidationError::InvalidValue {
            field: "web.websocket_route".to_string(),
            reason: format!("'{}' must start with '/'", route),
        });
    }

    if config.agent.linger_ms < -1 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "agent.linger_ms".to_string(),
            reason: "must be -1 (infinite) or a non-negative number of milliseconds"
                .to_string(),
        });
    }

    errors
}
