// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! Values are resolved in three tiers, later tiers winning:
//! 1. TOML file (base values, anything missing falls back to defaults)
//! 2. Environment variables (runtime overrides)
//! 3. CLI arguments (explicit user overrides)
//!
//! The merged result is validated before it is returned.

use crate::{validate_config, AgentsConfig, ConfigError, ConfigResult, OverflowPolicy};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "agents.toml";

/// Environment variable pointing at an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "AGENTS_CONFIG_PATH";

/// Find the agents configuration file
///
/// Search order:
/// 1. `AGENTS_CONFIG_PATH` environment variable
/// 2. Current working directory: `./agents.toml`
/// 3. Parent directories (up to 5 levels)
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::FileNotFound(format!(
            "Config file specified by {} not found: {}",
            CONFIG_PATH_ENV,
            path.display()
        )));
    }

    let mut search_paths = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join(CONFIG_FILE_NAME));

        let mut current = cwd.as_path();
        for _ in 0..5 {
            match current.parent() {
                Some(parent) => {
                    search_paths.push(parent.join(CONFIG_FILE_NAME));
                    current = parent;
                }
                None => break,
            }
        }
    }

    if let Some(found) = search_paths.iter().find(|p| p.exists()) {
        return Ok(found.clone());
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::FileNotFound(format!(
        "'{}' not found in any of these locations:\n{}\n\nSet {} to specify a custom location.",
        CONFIG_FILE_NAME, search_list, CONFIG_PATH_ENV
    )))
}

/// Load configuration from a TOML file
///
/// # Arguments
///
/// * `config_path` - Optional path to config file. If `None`, the file is searched for.
/// * `cli_args` - Optional CLI overrides keyed by dotted path (`agent.poll_interval_ms`)
///
/// # Errors
///
/// Returns error if the file is missing, contains invalid TOML, carries an
/// unparsable override, or fails validation
pub fn load_config(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<AgentsConfig> {
    let config_file = match config_path {
        Some(path) => path.to_path_buf(),
        None => find_config_file()?,
    };

    let content = fs::read_to_string(&config_file)?;
    let mut config: AgentsConfig = toml::from_str(&content)?;

    apply_environment_overrides(&mut config)?;
    if let Some(cli) = cli_args {
        apply_cli_overrides(&mut config, cli)?;
    }

    validate_config(&config)?;
    Ok(config)
}

/// Apply environment variable overrides to configuration
///
/// Supported environment variables:
/// - `AGENTS_POLL_INTERVAL_MS` -> `agent.poll_interval_ms`
/// - `AGENTS_LOG_LEVEL` -> `logging.level`
/// - `AGENTS_WEB_HOST` -> `web.host`
/// - `AGENTS_WEB_PORT` -> `web.port`
/// - `AGENTS_OUTBOUND_CAPACITY` -> `queues.outbound_capacity`
pub fn apply_environment_overrides(config: &mut AgentsConfig) -> ConfigResult<()> {
    let overrides = [
        ("AGENTS_POLL_INTERVAL_MS", "agent.poll_interval_ms"),
        ("AGENTS_LOG_LEVEL", "logging.level"),
        ("AGENTS_WEB_HOST", "web.host"),
        ("AGENTS_WEB_PORT", "web.port"),
        ("AGENTS_OUTBOUND_CAPACITY", "queues.outbound_capacity"),
    ];

    for (var, key) in overrides {
        if let Ok(value) = env::var(var) {
            apply_override(config, key, &value)
                .map_err(|e| ConfigError::InvalidValue(format!("{}: {}", var, e)))?;
        }
    }
    Ok(())
}

/// Apply CLI argument overrides to configuration
///
/// Keys are dotted section paths, e.g. `{"web.port": "9000"}`.
/// Unknown keys are rejected so typos do not go unnoticed.
pub fn apply_cli_overrides(
    config: &mut AgentsConfig,
    cli_args: &HashMap<String, String>,
) -> ConfigResult<()> {
    for (key, value) in cli_args {
        apply_override(config, key, value)?;
    }
    Ok(())
}

fn apply_override(config: &mut AgentsConfig, key: &str, value: &str) -> ConfigResult<()> {
    match key {
        "agent.uid" => config.agent.uid = Some(value.to_string()),
        "agent.poll_interval_ms" => config.agent.poll_interval_ms = parse(key, value)?,
        "agent.install_signal_handlers" => {
            config.agent.install_signal_handlers = parse_bool(key, value)?
        }
        "agent.setup_failure" => config.agent.setup_failure = parse_enum(key, value)?,
        "agent.max_socket_errors" => config.agent.max_socket_errors = parse(key, value)?,
        "agent.linger_ms" => config.agent.linger_ms = parse(key, value)?,
        "agent.boot_timeout_ms" => config.agent.boot_timeout_ms = parse(key, value)?,
        "queues.outbound_capacity" => config.queues.outbound_capacity = parse(key, value)?,
        "queues.overflow" => config.queues.overflow = parse_enum::<OverflowPolicy>(key, value)?,
        "pool.sync_poll_interval_ms" => config.pool.sync_poll_interval_ms = parse(key, value)?,
        "pool.async_cycle_sleep_ms" => config.pool.async_cycle_sleep_ms = parse(key, value)?,
        "pool.receive_timeout_ms" => config.pool.receive_timeout_ms = parse(key, value)?,
        "pool.error_threshold" => config.pool.error_threshold = parse(key, value)?,
        "web.host" => config.web.host = value.to_string(),
        "web.port" => config.web.port = parse(key, value)?,
        "web.websocket_route" => config.web.websocket_route = value.to_string(),
        "logging.level" => config.logging.level = value.to_string(),
        "logging.json" => config.logging.json = parse_bool(key, value)?,
        "logging.log_dir" => config.logging.log_dir = PathBuf::from(value),
        "logging.retention_runs" => config.logging.retention_runs = parse(key, value)?,
        _ => {
            return Err(ConfigError::InvalidValue(format!(
                "unknown configuration key '{}'",
                key
            )))
        }
    }
    Ok(())
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue(format!("{} = '{}'", key, value)))
}

fn parse_bool(key: &str, value: &str) -> ConfigResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue(format!("{} = '{}'", key, value))),
    }
}

/// Enum values reuse the serde names used in the TOML file
fn parse_enum<T: serde::de::DeserializeOwned>(key: &str, value: &str) -> ConfigResult<T> {
    <T as serde::Deserialize>::deserialize(toml::Value::String(value.trim().to_string()))
        .map_err(|_| ConfigError::InvalidValue(format!("{} = '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SetupFailurePolicy;
    use std::fs::File;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const OVERRIDE_VARS: [&str; 5] = [
        "AGENTS_POLL_INTERVAL_MS",
        "AGENTS_LOG_LEVEL",
        "AGENTS_WEB_HOST",
        "AGENTS_WEB_PORT",
        "AGENTS_OUTBOUND_CAPACITY",
    ];

    fn clear_override_vars() {
        for var in OVERRIDE_VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_find_config_file_env_var() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("custom.toml");
        File::create(&config_path).unwrap();

        env::set_var(CONFIG_PATH_ENV, config_path.to_str().unwrap());
        let result = find_config_file();
        env::remove_var(CONFIG_PATH_ENV);

        assert_eq!(result.unwrap(), config_path);
    }

    #[test]
    fn test_find_config_file_env_var_missing() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        env::set_var(CONFIG_PATH_ENV, "/definitely/not/here/agents.toml");
        let result = find_config_file();
        env::remove_var(CONFIG_PATH_ENV);

        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_minimal_config() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        clear_override_vars();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[agent]").unwrap();
        writeln!(file, "poll_interval_ms = 20").unwrap();
        writeln!(file, "[web]").unwrap();
        writeln!(file, "port = 9000").unwrap();

        let config = load_config(Some(&config_path), None).unwrap();

        assert_eq!(config.agent.poll_interval_ms, 20);
        assert_eq!(config.web.port, 9000);
        assert_eq!(config.pool.async_cycle_sleep_ms, 5);
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&config_path, "[agent\npoll_interval_ms = ").unwrap();

        let result = load_config(Some(&config_path), None);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_environment_overrides() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let mut config = AgentsConfig::default();

        env::set_var("AGENTS_WEB_HOST", "0.0.0.0");
        env::set_var("AGENTS_WEB_PORT", "9999");
        env::set_var("AGENTS_OUTBOUND_CAPACITY", "64");

        let result = apply_environment_overrides(&mut config);
        clear_override_vars();

        result.unwrap();
        assert_eq!(config.web.host, "0.0.0.0");
        assert_eq!(config.web.port, 9999);
        assert_eq!(config.queues.outbound_capacity, 64);
    }

    #[test]
    fn test_environment_override_unparsable() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let mut config = AgentsConfig::default();

        env::set_var("AGENTS_POLL_INTERVAL_MS", "fast");
        let result = apply_environment_overrides(&mut config);
        clear_override_vars();

        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = AgentsConfig::default();
        let mut cli_args = HashMap::new();
        cli_args.insert("web.host".to_string(), "10.0.0.1".to_string());
        cli_args.insert("queues.overflow".to_string(), "reject".to_string());
        cli_args.insert("agent.setup_failure".to_string(), "report".to_string());
        cli_args.insert("agent.install_signal_handlers".to_string(), "no".to_string());

        apply_cli_overrides(&mut config, &cli_args).unwrap();

        assert_eq!(config.web.host, "10.0.0.1");
        assert_eq!(config.queues.overflow, OverflowPolicy::Reject);
        assert_eq!(config.agent.setup_failure, SetupFailurePolicy::Report);
        assert!(!config.agent.install_signal_handlers);
    }

    #[test]
    fn test_cli_unknown_key() {
        let mut config = AgentsConfig::default();
        let mut cli_args = HashMap::new();
        cli_args.insert("agent.poll_intervl_ms".to_string(), "5".to_string());

        assert!(apply_cli_overrides(&mut config, &cli_args).is_err());
    }

    #[test]
    fn test_override_precedence() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        clear_override_vars();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[web]").unwrap();
        writeln!(file, "host = \"file-host\"").unwrap();
        writeln!(file, "port = 8000").unwrap();

        env::set_var("AGENTS_WEB_HOST", "env-host");
        env::set_var("AGENTS_WEB_PORT", "9000");

        let mut cli_args = HashMap::new();
        cli_args.insert("web.host".to_string(), "cli-host".to_string());

        let config = load_config(Some(&config_path), Some(&cli_args));
        clear_override_vars();
        let config = config.unwrap();

        // CLI wins for host, env wins for port (no CLI override)
        assert_eq!(config.web.host, "cli-host");
        assert_eq!(config.web.port, 9000);
    }

    #[test]
    fn test_load_runs_validation() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        clear_override_vars();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&config_path, "[pool]\nerror_threshold = 0\n").unwrap();

        let result = load_config(Some(&config_path), None);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }
}
