// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Logging initialization
//!
//! Console output is always installed. With the `file-logging` feature a JSON
//! log is also written under a timestamped run folder:
//! ```text
//! ./logs/
//!   └── run_20250101_120000/
//!       └── agents.log.2025-01-01
//! ```

use std::path::{Path, PathBuf};

use agents_config::LoggingConfig;
use anyhow::Result;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::cli::CrateDebugFlags;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Keeps file writers alive; logs are flushed when it is dropped.
pub struct LoggingGuard {
    #[cfg(feature = "file-logging")]
    _file_guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
    log_dir: Option<PathBuf>,
    installed: bool,
}

impl LoggingGuard {
    /// Run folder receiving file logs, if file logging is active
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }

    /// False when another global subscriber was already installed
    pub fn installed(&self) -> bool {
        self.installed
    }
}

/// Build the `EnvFilter` from `RUST_LOG` when set, otherwise from the
/// configured level plus debug flags.
fn build_filter(config: &LoggingConfig, debug_flags: &CrateDebugFlags) -> EnvFilter {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::new(directives),
        _ => EnvFilter::new(debug_flags.to_filter_string_with_default(&config.level)),
    }
}

/// Initialize the global tracing subscriber
///
/// Calling this more than once is not an error: the first subscriber stays
/// in place and the returned guard reports `installed() == false`.
pub fn init_logging(config: &LoggingConfig, debug_flags: &CrateDebugFlags) -> Result<LoggingGuard> {
    let env_filter = build_filter(config, debug_flags);
    let mut layers: Vec<BoxedLayer> = Vec::new();

    let console_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_names(true)
            .with_filter(env_filter)
            .boxed()
    };
    layers.push(console_layer);

    #[cfg(feature = "file-logging")]
    let (file_guards, log_dir) = {
        let (layer, guard, run_folder) = file::combined_layer(config, debug_flags)?;
        layers.push(layer);
        (vec![guard], Some(run_folder))
    };
    #[cfg(not(feature = "file-logging"))]
    let log_dir = None;

    let installed = Registry::default().with(layers).try_init().is_ok();
    if !installed {
        tracing::debug!("Global subscriber already set; keeping the existing one");
    }

    Ok(LoggingGuard {
        #[cfg(feature = "file-logging")]
        _file_guards: file_guards,
        log_dir,
        installed,
    })
}

#[cfg(feature = "file-logging")]
mod file {
    use super::{build_filter, BoxedLayer};
    use crate::cli::CrateDebugFlags;
    use agents_config::LoggingConfig;
    use anyhow::{Context, Result};
    use chrono::{NaiveDateTime, Utc};
    use std::path::{Path, PathBuf};
    use tracing_appender::non_blocking::WorkerGuard;
    use tracing_appender::rolling;
    use tracing_subscriber::Layer;

    const RUN_PREFIX: &str = "run_";
    const RUN_FORMAT: &str = "%Y%m%d_%H%M%S";

    pub(super) fn combined_layer(
        config: &LoggingConfig,
        debug_flags: &CrateDebugFlags,
    ) -> Result<(BoxedLayer, WorkerGuard, PathBuf)> {
        let timestamp = Utc::now().format(RUN_FORMAT);
        let run_folder = config.log_dir.join(format!("{}{}", RUN_PREFIX, timestamp));
        std::fs::create_dir_all(&run_folder)
            .with_context(|| format!("Failed to create log directory: {}", run_folder.display()))?;

        cleanup_old_runs(&config.log_dir, config.retention_runs)?;

        let appender = rolling::daily(&run_folder, "agents.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .json()
            .with_filter(build_filter(config, debug_flags))
            .boxed();

        Ok((layer, guard, run_folder))
    }

    /// Keep only the most recent `retention_runs` run folders
    pub(super) fn cleanup_old_runs(base_log_dir: &Path, retention_runs: usize) -> Result<()> {
        if !base_log_dir.exists() {
            return Ok(());
        }

        let mut runs: Vec<(PathBuf, NaiveDateTime)> = Vec::new();
        for entry in std::fs::read_dir(base_log_dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let stamp = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix(RUN_PREFIX))
                .and_then(|s| NaiveDateTime::parse_from_str(s, RUN_FORMAT).ok());
            if let Some(stamp) = stamp {
                runs.push((path, stamp));
            }
        }

        if runs.len() <= retention_runs {
            return Ok(());
        }

        // Oldest first
        runs.sort_by_key(|(_, stamp)| *stamp);
        let excess = runs.len() - retention_runs;
        for (path, _) in runs.into_iter().take(excess) {
            if let Err(e) = std::fs::remove_dir_all(&path) {
                eprintln!(
                    "Warning: Failed to remove old log directory {}: {}",
                    path.display(),
                    e
                );
            }
        }
        Ok(())
    }

}
