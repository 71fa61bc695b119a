// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # agents-observability
//!
//! Logging setup shared by every agent process, with per-crate debug flag
//! support.
//!
//! ## Features
//! - `file-logging`: JSON log files under a timestamped run folder with rotation

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod init;

pub use cli::*;
pub use init::*;

/// Known workspace crate names for debug flags
pub const KNOWN_CRATES: &[&str] = &[
    "agents",
    "agents-config",
    "agents-observability",
    "agents-core",
    "agents-web",
];
