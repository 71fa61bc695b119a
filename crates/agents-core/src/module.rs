// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Pluggable agent modules
//!
//! A module is set up when it is registered and shut down, in registration
//! order, at the start of the agent's shutdown sequence. Modules that need
//! the agent later keep the `Agent` handle passed to `setup`.

use crate::agent::{generate_uid, Agent};
use crate::error::AgentResult;

pub trait Module: Send {
    fn uid(&self) -> &str;

    /// Called once by [`Agent::register_module`]
    fn setup(&mut self, agent: &Agent) -> AgentResult<()>;

    /// Must return promptly; long-running work belongs on an agent thread
    fn shutdown(&mut self);
}

/// Use the given uid, or generate one
pub fn module_uid(uid: Option<&str>) -> String {
    match uid {
        Some(uid) if !uid.is_empty() => uid.to_string(),
        _ => generate_uid(),
    }
}
