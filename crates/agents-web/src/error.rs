// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use agents_core::AgentError;

pub type WebResult<T> = Result<T, WebError>;

#[derive(Debug, thiserror::Error)]
pub enum WebError {
    /// A call that is only valid before the server starts (or after it)
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Agent(#[from] AgentError),
}

impl From<WebError> for AgentError {
    fn from(err: WebError) -> Self {
        match err {
            WebError::Configuration(reason) => AgentError::Configuration(reason),
            WebError::Io(e) => AgentError::Io(e),
            WebError::Agent(e) => e,
            bind @ WebError::Bind { .. } => AgentError::SetupFailure(bind.to_string()),
        }
    }
}
