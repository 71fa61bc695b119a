// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the agent runtime
//!
//! Bounded waits that expire are not errors; they return `Ok(None)`.

use crate::socket::SocketKey;

/// Result type alias for agent operations
pub type AgentResult<T> = Result<T, AgentError>;

/// Malformed or unencodable wire frames
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("expected 3 frames, got {0}")]
    FrameCount(usize),

    #[error("type tag frame must be exactly one byte, got {0} bytes")]
    TagLength(usize),

    #[error("unknown message type tag {0}")]
    UnknownTag(u8),

    #[error("expected a {expected} message, got tag {found}")]
    TagMismatch { expected: &'static str, found: u8 },

    #[error("frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} messages have no wire form")]
    NotEncodable(&'static str),
}

/// Errors raised by the agent supervisor, socket registry and relays
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("setup failed: {0}")]
    SetupFailure(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transport error: {0}")]
    Transport(#[from] zmq::Error),

    #[error("socket {0} is already registered")]
    SocketExists(SocketKey),

    #[error("outbound queue of {0} is full")]
    QueueFull(SocketKey),

    #[error("queue is closed")]
    QueueClosed,

    #[error("agent is not running")]
    NotRunning,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("certificate error: {0}")]
    Certificate(String),
}

impl From<agents_config::ConfigError> for AgentError {
    fn from(err: agents_config::ConfigError) -> Self {
        AgentError::Configuration(err.to_string())
    }
}

/// Backend failures of a single connection
///
/// A pool poller that sees one of these removes only the offending
/// connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection {0} is closed")]
    Closed(String),

    #[error("I/O error on connection {uid}: {reason}")]
    Io { uid: String, reason: String },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no connection with uid {0}")]
    UnknownConnection(String),

    #[error("connection {0} is already in the pool")]
    DuplicateConnection(String),
}

impl ConnectionError {
    pub fn io(uid: impl Into<String>, reason: impl ToString) -> Self {
        ConnectionError::Io {
            uid: uid.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::SocketType;

    #[test]
    fn test_messages_name_the_culprit() {
        let key = SocketKey::new(SocketType::Router, "tcp://127.0.0.1:5000");
        let exists = AgentError::SocketExists(key.clone()).to_string();
        assert!(exists.contains("tcp://127.0.0.1:5000"), "{}", exists);
        assert!(AgentError::QueueFull(key).to_string().contains("full"));

        let duplicate = ConnectionError::DuplicateConnection("ws-1".into());
        assert_eq!(duplicate.to_string(), "connection ws-1 is already in the pool");
    }
}
