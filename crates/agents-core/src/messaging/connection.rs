// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Transport-agnostic connection contract
//!
//! Backends move serialized strings. The provided methods wrap the
//! connection's [`MessageSerializer`]: `receive_message` yields the typed
//! [`JsonMessage`] envelope, `receive_data` the deserialized value.

use async_trait::async_trait;
use serde_json::Value;

use crate::codec::{JsonMessage, MessageSerializer};
use crate::error::ConnectionError;

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Identity shared by the sync and async contracts
pub trait ConnectionInfo: Send + Sync {
    /// Unique within the owning pool
    fn uid(&self) -> &str;

    fn serializer(&self) -> &dyn MessageSerializer;
}

/// Blocking-free connection driven from a plain thread
pub trait Connection: ConnectionInfo {
    fn send(&self, serialized: String) -> ConnectionResult<()>;

    /// Next serialized message, or `None` when nothing is pending
    fn receive(&self) -> ConnectionResult<Option<String>>;

    fn close(&self) -> ConnectionResult<()>;

    fn send_message(&self, message: &Value) -> ConnectionResult<()> {
        let serialized = self.serializer().serialize(message)?;
        self.send(serialized)
    }

    fn send_json(&self, message: &JsonMessage) -> ConnectionResult<()> {
        self.send(message.serialize()?)
    }

    fn receive_message(&self) -> ConnectionResult<Option<JsonMessage>> {
        Ok(self.receive_data()?.map(JsonMessage::new))
    }

    fn receive_data(&self) -> ConnectionResult<Option<Value>> {
        match self.receive()? {
            Some(raw) if !raw.is_empty() => Ok(Some(self.serializer().deserialize(&raw)?)),
            _ => Ok(None),
        }
    }
}

/// Connection whose I/O are suspension points on a tokio runtime
#[async_trait]
pub trait AsyncConnection: ConnectionInfo {
    async fn send_async(&self, serialized: String) -> ConnectionResult<()>;

    /// Receive with the backend's own bounded wait; `None` when it expired
    async fn receive_async(&self) -> ConnectionResult<Option<String>>;

    async fn close_async(&self) -> ConnectionResult<()>;

    async fn send_message_async(&self, message: &Value) -> ConnectionResult<()> {
        let serialized = self.serializer().serialize(message)?;
        self.send_async(serialized).await
    }

    async fn send_json_async(&self, message: &JsonMessage) -> ConnectionResult<()> {
        self.send_async(message.serialize()?).await
    }

    async fn receive_message_async(&self) -> ConnectionResult<Option<JsonMessage>> {
        Ok(self.receive_data_async().await?.map(JsonMessage::new))
    }

    async fn receive_data_async(&self) -> ConnectionResult<Option<Value>> {
        match self.receive_async().await? {
            Some(raw) if !raw.is_empty() => Ok(Some(self.serializer().deserialize(&raw)?)),
            _ => Ok(None),
        }
    }
}
