// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Keyed connection registry with an inbound/outbound channel pair
//!
//! Connections are kept in insertion order. Pollers iterate over a
//! [`ConnectionPool::snapshot`], so adds and removes from other threads never
//! disturb a cycle in progress. Both channels are unbounded crossbeam
//! channels; they close when the pool is dropped.

use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use super::connection::{AsyncConnection, Connection, ConnectionInfo};
use crate::error::ConnectionError;

/// `(connection uid, message)`
pub type PoolMessage = (String, Value);

pub struct ConnectionPool<C: ?Sized> {
    uid: String,
    connections: RwLock<Vec<Arc<C>>>,
    inbound_tx: Sender<PoolMessage>,
    inbound_rx: Receiver<PoolMessage>,
    outbound_tx: Sender<PoolMessage>,
    outbound_rx: Receiver<PoolMessage>,
}

impl<C: ConnectionInfo + ?Sized> std::fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("uid", &self.uid)
            .field("connections", &self.uids())
            .finish()
    }
}

impl<C: ConnectionInfo + ?Sized> ConnectionPool<C> {
    pub fn new(uid: impl Into<String>) -> Self {
        let (inbound_tx, inbound_rx) = channel::unbounded();
        let (outbound_tx, outbound_rx) = channel::unbounded();
        Self {
            uid: uid.into(),
            connections: RwLock::new(Vec::new()),
            inbound_tx,
            inbound_rx,
            outbound_tx,
            outbound_rx,
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Append a connection
    ///
    /// Uids are unique within a pool. A connection whose uid is taken is
    /// rejected and left untouched, the one already pooled stays in place.
    pub fn add(&self, connection: Arc<C>) -> Result<(), ConnectionError> {
        let uid = connection.uid().to_string();
        let mut connections = self.connections.write();
        if connections.iter().any(|c| c.uid() == uid) {
            warn!(pool = %self.uid, connection = %uid, "connection uid already in pool");
            return Err(ConnectionError::DuplicateConnection(uid));
        }
        connections.push(connection);
        debug!(pool = %self.uid, connection = %uid, "added connection to pool");
        Ok(())
    }

    pub fn get_by_uid(&self, uid: &str) -> Option<Arc<C>> {
        self.connections
            .read()
            .iter()
            .find(|c| c.uid() == uid)
            .cloned()
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.connections.read().iter().any(|c| c.uid() == uid)
    }

    /// Uids in insertion order
    pub fn uids(&self) -> Vec<String> {
        self.connections
            .read()
            .iter()
            .map(|c| c.uid().to_string())
            .collect()
    }

    /// Copy of the current connections, in insertion order
    pub fn snapshot(&self) -> Vec<Arc<C>> {
        self.connections.read().clone()
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// `(uid, message)` received by the pool's poller
    pub fn inbound(&self) -> &Receiver<PoolMessage> {
        &self.inbound_rx
    }

    /// Queue `(uid, message)` for the poller to send
    pub fn outbound(&self) -> &Sender<PoolMessage> {
        &self.outbound_tx
    }

    /// Shortcut for `outbound().send((uid, message))`
    pub fn send_to(&self, uid: &str, message: Value) {
        // The pool owns the receiver, so the channel outlives every sender call
        let _ = self.outbound_tx.send((uid.to_string(), message));
    }

    pub(crate) fn publish(&self, uid: &str, message: Value) {
        let _ = self.inbound_tx.send((uid.to_string(), message));
    }

    pub(crate) fn pending_outbound(&self) -> &Receiver<PoolMessage> {
        &self.outbound_rx
    }

    /// Remove without closing
    fn detach(&self, uid: &str) -> Option<Arc<C>> {
        let mut connections = self.connections.write();
        let index = connections.iter().position(|c| c.uid() == uid)?;
        Some(connections.remove(index))
    }
}

impl<C: Connection + ?Sized> ConnectionPool<C> {
    pub fn remove(&self, connection: &C) -> bool {
        self.remove_by_uid(connection.uid())
    }

    /// Close the connection and delete it, both under the write lock
    pub fn remove_by_uid(&self, uid: &str) -> bool {
        let mut connections = self.connections.write();
        let index = match connections.iter().position(|c| c.uid() == uid) {
            Some(index) => index,
            None => return false,
        };
        debug!(pool = %self.uid, connection = %uid, "closing connection ...");
        if let Err(e) = connections[index].close() {
            warn!(pool = %self.uid, connection = %uid, "error while closing connection: {}", e);
        }
        connections.remove(index);
        debug!(pool = %self.uid, connection = %uid, "removed connection from pool");
        true
    }

    /// Send directly, bypassing the outbound channel
    pub fn send_message(&self, uid: &str, message: &Value) -> Result<(), ConnectionError> {
        let connection = self
            .get_by_uid(uid)
            .ok_or_else(|| ConnectionError::UnknownConnection(uid.to_string()))?;
        connection.send_message(message)
    }

    pub fn close_all(&self) {
        for uid in self.uids() {
            self.remove_by_uid(&uid);
        }
    }
}

impl<C: AsyncConnection + ?Sized> ConnectionPool<C> {
    pub async fn remove_async(&self, connection: &C) -> bool {
        self.remove_by_uid_async(connection.uid()).await
    }

    /// Delete the entry, then close the connection
    ///
    /// The entry is gone before the close is awaited, so no caller can find
    /// a connection that is being closed.
    pub async fn remove_by_uid_async(&self, uid: &str) -> bool {
        let connection = match self.detach(uid) {
            Some(connection) => connection,
            None => return false,
        };
        debug!(pool = %self.uid, connection = %uid, "closing connection ...");
        if let Err(e) = connection.close_async().await {
            warn!(pool = %self.uid, connection = %uid, "error while closing connection: {}", e);
        }
        debug!(pool = %self.uid, connection = %uid, "removed connection from pool");
        true
    }

    pub async fn send_message_async(&self, uid: &str, message: &Value) -> Result<(), ConnectionError> {
        let connection = self
            .get_by_uid(uid)
            .ok_or_else(|| ConnectionError::UnknownConnection(uid.to_string()))?;
        connection.send_message_async(message).await
    }

    pub async fn close_all_async(&self) {
        for uid in self.uids() {
            self.remove_by_uid_async(&uid).await;
        }
    }
}
