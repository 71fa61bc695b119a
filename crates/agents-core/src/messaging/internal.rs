// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-process connections
//!
//! Every [`InternalConnection`] is a loopback over one unbounded queue in an
//! [`InternalQueues`] registry, keyed by connection uid: `send` enqueues,
//! `receive` dequeues, `close` removes the queue. Handles opened on the same
//! registry with the same uid share that queue, which is how same-process
//! components wire to each other and how tests feed a pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use tracing::debug;

use super::connection::{AsyncConnection, Connection, ConnectionInfo, ConnectionResult};
use crate::codec::{JsonSerializer, MessageSerializer};
use crate::error::ConnectionError;

type Queue = (Sender<String>, Receiver<String>);

/// Registry of in-process queues keyed by connection uid
#[derive(Clone, Default)]
pub struct InternalQueues {
    queues: Arc<Mutex<HashMap<String, Queue>>>,
}

impl std::fmt::Debug for InternalQueues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InternalQueues")
            .field("queues", &self.len())
            .finish()
    }
}

impl InternalQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection, creating its queue if needed
    pub fn connect(&self, uid: impl Into<String>) -> InternalConnection {
        self.connect_with(uid, Arc::new(JsonSerializer))
    }

    pub fn connect_with(
        &self,
        uid: impl Into<String>,
        serializer: Arc<dyn MessageSerializer>,
    ) -> InternalConnection {
        let uid = uid.into();
        self.queues
            .lock()
            .entry(uid.clone())
            .or_insert_with(channel::unbounded);
        InternalConnection {
            uid,
            queues: self.clone(),
            serializer,
            closed: AtomicBool::new(false),
        }
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.queues.lock().contains_key(uid)
    }

    pub fn len(&self) -> usize {
        self.queues.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages waiting in the queue for `uid`
    pub fn pending(&self, uid: &str) -> usize {
        self.queues.lock().get(uid).map_or(0, |(_, rx)| rx.len())
    }

    fn sender(&self, uid: &str) -> Option<Sender<String>> {
        self.queues.lock().get(uid).map(|(tx, _)| tx.clone())
    }

    fn receiver(&self, uid: &str) -> Option<Receiver<String>> {
        self.queues.lock().get(uid).map(|(_, rx)| rx.clone())
    }

    fn remove(&self, uid: &str) -> bool {
        self.queues.lock().remove(uid).is_some()
    }
}

pub struct InternalConnection {
    uid: String,
    queues: InternalQueues,
    serializer: Arc<dyn MessageSerializer>,
    closed: AtomicBool,
}

impl std::fmt::Debug for InternalConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InternalConnection")
            .field("uid", &self.uid)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl InternalConnection {
    fn closed_error(&self) -> ConnectionError {
        ConnectionError::Closed(self.uid.clone())
    }

    fn check_open(&self) -> ConnectionResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(self.closed_error());
        }
        Ok(())
    }
}

impl ConnectionInfo for InternalConnection {
    fn uid(&self) -> &str {
        &self.uid
    }

    fn serializer(&self) -> &dyn MessageSerializer {
        self.serializer.as_ref()
    }
}

impl Connection for InternalConnection {
    fn send(&self, serialized: String) -> ConnectionResult<()> {
        self.check_open()?;
        let tx = self
            .queues
            .sender(&self.uid)
            .ok_or_else(|| self.closed_error())?;
        tx.send(serialized).map_err(|_| self.closed_error())
    }

    fn receive(&self) -> ConnectionResult<Option<String>> {
        self.check_open()?;
        let rx = self
            .queues
            .receiver(&self.uid)
            .ok_or_else(|| self.closed_error())?;
        match rx.try_recv() {
            Ok(serialized) => Ok(Some(serialized)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(self.closed_error()),
        }
    }

    fn close(&self) -> ConnectionResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.queues.remove(&self.uid);
            debug!(connection = %self.uid, "closed internal connection");
        }
        Ok(())
    }
}

#[async_trait]
impl AsyncConnection for InternalConnection {
    async fn send_async(&self, serialized: String) -> ConnectionResult<()> {
        Connection::send(self, serialized)
    }

    async fn receive_async(&self) -> ConnectionResult<Option<String>> {
        Connection::receive(self)
    }

    async fn close_async(&self) -> ConnectionResult<()> {
        Connection::close(self)
    }
}
