// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Connection backed by an agent socket
//!
//! Sends enqueue one single-frame message on the socket's outbound queue;
//! receives take the last frame of the next inbound message. The poller loop
//! still performs the actual I/O. Closing the connection only detaches it;
//! the socket itself lives until the agent shuts down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::connection::{AsyncConnection, Connection, ConnectionInfo, ConnectionResult};
use crate::codec::{JsonSerializer, MessageSerializer};
use crate::error::{AgentError, ConnectionError};
use crate::socket::SocketHandle;

pub struct SocketConnection {
    uid: String,
    socket: SocketHandle,
    serializer: Arc<dyn MessageSerializer>,
    closed: AtomicBool,
}

impl std::fmt::Debug for SocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketConnection")
            .field("uid", &self.uid)
            .field("socket", self.socket.key())
            .finish()
    }
}

impl SocketConnection {
    pub fn new(uid: impl Into<String>, socket: SocketHandle) -> Self {
        Self::with_serializer(uid, socket, Arc::new(JsonSerializer))
    }

    pub fn with_serializer(
        uid: impl Into<String>,
        socket: SocketHandle,
        serializer: Arc<dyn MessageSerializer>,
    ) -> Self {
        Self {
            uid: uid.into(),
            socket,
            serializer,
            closed: AtomicBool::new(false),
        }
    }

    pub fn socket(&self) -> &SocketHandle {
        &self.socket
    }

    fn check_open(&self) -> ConnectionResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnectionError::Closed(self.uid.clone()));
        }
        Ok(())
    }

    fn map_err(&self, err: AgentError) -> ConnectionError {
        match err {
            AgentError::QueueClosed => ConnectionError::Closed(self.uid.clone()),
            other => ConnectionError::io(&self.uid, other),
        }
    }
}

impl ConnectionInfo for SocketConnection {
    fn uid(&self) -> &str {
        &self.uid
    }

    fn serializer(&self) -> &dyn MessageSerializer {
        self.serializer.as_ref()
    }
}

impl Connection for SocketConnection {
    fn send(&self, serialized: String) -> ConnectionResult<()> {
        self.check_open()?;
        self.socket
            .send(vec![serialized.into_bytes()])
            .map_err(|e| self.map_err(e))
    }

    fn receive(&self) -> ConnectionResult<Option<String>> {
        self.check_open()?;
        let frames = match self.socket.try_recv().map_err(|e| self.map_err(e))? {
            Some(frames) => frames,
            None => return Ok(None),
        };
        match frames.into_iter().last() {
            Some(frame) => String::from_utf8(frame)
                .map(Some)
                .map_err(|e| ConnectionError::io(&self.uid, e)),
            None => Ok(None),
        }
    }

    fn close(&self) -> ConnectionResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[async_trait]
impl AsyncConnection for SocketConnection {
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
