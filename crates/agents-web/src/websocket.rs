// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! WebSocket connections and the websocket agent module
//!
//! Every upgrade on the websocket route becomes a [`WebsocketConnection`]
//! with a fresh uid in the module's [`AsyncConnectionPool`]. The pool is
//! polled on the web server's runtime: text frames show up on
//! `pool.inbound()` and messages sent to `pool.outbound()` are written back
//! to the addressed socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agents_config::{PoolConfig, WebConfig};
use agents_core::messaging::{
    AsyncConnection, AsyncConnectionPool, ConnectionInfo, ConnectionPool, ConnectionResult,
    PoolMessage,
};
use agents_core::{
    generate_uid, Agent, AgentResult, ConnectionError, JsonSerializer, MessageSerializer, Module,
    WebsocketFrame,
};
use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::http::Method;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::error::WebResult;
use crate::webserver::{ServerHandle, WebServerModule};

/// One upgraded websocket
///
/// Text frames carry serialized messages. Binary, ping and pong frames are
/// not data and read as "nothing this time".
pub struct WebsocketConnection {
    uid: String,
    serializer: Arc<dyn MessageSerializer>,
    sink: tokio::sync::Mutex<SplitSink<WebSocket, Message>>,
    stream: tokio::sync::Mutex<SplitStream<WebSocket>>,
    timeout: Duration,
    closed: AtomicBool,
}

impl std::fmt::Debug for WebsocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebsocketConnection")
            .field("uid", &self.uid)
            .field("timeout", &self.timeout)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl WebsocketConnection {
    pub fn new(uid: impl Into<String>, socket: WebSocket, timeout: Duration) -> Self {
        Self::with_serializer(uid, socket, timeout, Arc::new(JsonSerializer))
    }

    pub fn with_serializer(
        uid: impl Into<String>,
        socket: WebSocket,
        timeout: Duration,
        serializer: Arc<dyn MessageSerializer>,
    ) -> Self {
        let (sink, stream) = socket.split();
        Self {
            uid: uid.into(),
            serializer,
            sink: tokio::sync::Mutex::new(sink),
            stream: tokio::sync::Mutex::new(stream),
            timeout,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_open(&self) -> ConnectionResult<()> {
        if self.is_closed() {
            return Err(ConnectionError::Closed(self.uid.clone()));
        }
        Ok(())
    }

    fn peer_closed(&self) -> ConnectionError {
        self.closed.store(true, Ordering::Release);
        ConnectionError::Closed(self.uid.clone())
    }
}

impl ConnectionInfo for WebsocketConnection {
    fn uid(&self) -> &str {
        &self.uid
    }

    fn serializer(&self) -> &dyn MessageSerializer {
        self.serializer.as_ref()
    }
}

#[async_trait]
impl AsyncConnection for WebsocketConnection {
    async fn send_async(&self, serialized: String) -> ConnectionResult<()> {
        self.check_open()?;
        self.sink
            .lock()
            .await
            .send(Message::Text(serialized))
            .await
            .map_err(|e| ConnectionError::io(&self.uid, e))
    }

    async fn receive_async(&self) -> ConnectionResult<Option<String>> {
        self.check_open()?;
        let mut stream = self.stream.lock().await;
        match tokio::time::timeout(self.timeout, stream.next()).await {
            Err(_elapsed) => Ok(None),
            Ok(Some(Ok(Message::Text(text)))) => Ok(Some(text)),
            Ok(Some(Ok(Message::Close(frame)))) => {
                debug!(connection = %self.uid, ?frame, "client closed websocket connection");
                Err(self.peer_closed())
            }
            Ok(Some(Ok(_))) => Ok(None),
            Ok(Some(Err(e))) => Err(ConnectionError::io(&self.uid, e)),
            Ok(None) => Err(self.peer_closed()),
        }
    }

    async fn close_async(&self) -> ConnectionResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut sink = self.sink.lock().await;
        let frame = CloseFrame {
            code: close_code::AWAY,
            reason: "Host terminated connection".into(),
        };
        // The peer may already be gone
        if let Err(e) = sink.send(Message::Close(Some(frame))).await {
            debug!(connection = %self.uid, "close frame not delivered: {}", e);
        }
        let _ = sink.close().await;
        debug!(connection = %self.uid, "closed websocket connection");
        Ok(())
    }
}

/// Turn a pool message from a websocket pool into its envelope
pub fn websocket_frame((connection_id, payload): PoolMessage) -> WebsocketFrame {
    WebsocketFrame {
        connection_id,
        payload,
    }
}

/// Web server whose websocket route feeds an async connection pool
pub struct WebSocketModule {
    server: WebServerModule,
    pool: Arc<ConnectionPool<dyn AsyncConnection>>,
    pool_config: PoolConfig,
}

impl std::fmt::Debug for WebSocketModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketModule")
            .field("server", &self.server)
            .field("pool", &self.pool)
            .finish()
    }
}

impl WebSocketModule {
    /// Registers `config.websocket_route`; more routes can follow until setup
    pub fn new(config: WebConfig, pool_config: PoolConfig) -> WebResult<Self> {
        Self::with_serializer(config, pool_config, Arc::new(JsonSerializer))
    }

    pub fn with_serializer(
        config: WebConfig,
        pool_config: PoolConfig,
        serializer: Arc<dyn MessageSerializer>,
    ) -> WebResult<Self> {
        let route = config.websocket_route.clone();
        let mut server = WebServerModule::new(config);
        let pool: Arc<ConnectionPool<dyn AsyncConnection>> =
            Arc::new(ConnectionPool::new(format!("websockets-{}", Module::uid(&server))));

        let accept_pool = Arc::clone(&pool);
        let timeout = pool_config.receive_timeout();
        server.create_route(Method::GET, &route, move |upgrade: WebSocketUpgrade| {
            let pool = Arc::clone(&accept_pool);
            let serializer = Arc::clone(&serializer);
            async move {
                upgrade.on_upgrade(move |socket| async move {
                    let connection = WebsocketConnection::with_serializer(generate_uid(), socket, timeout, serializer);
                    debug!(pool = %pool.uid(), connection = %connection.uid(), "creating websocket connection ...");
                    let connection = Arc::new(connection);
                    if let Err(e) = pool.add(connection.clone()) {
                        warn!(pool = %pool.uid(), "rejecting websocket: {}", e);
                        let _ = connection.close_async().await;
                    }
                })
            }
        })?;

        let shutdown_pool = Arc::clone(&pool);
        server.on_shutdown(move || async move {
            debug!(pool = %shutdown_pool.uid(), "closing remaining websockets ...");
            shutdown_pool.close_all_async().await;
        })?;

        Ok(Self {
            server,
            pool,
            pool_config,
        })
    }

    /// Pool receiving every accepted websocket
    pub fn pool(&self) -> Arc<ConnectionPool<dyn AsyncConnection>> {
        Arc::clone(&self.pool)
    }

    pub fn server(&mut self) -> &mut WebServerModule {
        &mut self.server
    }

    pub fn handle(&self) -> ServerHandle {
        self.server.handle()
    }
}

impl Module for WebSocketModule {
    fn uid(&self) -> &str {
        Module::uid(&self.server)
    }

    fn setup(&mut self, agent: &Agent) -> AgentResult<()> {
        let runtime = self.server.runtime_handle()?;
        self.server.setup(agent)?;
        AsyncConnectionPool::attach(agent, self.pool(), self.pool_config.clone(), Some(runtime))?;
        info!(agent = %agent.uid(), pool = %self.pool.uid(), "websocket pool started");
        Ok(())
    }

    fn shutdown(&mut self) {
        self.server.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_websocket_frame() {
        let frame = websocket_frame(("abc".to_string(), json!({"x": 1})));
        assert_eq!(frame.connection_id, "abc");
        assert_eq!(frame.payload, json!({"x": 1}));
    }

    #[test]
    fn test_module_uid_names_pool() {
        let module = WebSocketModule::new(WebConfig::default(), PoolConfig::default()).unwrap();
        assert_eq!(module.pool().uid(), format!("websockets-{}", Module::uid(&module)));
        assert!(module.pool().is_empty());
    }
}
