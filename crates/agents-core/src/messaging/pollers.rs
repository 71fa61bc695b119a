// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Pool pollers
//!
//! Exactly one poller drives a pool. Each cycle it:
//! 1. tries one deserialized receive on every connection (snapshot order)
//!    and publishes `(uid, message)` on the pool's inbound channel
//! 2. drains the pool's outbound channel, sending each message to the
//!    addressed connection
//!
//! A connection is closed and removed once its consecutive receive failures
//! reach `pool.error_threshold`; a failed send removes it immediately. When
//! the agent exits the poller closes every remaining connection.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use std::thread;

use agents_config::PoolConfig;
use tracing::{error, info, warn};

use super::connection::{AsyncConnection, Connection};
use super::pool::ConnectionPool;
use crate::agent::{Agent, ExitSignal};
use crate::error::{AgentError, AgentResult, ConnectionError};
use crate::module::module_uid;

/// Consecutive receive failures per connection uid
#[derive(Debug, Default)]
struct ErrorCounts {
    counts: HashMap<String, u32>,
    threshold: u32,
}

impl ErrorCounts {
    fn new(threshold: u32) -> Self {
        Self {
            counts: HashMap::new(),
            threshold: threshold.max(1),
        }
    }

    fn reset(&mut self, uid: &str) {
        self.counts.remove(uid);
    }

    /// Count a failure; true once the connection should go
    fn fail(&mut self, uid: &str) -> bool {
        let count = self.counts.entry(uid.to_string()).or_insert(0);
        *count += 1;
        if *count >= self.threshold {
            self.counts.remove(uid);
            return true;
        }
        false
    }

    /// Forget connections that are no longer in the pool
    fn retain(&mut self, live: &[String]) {
        self.counts.retain(|uid, _| live.contains(uid));
    }
}

/// Thread-driven poller for [`Connection`]s
pub struct SyncPoller<C: Connection + ?Sized> {
    pool: Arc<ConnectionPool<C>>,
    config: PoolConfig,
    errors: ErrorCounts,
}

impl<C: Connection + ?Sized> SyncPoller<C> {
    pub fn new(pool: Arc<ConnectionPool<C>>, config: PoolConfig) -> Self {
        let errors = ErrorCounts::new(config.error_threshold);
        Self {
            pool,
            config,
            errors,
        }
    }

    pub fn run(mut self, exit: ExitSignal) {
        info!(pool = %self.pool.uid(), "start polling ...");
        while !exit.is_set() {
            self.poll();
            thread::sleep(self.config.sync_poll_interval());
        }
        info!(pool = %self.pool.uid(), "shutdown polling ...");
        self.pool.close_all();
    }

    /// One receive pass plus one outbound drain
    pub fn poll(&mut self) {
        let pool = Arc::clone(&self.pool);
        for connection in pool.snapshot() {
            let uid = connection.uid();
            match connection.receive_data() {
                Ok(Some(message)) => {
                    self.errors.reset(uid);
                    pool.publish(uid, message);
                }
                Ok(None) => self.errors.reset(uid),
                Err(e) => self.on_receive_error(uid, e),
            }
        }
        self.errors.retain(&pool.uids());

        while let Ok((uid, message)) = pool.pending_outbound().try_recv() {
            match pool.get_by_uid(&uid) {
                Some(connection) => {
                    if let Err(e) = connection.send_message(&message) {
                        error!(pool = %pool.uid(), connection = %uid, "send failed, removing connection: {}", e);
                        pool.remove_by_uid(&uid);
                    }
                }
                None => warn!(pool = %pool.uid(), connection = %uid, "dropping message for unknown connection"),
            }
        }
    }

    fn on_receive_error(&mut self, uid: &str, e: ConnectionError) {
        error!(pool = %self.pool.uid(), connection = %uid, "error while receiving on connection: {}", e);
        if self.errors.fail(uid) {
            self.pool.remove_by_uid(uid);
        }
    }
}

/// Task-driven poller for [`AsyncConnection`]s
pub struct AsyncPoller<C: AsyncConnection + ?Sized> {
    pool: Arc<ConnectionPool<C>>,
    config: PoolConfig,
    errors: ErrorCounts,
}

impl<C: AsyncConnection + ?Sized> AsyncPoller<C> {
    pub fn new(pool: Arc<ConnectionPool<C>>, config: PoolConfig) -> Self {
        let errors = ErrorCounts::new(config.error_threshold);
        Self {
            pool,
            config,
            errors,
        }
    }

    pub async fn run(mut self, exit: ExitSignal) {
        info!(pool = %self.pool.uid(), "start polling ...");
        while !exit.is_set() {
            tokio::time::sleep(self.config.async_cycle_sleep()).await;
            self.poll().await;
        }
        info!(pool = %self.pool.uid(), "shutdown polling ...");
        self.pool.close_all_async().await;
    }

    /// One receive pass plus one outbound drain
    ///
    /// Each receive is bounded by `pool.receive_timeout_ms`; an expired wait
    /// means no data this cycle.
    pub async fn poll(&mut self) {
        let pool = Arc::clone(&self.pool);
        let timeout = self.config.receive_timeout();
        for connection in pool.snapshot() {
            let uid = connection.uid();
            match tokio::time::timeout(timeout, connection.receive_data_async()).await {
                Err(_elapsed) => {}
                Ok(Ok(Some(message))) => {
                    self.errors.reset(uid);
                    pool.publish(uid, message);
                }
                Ok(Ok(None)) => self.errors.reset(uid),
                Ok(Err(e)) => {
                    error!(pool = %pool.uid(), connection = %uid, "error while receiving on connection: {}", e);
                    if self.errors.fail(uid) {
                        pool.remove_by_uid_async(uid).await;
                    }
                }
            }
        }
        self.errors.retain(&pool.uids());

        while let Ok((uid, message)) = pool.pending_outbound().try_recv() {
            match pool.get_by_uid(&uid) {
                Some(connection) => {
                    if let Err(e) = connection.send_message_async(&message).await {
                        error!(pool = %pool.uid(), connection = %uid, "send failed, removing connection: {}", e);
                        pool.remove_by_uid_async(&uid).await;
                    }
                }
                None => warn!(pool = %pool.uid(), connection = %uid, "dropping message for unknown connection"),
            }
        }
    }
}

/// Pool of [`Connection`]s polled by a registered agent thread
pub struct SyncConnectionPool {
    pool: Arc<ConnectionPool<dyn Connection>>,
}

impl SyncConnectionPool {
    pub fn start(agent: &Agent, uid: Option<&str>, config: PoolConfig) -> AgentResult<Self> {
        let pool: Arc<ConnectionPool<dyn Connection>> = Arc::new(ConnectionPool::new(module_uid(uid)));
        let poller = SyncPoller::new(Arc::clone(&pool), config);
        agent.spawn_thread(&format!("pool-{}", pool.uid()), move |exit| poller.run(exit))?;
        info!(agent = %agent.uid(), pool = %pool.uid(), "started sync connection pool");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<dyn Connection>> {
        &self.pool
    }
}

impl Deref for SyncConnectionPool {
    type Target = ConnectionPool<dyn Connection>;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

/// Pool of [`AsyncConnection`]s polled by one task
pub struct AsyncConnectionPool {
    pool: Arc<ConnectionPool<dyn AsyncConnection>>,
}

impl AsyncConnectionPool {
    /// Poll on `runtime` when given, otherwise on a current-thread runtime
    /// in a registered agent thread
    pub fn start(
        agent: &Agent,
        uid: Option<&str>,
        config: PoolConfig,
        runtime: Option<tokio::runtime::Handle>,
    ) -> AgentResult<Self> {
        let pool: Arc<ConnectionPool<dyn AsyncConnection>> =
            Arc::new(ConnectionPool::new(module_uid(uid)));
        Self::attach(agent, pool, config, runtime)
    }

    /// Start polling a pool created ahead of time
    ///
    /// Lets callers hand the pool to handlers before the poller exists.
    pub fn attach(
        agent: &Agent,
        pool: Arc<ConnectionPool<dyn AsyncConnection>>,
        config: PoolConfig,
        runtime: Option<tokio::runtime::Handle>,
    ) -> AgentResult<Self> {
        let poller = AsyncPoller::new(Arc::clone(&pool), config);
        let exit = agent.exit_signal();

        match runtime {
            Some(handle) => {
                info!(agent = %agent.uid(), pool = %pool.uid(), "using existing runtime ...");
                handle.spawn(poller.run(exit));
            }
            None => {
                info!(agent = %agent.uid(), pool = %pool.uid(), "creating runtime ...");
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(AgentError::Io)?;
                agent.spawn_thread(&format!("pool-{}", pool.uid()), move |exit| {
                    runtime.block_on(poller.run(exit));
                })?;
            }
        }
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<dyn AsyncConnection>> {
        &self.pool
    }
}

impl Deref for AsyncConnectionPool {
    type Target = ConnectionPool<dyn AsyncConnection>;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}
