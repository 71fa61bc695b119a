// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Socket registry and the single-threaded poller loop
//!
//! Sockets are created, configured and bound/connected on the calling
//! thread, then handed to the poller through a channel. From that point on
//! only the poller thread touches them. Each tick:
//!
//! 1. adopt newly registered sockets
//! 2. `zmq::poll` every socket for readability (bounded by the poll interval)
//! 3. per socket: one non-blocking multipart receive if readable, then a full
//!    non-blocking drain of its outbound queue
//!
//! A socket that fails `max_socket_errors` times in a row is closed and
//! deregistered; the others keep being served.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::agent::ExitSignal;
use crate::codec::Multipart;
use crate::error::{AgentError, AgentResult};
use crate::socket::{ConnectMode, Inbound, OutboundQueue, SocketKey, SocketSpec};

/// One socket owned by the poller
struct SocketEntry {
    key: SocketKey,
    socket: zmq::Socket,
    outbound: OutboundQueue,
    inbound: Inbound,
    consecutive_errors: u32,
}

#[derive(Default)]
struct RegistryState {
    keys: HashSet<SocketKey>,
    closed: bool,
}

/// Keys of registered sockets plus the hand-off channel to the poller
pub(crate) struct SocketRegistry {
    agent_uid: String,
    state: Arc<Mutex<RegistryState>>,
    pending_tx: Sender<SocketEntry>,
    pending_rx: Mutex<Option<Receiver<SocketEntry>>>,
    linger_ms: i32,
}

impl SocketRegistry {
    pub(crate) fn new(agent_uid: &str, linger_ms: i32) -> Self {
        let (pending_tx, pending_rx) = channel::unbounded();
        Self {
            agent_uid: agent_uid.to_string(),
            state: Arc::new(Mutex::new(RegistryState::default())),
            pending_tx,
            pending_rx: Mutex::new(Some(pending_rx)),
            linger_ms,
        }
    }

    /// Create, configure and bind/connect a socket, then register it
    ///
    /// The key set stays locked for the whole call so two threads cannot
    /// register the same key.
    pub(crate) fn open(&self, context: &zmq::Context, spec: SocketSpec) -> AgentResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(AgentError::NotRunning);
        }
        if state.keys.contains(&spec.key) {
            return Err(AgentError::SocketExists(spec.key));
        }

        let socket = context.socket(spec.key.socket_type.zmq_type())?;
        socket.set_linger(self.linger_ms)?;
        spec.options.apply(&socket)?;

        match spec.mode {
            ConnectMode::Bind => {
                info!(agent = %self.agent_uid, "binding {} socket on {}", spec.key.socket_type, spec.key.address);
                socket.bind(&spec.key.address)?;
            }
            ConnectMode::Connect => {
                info!(agent = %self.agent_uid, "connecting {} socket to {}", spec.key.socket_type, spec.key.address);
                socket.connect(&spec.key.address)?;
            }
        }

        let entry = SocketEntry {
            key: spec.key.clone(),
            socket,
            outbound: spec.outbound,
            inbound: spec.inbound,
            consecutive_errors: 0,
        };
        self.pending_tx
            .send(entry)
            .map_err(|_| AgentError::NotRunning)?;
        state.keys.insert(spec.key);
        Ok(())
    }

    pub(crate) fn contains(&self, key: &SocketKey) -> bool {
        self.state.lock().keys.contains(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().keys.len()
    }

    /// Build the loop that will own every registered socket
    ///
    /// Can only be taken once per registry.
    pub(crate) fn take_loop(
        &self,
        poll_interval: Duration,
        max_socket_errors: u32,
        exit: ExitSignal,
    ) -> Option<PollerLoop> {
        let pending = self.pending_rx.lock().take()?;
        Some(PollerLoop {
            agent_uid: self.agent_uid.clone(),
            state: Arc::clone(&self.state),
            pending,
            entries: Vec::new(),
            poll_interval,
            max_socket_errors: max_socket_errors.max(1),
            exit,
        })
    }

    /// Mark the registry closed when no poller was ever started
    pub(crate) fn close_unstarted(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.keys.clear();
        if let Some(pending) = self.pending_rx.lock().take() {
            for entry in pending.try_iter() {
                entry.outbound.close();
                debug!(agent = %self.agent_uid, socket = %entry.key, "Closing socket");
            }
        }
    }
}

/// Single-threaded I/O multiplexer for one agent
pub(crate) struct PollerLoop {
    agent_uid: String,
    state: Arc<Mutex<RegistryState>>,
    pending: Receiver<SocketEntry>,
    entries: Vec<SocketEntry>,
    poll_interval: Duration,
    max_socket_errors: u32,
    exit: ExitSignal,
}

impl PollerLoop {
    pub(crate) fn run(mut self) {
        info!(agent = %self.agent_uid, "[POLLER] start processing sockets");
        while !self.exit.is_set() {
            self.tick();
        }
        self.close_all();
        info!(agent = %self.agent_uid, "[POLLER] stopped");
    }

    fn adopt_pending(&mut self) {
        for entry in self.pending.try_iter() {
            debug!(agent = %self.agent_uid, socket = %entry.key, "[POLLER] socket registered");
            self.entries.push(entry);
        }
    }

    fn tick(&mut self) {
        self.adopt_pending();

        if self.entries.is_empty() {
            thread::sleep(self.poll_interval);
            return;
        }

        let readable: Vec<bool> = {
            let mut items: Vec<zmq::PollItem<'_>> = self
                .entries
                .iter()
                .map(|e| e.socket.as_poll_item(zmq::POLLIN))
                .collect();
            match zmq::poll(&mut items, self.poll_interval.as_millis() as i64) {
                Ok(_) => items.iter().map(|item| item.is_readable()).collect(),
                Err(zmq::Error::EINTR) => return,
                Err(e) => {
                    error!(agent = %self.agent_uid, "[POLLER] poll failed: {}", e);
                    thread::sleep(self.poll_interval);
                    return;
                }
            }
        };

        for (entry, is_readable) in self.entries.iter_mut().zip(readable) {
            if is_readable {
                receive_one(&self.agent_uid, entry);
            }
            drain_outbound(&self.agent_uid, entry, self.max_socket_errors);
        }

        self.deregister_failed();
    }

    fn deregister_failed(&mut self) {
        let max = self.max_socket_errors;
        if !self.entries.iter().any(|e| e.consecutive_errors >= max) {
            return;
        }

        let (failed, healthy): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.consecutive_errors >= max);
        self.entries = healthy;

        let mut state = self.state.lock();
        for entry in failed {
            error!(
                agent = %self.agent_uid,
                socket = %entry.key,
                errors = entry.consecutive_errors,
                "[POLLER] closing socket after repeated errors"
            );
            state.keys.remove(&entry.key);
            entry.outbound.close();
        }
    }

    fn close_all(&mut self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.keys.clear();
        drop(state);

        // Registered after the last tick
        self.adopt_pending();
        for entry in self.entries.drain(..) {
            info!(agent = %self.agent_uid, "closing socket {} ...", entry.key);
            entry.outbound.close();
        }
    }
}

fn receive_one(agent_uid: &str, entry: &mut SocketEntry) {
    match entry.socket.recv_multipart(zmq::DONTWAIT) {
        Ok(frames) => {
            entry.consecutive_errors = 0;
            dispatch_inbound(agent_uid, entry, frames);
        }
        Err(zmq::Error::EAGAIN) => {}
        Err(e) => {
            entry.consecutive_errors += 1;
            warn!(agent = %agent_uid, socket = %entry.key, "[POLLER] receive failed: {}", e);
        }
    }
}

fn dispatch_inbound(agent_uid: &str, entry: &SocketEntry, frames: Multipart) {
    match &entry.inbound {
        Inbound::Publish(tx) => {
            if tx.send(frames).is_err() {
                trace!(agent = %agent_uid, socket = %entry.key, "No inbound listener, message discarded");
            }
        }
        Inbound::Relay { rewrite, target } => {
            if let Some(rewritten) = rewrite(frames) {
                if !target.push_relay(rewritten) {
                    warn!(
                        agent = %agent_uid,
                        socket = %entry.key,
                        target = %target.key(),
                        "[POLLER] relay target queue unavailable, message dropped"
                    );
                }
            }
        }
    }
}

fn drain_outbound(agent_uid: &str, entry: &mut SocketEntry, max_errors: u32) {
    while let Some(frames) = entry.outbound.pop() {
        match entry.socket.send_multipart(frames, zmq::DONTWAIT) {
            Ok(()) => entry.consecutive_errors = 0,
            Err(zmq::Error::EAGAIN) => {
                // at-most-once: no peer ready for this message
                warn!(agent = %agent_uid, socket = %entry.key, "[POLLER] message unroutable, dropped");
            }
            Err(zmq::Error::EHOSTUNREACH) => {
                warn!(agent = %agent_uid, socket = %entry.key, "[POLLER] peer unknown, message dropped");
            }
            Err(e) => {
                entry.consecutive_errors += 1;
                warn!(agent = %agent_uid, socket = %entry.key, "[POLLER] send failed: {}", e);
                if entry.consecutive_errors >= max_errors {
                    return;
                }
            }
        }
    }
}
