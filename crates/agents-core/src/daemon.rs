// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Daemon workers and pigeon holes
//!
//! A daemon is a registered agent thread that pulls [`DaemonJob`]s from a
//! channel and runs a handler on each. When a job names a `reply_to` uid the
//! handler's result is dropped into the agent's pigeon hole for that uid,
//! where any thread can pick it up with [`PigeonHoles::get`].

use std::collections::HashMap;
use std::fmt::Display;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::agent::Agent;
use crate::error::AgentResult;

/// Holes expire this long after they were created
pub const DEFAULT_HOLE_EXPIRY: Duration = Duration::from_secs(60 * 60);

const JOB_WAIT: Duration = Duration::from_millis(100);

struct Hole<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    expires_at: Instant,
}

/// Per-uid result mailboxes
pub struct PigeonHoles<T> {
    holes: Mutex<HashMap<String, Hole<T>>>,
    expiry: Duration,
}

impl<T> Default for PigeonHoles<T> {
    fn default() -> Self {
        Self::with_expiry(DEFAULT_HOLE_EXPIRY)
    }
}

impl<T> std::fmt::Debug for PigeonHoles<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PigeonHoles")
            .field("holes", &self.len())
            .field("expiry", &self.expiry)
            .finish()
    }
}

impl<T> PigeonHoles<T> {
    pub fn with_expiry(expiry: Duration) -> Self {
        Self {
            holes: Mutex::new(HashMap::new()),
            expiry,
        }
    }

    fn hole(&self, uid: &str) -> (Sender<T>, Receiver<T>) {
        let mut holes = self.holes.lock();
        let hole = holes.entry(uid.to_string()).or_insert_with(|| {
            let (tx, rx) = channel::unbounded();
            Hole {
                tx,
                rx,
                expires_at: Instant::now() + self.expiry,
            }
        });
        (hole.tx.clone(), hole.rx.clone())
    }

    /// Drop `value` into the hole for `uid`, creating it if needed
    pub fn put(&self, uid: &str, value: T) {
        let (tx, _rx) = self.hole(uid);
        // The hole keeps its own receiver, so this cannot fail
        let _ = tx.send(value);
    }

    /// Wait up to `timeout` for a value in the hole for `uid`
    pub fn get(&self, uid: &str, timeout: Duration) -> Option<T> {
        let (_tx, rx) = self.hole(uid);
        match rx.recv_timeout(timeout) {
            Ok(value) => Some(value),
            Err(_) => {
                error!(puid = uid, ?timeout, "timeout waiting for pigeon");
                None
            }
        }
    }

    /// Remove expired holes; returns how many were removed
    pub fn clean_up(&self) -> usize {
        let now = Instant::now();
        let mut holes = self.holes.lock();
        let before = holes.len();
        holes.retain(|_, hole| hole.expires_at > now);
        before - holes.len()
    }

    pub fn len(&self) -> usize {
        self.holes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unit of work for a daemon
#[derive(Debug, Clone)]
pub struct DaemonJob {
    pub args: Value,
    /// Pigeon hole uid for the result
    pub reply_to: Option<String>,
}

impl DaemonJob {
    pub fn new(args: Value) -> Self {
        Self {
            args,
            reply_to: None,
        }
    }

    pub fn with_reply(args: Value, reply_to: impl Into<String>) -> Self {
        Self {
            args,
            reply_to: Some(reply_to.into()),
        }
    }
}

impl Agent {
    /// Spawn a worker thread running `handler` on every job from `jobs`
    ///
    /// The worker stops when the agent exits or every sender is dropped.
    /// Handler errors are logged and the worker moves on.
    pub fn create_daemon<F, E>(&self, name: &str, jobs: Receiver<DaemonJob>, mut handler: F) -> AgentResult<()>
    where
        F: FnMut(Value) -> Result<Value, E> + Send + 'static,
        E: Display,
    {
        let agent = self.clone();
        let daemon = name.to_string();
        self.spawn_thread(name, move |exit| {
            let mut last_clean_up = Instant::now();
            while !exit.is_set() {
                match jobs.recv_timeout(JOB_WAIT) {
                    Ok(job) => match handler(job.args) {
                        Ok(result) => {
                            if let Some(uid) = job.reply_to {
                                agent.pigeon_holes().put(&uid, result);
                            }
                        }
                        Err(e) => error!(agent = %agent.uid(), daemon = %daemon, "handler error: {}", e),
                    },
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        warn!(agent = %agent.uid(), daemon = %daemon, "job channel closed");
                        break;
                    }
                }

                if last_clean_up.elapsed() >= DEFAULT_HOLE_EXPIRY {
                    let removed = agent.pigeon_holes().clean_up();
                    debug!(agent = %agent.uid(), removed, "cleaned up pigeon holes");
                    last_clean_up = Instant::now();
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_put_then_get() {
        let holes = PigeonHoles::default();
        holes.put("a", 1);
        holes.put("a", 2);
        assert_eq!(holes.get("a", Duration::from_millis(10)), Some(1));
        assert_eq!(holes.get("a", Duration::from_millis(10)), Some(2));
        assert_eq!(holes.get("a", Duration::from_millis(10)), None);
    }

    #[test]
    fn test_get_waits_for_put() {
        let holes = std::sync::Arc::new(PigeonHoles::default());
        let writer = std::sync::Arc::clone(&holes);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            writer.put("late", "value");
        });
        assert_eq!(holes.get("late", Duration::from_secs(2)), Some("value"));
        handle.join().unwrap();
    }

    #[test]
    fn test_clean_up_removes_expired_holes() {
        let holes: PigeonHoles<u8> = PigeonHoles::with_expiry(Duration::from_millis(20));
        holes.put("old", 1);
        thread::sleep(Duration::from_millis(40));
        holes.put("new", 2);

        assert_eq!(holes.clean_up(), 1);
        assert_eq!(holes.len(), 1);
        assert_eq!(holes.get("new", Duration::ZERO), Some(2));
    }
}
