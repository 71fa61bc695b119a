// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Agent lifecycle supervisor
//!
//! An [`Agent`] owns one ZMQ context, one poller thread, the threads it
//! spawned for its modules, and the modules themselves.
//!
//! ```text
//! Created -> Booting -> Running -> ShuttingDown -> Terminated
//! ```
//!
//! `Agent::start` returns once boot was *attempted*. Whether user setup
//! succeeded is reported by [`Agent::boot_succeeded`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use agents_config::{validate_config, AgentsConfig, SetupFailurePolicy};
use crossbeam::channel;
use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{debug, error, info, warn};

use crate::auth::Authenticator;
use crate::daemon::PigeonHoles;
use crate::error::{AgentError, AgentResult};
use crate::module::Module;
use crate::poller::SocketRegistry;
use crate::socket::{
    ConnectMode, Inbound, OutboundQueue, SocketHandle, SocketKey, SocketOptions, SocketSpec,
    SocketType,
};

/// Lifecycle states, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum AgentState {
    Created = 0,
    Booting = 1,
    Running = 2,
    ShuttingDown = 3,
    Terminated = 4,
}

impl AgentState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => AgentState::Created,
            1 => AgentState::Booting,
            2 => AgentState::Running,
            3 => AgentState::ShuttingDown,
            _ => AgentState::Terminated,
        }
    }
}

/// Read-only view of the agent's exit flag handed to every loop it runs
#[derive(Debug, Clone)]
pub struct ExitSignal(Arc<AtomicBool>);

impl ExitSignal {
    pub(crate) fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self(flag)
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Sleep until the flag is set or `timeout` elapses; returns `is_set()`
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_set() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(10)));
        }
        self.is_set()
    }
}

/// One-shot latch released when boot finished (successfully or not)
#[derive(Default)]
struct Latch {
    done: Mutex<bool>,
    cv: Condvar,
}

impl Latch {
    fn set(&self) {
        *self.done.lock() = true;
        self.cv.notify_all();
    }

    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cv.wait(&mut done);
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock();
        while !*done {
            if self.cv.wait_until(&mut done, deadline).timed_out() {
                break;
            }
        }
        *done
    }
}

#[derive(Default)]
struct ThreadRegistry {
    handles: Vec<JoinHandle<()>>,
    closed: bool,
}

struct AgentInner {
    uid: String,
    config: AgentsConfig,
    state: AtomicU8,
    context: Mutex<Option<zmq::Context>>,
    registry: SocketRegistry,
    exit: Arc<AtomicBool>,
    shutdown_started: AtomicBool,
    initialized: Arc<Latch>,
    boot_thread: Mutex<Option<ThreadId>>,
    boot_ok: AtomicBool,
    boot_error: Mutex<Option<String>>,
    threads: Mutex<ThreadRegistry>,
    modules: Mutex<Vec<Box<dyn Module>>>,
    authenticator: Mutex<Option<Authenticator>>,
    signal_handle: Mutex<Option<signal_hook::iterator::Handle>>,
    pigeon_holes: PigeonHoles<Value>,
}

/// Cheap, cloneable handle to a running agent
#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("uid", &self.inner.uid)
            .field("state", &self.state())
            .finish()
    }
}

/// Random agent uid (UUID v4, simple hex form)
pub fn generate_uid() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

impl Agent {
    /// Boot an agent
    ///
    /// `setup` runs on a dedicated boot thread and receives the agent, so it
    /// can bind sockets, register modules and spawn threads. This call
    /// returns after setup finished (or after `agent.boot_timeout_ms`).
    ///
    /// # Errors
    ///
    /// Invalid configuration, or failure to spawn the poller, boot or signal
    /// threads. A failing `setup` is *not* an error here; see
    /// [`Agent::boot_succeeded`] and `agent.setup_failure`.
    pub fn start<F>(config: AgentsConfig, setup: F) -> AgentResult<Agent>
    where
        F: FnOnce(&Agent) -> AgentResult<()> + Send + 'static,
    {
        validate_config(&config)?;

        let uid = config
            .agent
            .uid
            .clone()
            .filter(|uid| !uid.trim().is_empty())
            .unwrap_or_else(generate_uid);

        let agent = Agent {
            inner: Arc::new(AgentInner {
                registry: SocketRegistry::new(&uid, config.agent.linger_ms),
                uid,
                state: AtomicU8::new(AgentState::Created as u8),
                context: Mutex::new(Some(zmq::Context::new())),
                exit: Arc::new(AtomicBool::new(false)),
                shutdown_started: AtomicBool::new(false),
                initialized: Arc::new(Latch::default()),
                boot_thread: Mutex::new(None),
                boot_ok: AtomicBool::new(false),
                boot_error: Mutex::new(None),
                threads: Mutex::new(ThreadRegistry::default()),
                modules: Mutex::new(Vec::new()),
                authenticator: Mutex::new(None),
                signal_handle: Mutex::new(None),
                pigeon_holes: PigeonHoles::default(),
                config,
            }),
        };

        agent.transition(AgentState::Created, AgentState::Booting);
        info!(agent = %agent.uid(), "booting up ...");

        if agent.inner.config.agent.install_signal_handlers {
            agent.install_signal_listener()?;
        }

        let poller = agent
            .inner
            .registry
            .take_loop(
                agent.inner.config.agent.poll_interval(),
                agent.inner.config.agent.max_socket_errors,
                agent.exit_signal(),
            )
            .ok_or(AgentError::NotRunning)?;
        let initialized = Arc::clone(&agent.inner.initialized);
        agent.spawn_thread("poller", move |_exit| {
            // Sockets opened during setup are adopted once boot completes
            initialized.wait();
            poller.run();
        })?;

        let boot_agent = agent.clone();
        agent.spawn_thread("boot", move |_exit| boot_agent.boot(setup))?;

        match agent.inner.config.agent.boot_timeout() {
            Some(timeout) => {
                if !agent.inner.initialized.wait_timeout(timeout) {
                    warn!(agent = %agent.uid(), ?timeout, "boot still in progress, returning early");
                }
            }
            None => agent.inner.initialized.wait(),
        }

        Ok(agent)
    }

    fn boot<F>(&self, setup: F)
    where
        F: FnOnce(&Agent) -> AgentResult<()>,
    {
        let started = Instant::now();
        *self.inner.boot_thread.lock() = Some(thread::current().id());
        info!(agent = %self.uid(), "running user setup ...");

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| setup(self))) {
            Ok(result) => result,
            Err(payload) => Err(AgentError::SetupFailure(panic_message(payload.as_ref()))),
        };

        match outcome {
            Ok(()) => {
                self.inner.boot_ok.store(true, Ordering::Release);
                self.transition(AgentState::Booting, AgentState::Running);
                self.inner.initialized.set();
                info!(agent = %self.uid(), "booted in {:?} ...", started.elapsed());
            }
            Err(e) => {
                error!(agent = %self.uid(), "failed to boot ...: {}", e);
                *self.inner.boot_error.lock() = Some(e.to_string());
                self.inner.initialized.set();
                if !self.is_shutting_down() {
                    self.on_setup_failure();
                }
            }
        }
    }

    fn on_setup_failure(&self) {
        match self.inner.config.agent.setup_failure {
            SetupFailurePolicy::Terminate => {
                warn!(agent = %self.uid(), "terminating process after setup failure");
                if let Err(e) = signal_hook::low_level::raise(SIGTERM) {
                    error!(agent = %self.uid(), "failed to raise SIGTERM: {}", e);
                }
            }
            SetupFailurePolicy::Report => {
                warn!(agent = %self.uid(), "setup failed; agent stays up until shutdown() is called");
            }
        }
    }

    fn install_signal_listener(&self) -> AgentResult<()> {
        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        *self.inner.signal_handle.lock() = Some(signals.handle());

        let agent = self.clone();
        thread::Builder::new()
            .name("agent-signals".to_string())
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    info!(agent = %agent.uid(), signal, "received signal, shutting down ...");
                    agent.shutdown();
                    std::process::exit(128 + signal);
                }
            })?;
        Ok(())
    }

    fn transition(&self, from: AgentState, to: AgentState) -> bool {
        self.inner
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn set_state(&self, state: AgentState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }

    pub fn uid(&self) -> &str {
        &self.inner.uid
    }

    pub fn state(&self) -> AgentState {
        AgentState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn config(&self) -> &AgentsConfig {
        &self.inner.config
    }

    /// True once user setup returned `Ok`
    pub fn boot_succeeded(&self) -> bool {
        self.inner.boot_ok.load(Ordering::Acquire)
    }

    /// Setup failure message, if boot failed
    pub fn boot_error(&self) -> Option<String> {
        self.inner.boot_error.lock().clone()
    }

    pub fn exit_signal(&self) -> ExitSignal {
        ExitSignal::from_flag(Arc::clone(&self.inner.exit))
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown_started.load(Ordering::Acquire)
    }

    /// Results stored by daemon workers
    pub fn pigeon_holes(&self) -> &PigeonHoles<Value> {
        &self.inner.pigeon_holes
    }

    /// Registered threads that have not finished yet
    pub fn live_threads(&self) -> usize {
        self.inner
            .threads
            .lock()
            .handles
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Number of sockets currently registered
    pub fn socket_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn has_socket(&self, key: &SocketKey) -> bool {
        self.inner.registry.contains(key)
    }

    pub(crate) fn context(&self) -> AgentResult<zmq::Context> {
        self.inner.context.lock().clone().ok_or(AgentError::NotRunning)
    }

    pub(crate) fn authenticator_slot(&self) -> &Mutex<Option<Authenticator>> {
        &self.inner.authenticator
    }

    /// Spawn a named OS thread that is joined during shutdown
    ///
    /// The closure receives the agent's exit signal and must return soon
    /// after it is set.
    pub fn spawn_thread<F>(&self, name: &str, f: F) -> AgentResult<()>
    where
        F: FnOnce(ExitSignal) + Send + 'static,
    {
        let mut threads = self.inner.threads.lock();
        if threads.closed {
            return Err(AgentError::NotRunning);
        }
        let exit = self.exit_signal();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || f(exit))?;
        debug!(agent = %self.uid(), thread = name, "thread started");
        threads.handles.push(handle);
        Ok(())
    }

    /// Run `module.setup` and append it to the ordered module list
    pub fn register_module(&self, mut module: Box<dyn Module>) -> AgentResult<()> {
        if self.is_shutting_down() {
            return Err(AgentError::NotRunning);
        }
        info!(agent = %self.uid(), module = %module.uid(), "setting up module ...");
        if let Err(e) = module.setup(self) {
            error!(agent = %self.uid(), module = %module.uid(), "module setup failed: {}", e);
            return Err(e);
        }

        let mut modules = self.inner.modules.lock();
        if self.is_shutting_down() {
            drop(modules);
            module.shutdown();
            return Err(AgentError::NotRunning);
        }
        modules.push(module);
        Ok(())
    }

    pub fn module_uids(&self) -> Vec<String> {
        self.inner
            .modules
            .lock()
            .iter()
            .map(|m| m.uid().to_string())
            .collect()
    }

    /// Bind a socket whose inbound frames are published on its handle
    pub fn bind_socket(
        &self,
        socket_type: SocketType,
        address: &str,
        options: &SocketOptions,
    ) -> AgentResult<SocketHandle> {
        self.open_published(socket_type, address, options, ConnectMode::Bind)
    }

    /// Connect a socket whose inbound frames are published on its handle
    pub fn connect_socket(
        &self,
        socket_type: SocketType,
        address: &str,
        options: &SocketOptions,
    ) -> AgentResult<SocketHandle> {
        self.open_published(socket_type, address, options, ConnectMode::Connect)
    }

    fn open_published(
        &self,
        socket_type: SocketType,
        address: &str,
        options: &SocketOptions,
        mode: ConnectMode,
    ) -> AgentResult<SocketHandle> {
        let key = SocketKey::new(socket_type, address);
        let outbound = self.outbound_queue(key.clone());
        let (tx, rx) = channel::unbounded();
        self.open_socket(SocketSpec {
            key,
            mode,
            options: options.clone(),
            outbound: outbound.clone(),
            inbound: Inbound::Publish(tx),
        })?;
        Ok(SocketHandle::new(outbound, rx))
    }

    pub(crate) fn outbound_queue(&self, key: SocketKey) -> OutboundQueue {
        OutboundQueue::new(key, &self.inner.config.queues)
    }

    pub(crate) fn open_socket(&self, spec: SocketSpec) -> AgentResult<()> {
        if self.is_shutting_down() {
            return Err(AgentError::NotRunning);
        }
        let context = self.context()?;
        self.inner.registry.open(&context, spec).map_err(|e| {
            error!(agent = %self.uid(), "failed to open socket: {}", e);
            e
        })
    }

    /// Stop everything the agent owns
    ///
    /// Runs once; concurrent and repeated calls return immediately. Safe to
    /// call from any thread, including threads spawned by this agent.
    pub fn shutdown(&self) {
        if self
            .inner
            .shutdown_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(agent = %self.uid(), "shutdown already in progress");
            return;
        }
        let started = Instant::now();
        let uid = self.uid();
        self.set_state(AgentState::ShuttingDown);

        let modules = std::mem::take(&mut *self.inner.modules.lock());
        for mut module in modules {
            info!(agent = %uid, module = %module.uid(), "shutting down module ...");
            module.shutdown();
        }

        info!(agent = %uid, "set exit event ...");
        self.inner.exit.store(true, Ordering::Release);

        if *self.inner.boot_thread.lock() == Some(thread::current().id()) {
            // Called from setup: the latch would only be set after we return
            debug!(agent = %uid, "shutdown requested during setup");
            self.inner.initialized.set();
        } else {
            info!(agent = %uid, "wait for initialization before cleaning up ...");
            self.inner.initialized.wait();
        }

        let handles = {
            let mut threads = self.inner.threads.lock();
            threads.closed = true;
            std::mem::take(&mut threads.handles)
        };
        let current = thread::current().id();
        info!(agent = %uid, threads = handles.len(), "joining threads ...");
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            if handle.join().is_err() {
                error!(agent = %uid, thread = %name, "thread panicked before shutdown");
            } else {
                debug!(agent = %uid, thread = %name, "joined");
            }
        }

        // Only needed when the poller never ran
        self.inner.registry.close_unstarted();

        if let Some(authenticator) = self.inner.authenticator.lock().take() {
            info!(agent = %uid, "stopping ZMQ Authenticator ...");
            authenticator.stop();
        }

        if let Some(handle) = self.inner.signal_handle.lock().take() {
            handle.close();
        }

        drop(self.inner.context.lock().take());
        self.set_state(AgentState::Terminated);
        info!(agent = %uid, "shutdown complete in {:?}", started.elapsed());
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("setup panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("setup panicked: {}", s)
    } else {
        "setup panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_config() -> AgentsConfig {
        let mut config = AgentsConfig::default();
        config.agent.install_signal_handlers = false;
        config.agent.setup_failure = SetupFailurePolicy::Report;
        config.agent.poll_interval_ms = 10;
        config
    }

    #[test]
    fn test_start_and_shutdown_without_sockets() {
        let agent = Agent::start(quiet_config(), |_| Ok(())).unwrap();
        assert!(agent.boot_succeeded());
        assert_eq!(agent.state(), AgentState::Running);

        agent.shutdown();
        assert_eq!(agent.state(), AgentState::Terminated);
        assert_eq!(agent.live_threads(), 0);
        assert!(agent.exit_signal().is_set());
    }

    #[test]
    fn test_explicit_uid() {
        let mut config = quiet_config();
        config.agent.uid = Some("named".to_string());
        let agent = Agent::start(config, |_| Ok(())).unwrap();
        assert_eq!(agent.uid(), "named");
        agent.shutdown();
    }

    #[test]
    fn test_setup_failure_reported() {
        let agent = Agent::start(quiet_config(), |_| {
            Err(AgentError::SetupFailure("missing broker".into()))
        })
        .unwrap();

        assert!(!agent.boot_succeeded());
        assert_eq!(agent.state(), AgentState::Booting);
        assert!(agent.boot_error().unwrap().contains("missing broker"));
        agent.shutdown();
        assert_eq!(agent.state(), AgentState::Terminated);
    }

    #[test]
    fn test_setup_panic_is_a_setup_failure() {
        let agent = Agent::start(quiet_config(), |_| panic!("boom")).unwrap();
        assert!(!agent.boot_succeeded());
        assert!(agent.boot_error().unwrap().contains("boom"));
        agent.shutdown();
    }

    #[test]
    fn test_shutdown_is_idempotent_and_concurrent_safe() {
        let agent = Agent::start(quiet_config(), |_| Ok(())).unwrap();
        let callers: Vec<_> = (0..4)
            .map(|_| {
                let agent = agent.clone();
                thread::spawn(move || agent.shutdown())
            })
            .collect();
        for caller in callers {
            caller.join().unwrap();
        }
        agent.shutdown();
        assert!(agent.is_shutting_down());
        assert!(matches!(
            agent.spawn_thread("late", |_| {}),
            Err(AgentError::NotRunning)
        ));
    }

    #[test]
    fn test_shutdown_from_own_thread() {
        let agent = Agent::start(quiet_config(), |_| Ok(())).unwrap();
        let inner = agent.clone();
        let (done_tx, done_rx) = channel::bounded(1);
        agent
            .spawn_thread("self-stop", move |_exit| {
                inner.shutdown();
                let _ = done_tx.send(());
            })
            .unwrap();
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(agent.state(), AgentState::Terminated);
    }

    #[test]
    fn test_shutdown_from_setup() {
        let started = Instant::now();
        let agent = Agent::start(quiet_config(), |agent| {
            agent.spawn_thread("worker", |exit| {
                while !exit.is_set() {
                    thread::sleep(Duration::from_millis(5));
                }
            })?;
            agent.shutdown();
            Ok(())
        })
        .unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));

        let deadline = Instant::now() + Duration::from_secs(2);
        while agent.state() != AgentState::Terminated && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(agent.state(), AgentState::Terminated);
        assert_eq!(agent.live_threads(), 0);
        assert!(agent.exit_signal().is_set());

        // nothing left to do
        agent.shutdown();
        assert_eq!(agent.state(), AgentState::Terminated);
    }

    #[test]
    fn test_spawned_threads_see_exit() {
        let agent = Agent::start(quiet_config(), |agent| {
            agent.spawn_thread("worker", |exit| {
                while !exit.is_set() {
                    thread::sleep(Duration::from_millis(5));
                }
            })
        })
        .unwrap();
        // poller and worker; the boot thread may still be winding down
        assert!(agent.live_threads() >= 2);

        let started = Instant::now();
        agent.shutdown();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(agent.live_threads(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = quiet_config();
        config.agent.poll_interval_ms = 0;
        assert!(matches!(
            Agent::start(config, |_| Ok(())),
            Err(AgentError::Configuration(_))
        ));
    }
}
