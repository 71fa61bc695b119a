// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! HTTP server agent module
//!
//! Routes are collected before the module is registered. `setup` binds the
//! listener on the caller's thread, so address conflicts fail registration,
//! then serves from a registered agent thread on a current-thread runtime.
//! The server stops within one exit check (100 ms) of the agent's exit flag,
//! finishes in-flight requests and runs the shutdown hooks.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use agents_config::WebConfig;
use agents_core::{module_uid, Agent, AgentResult, ExitSignal, Module};
use axum::handler::Handler;
use axum::http::Method;
use axum::routing::{on, MethodFilter};
use axum::Router;
use futures_util::future::BoxFuture;
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, error, info};

use crate::error::{WebError, WebResult};

const EXIT_CHECK_INTERVAL: Duration = Duration::from_millis(100);

type ShutdownHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

#[derive(Debug, Default)]
struct ServerState {
    local_addr: OnceLock<SocketAddr>,
    running: AtomicBool,
}

/// Observes a server after its module has been handed to the agent
#[derive(Debug, Clone, Default)]
pub struct ServerHandle {
    state: Arc<ServerState>,
}

impl ServerHandle {
    /// Bound address, known once setup ran (resolves port 0)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state.local_addr.get().copied()
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }
}

pub struct WebServerModule {
    uid: String,
    config: WebConfig,
    /// `None` once the server was set up
    router: Option<Router>,
    registered: HashSet<(Method, String)>,
    hooks: Vec<ShutdownHook>,
    runtime: Option<Runtime>,
    handle: ServerHandle,
}

impl std::fmt::Debug for WebServerModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebServerModule")
            .field("uid", &self.uid)
            .field("address", &self.config.bind_address())
            .field("routes", &self.registered.len())
            .field("started", &self.router.is_none())
            .finish()
    }
}

impl WebServerModule {
    pub fn new(config: WebConfig) -> Self {
        Self::with_uid(None, config)
    }

    pub fn with_uid(uid: Option<&str>, config: WebConfig) -> Self {
        Self {
            uid: module_uid(uid),
            config,
            router: Some(Router::new()),
            registered: HashSet::new(),
            hooks: Vec::new(),
            runtime: None,
            handle: ServerHandle::default(),
        }
    }

    pub fn config(&self) -> &WebConfig {
        &self.config
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Register `handler` for `method` requests on `path`
    ///
    /// # Errors
    ///
    /// `WebError::Configuration` once the server is set up, for a method
    /// axum cannot route, or when the method/path pair is already taken.
    pub fn create_route<H, T>(&mut self, method: Method, path: &str, handler: H) -> WebResult<()>
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        let router = self.router.take().ok_or_else(|| {
            WebError::Configuration(format!(
                "cannot add route {} {}: web server {} is already running",
                method, path, self.uid
            ))
        })?;

        if !path.starts_with('/') {
            self.router = Some(router);
            return Err(WebError::Configuration(format!("route path {:?} must start with '/'", path)));
        }
        let filter = match MethodFilter::try_from(method.clone()) {
            Ok(filter) => filter,
            Err(e) => {
                self.router = Some(router);
                return Err(WebError::Configuration(format!("{} {}: {}", method, path, e)));
            }
        };
        if !self.registered.insert((method.clone(), path.to_string())) {
            self.router = Some(router);
            return Err(WebError::Configuration(format!(
                "route {} {} is already registered",
                method, path
            )));
        }

        debug!(module = %self.uid, %method, path, "adding route");
        self.router = Some(router.route(path, on(filter, handler)));
        Ok(())
    }

    /// Run `hook` after the server stopped accepting requests
    pub fn on_shutdown<F, Fut>(&mut self, hook: F) -> WebResult<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        if self.router.is_none() {
            return Err(WebError::Configuration(format!(
                "web server {} is already running",
                self.uid
            )));
        }
        self.hooks.push(Box::new(move || Box::pin(hook())));
        Ok(())
    }

    /// Handle of the runtime the server will run on
    ///
    /// Tasks spawned on it before setup start once the server thread runs.
    pub fn runtime_handle(&mut self) -> WebResult<Handle> {
        if let Some(runtime) = &self.runtime {
            return Ok(runtime.handle().clone());
        }
        if self.router.is_none() {
            return Err(WebError::Configuration(format!(
                "web server {} is already running",
                self.uid
            )));
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        self.runtime = Some(runtime);
        Ok(handle)
    }

    fn start(&mut self, agent: &Agent) -> WebResult<()> {
        if self.router.is_none() {
            return Err(WebError::Configuration(format!(
                "web server {} is already running",
                self.uid
            )));
        }
        self.runtime_handle()?;

        let address = self.config.bind_address();
        let listener = std::net::TcpListener::bind(&address).map_err(|source| WebError::Bind {
            address: address.clone(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        // Checked above; both are present from here on
        let (Some(router), Some(runtime)) = (self.router.take(), self.runtime.take()) else {
            return Err(WebError::Configuration(format!(
                "web server {} is already running",
                self.uid
            )));
        };
        let _ = self.handle.state.local_addr.set(local_addr);

        info!(agent = %agent.uid(), module = %self.uid, "starting web server on {} ...", local_addr);
        let server = Server {
            uid: self.uid.clone(),
            router,
            hooks: std::mem::take(&mut self.hooks),
            state: Arc::clone(&self.handle.state),
        };
        agent
            .spawn_thread(&format!("web-{}", self.uid), move |exit| {
                runtime.block_on(server.serve(listener, exit));
            })
            .map_err(WebError::from)
    }
}

impl Module for WebServerModule {
    fn uid(&self) -> &str {
        &self.uid
    }

    fn setup(&mut self, agent: &Agent) -> AgentResult<()> {
        Ok(self.start(agent)?)
    }

    // The server thread follows the agent's exit flag
    fn shutdown(&mut self) {}
}

struct Server {
    uid: String,
    router: Router,
    hooks: Vec<ShutdownHook>,
    state: Arc<ServerState>,
}

impl Server {
    async fn serve(self, listener: std::net::TcpListener, exit: ExitSignal) {
        let listener = match tokio::net::TcpListener::from_std(listener) {
            Ok(listener) => listener,
            Err(e) => {
                error!(module = %self.uid, "cannot adopt listener: {}", e);
                return;
            }
        };

        self.state.running.store(true, Ordering::Release);
        let result = axum::serve(listener, self.router)
            .with_graceful_shutdown(wait_for_exit(exit))
            .await;
        if let Err(e) = result {
            error!(module = %self.uid, "web server failed: {}", e);
        }

        debug!(module = %self.uid, hooks = self.hooks.len(), "running shutdown hooks ...");
        for hook in self.hooks {
            hook().await;
        }
        self.state.running.store(false, Ordering::Release);
        info!(module = %self.uid, "web server stopped");
    }
}

async fn wait_for_exit(exit: ExitSignal) {
    while !exit.is_set() {
        tokio::time::sleep(EXIT_CHECK_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ok() -> &'static str {
        "ok"
    }

    #[test]
    fn test_duplicate_route_rejected() {
        let mut module = WebServerModule::new(WebConfig::default());
        module.create_route(Method::GET, "/", ok).unwrap();
        module.create_route(Method::POST, "/", ok).unwrap();
        assert!(matches!(
            module.create_route(Method::GET, "/", ok),
            Err(WebError::Configuration(_))
        ));
        // the router survives a rejected registration
        module.create_route(Method::GET, "/other", ok).unwrap();
    }

    #[test]
    fn test_path_must_be_absolute() {
        let mut module = WebServerModule::with_uid(Some("web"), WebConfig::default());
        assert!(matches!(
            module.create_route(Method::GET, "relative", ok),
            Err(WebError::Configuration(_))
        ));
        assert_eq!(Module::uid(&module), "web");
    }
}
