// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::{Duration, Instant};

use agents_config::{AgentsConfig, SetupFailurePolicy, WebConfig};
use agents_core::{Agent, AgentError, Module};
use agents_web::{WebError, WebServerModule};
use axum::http::Method;

fn config() -> AgentsConfig {
    let mut config = AgentsConfig::default();
    config.agent.install_signal_handlers = false;
    config.agent.setup_failure = SetupFailurePolicy::Report;
    config
}

fn web_config(port: u16) -> WebConfig {
    WebConfig {
        host: "127.0.0.1".to_string(),
        port,
        ..WebConfig::default()
    }
}

fn client_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

async fn hello() -> &'static str {
    "hello"
}

async fn echo(body: String) -> String {
    body
}

#[test]
fn routes_are_served_until_shutdown() {
    let mut module = WebServerModule::new(web_config(0));
    module.create_route(Method::GET, "/hello", hello).unwrap();
    module.create_route(Method::POST, "/echo", echo).unwrap();
    let handle = module.handle();

    let agent = Agent::start(config(), move |agent| agent.register_module(Box::new(module))).unwrap();
    assert!(agent.boot_succeeded(), "{:?}", agent.boot_error());
    let address = handle.local_addr().expect("bound during setup");
    assert_ne!(address.port(), 0);

    client_runtime().block_on(async {
        let client = reqwest::Client::new();
        let body = client
            .get(format!("http://{}/hello", address))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "hello");

        let echoed = client
            .post(format!("http://{}/echo", address))
            .body("ping")
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(echoed, "ping");

        let missing = client
            .get(format!("http://{}/missing", address))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);
    });

    let started = Instant::now();
    agent.shutdown();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(agent.live_threads(), 0);
    assert!(!handle.is_running());
    assert!(std::net::TcpStream::connect(address).is_err());
}

#[test]
fn routes_are_fixed_once_running() {
    let agent = Agent::start(config(), |_| Ok(())).unwrap();
    let mut module = WebServerModule::new(web_config(0));
    module.create_route(Method::GET, "/hello", hello).unwrap();
    module.setup(&agent).unwrap();

    assert!(matches!(
        module.create_route(Method::GET, "/late", hello),
        Err(WebError::Configuration(_))
    ));
    assert!(matches!(
        module.on_shutdown(|| async {}),
        Err(WebError::Configuration(_))
    ));
    assert!(matches!(
        module.setup(&agent),
        Err(AgentError::Configuration(_))
    ));

    agent.shutdown();
    assert_eq!(agent.live_threads(), 0);
}

#[test]
fn occupied_port_fails_registration() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let module = WebServerModule::new(web_config(port));
    let agent = Agent::start(config(), move |agent| agent.register_module(Box::new(module))).unwrap();

    assert!(!agent.boot_succeeded());
    assert!(agent.boot_error().unwrap().contains("failed to bind"));
    assert!(agent.module_uids().is_empty());
    agent.shutdown();
}

#[test]
fn shutdown_hooks_run_after_serving() {
    let (tx, rx) = crossbeam::channel::bounded(1);
    let mut module = WebServerModule::new(web_config(0));
    module
        .on_shutdown(move || async move {
            let _ = tx.send("stopped");
        })
        .unwrap();

    let agent = Agent::start(config(), move |agent| agent.register_module(Box::new(module))).unwrap();
    assert!(rx.try_recv().is_err());
    agent.shutdown();
    assert_eq!(rx.recv_timeout(Duration::from_secs(1)), Ok("stopped"));
}
