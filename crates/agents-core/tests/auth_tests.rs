// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;
use std::time::{Duration, Instant};

use agents_config::{AgentsConfig, SetupFailurePolicy};
use agents_core::{
    create_certificates, curve_client_options, curve_server_options, load_certificate, Agent,
    AgentError, AuthConfig, CurveLocation, SocketHandle, SocketOption, SocketType,
};
use crossbeam::channel;

fn config() -> AgentsConfig {
    let mut config = AgentsConfig::default();
    config.agent.install_signal_handlers = false;
    config.agent.setup_failure = SetupFailurePolicy::Report;
    config.agent.poll_interval_ms = 10;
    config
}

fn curve_available() -> bool {
    zmq::has("curve").unwrap_or(false)
}

fn start_server(address: &'static str, keys_dir: &Path, secret: String) -> (Agent, SocketHandle) {
    let location = CurveLocation::Directory(keys_dir.to_path_buf());
    let (tx, rx) = channel::bounded(1);
    let agent = Agent::start(config(), move |agent| {
        agent.start_authenticator(AuthConfig {
            location,
            ..AuthConfig::default()
        })?;
        let options = curve_server_options(&secret).with(SocketOption::ZapDomain, "global");
        let _ = tx.send(agent.bind_socket(SocketType::Pull, address, &options)?);
        Ok(())
    })
    .expect("server starts");
    assert!(agent.boot_succeeded(), "{:?}", agent.boot_error());
    (agent, rx.recv_timeout(Duration::from_secs(1)).unwrap())
}

fn start_client(address: &'static str, server_public: String, public: String, secret: String) -> (Agent, SocketHandle) {
    let (tx, rx) = channel::bounded(1);
    let agent = Agent::start(config(), move |agent| {
        let options = curve_client_options(&server_public, &public, &secret);
        let _ = tx.send(agent.connect_socket(SocketType::Push, address, &options)?);
        Ok(())
    })
    .expect("client starts");
    (agent, rx.recv_timeout(Duration::from_secs(1)).unwrap())
}

fn keys(path: &Path) -> (String, String) {
    let certificate = load_certificate(path).unwrap();
    (certificate.public_key, certificate.secret_key.unwrap())
}

#[test]
fn only_known_clients_get_through() {
    if !curve_available() {
        return;
    }
    let address = "tcp://127.0.0.1:56601";
    let server_dir = tempfile::tempdir().unwrap();
    let authorized_dir = tempfile::tempdir().unwrap();
    let stranger_dir = tempfile::tempdir().unwrap();

    let (_, server_secret_path) = create_certificates(server_dir.path(), "server", &[]).unwrap();
    let (_, client_secret_path) = create_certificates(authorized_dir.path(), "client", &[]).unwrap();
    let (_, stranger_secret_path) = create_certificates(stranger_dir.path(), "stranger", &[]).unwrap();
    let (server_public, server_secret) = keys(&server_secret_path);
    let (client_public, client_secret) = keys(&client_secret_path);
    let (stranger_public, stranger_secret) = keys(&stranger_secret_path);

    let (server, pull) = start_server(address, authorized_dir.path(), server_secret);
    let (stranger, stranger_push) = start_client(address, server_public.clone(), stranger_public, stranger_secret);
    let (client, push) = start_client(address, server_public, client_public, client_secret);

    stranger_push.send(vec![b"let me in".to_vec()]).unwrap();
    push.send(vec![b"hello".to_vec()]).unwrap();

    let deadline = Instant::now() + Duration::from_millis(1500);
    let mut received = Vec::new();
    while Instant::now() < deadline {
        if let Some(frames) = pull.recv_timeout(Duration::from_millis(100)).unwrap() {
            received.push(frames);
        }
    }
    assert_eq!(received, vec![vec![b"hello".to_vec()]]);

    let authenticator = server.authenticator().expect("authenticator registered");
    for agent in [client, stranger, server] {
        agent.shutdown();
    }
    assert!(authenticator.is_stopped());
}

#[test]
fn authenticator_starts_once() {
    let agent = Agent::start(config(), |agent| {
        agent.start_authenticator(AuthConfig::default())?;
        Ok(())
    })
    .unwrap();
    assert!(agent.boot_succeeded());
    assert!(matches!(
        agent.start_authenticator(AuthConfig::default()),
        Err(AgentError::SocketExists(_))
    ));
    agent.shutdown();
}
