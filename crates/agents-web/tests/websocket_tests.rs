// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use agents_config::{AgentsConfig, PoolConfig, SetupFailurePolicy, WebConfig};
use agents_core::Agent;
use agents_web::{websocket_frame, WebSocketModule};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn config() -> AgentsConfig {
    let mut config = AgentsConfig::default();
    config.agent.install_signal_handlers = false;
    config.agent.setup_failure = SetupFailurePolicy::Report;
    config
}

fn start() -> (Agent, WebSocketModule) {
    let web = WebConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        websocket_route: "/ws".to_string(),
    };
    let module = WebSocketModule::new(web, PoolConfig::default()).unwrap();
    let agent = Agent::start(config(), |_| Ok(())).unwrap();
    (agent, module)
}

async fn connect(address: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{}/ws", address)).await.unwrap();
    client
}

async fn next_text(client: &mut Client) -> Option<String> {
    match tokio::time::timeout(Duration::from_secs(2), client.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => Some(text),
        _ => None,
    }
}

fn wait_for<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn messages_flow_through_pool() {
    let (agent, module) = start();
    let pool = module.pool();
    let handle = module.handle();
    agent.register_module(Box::new(module)).unwrap();
    let address = handle.local_addr().unwrap();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let mut first = runtime.block_on(connect(address));
    let mut second = runtime.block_on(connect(address));

    runtime
        .block_on(first.send(Message::Text(r#"{"hello": "agent"}"#.to_string())))
        .unwrap();
    let frame = websocket_frame(pool.inbound().recv_timeout(Duration::from_secs(2)).unwrap());
    assert_eq!(frame.payload, json!({"hello": "agent"}));

    runtime
        .block_on(second.send(Message::Text("[1, 2]".to_string())))
        .unwrap();
    let (other_uid, payload) = pool.inbound().recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(payload, json!([1, 2]));
    assert_ne!(other_uid, frame.connection_id);
    assert_eq!(pool.len(), 2);

    // replies reach only the addressed socket
    pool.send_to(&frame.connection_id, json!({"reply": 1}));
    assert_eq!(runtime.block_on(next_text(&mut first)), Some(r#"{"reply":1}"#.to_string()));

    // a client closing its socket leaves the pool
    runtime.block_on(first.close(None)).unwrap();
    assert!(wait_for(Duration::from_secs(2), || pool.len() == 1));
    assert_eq!(pool.uids(), vec![other_uid]);

    agent.shutdown();
    assert!(pool.is_empty());
    assert_eq!(agent.live_threads(), 0);

    // the remaining client is told the host went away
    let closed = runtime.block_on(async {
        loop {
            match tokio::time::timeout(Duration::from_secs(2), second.next()).await {
                Ok(Some(Ok(Message::Close(frame)))) => return frame.map(|f| f.code),
                Ok(Some(Ok(_))) => continue,
                _ => return None,
            }
        }
    });
    assert_eq!(closed, Some(CloseCode::Away));
}

#[test]
fn binary_frames_are_not_data() {
    let (agent, module) = start();
    let pool = module.pool();
    let handle = module.handle();
    agent.register_module(Box::new(module)).unwrap();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let mut client = runtime.block_on(connect(handle.local_addr().unwrap()));
    runtime.block_on(client.send(Message::Binary(vec![1, 2, 3]))).unwrap();
    runtime
        .block_on(client.send(Message::Text(r#""after""#.to_string())))
        .unwrap();

    let (_, payload) = pool.inbound().recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(payload, json!("after"));
    assert_eq!(pool.len(), 1);

    agent.shutdown();
}
