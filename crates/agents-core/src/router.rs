// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Router/Dealer relay
//!
//! A dealer sends `[target][tag][payload]`. The router socket prepends the
//! dealer's identity, so the router sees `[source][target][tag][payload]`
//! and re-emits `[target][source][tag][payload]`. The router socket then
//! strips `target` and delivers `[source][tag][payload]` to that dealer.
//!
//! Delivery is at-most-once: a frame addressed to a dealer that is not
//! connected is dropped by the transport, never queued or retried.

use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::warn;

use crate::agent::Agent;
use crate::codec::{Directed, Multipart};
use crate::error::AgentResult;
use crate::socket::{
    ConnectMode, Inbound, OptionValue, SocketHandle, SocketKey, SocketOption, SocketOptions,
    SocketSpec, SocketType,
};

/// Swap the first two frames; `None` for anything shorter
pub fn swap_route(mut frames: Multipart) -> Option<Multipart> {
    if frames.len() < 2 {
        return None;
    }
    frames.swap(0, 1);
    Some(frames)
}

/// Bound ROUTER socket relaying between dealers inside the poller loop
#[derive(Debug, Clone)]
pub struct Router {
    key: SocketKey,
}

impl Router {
    pub fn key(&self) -> &SocketKey {
        &self.key
    }

    pub fn address(&self) -> &str {
        &self.key.address
    }
}

/// Connected DEALER socket identified by a routing name
#[derive(Debug, Clone)]
pub struct Dealer {
    socket: SocketHandle,
    identity: String,
    agent_uid: String,
}

impl Dealer {
    /// Routing name other dealers address this one by
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn socket(&self) -> &SocketHandle {
        &self.socket
    }

    /// Enqueue `payload` for the dealer named `target`
    pub fn send(&self, target: &str, payload: &Value) -> AgentResult<()> {
        self.send_directed(&Directed::new(target, payload.clone()))
    }

    pub fn send_directed(&self, message: &Directed) -> AgentResult<()> {
        self.socket.send(message.to_multipart()?)
    }

    /// Next well-formed message; `target` holds the sender's name
    ///
    /// Malformed frames are logged and skipped without extending the wait.
    pub fn recv_timeout(&self, timeout: Duration) -> AgentResult<Option<Directed>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.socket.recv_timeout(remaining)? {
                Some(frames) => {
                    if let Some(message) = self.decode(&frames) {
                        return Ok(Some(message));
                    }
                }
                None => return Ok(None),
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    pub fn try_recv(&self) -> AgentResult<Option<Directed>> {
        while let Some(frames) = self.socket.try_recv()? {
            if let Some(message) = self.decode(&frames) {
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    fn decode(&self, frames: &[Vec<u8>]) -> Option<Directed> {
        match Directed::from_multipart(frames) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(agent = %self.agent_uid, dealer = %self.identity, "dropping malformed message: {}", e);
                None
            }
        }
    }
}

impl Agent {
    /// Bind a ROUTER socket that relays between connected dealers
    pub fn create_router(&self, address: &str, options: &SocketOptions) -> AgentResult<Router> {
        let key = SocketKey::new(SocketType::Router, address);
        let outbound = self.outbound_queue(key.clone());
        let agent_uid = self.uid().to_string();
        let rewrite = Box::new(move |frames: Multipart| {
            let parts = frames.len();
            let routed = swap_route(frames);
            if routed.is_none() {
                warn!(agent = %agent_uid, parts, "router dropped frame without a destination");
            }
            routed
        });

        self.open_socket(SocketSpec {
            key: key.clone(),
            mode: ConnectMode::Bind,
            options: options.clone(),
            outbound: outbound.clone(),
            inbound: Inbound::Relay {
                rewrite,
                target: outbound,
            },
        })?;
        Ok(Router { key })
    }

    /// Connect a DEALER socket
    ///
    /// The routing identity is the agent uid unless `options` sets one.
    pub fn create_dealer(&self, address: &str, options: &SocketOptions) -> AgentResult<Dealer> {
        let mut options = options.clone();
        let identity = match options.get(SocketOption::Identity) {
            Some(OptionValue::Str(s)) => s.clone(),
            Some(OptionValue::Bytes(b)) => String::from_utf8_lossy(b).into_owned(),
            _ => {
                options.set(SocketOption::Identity, self.uid());
                self.uid().to_string()
            }
        };

        let socket = self.connect_socket(SocketType::Dealer, address, &options)?;
        Ok(Dealer {
            socket,
            identity,
            agent_uid: self.uid().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_route() {
        let frames = vec![b"d1".to_vec(), b"d2".to_vec(), vec![1u8], b"{}".to_vec()];
        assert_eq!(
            swap_route(frames),
            Some(vec![b"d2".to_vec(), b"d1".to_vec(), vec![1u8], b"{}".to_vec()])
        );
        assert_eq!(swap_route(vec![b"only".to_vec()]), None);
    }
}
