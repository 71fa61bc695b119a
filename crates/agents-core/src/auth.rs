// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! CURVE certificates and the ZAP authenticator
//!
//! The authenticator is a REP socket bound on [`ZAP_ENDPOINT`] in the agent's
//! context. It is driven by the poller loop like every other socket: each
//! ZAP request is answered by a relay rewrite in the same tick it arrives.
//!
//! Policy (evaluated per connection attempt):
//! 1. A non-empty allow list admits only listed addresses; otherwise a
//!    non-empty deny list rejects listed addresses.
//! 2. NULL connections from admitted addresses pass.
//! 3. CURVE connections must also present a client key known for the ZAP
//!    domain (or the `*` domain), unless that domain allows any key.
//!
//! Certificates are read when [`Authenticator::configure_curve`] is called
//! and never re-read automatically.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::codec::Multipart;
use crate::error::{AgentError, AgentResult};
use crate::socket::{
    ConnectMode, Inbound, SocketKey, SocketOption, SocketOptions, SocketSpec, SocketType,
};

/// Fixed inproc endpoint libzmq sends ZAP requests to
pub const ZAP_ENDPOINT: &str = "inproc://zeromq.zap.01";

const ZAP_VERSION: &[u8] = b"1.0";
const ANY_DOMAIN: &str = "*";

/// Generate a CURVE key pair, Z85 encoded as `(public, secret)`
pub fn curve_keypair() -> AgentResult<(String, String)> {
    let pair = zmq::CurveKeyPair::new()?;
    Ok((z85(&pair.public_key)?, z85(&pair.secret_key)?))
}

fn z85(key: &[u8]) -> AgentResult<String> {
    zmq::z85_encode(key).map_err(|e| AgentError::Certificate(format!("Z85 encode: {:?}", e)))
}

/// Options for a CURVE server socket
pub fn curve_server_options(secret_key: &str) -> SocketOptions {
    SocketOptions::new()
        .with(SocketOption::CurveServer, true)
        .with(SocketOption::CurveSecretKey, secret_key)
}

/// Options for a CURVE client socket
pub fn curve_client_options(server_public_key: &str, public_key: &str, secret_key: &str) -> SocketOptions {
    SocketOptions::new()
        .with(SocketOption::CurveServerKey, server_public_key)
        .with(SocketOption::CurvePublicKey, public_key)
        .with(SocketOption::CurveSecretKey, secret_key)
}

/// Key pair loaded from a certificate file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub public_key: String,
    /// Present only when read from a `.key_secret` file
    pub secret_key: Option<String>,
}

fn certificate_text(
    kind: &str,
    metadata: &[(String, String)],
    public_key: &str,
    secret_key: Option<&str>,
) -> String {
    let mut text = String::new();
    text.push_str("#   ****  Generated by agents  ****\n");
    text.push_str(&format!("#   ZeroMQ CURVE {} Certificate\n", kind));
    text.push_str("#   Exchange securely, or use a secure mechanism to verify the contents\n");
    text.push_str("#   of this file after exchange.\n\n");
    text.push_str("metadata\n");
    for (key, value) in metadata {
        text.push_str(&format!("    {} = \"{}\"\n", key, value));
    }
    text.push_str("curve\n");
    text.push_str(&format!("    public-key = \"{}\"\n", public_key));
    if let Some(secret) = secret_key {
        text.push_str(&format!("    secret-key = \"{}\"\n", secret));
    }
    text
}

/// Write `<name>.key` and `<name>.key_secret` into `dir`
///
/// Returns `(public_path, secret_path)`.
pub fn create_certificates(
    dir: impl AsRef<Path>,
    name: &str,
    metadata: &[(String, String)],
) -> AgentResult<(PathBuf, PathBuf)> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let (public_key, secret_key) = curve_keypair()?;

    let public_path = dir.join(format!("{}.key", name));
    let secret_path = dir.join(format!("{}.key_secret", name));
    fs::write(&public_path, certificate_text("Public", metadata, &public_key, None))?;
    fs::write(
        &secret_path,
        certificate_text("Secret", metadata, &public_key, Some(&secret_key)),
    )?;
    Ok((public_path, secret_path))
}

fn quoted_value(line: &str, key: &str) -> Option<String> {
    let rest = line.trim().strip_prefix(key)?.trim_start();
    let rest = rest.strip_prefix('=')?.trim();
    Some(rest.trim_matches('"').to_string())
}

/// Read a public or secret certificate
pub fn load_certificate(path: impl AsRef<Path>) -> AgentResult<Certificate> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let mut public_key = None;
    let mut secret_key = None;
    for line in text.lines() {
        if line.trim_start().starts_with('#') {
            continue;
        }
        if let Some(value) = quoted_value(line, "public-key") {
            public_key = Some(value);
        } else if let Some(value) = quoted_value(line, "secret-key") {
            secret_key = Some(value);
        }
    }

    let public_key = public_key.ok_or_else(|| {
        AgentError::Certificate(format!("no public key in {}", path.display()))
    })?;
    Ok(Certificate {
        public_key,
        secret_key,
    })
}

/// Public keys of every `*.key` file in `dir`
pub fn load_certificates(dir: impl AsRef<Path>) -> AgentResult<HashSet<String>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(AgentError::Certificate(format!(
            "invalid certificate directory: {}",
            dir.display()
        )));
    }
    let mut keys = HashSet::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("key") {
            keys.insert(load_certificate(&path)?.public_key);
        }
    }
    Ok(keys)
}

/// Where CURVE client keys come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurveLocation {
    /// Accept any client key (encryption without client authentication)
    AllowAny,
    /// Accept keys from the `*.key` certificates in this directory
    Directory(PathBuf),
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub domain: String,
    pub allow: Vec<String>,
    pub deny: Vec<String>,
    pub location: CurveLocation,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            domain: ANY_DOMAIN.to_string(),
            allow: Vec::new(),
            deny: Vec::new(),
            location: CurveLocation::AllowAny,
        }
    }
}

#[derive(Debug, Clone)]
enum CurveKeys {
    AllowAny,
    Known(HashSet<String>),
}

#[derive(Debug, Default)]
struct AuthPolicy {
    allow: HashSet<String>,
    deny: HashSet<String>,
    curve: HashMap<String, CurveKeys>,
}

/// ZAP request as sent by libzmq
struct ZapRequest<'a> {
    request_id: &'a [u8],
    domain: String,
    address: String,
    mechanism: &'a [u8],
    credentials: &'a [Vec<u8>],
}

impl<'a> ZapRequest<'a> {
    fn parse(frames: &'a [Vec<u8>]) -> Result<Self, &'static str> {
        if frames.len() < 6 {
            return Err("malformed ZAP request");
        }
        if frames[0] != ZAP_VERSION {
            return Err("unsupported ZAP version");
        }
        Ok(Self {
            request_id: &frames[1],
            domain: String::from_utf8_lossy(&frames[2]).into_owned(),
            address: String::from_utf8_lossy(&frames[3]).into_owned(),
            mechanism: &frames[5],
            credentials: &frames[6..],
        })
    }
}

impl AuthPolicy {
    /// `Ok(user_id)` or `Err(reason)`
    fn authenticate(&self, request: &ZapRequest<'_>) -> Result<String, String> {
        let mut allowed = false;
        if !self.allow.is_empty() {
            if !self.allow.contains(&request.address) {
                return Err("Address not in allow list".to_string());
            }
            allowed = true;
        } else if self.deny.contains(&request.address) {
            return Err("Address is blocked".to_string());
        }

        match request.mechanism {
            b"NULL" => Ok("anonymous".to_string()),
            b"CURVE" => {
                let key = match request.credentials {
                    [key] => key,
                    _ => return Err("Invalid CURVE credentials".to_string()),
                };
                self.authenticate_curve(&request.domain, key)
            }
            _ if allowed => Ok("anonymous".to_string()),
            other => Err(format!(
                "Unsupported mechanism {}",
                String::from_utf8_lossy(other)
            )),
        }
    }

    fn authenticate_curve(&self, domain: &str, key: &[u8]) -> Result<String, String> {
        let keys = self
            .curve
            .get(domain)
            .or_else(|| self.curve.get(ANY_DOMAIN))
            .ok_or_else(|| "Unknown domain".to_string())?;
        let client = zmq::z85_encode(key).map_err(|_| "Invalid CURVE key".to_string())?;
        match keys {
            CurveKeys::AllowAny => Ok(client),
            CurveKeys::Known(known) if known.contains(&client) => Ok(client),
            CurveKeys::Known(_) => Err("Unknown key".to_string()),
        }
    }
}

struct AuthState {
    agent_uid: String,
    policy: RwLock<AuthPolicy>,
    stopped: AtomicBool,
}

impl AuthState {
    fn reply(&self, frames: Multipart) -> Multipart {
        let request = match ZapRequest::parse(&frames) {
            Ok(request) => request,
            Err(reason) => {
                warn!(agent = %self.agent_uid, frames = frames.len(), "{}", reason);
                let request_id = frames.get(1).cloned().unwrap_or_default();
                return zap_reply(request_id, b"400", reason.as_bytes(), b"");
            }
        };

        let outcome = if self.stopped.load(Ordering::Acquire) {
            Err("Authenticator stopped".to_string())
        } else {
            self.policy.read().authenticate(&request)
        };

        match outcome {
            Ok(user_id) => {
                debug!(agent = %self.agent_uid, address = %request.address, domain = %request.domain, "ZAP allowed");
                zap_reply(request.request_id.to_vec(), b"200", b"OK", user_id.as_bytes())
            }
            Err(reason) => {
                info!(agent = %self.agent_uid, address = %request.address, domain = %request.domain, "ZAP denied: {}", reason);
                zap_reply(request.request_id.to_vec(), b"400", reason.as_bytes(), b"")
            }
        }
    }
}

fn zap_reply(request_id: Vec<u8>, status: &[u8], text: &[u8], user_id: &[u8]) -> Multipart {
    vec![
        ZAP_VERSION.to_vec(),
        request_id,
        status.to_vec(),
        text.to_vec(),
        user_id.to_vec(),
        Vec::new(),
    ]
}

/// Handle to the agent's ZAP handler
#[derive(Clone)]
pub struct Authenticator {
    state: Arc<AuthState>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("agent", &self.state.agent_uid)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl Authenticator {
    /// Admit only these addresses
    pub fn allow<I, S>(&self, addresses: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut policy = self.state.policy.write();
        policy.allow.extend(addresses.into_iter().map(Into::into));
    }

    /// Reject these addresses (ignored while an allow list is set)
    pub fn deny<I, S>(&self, addresses: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut policy = self.state.policy.write();
        policy.deny.extend(addresses.into_iter().map(Into::into));
    }

    /// (Re)load the CURVE keys accepted for `domain`
    ///
    /// Must be called again whenever certificates are added or removed.
    pub fn configure_curve(&self, domain: &str, location: &CurveLocation) -> AgentResult<()> {
        let keys = match location {
            CurveLocation::AllowAny => CurveKeys::AllowAny,
            CurveLocation::Directory(dir) => CurveKeys::Known(load_certificates(dir)?),
        };
        if let CurveKeys::Known(known) = &keys {
            info!(agent = %self.state.agent_uid, domain, keys = known.len(), "loaded CURVE certificates");
        }
        self.state.policy.write().curve.insert(domain.to_string(), keys);
        Ok(())
    }

    /// Deny every further request; the socket itself closes with the agent
    pub fn stop(&self) {
        if !self.state.stopped.swap(true, Ordering::AcqRel) {
            debug!(agent = %self.state.agent_uid, "authenticator stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::Acquire)
    }
}

impl Agent {
    /// Start the ZAP handler for this agent's context
    ///
    /// Start it before binding CURVE server sockets. Starting it twice is
    /// `AgentError::SocketExists`.
    pub fn start_authenticator(&self, config: AuthConfig) -> AgentResult<Authenticator> {
        let authenticator = Authenticator {
            state: Arc::new(AuthState {
                agent_uid: self.uid().to_string(),
                policy: RwLock::new(AuthPolicy::default()),
                stopped: AtomicBool::new(false),
            }),
        };
        authenticator.allow(config.allow);
        authenticator.deny(config.deny);
        authenticator.configure_curve(&config.domain, &config.location)?;

        let key = SocketKey::new(SocketType::Rep, ZAP_ENDPOINT);
        let outbound = self.outbound_queue(key.clone());
        let state = Arc::clone(&authenticator.state);
        self.open_socket(SocketSpec {
            key,
            mode: ConnectMode::Bind,
            options: SocketOptions::new(),
            outbound: outbound.clone(),
            inbound: Inbound::Relay {
                rewrite: Box::new(move |frames| Some(state.reply(frames))),
                target: outbound,
            },
        })?;

        info!(agent = %self.uid(), domain = %config.domain, "ZAP authenticator started");
        *self.authenticator_slot().lock() = Some(authenticator.clone());
        Ok(authenticator)
    }

    pub fn authenticator(&self) -> Option<Authenticator> {
        self.authenticator_slot().lock().clone()
    }
}
