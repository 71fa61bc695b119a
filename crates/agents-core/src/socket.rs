// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Socket keys, options, queues and handles
//!
//! A [`SocketHandle`] never touches its `zmq::Socket`. Sends are enqueued on
//! the handle's outbound queue and inbound frames arrive on a channel; the
//! agent's poller loop is the only code performing raw socket I/O.

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agents_config::{OverflowPolicy, QueueConfig};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError, TrySendError};
use tracing::{trace, warn};

use crate::codec::Multipart;
use crate::error::{AgentError, AgentResult};

/// ZMQ socket patterns supported by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketType {
    Pub,
    Sub,
    XPub,
    XSub,
    Router,
    Dealer,
    Req,
    Rep,
    Push,
    Pull,
    Pair,
}

impl SocketType {
    pub(crate) fn zmq_type(self) -> zmq::SocketType {
        match self {
            SocketType::Pub => zmq::PUB,
            SocketType::Sub => zmq::SUB,
            SocketType::XPub => zmq::XPUB,
            SocketType::XSub => zmq::XSUB,
            SocketType::Router => zmq::ROUTER,
            SocketType::Dealer => zmq::DEALER,
            SocketType::Req => zmq::REQ,
            SocketType::Rep => zmq::REP,
            SocketType::Push => zmq::PUSH,
            SocketType::Pull => zmq::PULL,
            SocketType::Pair => zmq::PAIR,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SocketType::Pub => "PUB",
            SocketType::Sub => "SUB",
            SocketType::XPub => "XPUB",
            SocketType::XSub => "XSUB",
            SocketType::Router => "ROUTER",
            SocketType::Dealer => "DEALER",
            SocketType::Req => "REQ",
            SocketType::Rep => "REP",
            SocketType::Push => "PUSH",
            SocketType::Pull => "PULL",
            SocketType::Pair => "PAIR",
        }
    }
}

impl fmt::Display for SocketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// At most one socket per key exists in an agent
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SocketKey {
    pub socket_type: SocketType,
    pub address: String,
}

impl SocketKey {
    pub fn new(socket_type: SocketType, address: impl Into<String>) -> Self {
        Self {
            socket_type,
            address: address.into(),
        }
    }
}

impl fmt::Display for SocketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.socket_type, self.address)
    }
}

/// Whether the socket listens or dials out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    Bind,
    Connect,
}

/// Socket options applied before bind/connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketOption {
    Identity,
    Subscribe,
    Unsubscribe,
    Linger,
    SendHwm,
    ReceiveHwm,
    ReconnectInterval,
    Immediate,
    RouterMandatory,
    XpubVerbose,
    CurveServer,
    CurvePublicKey,
    CurveSecretKey,
    CurveServerKey,
    ZapDomain,
}

impl SocketOption {
    fn is_curve_key(self) -> bool {
        matches!(
            self,
            SocketOption::CurvePublicKey | SocketOption::CurveSecretKey | SocketOption::CurveServerKey
        )
    }
}

/// Option value; the variant decides how the value is encoded
///
/// `Str` values are UTF-8 encoded, except CURVE keys which are Z85 decoded
/// into their 32 raw bytes. `Bytes` values are applied verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Int(i32),
    Bool(bool),
    Bytes(Vec<u8>),
    Str(String),
}

impl From<i32> for OptionValue {
    fn from(v: i32) -> Self {
        OptionValue::Int(v)
    }
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        OptionValue::Bool(v)
    }
}

impl From<Vec<u8>> for OptionValue {
    fn from(v: Vec<u8>) -> Self {
        OptionValue::Bytes(v)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        OptionValue::Str(v.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(v: String) -> Self {
        OptionValue::Str(v)
    }
}

impl OptionValue {
    fn mismatch(&self, option: SocketOption, wanted: &str) -> AgentError {
        AgentError::Configuration(format!(
            "socket option {:?} expects {}, got {:?}",
            option, wanted, self
        ))
    }

    fn as_int(&self, option: SocketOption) -> AgentResult<i32> {
        match self {
            OptionValue::Int(v) => Ok(*v),
            _ => Err(self.mismatch(option, "an integer")),
        }
    }

    fn as_bool(&self, option: SocketOption) -> AgentResult<bool> {
        match self {
            OptionValue::Bool(v) => Ok(*v),
            OptionValue::Int(v) => Ok(*v != 0),
            _ => Err(self.mismatch(option, "a boolean")),
        }
    }

    fn as_bytes(&self, option: SocketOption) -> AgentResult<Cow<'_, [u8]>> {
        match self {
            OptionValue::Bytes(v) => Ok(Cow::Borrowed(v.as_slice())),
            OptionValue::Str(s) if option.is_curve_key() => zmq::z85_decode(s)
                .map(Cow::Owned)
                .map_err(|e| AgentError::Configuration(format!("invalid Z85 key for {:?}: {}", option, e))),
            OptionValue::Str(s) => Ok(Cow::Borrowed(s.as_bytes())),
            _ => Err(self.mismatch(option, "bytes or a string")),
        }
    }

    fn as_str(&self, option: SocketOption) -> AgentResult<&str> {
        match self {
            OptionValue::Str(s) => Ok(s.as_str()),
            _ => Err(self.mismatch(option, "a string")),
        }
    }
}

/// Ordered option list; setting an option again replaces its value in place
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocketOptions {
    entries: Vec<(SocketOption, OptionValue)>,
}

impl SocketOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, option: SocketOption, value: impl Into<OptionValue>) -> Self {
        self.set(option, value);
        self
    }

    pub fn set(&mut self, option: SocketOption, value: impl Into<OptionValue>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(o, _)| *o == option) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((option, value)),
        }
    }

    pub fn get(&self, option: SocketOption) -> Option<&OptionValue> {
        self.entries.iter().find(|(o, _)| *o == option).map(|(_, v)| v)
    }

    pub fn contains(&self, option: SocketOption) -> bool {
        self.get(option).is_some()
    }

    /// Merge `other` into `self`; values from `other` win
    pub fn merge(mut self, other: &SocketOptions) -> Self {
        for (option, value) in &other.entries {
            self.set(*option, value.clone());
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &(SocketOption, OptionValue)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn apply(&self, socket: &zmq::Socket) -> AgentResult<()> {
        for (option, value) in &self.entries {
            apply_option(socket, *option, value)?;
        }
        Ok(())
    }
}

fn apply_option(socket: &zmq::Socket, option: SocketOption, value: &OptionValue) -> AgentResult<()> {
    use SocketOption::*;
    match option {
        Identity => socket.set_identity(&value.as_bytes(option)?)?,
        Subscribe => socket.set_subscribe(&value.as_bytes(option)?)?,
        Unsubscribe => socket.set_unsubscribe(&value.as_bytes(option)?)?,
        Linger => socket.set_linger(value.as_int(option)?)?,
        SendHwm => socket.set_sndhwm(value.as_int(option)?)?,
        ReceiveHwm => socket.set_rcvhwm(value.as_int(option)?)?,
        ReconnectInterval => socket.set_reconnect_ivl(value.as_int(option)?)?,
        Immediate => socket.set_immediate(value.as_bool(option)?)?,
        RouterMandatory => socket.set_router_mandatory(value.as_bool(option)?)?,
        XpubVerbose => socket.set_xpub_verbose(value.as_bool(option)?)?,
        CurveServer => socket.set_curve_server(value.as_bool(option)?)?,
        CurvePublicKey => socket.set_curve_publickey(&value.as_bytes(option)?)?,
        CurveSecretKey => socket.set_curve_secretkey(&value.as_bytes(option)?)?,
        CurveServerKey => socket.set_curve_serverkey(&value.as_bytes(option)?)?,
        ZapDomain => socket.set_zap_domain(value.as_str(option)?)?,
    }
    Ok(())
}

/// Outbound frames waiting for the poller
///
/// Unbounded unless `[queues].outbound_capacity` is set, in which case the
/// configured overflow policy applies. Nothing is ever dropped without a
/// warning.
#[derive(Clone)]
pub(crate) struct OutboundQueue {
    key: SocketKey,
    tx: Sender<Multipart>,
    rx: Receiver<Multipart>,
    overflow: Option<OverflowPolicy>,
    closed: Arc<AtomicBool>,
}

const BLOCK_RECHECK: Duration = Duration::from_millis(100);

impl OutboundQueue {
    pub(crate) fn new(key: SocketKey, config: &QueueConfig) -> Self {
        let (tx, rx, overflow) = if config.is_bounded() {
            let (tx, rx) = channel::bounded(config.outbound_capacity);
            (tx, rx, Some(config.overflow))
        } else {
            let (tx, rx) = channel::unbounded();
            (tx, rx, None)
        };
        Self {
            key,
            tx,
            rx,
            overflow,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Enqueue from application code, honouring the overflow policy
    pub(crate) fn push(&self, frames: Multipart) -> AgentResult<()> {
        if self.is_closed() {
            return Err(AgentError::QueueClosed);
        }
        match self.overflow {
            None => self.tx.send(frames).map_err(|_| AgentError::QueueClosed),
            Some(OverflowPolicy::Reject) => match self.tx.try_send(frames) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => Err(AgentError::QueueFull(self.key.clone())),
                Err(TrySendError::Disconnected(_)) => Err(AgentError::QueueClosed),
            },
            Some(OverflowPolicy::DropOldest) => {
                let mut frames = frames;
                loop {
                    match self.tx.try_send(frames) {
                        Ok(()) => return Ok(()),
                        Err(TrySendError::Full(f)) => {
                            if self.rx.try_recv().is_ok() {
                                warn!(socket = %self.key, "Outbound queue full, dropped oldest message");
                            }
                            frames = f;
                        }
                        Err(TrySendError::Disconnected(_)) => return Err(AgentError::QueueClosed),
                    }
                }
            }
            Some(OverflowPolicy::Block) => {
                let mut frames = frames;
                loop {
                    match self.tx.send_timeout(frames, BLOCK_RECHECK) {
                        Ok(()) => return Ok(()),
                        Err(SendTimeoutError::Timeout(f)) => {
                            if self.is_closed() {
                                return Err(AgentError::QueueClosed);
                            }
                            frames = f;
                        }
                        Err(SendTimeoutError::Disconnected(_)) => return Err(AgentError::QueueClosed),
                    }
                }
            }
        }
    }

    /// Enqueue from inside the poller loop; never blocks
    ///
    /// Returns false when the frame was dropped because a bounded queue is
    /// full (the caller logs it).
    pub(crate) fn push_relay(&self, frames: Multipart) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.tx.try_send(frames) {
            Ok(()) => true,
            Err(TrySendError::Full(f)) if self.overflow == Some(OverflowPolicy::DropOldest) => {
                let _ = self.rx.try_recv();
                warn!(socket = %self.key, "Outbound queue full, dropped oldest message");
                self.tx.try_send(f).is_ok()
            }
            Err(_) => false,
        }
    }

    pub(crate) fn pop(&self) -> Option<Multipart> {
        self.rx.try_recv().ok()
    }

    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let dropped = self.rx.try_iter().count();
        if dropped > 0 {
            warn!(socket = %self.key, dropped, "Socket closed with unsent messages");
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn key(&self) -> &SocketKey {
        &self.key
    }
}

/// Rewrites a received frame set before it is re-enqueued; `None` drops it
pub(crate) type RelayFn = Box<dyn Fn(Multipart) -> Option<Multipart> + Send>;

/// What the poller does with frames received on a socket
pub(crate) enum Inbound {
    /// Hand frames to the socket handle's inbound channel
    Publish(Sender<Multipart>),
    /// Rewrite and enqueue on an outbound queue, inside the poller loop
    Relay { rewrite: RelayFn, target: OutboundQueue },
}

/// Everything needed to create and register one socket
pub(crate) struct SocketSpec {
    pub key: SocketKey,
    pub mode: ConnectMode,
    pub options: SocketOptions,
    pub outbound: OutboundQueue,
    pub inbound: Inbound,
}

/// Thread-safe handle to a socket owned by the poller loop
#[derive(Clone)]
pub struct SocketHandle {
    key: SocketKey,
    outbound: OutboundQueue,
    inbound: Receiver<Multipart>,
}

impl fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketHandle")
            .field("key", &self.key)
            .field("queued", &self.outbound.len())
            .finish()
    }
}

impl SocketHandle {
    pub(crate) fn new(outbound: OutboundQueue, inbound: Receiver<Multipart>) -> Self {
        Self {
            key: outbound.key().clone(),
            outbound,
            inbound,
        }
    }

    pub fn key(&self) -> &SocketKey {
        &self.key
    }

    /// Enqueue frames for the poller to send; never touches the socket
    pub fn send(&self, frames: Multipart) -> AgentResult<()> {
        trace!(socket = %self.key, parts = frames.len(), "Enqueue outbound frames");
        self.outbound.push(frames)
    }

    /// Inbound frames, in arrival order
    pub fn inbound(&self) -> &Receiver<Multipart> {
        &self.inbound
    }

    /// Wait up to `timeout`; `Ok(None)` means nothing arrived
    pub fn recv_timeout(&self, timeout: Duration) -> AgentResult<Option<Multipart>> {
        match self.inbound.recv_timeout(timeout) {
            Ok(frames) => Ok(Some(frames)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(AgentError::QueueClosed),
        }
    }

    pub fn try_recv(&self) -> AgentResult<Option<Multipart>> {
        match self.inbound.try_recv() {
            Ok(frames) => Ok(Some(frames)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(AgentError::QueueClosed),
        }
    }

    /// Messages enqueued but not yet handed to the transport
    pub fn queue_len(&self) -> usize {
        self.outbound.len()
    }

    /// True once the poller has closed the socket
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SocketKey {
        SocketKey::new(SocketType::Dealer, "tcp://127.0.0.1:1")
    }

    fn bounded(capacity: usize, overflow: OverflowPolicy) -> OutboundQueue {
        OutboundQueue::new(
            key(),
            &QueueConfig {
                outbound_capacity: capacity,
                overflow,
            },
        )
    }

    #[test]
    fn test_options_replace_in_place() {
        let options = SocketOptions::new()
            .with(SocketOption::Linger, 0)
            .with(SocketOption::Identity, "a")
            .with(SocketOption::Linger, 100);

        let entries: Vec<_> = options.iter().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], &(SocketOption::Linger, OptionValue::Int(100)));

        let merged = options.merge(&SocketOptions::new().with(SocketOption::Identity, "b"));
        assert_eq!(merged.get(SocketOption::Identity), Some(&OptionValue::Str("b".into())));
    }

    #[test]
    fn test_value_encoding_by_type() {
        let public = zmq::z85_encode(&[7u8; 32]).unwrap();

        let curve_value = OptionValue::Str(public.clone());
        let decoded = curve_value
            .as_bytes(SocketOption::CurvePublicKey)
            .unwrap();
        assert_eq!(decoded.len(), 32);

        let identity_value = OptionValue::Str(public.clone());
        let verbatim = identity_value.as_bytes(SocketOption::Identity).unwrap();
        assert_eq!(verbatim.as_ref(), public.as_bytes());

        assert!(OptionValue::Bool(true).as_int(SocketOption::Linger).is_err());
    }

    #[test]
    fn test_key_display() {
        assert_eq!(key().to_string(), "DEALER:tcp://127.0.0.1:1");
    }

    #[test]
    fn test_reject_policy() {
        let queue = bounded(2, OverflowPolicy::Reject);
        queue.push(vec![b"1".to_vec()]).unwrap();
        queue.push(vec![b"2".to_vec()]).unwrap();
        assert!(matches!(queue.push(vec![b"3".to_vec()]), Err(AgentError::QueueFull(_))));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_drop_oldest_policy() {
        let queue = bounded(2, OverflowPolicy::DropOldest);
        for i in 1..=3u8 {
            queue.push(vec![vec![i]]).unwrap();
        }
        assert_eq!(queue.pop(), Some(vec![vec![2u8]]));
        assert_eq!(queue.pop(), Some(vec![vec![3u8]]));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_block_policy_waits_for_room() {
        let queue = bounded(1, OverflowPolicy::Block);
        queue.push(vec![vec![1u8]]).unwrap();

        let consumer = queue.clone();
        let drain = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            consumer.pop()
        });

        queue.push(vec![vec![2u8]]).unwrap();
        assert_eq!(drain.join().unwrap(), Some(vec![vec![1u8]]));
        assert_eq!(queue.pop(), Some(vec![vec![2u8]]));
    }

    #[test]
    fn test_push_after_close() {
        let queue = OutboundQueue::new(key(), &QueueConfig::default());
        queue.push(vec![vec![1u8]]).unwrap();
        queue.close();
        assert_eq!(queue.len(), 0);
        assert!(matches!(queue.push(vec![vec![2u8]]), Err(AgentError::QueueClosed)));
    }
}
