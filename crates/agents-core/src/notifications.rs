// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Pub/sub notification broker and client
//!
//! The broker binds an XSUB socket that publishers connect to and an XPUB
//! socket that subscribers connect to, and forwards every frame verbatim in
//! both directions: data flows XSUB -> XPUB, subscriptions flow XPUB -> XSUB.
//! Forwarding happens inside the poller loop.
//!
//! Delivery is at-most-once, FIFO per publisher, unordered across publishers.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::agent::Agent;
use crate::codec::{Multipart, Notification};
use crate::error::AgentResult;
use crate::socket::{
    ConnectMode, Inbound, SocketHandle, SocketKey, SocketOption, SocketOptions, SocketSpec,
    SocketType,
};

const ECHO_CAPACITY: usize = 1024;
const ECHO_TTL: Duration = Duration::from_secs(5);

/// Keys of the two broker sockets
#[derive(Debug, Clone)]
pub struct NotificationBroker {
    publisher_side: SocketKey,
    subscriber_side: SocketKey,
}

impl NotificationBroker {
    /// XSUB socket publishers connect to
    pub fn publisher_side(&self) -> &SocketKey {
        &self.publisher_side
    }

    /// XPUB socket subscribers connect to
    pub fn subscriber_side(&self) -> &SocketKey {
        &self.subscriber_side
    }
}

/// Fingerprints of this client's recent publishes
///
/// The broker fans a publish out to every subscriber, including the
/// publishing client's own SUB socket. Each recorded fingerprint suppresses
/// at most one matching delivery and expires after `ECHO_TTL`.
#[derive(Debug, Default)]
struct RecentPublishes {
    entries: VecDeque<(u64, Instant)>,
}

impl RecentPublishes {
    fn purge(&mut self, now: Instant) {
        while let Some((_, at)) = self.entries.front() {
            if now.duration_since(*at) < ECHO_TTL {
                break;
            }
            self.entries.pop_front();
        }
    }

    fn record(&mut self, fingerprint: u64) {
        let now = Instant::now();
        self.purge(now);
        if self.entries.len() >= ECHO_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back((fingerprint, now));
    }

    fn take(&mut self, fingerprint: u64) -> bool {
        self.purge(Instant::now());
        match self.entries.iter().position(|(fp, _)| *fp == fingerprint) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }
}

fn fingerprint(frames: &[Vec<u8>]) -> u64 {
    let mut hasher = DefaultHasher::new();
    frames.hash(&mut hasher);
    hasher.finish()
}

/// PUB + SUB pair connected to a broker
///
/// A client does not receive its own publishes. The wire frames carry no
/// publisher id, so the echo is recognized by content: every publish leaves a
/// fingerprint of its frames that swallows the next identical delivery.
///
/// Limitation: when the echo never arrives (typically a publish sent before
/// the SUB subscription reached the broker), the leftover fingerprint
/// swallows one byte-identical notification from another publisher instead,
/// for up to 5 seconds after the publish. Payloads that must never be lost
/// this way should differ per publisher (a sender field, a sequence number).
#[derive(Debug, Clone)]
pub struct NotificationClient {
    publisher: SocketHandle,
    subscriber: SocketHandle,
    topic_prefix: String,
    agent_uid: String,
    own: Arc<Mutex<RecentPublishes>>,
}

impl NotificationClient {
    pub fn topic_prefix(&self) -> &str {
        &self.topic_prefix
    }

    pub fn publisher(&self) -> &SocketHandle {
        &self.publisher
    }

    pub fn subscriber(&self) -> &SocketHandle {
        &self.subscriber
    }

    pub fn publish(&self, topic: &str, payload: &Value) -> AgentResult<()> {
        self.publish_notification(&Notification::new(topic, payload.clone()))
    }

    pub fn publish_notification(&self, notification: &Notification) -> AgentResult<()> {
        let frames = notification.to_multipart()?;
        self.own.lock().record(fingerprint(&frames));
        self.publisher.send(frames)
    }

    /// Next notification published by someone else
    pub fn recv_timeout(&self, timeout: Duration) -> AgentResult<Option<Notification>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.subscriber.recv_timeout(remaining)? {
                Some(frames) => {
                    if let Some(notification) = self.accept(frames) {
                        return Ok(Some(notification));
                    }
                }
                None => return Ok(None),
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    pub fn try_recv(&self) -> AgentResult<Option<Notification>> {
        while let Some(frames) = self.subscriber.try_recv()? {
            if let Some(notification) = self.accept(frames) {
                return Ok(Some(notification));
            }
        }
        Ok(None)
    }

    fn accept(&self, frames: Multipart) -> Option<Notification> {
        if self.own.lock().take(fingerprint(&frames)) {
            debug!(agent = %self.agent_uid, "skipping own notification");
            return None;
        }
        match Notification::from_multipart(&frames) {
            Ok(notification) => Some(notification),
            Err(e) => {
                warn!(agent = %self.agent_uid, "dropping malformed notification: {}", e);
                None
            }
        }
    }
}

impl Agent {
    /// Bind a broker: publishers connect to `pub_address`, subscribers to
    /// `sub_address`
    pub fn create_notification_broker(
        &self,
        pub_address: &str,
        sub_address: &str,
        options: &SocketOptions,
    ) -> AgentResult<NotificationBroker> {
        let xpub_key = SocketKey::new(SocketType::XPub, sub_address);
        let xsub_key = SocketKey::new(SocketType::XSub, pub_address);
        let xpub_queue = self.outbound_queue(xpub_key.clone());
        let xsub_queue = self.outbound_queue(xsub_key.clone());

        self.open_socket(SocketSpec {
            key: xpub_key.clone(),
            mode: ConnectMode::Bind,
            options: options.clone(),
            outbound: xpub_queue.clone(),
            inbound: Inbound::Relay {
                rewrite: Box::new(Some),
                target: xsub_queue.clone(),
            },
        })?;
        self.open_socket(SocketSpec {
            key: xsub_key.clone(),
            mode: ConnectMode::Bind,
            options: options.clone(),
            outbound: xsub_queue,
            inbound: Inbound::Relay {
                rewrite: Box::new(Some),
                target: xpub_queue,
            },
        })?;

        Ok(NotificationBroker {
            publisher_side: xsub_key,
            subscriber_side: xpub_key,
        })
    }

    /// Connect a PUB socket to `pub_address` and a SUB socket to
    /// `sub_address` filtered by `topic_prefix` (empty = everything)
    pub fn create_notification_client(
        &self,
        pub_address: &str,
        sub_address: &str,
        options: &SocketOptions,
        topic_prefix: &str,
    ) -> AgentResult<NotificationClient> {
        let publisher = self.connect_socket(SocketType::Pub, pub_address, options)?;
        let sub_options = options
            .clone()
            .with(SocketOption::Subscribe, topic_prefix);
        let subscriber = self.connect_socket(SocketType::Sub, sub_address, &sub_options)?;

        Ok(NotificationClient {
            publisher,
            subscriber,
            topic_prefix: topic_prefix.to_string(),
            agent_uid: self.uid().to_string(),
            own: Arc::new(Mutex::new(RecentPublishes::default())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_own_publish_suppressed_once() {
        let mut recent = RecentPublishes::default();
        let frames = Notification::new("t", json!(1)).to_multipart().unwrap();
        let fp = fingerprint(&frames);

        recent.record(fp);
        assert!(recent.take(fp));
        assert!(!recent.take(fp));
    }

    #[test]
    fn test_unmatched_fingerprint_swallows_identical_delivery_until_expiry() {
        let frames = Notification::new("t", json!({"v": 1})).to_multipart().unwrap();
        let fp = fingerprint(&frames);

        // own echo lost: an identical foreign notification is taken for it
        let mut recent = RecentPublishes::default();
        recent.record(fp);
        assert!(recent.take(fp));
        assert!(!recent.take(fp));

        // an expired fingerprint no longer matches
        let mut recent = RecentPublishes::default();
        if let Some(old) = Instant::now().checked_sub(ECHO_TTL + Duration::from_millis(1)) {
            recent.entries.push_back((fp, old));
            assert!(!recent.take(fp));
            assert!(recent.entries.is_empty());
        }
    }

    #[test]
    fn test_recent_publishes_bounded() {
        let mut recent = RecentPublishes::default();
        for i in 0..(ECHO_CAPACITY as u64 + 10) {
            recent.record(i);
        }
        assert_eq!(recent.entries.len(), ECHO_CAPACITY);
        assert!(!recent.take(0));
        assert!(recent.take(ECHO_CAPACITY as u64 + 9));
    }
}
