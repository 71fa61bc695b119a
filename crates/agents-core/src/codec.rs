// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Wire envelopes
//!
//! Every message on a socket is exactly three frames:
//!
//! | frame | contents |
//! |---|---|
//! | 0 | UTF-8 topic (notifications) or peer name (directed) |
//! | 1 | one byte type tag: 0 = notification, 1 = directed |
//! | 2 | UTF-8 JSON payload |
//!
//! Decoding fails closed: a wrong frame count, an unknown tag or a tag that
//! does not match the requested kind is a [`CodecError`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CodecError;

/// Raw multipart frames as moved through the socket queues
pub type Multipart = Vec<Vec<u8>>;

/// Type tag carried in frame 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Notification = 0,
    Directed = 1,
}

impl MessageKind {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Result<Self, CodecError> {
        match tag {
            0 => Ok(MessageKind::Notification),
            1 => Ok(MessageKind::Directed),
            other => Err(CodecError::UnknownTag(other)),
        }
    }

    fn name(self) -> &'static str {
        match self {
            MessageKind::Notification => "notification",
            MessageKind::Directed => "directed",
        }
    }
}

/// Read the tag frame of a 3-frame message.
///
/// The tag is a single unsigned byte; reading it big-endian is the same as
/// taking the byte.
fn split_frames(frames: &[Vec<u8>]) -> Result<(&[u8], u8, &[u8]), CodecError> {
    match frames {
        [routing, tag, payload] => {
            if tag.len() != 1 {
                return Err(CodecError::TagLength(tag.len()));
            }
            Ok((routing.as_slice(), tag[0], payload.as_slice()))
        }
        _ => Err(CodecError::FrameCount(frames.len())),
    }
}

fn decode_expected(
    frames: &[Vec<u8>],
    expected: MessageKind,
) -> Result<(String, Value), CodecError> {
    let (routing, tag, payload) = split_frames(frames)?;
    if tag != expected.tag() {
        return Err(CodecError::TagMismatch {
            expected: expected.name(),
            found: tag,
        });
    }
    let routing = String::from_utf8(routing.to_vec())?;
    let payload: Value = serde_json::from_slice(payload)?;
    Ok((routing, payload))
}

fn encode(routing: &str, kind: MessageKind, payload: &Value) -> Result<Multipart, CodecError> {
    Ok(vec![
        routing.as_bytes().to_vec(),
        vec![kind.tag()],
        serde_json::to_vec(payload)?,
    ])
}

/// Pub/sub message; `topic` is matched by subscriber prefix filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub topic: String,
    pub payload: Value,
}

impl Notification {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }

    pub fn to_multipart(&self) -> Result<Multipart, CodecError> {
        encode(&self.topic, MessageKind::Notification, &self.payload)
    }

    pub fn from_multipart(frames: &[Vec<u8>]) -> Result<Self, CodecError> {
        let (topic, payload) = decode_expected(frames, MessageKind::Notification)?;
        Ok(Self { topic, payload })
    }
}

/// Point-to-point message relayed by a router
///
/// When sent, `target` names the destination peer. After the router swaps
/// the address frames, the receiving side finds the sender's name there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directed {
    pub target: String,
    pub payload: Value,
}

impl Directed {
    pub fn new(target: impl Into<String>, payload: Value) -> Self {
        Self {
            target: target.into(),
            payload,
        }
    }

    pub fn to_multipart(&self) -> Result<Multipart, CodecError> {
        encode(&self.target, MessageKind::Directed, &self.payload)
    }

    pub fn from_multipart(frames: &[Vec<u8>]) -> Result<Self, CodecError> {
        let (target, payload) = decode_expected(frames, MessageKind::Directed)?;
        Ok(Self { target, payload })
    }
}

/// Message received on a websocket connection; never travels over a socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebsocketFrame {
    pub connection_id: String,
    pub payload: Value,
}

/// Any decoded envelope
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Notification(Notification),
    Directed(Directed),
    WebsocketFrame(WebsocketFrame),
}

impl Envelope {
    pub fn to_multipart(&self) -> Result<Multipart, CodecError> {
        match self {
            Envelope::Notification(n) => n.to_multipart(),
            Envelope::Directed(d) => d.to_multipart(),
            Envelope::WebsocketFrame(_) => Err(CodecError::NotEncodable("websocket")),
        }
    }

    /// Dispatch on the tag frame
    pub fn decode(frames: &[Vec<u8>]) -> Result<Self, CodecError> {
        let (_, tag, _) = split_frames(frames)?;
        match MessageKind::from_tag(tag)? {
            MessageKind::Notification => Notification::from_multipart(frames).map(Envelope::Notification),
            MessageKind::Directed => Directed::from_multipart(frames).map(Envelope::Directed),
        }
    }
}

/// Generic JSON message used by the connection abstraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonMessage {
    pub data: Value,
}

impl JsonMessage {
    pub fn new(data: Value) -> Self {
        Self { data }
    }

    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.data)
    }

    pub fn deserialize(raw: &str) -> Result<Value, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn from_serialized(raw: &str) -> Result<Self, serde_json::Error> {
        Ok(Self {
            data: Self::deserialize(raw)?,
        })
    }
}

impl From<Value> for JsonMessage {
    fn from(data: Value) -> Self {
        Self { data }
    }
}

/// Converts payloads to and from the string form a connection carries
pub trait MessageSerializer: Send + Sync {
    fn serialize(&self, data: &Value) -> Result<String, serde_json::Error>;
    fn deserialize(&self, raw: &str) -> Result<Value, serde_json::Error>;
}

/// [`MessageSerializer`] backed by [`JsonMessage`]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl MessageSerializer for JsonSerializer {
    fn serialize(&self, data: &Value) -> Result<String, serde_json::Error> {
        JsonMessage::new(data.clone()).serialize()
    }

    fn deserialize(&self, raw: &str) -> Result<Value, serde_json::Error> {
        JsonMessage::deserialize(raw)
    }
}
