// src/connection/codec.rs
//! Engine.IO v4 / Socket.IO v5 text framing, websocket transport only.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ClientError, Result};

/// Handshake carried by the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

/// Outer Engine.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Message(SocketPacket),
    Upgrade,
    Noop,
}

/// Socket.IO packet carried inside an Engine.IO message.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event {
        name: String,
        data: Value,
        ack: Option<u64>,
    },
    Ack {
        id: u64,
        data: Value,
    },
    ConnectError(Value),
}

/// Frame sent right after the open packet to join the default namespace.
pub const CONNECT_FRAME: &str = "40";
pub const DISCONNECT_FRAME: &str = "41";
pub const PONG_FRAME: &str = "3";

/// Encode an event with a single argument on the default namespace.
pub fn encode_event(name: &str, data: &Value) -> Result<String> {
    let payload = serde_json::to_string(&[Value::String(name.to_owned()), data.clone()])?;
    Ok(format!("42{payload}"))
}

pub fn decode(frame: &str) -> Result<EnginePacket> {
    let mut chars = frame.chars();
    let kind = chars
        .next()
        .ok_or_else(|| ClientError::Protocol("empty frame".into()))?;
    let rest = chars.as_str();

    match kind {
        '0' => Ok(EnginePacket::Open(serde_json::from_str(rest)?)),
        '1' => Ok(EnginePacket::Close),
        '2' => Ok(EnginePacket::Ping),
        '3' => Ok(EnginePacket::Pong),
        '4' => decode_socket(rest).map(EnginePacket::Message),
        '5' => Ok(EnginePacket::Upgrade),
        '6' => Ok(EnginePacket::Noop),
        other => Err(ClientError::Protocol(format!(
            "unknown engine packet type {other:?}"
        ))),
    }
}

fn decode_socket(frame: &str) -> Result<SocketPacket> {
    let mut chars = frame.chars();
    let kind = chars
        .next()
        .ok_or_else(|| ClientError::Protocol("empty socket packet".into()))?;
    let mut rest = chars.as_str();

    // Non-default namespace: "/admin,<payload>". Only "/" is joined, so the
    // namespace is dropped after parsing.
    if rest.starts_with('/') {
        rest = match rest.find(',') {
            Some(idx) => &rest[idx + 1..],
            None => "",
        };
    }

    let digits = rest.chars().take_while(char::is_ascii_digit).count();
    let ack = if digits > 0 {
        rest[..digits].parse::<u64>().ok()
    } else {
        None
    };
    let body = &rest[digits..];

    match kind {
        '0' => {
            let data = if body.is_empty() {
                None
            } else {
                Some(serde_json::from_str(body)?)
            };
            Ok(SocketPacket::Connect(data))
        }
        '1' => Ok(SocketPacket::Disconnect),
        '2' => {
            let (name, data) = split_event(body)?;
            Ok(SocketPacket::Event { name, data, ack })
        }
        '3' => {
            let id = ack.ok_or_else(|| ClientError::Protocol("ack without id".into()))?;
            let mut args: Vec<Value> = serde_json::from_str(body)?;
            let data = if args.is_empty() {
                Value::Null
            } else {
                args.swap_remove(0)
            };
            Ok(SocketPacket::Ack { id, data })
        }
        '4' => {
            let data = if body.is_empty() {
                Value::Null
            } else {
                serde_json::from_str(body)?
            };
            Ok(SocketPacket::ConnectError(data))
        }
        other => Err(ClientError::Protocol(format!(
            "unsupported socket packet type {other:?}"
        ))),
    }
}

fn split_event(body: &str) -> Result<(String, Value)> {
    let args: Vec<Value> = serde_json::from_str(body)?;
    let mut args = args.into_iter();
    let name = match args.next() {
        Some(Value::String(name)) => name,
        _ => return Err(ClientError::Protocol("event without a name".into())),
    };
    Ok((name, args.next().unwrap_or(Value::Null)))
}
