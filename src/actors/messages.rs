//! Message types for actor communication
//!
//! This module defines the commands each actor accepts and the JSON
//! messages exchanged with viewers.
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to specific actors via mpsc
//! 2. **Broadcasts**: Immutable messages shared by `Arc` across every viewer queue
//! 3. **Client messages**: Parsed leniently, malformed input never ends a session

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::session::{SessionHandle, SessionId};
use crate::{MetricsPayload, MetricsSample};

/// Kind of a message sent to viewers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Metrics,
    SystemStatus,
    Connected,
    Pong,
}

impl MessageType {
    /// Messages every viewer receives regardless of its subscriptions
    pub fn is_always_delivered(self) -> bool {
        matches!(self, MessageType::Connected | MessageType::Pong)
    }

    fn parse(name: &str) -> Option<Self> {
        match name {
            "metrics" => Some(MessageType::Metrics),
            "system_status" => Some(MessageType::SystemStatus),
            "connected" => Some(MessageType::Connected),
            "pong" => Some(MessageType::Pong),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Metrics => "metrics",
            MessageType::SystemStatus => "system_status",
            MessageType::Connected => "connected",
            MessageType::Pong => "pong",
        };
        f.write_str(name)
    }
}

/// Message delivered to viewers
///
/// Serialized as `{"type": ..., "data": ..., "timestamp": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,

    #[serde(rename = "data")]
    pub payload: Value,

    pub timestamp: DateTime<Utc>,
}

impl BroadcastMessage {
    pub fn new(kind: MessageType, payload: Value) -> Self {
        Self {
            kind,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Wrap a sample in its flat wire representation
    pub fn metrics(sample: &MetricsSample) -> Self {
        let payload = serde_json::to_value(MetricsPayload::from(sample)).unwrap_or(Value::Null);
        Self {
            kind: MessageType::Metrics,
            payload,
            timestamp: sample.timestamp,
        }
    }

    pub fn connected(id: SessionId) -> Self {
        Self::new(
            MessageType::Connected,
            serde_json::json!({ "client_id": id.to_string() }),
        )
    }

    pub fn pong() -> Self {
        Self::new(MessageType::Pong, serde_json::json!({ "status": "ok" }))
    }

    pub fn system_status(status: &SystemStatus) -> Self {
        let payload = serde_json::to_value(status).unwrap_or(Value::Null);
        Self::new(MessageType::SystemStatus, payload)
    }
}

/// Periodic host summary sent by the hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub host_id: String,
    pub hostname: String,
    pub os: String,

    /// Host uptime
    pub uptime_secs: u64,

    /// Time since the hub started
    pub hub_uptime_secs: u64,

    pub viewers: usize,
}

/// Error raised for an inbound client message that cannot be understood
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("invalid payload for {kind}: {reason}")]
    InvalidPayload { kind: String, reason: String },
}

/// Message sent by a viewer
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Liveness check answered with a `pong` message
    Ping,

    /// Start receiving the listed message kinds
    Subscribe(HashSet<MessageType>),

    /// Stop receiving the listed message kinds
    Unsubscribe(HashSet<MessageType>),
}

#[derive(Deserialize)]
struct RawClientMessage {
    #[serde(rename = "type")]
    kind: String,

    #[serde(default)]
    data: Value,
}

impl ClientMessage {
    /// Parse a text frame sent by a viewer
    ///
    /// Subscription payloads are either `{"types": [...]}` or a bare array.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawClientMessage = serde_json::from_str(text)?;

        match raw.kind.as_str() {
            "ping" => Ok(ClientMessage::Ping),
            "subscribe" => Ok(ClientMessage::Subscribe(parse_types(&raw.kind, &raw.data)?)),
            "unsubscribe" => Ok(ClientMessage::Unsubscribe(parse_types(&raw.kind, &raw.data)?)),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

fn parse_types(kind: &str, data: &Value) -> Result<HashSet<MessageType>, ProtocolError> {
    let list = match data {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("types") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(ProtocolError::InvalidPayload {
                    kind: kind.to_string(),
                    reason: "expected a \"types\" array".to_string(),
                });
            }
        },
        _ => {
            return Err(ProtocolError::InvalidPayload {
                kind: kind.to_string(),
                reason: "expected a list of message types".to_string(),
            });
        }
    };

    list.iter()
        .map(|item| {
            item.as_str()
                .and_then(MessageType::parse)
                .ok_or_else(|| ProtocolError::InvalidPayload {
                    kind: kind.to_string(),
                    reason: format!("unknown message type {item}"),
                })
        })
        .collect()
}

/// Commands that can be sent to the SchedulerActor
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Take and emit a sample immediately, outside the interval timer
    SampleNow {
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },

    /// Change the sampling interval
    ///
    /// The next tick fires one full new interval from now.
    UpdateInterval { interval: Duration },

    GetStats {
        respond_to: oneshot::Sender<SchedulerStats>,
    },
}

/// Counters kept by the scheduler
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Samples handed to the pipeline
    pub emitted: u64,

    /// Samples discarded because the pipeline channel was full
    pub dropped: u64,

    /// Ticks where sampling failed systemically
    pub failed: u64,

    /// Individual subsystem failures in otherwise usable samples
    pub subsystem_errors: u64,
}

/// Commands that can be sent to the HubActor
#[derive(Debug)]
pub enum HubCommand {
    Register {
        session: SessionHandle,
    },

    Unregister {
        id: SessionId,
    },

    Broadcast {
        message: Arc<BroadcastMessage>,
    },

    ViewerCount {
        respond_to: oneshot::Sender<usize>,
    },
}
