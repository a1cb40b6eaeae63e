//! Inbound message records and payload values

use chrono::{DateTime, Utc};
use rumqttc::QoS;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Payload carried by a publish or stored with a received message.
///
/// Outgoing `Json` values are serialized before reaching the transport;
/// `Text` and `Bytes` pass through unchanged. Inbound payloads decode to
/// `Json` when they parse, `Text` when they are UTF-8 but not JSON, and
/// `Bytes` when they are not UTF-8 at all.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
}

impl Payload {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, Payload::Json(_))
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Json(value) => write!(f, "{value}"),
            Payload::Text(text) => f.write_str(text),
            Payload::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(bytes)
    }
}

/// A message received from the broker.
///
/// Created by the event dispatcher and owned by the message store; the
/// fields are read-only once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    topic: String,
    payload: Payload,
    received_at: DateTime<Utc>,
    qos: QoS,
    retain: bool,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: Payload, qos: QoS, retain: bool) -> Self {
        Self::received_at(topic, payload, qos, retain, Utc::now())
    }

    pub fn received_at(
        topic: impl Into<String>,
        payload: Payload,
        qos: QoS,
        retain: bool,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload,
            received_at,
            qos,
            retain,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    pub fn retain(&self) -> bool {
        self.retain
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {}",
            self.received_at.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.topic,
            self.payload
        )
    }
}

/// Map a numeric QoS level onto the protocol type
pub fn qos_from_level(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

/// Numeric level of a QoS value
pub fn qos_level(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}
