//! Transport layer for broker communication
//!
//! The transport owns the network connection and protocol framing. It
//! reports everything it observes as [`ProtocolEvent`]s on a bounded
//! channel handed to it by the client; the event dispatcher consumes that
//! channel on its own task.

use crate::config::ConnectionConfig;
use bytes::Bytes;
use rumqttc::QoS;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mqtt;

/// Events produced by the transport, in protocol order
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    /// CONNACK received, or the broker refused the connection
    ConnAck { code: u8, session_present: bool },
    /// PUBLISH received on a subscribed topic
    Message {
        topic: String,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    },
    /// PUBACK (QoS 1) or PUBCOMP (QoS 2) for an outgoing publish
    PublishAck { pkid: u16 },
    /// SUBACK; `None` marks a rejected filter
    SubscribeAck { pkid: u16, granted: Vec<Option<QoS>> },
    /// Network or protocol error; the transport may retry on its own
    ConnectionLost { reason: String },
}

/// Errors reported synchronously by a transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport is not open")]
    NotOpen,
    #[error("Transport is already open")]
    AlreadyOpen,
    #[error("Transport request failed")]
    Client(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Transport closed")]
    Closed,
}

/// Transport abstraction over the MQTT wire protocol
///
/// Implementations must be safe to call from many tasks at once.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Start connecting to the broker and stream events into `events`.
    ///
    /// Returning `Ok` means the attempt has started, not that the broker
    /// accepted it; the outcome arrives as a `ConnAck` event.
    async fn open(
        &self,
        config: &ConnectionConfig,
        clean_session: bool,
        events: mpsc::Sender<ProtocolEvent>,
    ) -> Result<(), TransportError>;

    /// Queue a publish request
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError>;

    /// Queue a subscribe request; the grant arrives as a `SubscribeAck` event
    async fn subscribe(&self, topic_filter: &str, qos: QoS) -> Result<(), TransportError>;

    /// Shut the connection down. Closing a transport that is not open is a no-op.
    async fn close(&self) -> Result<(), TransportError>;
}
