//! Error types for the MQTT inbox client
//!
//! Synchronous failures (bad arguments, transport refusing a request) are
//! returned from the call that caused them. Asynchronous outcomes reach the
//! caller blocked in `connect`, or the diagnostic log otherwise.

use crate::client::connection::{ConnectFailure, ConnectionState};
use crate::config::ConfigError;
use crate::protocol::{CodecError, TopicError};
use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Main error type for client operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Connection timeout: no CONNACK within {0:?}")]
    ConnectTimeout(Duration),

    #[error("Connection rejected by broker: {0}")]
    ConnectRejected(ConnectFailure),

    #[error("Connection attempt abandoned by disconnect")]
    ConnectAborted,

    #[error("Publish to '{topic}' failed: {cause}")]
    PublishFailed {
        topic: String,
        #[source]
        cause: RequestFailure,
    },

    #[error("Subscribe to '{topic_filter}' failed: {cause}")]
    SubscribeFailed {
        topic_filter: String,
        #[source]
        cause: RequestFailure,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Why a publish or subscribe request did not reach the transport
#[derive(Debug, Error)]
pub enum RequestFailure {
    #[error("Not connected - current state: {state}")]
    NotConnected { state: ConnectionState },

    #[error("Invalid topic: {0}")]
    InvalidTopic(#[from] TopicError),

    #[error("Invalid QoS level {0} (expected 0, 1 or 2)")]
    InvalidQos(u8),

    #[error("Payload encoding failed: {0}")]
    Encode(#[from] CodecError),

    #[error("Transport rejected request: {0}")]
    Transport(#[from] TransportError),
}

impl ClientError {
    /// Create publish failure
    pub fn publish_failed<S: Into<String>>(topic: S, cause: impl Into<RequestFailure>) -> Self {
        Self::PublishFailed {
            topic: topic.into(),
            cause: cause.into(),
        }
    }

    /// Create subscribe failure
    pub fn subscribe_failed<S: Into<String>>(
        topic_filter: S,
        cause: impl Into<RequestFailure>,
    ) -> Self {
        Self::SubscribeFailed {
            topic_filter: topic_filter.into(),
            cause: cause.into(),
        }
    }

    /// Whether the error came from the broker or the network rather than
    /// from the arguments of the call
    pub fn is_connection_error(&self) -> bool {
        match self {
            ClientError::ConnectTimeout(_)
            | ClientError::ConnectRejected(_)
            | ClientError::ConnectAborted
            | ClientError::Transport(_) => true,
            ClientError::PublishFailed { cause, .. } | ClientError::SubscribeFailed { cause, .. } => {
                matches!(
                    cause,
                    RequestFailure::NotConnected { .. } | RequestFailure::Transport(_)
                )
            }
            ClientError::Config(_) => false,
        }
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_timeout_display() {
        let error = ClientError::ConnectTimeout(Duration::from_secs(10));
        assert_eq!(error.to_string(), "Connection timeout: no CONNACK within 10s");
        assert!(error.is_connection_error());
    }

    #[test]
    fn test_connect_rejected_display() {
        let error = ClientError::ConnectRejected(ConnectFailure::NotAuthorized);
        assert_eq!(error.to_string(), "Connection rejected by broker: Not authorized");
    }

    #[test]
    fn test_publish_failed_constructor() {
        let error = ClientError::publish_failed(
            "sensors/x",
            RequestFailure::NotConnected {
                state: ConnectionState::Disconnected,
            },
        );
        assert!(matches!(error, ClientError::PublishFailed { .. }));
        assert_eq!(
            error.to_string(),
            "Publish to 'sensors/x' failed: Not connected - current state: disconnected"
        );
        assert!(error.is_connection_error());
    }

    #[test]
    fn test_subscribe_failed_from_topic_error() {
        let error = ClientError::subscribe_failed("a/#/b", TopicError::MisplacedMultiLevel("a/#/b".to_string()));
        assert!(matches!(
            error,
            ClientError::SubscribeFailed {
                cause: RequestFailure::InvalidTopic(_),
                ..
            }
        ));
        assert!(!error.is_connection_error());
    }

    #[test]
    fn test_source_chain_is_preserved() {
        use std::error::Error as _;

        let error = ClientError::publish_failed("t", RequestFailure::InvalidQos(7));
        let source = error.source().expect("cause should be the source");
        assert_eq!(source.to_string(), "Invalid QoS level 7 (expected 0, 1 or 2)");
    }

    #[test]
    fn test_all_variants_display() {
        let errors = vec![
            ClientError::ConnectTimeout(Duration::from_millis(100)),
            ClientError::ConnectRejected(ConnectFailure::Unknown(42)),
            ClientError::ConnectAborted,
            ClientError::publish_failed("t", RequestFailure::InvalidQos(3)),
            ClientError::subscribe_failed("t", TransportError::NotOpen),
            ClientError::Transport(TransportError::Closed),
            ClientError::Config(ConfigError::InvalidConfig("bad".to_string())),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
