//! Pluggable payload codec
//!
//! Encoding turns a [`Payload`] into wire bytes for a publish. Decoding is
//! best-effort: it always yields a payload and at most a warning, never an
//! error, so an undecodable message is still stored.

use super::messages::Payload;
use thiserror::Error;

/// Encoding failures for outgoing payloads
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Serialization error")]
    Serialization(#[source] serde_json::Error),
    #[error("Unsupported payload: {0}")]
    Unsupported(String),
}

/// Why an inbound payload could not be fully decoded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeWarning {
    #[error("payload is not valid UTF-8 ({0})")]
    NotUtf8(String),
    #[error("payload is not structured data ({0})")]
    NotStructured(String),
}

/// Result of decoding an inbound payload
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub payload: Payload,
    pub warning: Option<DecodeWarning>,
}

/// Codec used by the publisher and the event dispatcher
pub trait PayloadCodec: Send + Sync {
    fn encode(&self, payload: &Payload) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, raw: &[u8]) -> Decoded;
}

/// UTF-8 text with JSON as the structured form
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode(&self, payload: &Payload) -> Result<Vec<u8>, CodecError> {
        match payload {
            Payload::Json(value) => serde_json::to_vec(value).map_err(CodecError::Serialization),
            Payload::Text(text) => Ok(text.as_bytes().to_vec()),
            Payload::Bytes(bytes) => Ok(bytes.clone()),
        }
    }

    fn decode(&self, raw: &[u8]) -> Decoded {
        let text = match std::str::from_utf8(raw) {
            Ok(text) => text,
            Err(e) => {
                return Decoded {
                    payload: Payload::Bytes(raw.to_vec()),
                    warning: Some(DecodeWarning::NotUtf8(e.to_string())),
                };
            }
        };

        match serde_json::from_str(text) {
            Ok(value) => Decoded {
                payload: Payload::Json(value),
                warning: None,
            },
            Err(e) => Decoded {
                payload: Payload::Text(text.to_string()),
                warning: Some(DecodeWarning::NotStructured(e.to_string())),
            },
        }
    }
}

/// Pass-through codec that never attempts structured decoding
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl PayloadCodec for TextCodec {
    fn encode(&self, payload: &Payload) -> Result<Vec<u8>, CodecError> {
        match payload {
            Payload::Text(text) => Ok(text.as_bytes().to_vec()),
            Payload::Bytes(bytes) => Ok(bytes.clone()),
            Payload::Json(_) => Err(CodecError::Unsupported(
                "structured payloads require a structured codec".to_string(),
            )),
        }
    }

    fn decode(&self, raw: &[u8]) -> Decoded {
        match String::from_utf8(raw.to_vec()) {
            Ok(text) => Decoded {
                payload: Payload::Text(text),
                warning: None,
            },
            Err(e) => Decoded {
                payload: Payload::Bytes(e.into_bytes()),
                warning: Some(DecodeWarning::NotUtf8("invalid UTF-8 sequence".to_string())),
            },
        }
    }
}
