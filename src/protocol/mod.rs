//! Protocol-level value types: messages, payload codecs and topic rules

pub mod codec;
pub mod messages;
pub mod topics;

pub use codec::{CodecError, DecodeWarning, Decoded, JsonCodec, PayloadCodec, TextCodec};
pub use messages::{qos_from_level, qos_level, Message, Payload};
pub use topics::{
    is_wildcard_filter, topic_matches_filter, validate_publish_topic, validate_topic_filter,
    TopicError,
};
