//! rumqttc-backed MQTT 3.1.1 transport
//!
//! Split the same way as the rest of the transport code, pure logic apart
//! from I/O:
//!
//! - [`connection`] - `MqttOptions` construction, reconnect policy and the
//!   subscriptions to restore after a reconnect
//! - [`message_handler`] - mapping rumqttc events to [`ProtocolEvent`]s
//! - [`client`] - the event-loop task and the [`Transport`] implementation
//!
//! [`ProtocolEvent`]: crate::transport::ProtocolEvent
//! [`Transport`]: crate::transport::Transport

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::RumqttTransport;
pub use connection::{
    configure_mqtt_options, ReconnectPolicy, SubscriptionRegistry, TransportSettings,
};
pub use message_handler::{route_event, EventRoute};
