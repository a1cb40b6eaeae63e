//! Client side of the broker connection
//!
//! - [`connection`] - connection state machine and CONNACK translation
//! - [`dispatcher`] - applies transport events to state and store
//! - [`manager`] - the `MqttManager` facade used by applications

pub mod connection;
pub mod dispatcher;
pub mod manager;

pub use connection::{translate_return_code, ConnectFailure, ConnectionManager, ConnectionState};
pub use dispatcher::EventDispatcher;
pub use manager::MqttManager;
