//! mqtt-inbox
//!
//! An MQTT client that keeps one broker connection and buffers received
//! messages per topic until the application drains them.
//!
//! - [`client::connection`] - connection state machine; `connect` waits for CONNACK
//! - [`client::dispatcher`] - applies transport events to state and store
//! - [`store`] - thread-safe per-topic message store
//! - [`client::manager`] - `MqttManager`: connect, publish, subscribe, drain
//! - [`transport`] - transport seam and the rumqttc implementation
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mqtt_inbox::{ClientConfig, MqttManager};
//! use rumqttc::QoS;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = MqttManager::new(&ClientConfig::default())?;
//! client.connect(true).await?;
//! client.subscribe("sensors/#", QoS::AtLeastOnce).await?;
//! client
//!     .publish(
//!         "sensors/climate/temperature",
//!         json!({"sensor": "temperature", "value": 24.5, "unit": "°C"}),
//!         QoS::AtLeastOnce,
//!         false,
//!     )
//!     .await?;
//!
//! for message in client.get_messages("sensors/climate/temperature", true) {
//!     println!("{message}");
//! }
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod store;
pub mod testing;
pub mod transport;

pub use client::{ConnectFailure, ConnectionState, MqttManager};
pub use config::{ClientConfig, ConnectionConfig, Credentials};
pub use error::{ClientError, ClientResult, RequestFailure};
pub use observability::{ClientObserver, Diagnostic, DiagnosticLog};
pub use protocol::{Message, Payload};
pub use store::{CapacityPolicy, MessageStore};
pub use transport::{ProtocolEvent, Transport};
