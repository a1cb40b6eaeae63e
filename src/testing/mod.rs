//! Testing utilities and mock implementations
//!
//! Lets the client be exercised without a running MQTT broker.

pub mod mocks;

pub use mocks::*;
