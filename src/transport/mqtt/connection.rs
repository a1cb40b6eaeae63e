//! Pure connection configuration for the rumqttc transport
//!
//! Builds `MqttOptions` from the client's connection parameters and holds
//! the retry policy and subscription bookkeeping used by the event loop
//! after network errors.

use crate::config::{ConnectionConfig, SessionSection};
use rumqttc::{MqttOptions, QoS, SubscribeFilter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Retry policy for the event loop after a network error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delays in milliseconds for the first attempts
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            backoff_pattern: vec![250, 500, 1000],
            sustained_delay: 1000,
        }
    }
}

impl ReconnectPolicy {
    pub fn from_session(session: &SessionSection) -> Self {
        Self {
            backoff_pattern: session.reconnect_backoff_ms.clone(),
            sustained_delay: session.reconnect_delay_ms,
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        let millis = self
            .backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay);
        Duration::from_millis(millis)
    }
}

/// Settings for the rumqttc transport that are not connection parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    /// Capacity of the rumqttc request channel
    pub request_capacity: usize,
    pub reconnect: ReconnectPolicy,
    /// How long `close` waits for a graceful DISCONNECT
    pub shutdown_grace: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            request_capacity: 10,
            reconnect: ReconnectPolicy::default(),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

impl TransportSettings {
    pub fn from_session(session: &SessionSection) -> Self {
        Self {
            request_capacity: session.request_channel_capacity.max(1),
            reconnect: ReconnectPolicy::from_session(session),
            ..Self::default()
        }
    }
}

/// Filters subscribed during one transport session.
///
/// A broker that answers a reconnect without session state has forgotten
/// them, so the event loop subscribes to all of them again.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    filters: Arc<Mutex<Vec<(String, QoS)>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(String, QoS)>> {
        self.filters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remember a subscribed filter; subscribing again updates its QoS
    pub fn record(&self, topic_filter: &str, qos: QoS) {
        let mut filters = self.lock();
        match filters.iter_mut().find(|(filter, _)| filter == topic_filter) {
            Some(entry) => entry.1 = qos,
            None => filters.push((topic_filter.to_string(), qos)),
        }
    }

    /// Recorded filters in subscription order
    pub fn snapshot(&self) -> Vec<(String, QoS)> {
        self.lock().clone()
    }

    /// All recorded filters as one SUBSCRIBE request
    pub fn subscribe_filters(&self) -> Vec<SubscribeFilter> {
        self.lock()
            .iter()
            .map(|(filter, qos)| SubscribeFilter::new(filter.clone(), *qos))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Build rumqttc options for one connection attempt
pub fn configure_mqtt_options(config: &ConnectionConfig, clean_session: bool) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(&config.client_id, &config.host, config.port);
    mqtt_options
        .set_keep_alive(config.keep_alive)
        .set_clean_session(clean_session);

    if let Some(credentials) = &config.credentials {
        mqtt_options.set_credentials(&credentials.username, &credentials.password);
    }

    mqtt_options
}
