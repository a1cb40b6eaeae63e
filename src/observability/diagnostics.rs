//! Observer interface for client diagnostics
//!
//! Every asynchronous outcome the dispatcher sees (connect results, acks,
//! decode warnings, evictions) and every failed request is turned into a
//! [`Diagnostic`]. Diagnostics go to an injected [`ClientObserver`] and to a
//! bounded [`DiagnosticLog`] kept by the client, so failure paths can be
//! inspected without reading log output.

use crate::client::connection::ConnectFailure;
use crate::protocol::{qos_level, DecodeWarning};
use chrono::{DateTime, Utc};
use rumqttc::QoS;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

pub const DEFAULT_DIAGNOSTICS_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    Connected {
        broker: String,
        session_present: bool,
    },
    ConnectRejected(ConnectFailure),
    ConnectionLost {
        reason: String,
    },
    Disconnected,
    MessageStored {
        topic: String,
        pending: usize,
    },
    MessageEvicted {
        topic: String,
    },
    DecodeWarning {
        topic: String,
        warning: DecodeWarning,
    },
    PublishAcknowledged {
        pkid: u16,
    },
    SubscribeAcknowledged {
        pkid: u16,
        granted: Vec<Option<QoS>>,
    },
    PublishFailed {
        topic: String,
        cause: String,
    },
    SubscribeFailed {
        topic_filter: String,
        cause: String,
    },
}

impl Diagnostic {
    /// Whether this diagnostic reports something that went wrong
    pub fn is_failure(&self) -> bool {
        match self {
            Diagnostic::ConnectRejected(_)
            | Diagnostic::ConnectionLost { .. }
            | Diagnostic::PublishFailed { .. }
            | Diagnostic::SubscribeFailed { .. } => true,
            Diagnostic::SubscribeAcknowledged { granted, .. } => granted.iter().any(Option::is_none),
            _ => false,
        }
    }
}

/// Receives diagnostics from the dispatcher and the request path.
///
/// Called on the dispatcher task, so implementations must return quickly.
pub trait ClientObserver: Send + Sync {
    fn on_diagnostic(&self, diagnostic: &Diagnostic);
}

/// Default observer: one `tracing` event per diagnostic
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ClientObserver for TracingObserver {
    fn on_diagnostic(&self, diagnostic: &Diagnostic) {
        match diagnostic {
            Diagnostic::Connected {
                broker,
                session_present,
            } => {
                info!(broker = %broker, session_present, "Connected to MQTT broker");
            }
            Diagnostic::ConnectRejected(reason) => {
                error!(reason = %reason, "Connection failed");
            }
            Diagnostic::ConnectionLost { reason } => {
                warn!(reason = %reason, "MQTT connection lost");
            }
            Diagnostic::Disconnected => info!("Disconnected from MQTT broker"),
            Diagnostic::MessageStored { topic, pending } => {
                debug!(topic = %topic, pending, "Stored inbound message");
            }
            Diagnostic::MessageEvicted { topic } => {
                warn!(topic = %topic, "Per-topic capacity reached, oldest message evicted");
            }
            Diagnostic::DecodeWarning { topic, warning } => {
                warn!(topic = %topic, "Stored payload without structured decode: {}", warning);
            }
            Diagnostic::PublishAcknowledged { pkid } => {
                info!("Message published successfully (Message ID: {})", pkid);
            }
            Diagnostic::SubscribeAcknowledged { pkid, granted } => {
                let levels: Vec<String> = granted
                    .iter()
                    .map(|g| g.map_or("rejected".to_string(), |q| qos_level(q).to_string()))
                    .collect();
                if diagnostic.is_failure() {
                    error!("Subscription rejected (Message ID: {}, QoS: {:?})", pkid, levels);
                } else {
                    info!("Subscribed successfully (Message ID: {}, QoS: {:?})", pkid, levels);
                }
            }
            Diagnostic::PublishFailed { topic, cause } => {
                error!("Publish error on topic {}: {}", topic, cause);
            }
            Diagnostic::SubscribeFailed {
                topic_filter,
                cause,
            } => {
                error!("Subscription error for topic {}: {}", topic_filter, cause);
            }
        }
    }
}

/// A diagnostic with the time it was recorded
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticRecord {
    pub at: DateTime<Utc>,
    pub diagnostic: Diagnostic,
}

/// Bounded in-memory record of the most recent diagnostics
#[derive(Debug, Clone)]
pub struct DiagnosticLog {
    inner: Arc<Mutex<VecDeque<DiagnosticRecord>>>,
    capacity: usize,
}

impl DiagnosticLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, diagnostic: &Diagnostic) {
        let mut records = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(DiagnosticRecord {
            at: Utc::now(),
            diagnostic: diagnostic.clone(),
        });
    }

    /// All retained records, oldest first
    pub fn snapshot(&self) -> Vec<DiagnosticRecord> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Retained failures, oldest first
    pub fn failures(&self) -> Vec<DiagnosticRecord> {
        self.snapshot()
            .into_iter()
            .filter(|record| record.diagnostic.is_failure())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::new(DEFAULT_DIAGNOSTICS_CAPACITY)
    }
}

impl ClientObserver for DiagnosticLog {
    fn on_diagnostic(&self, diagnostic: &Diagnostic) {
        self.record(diagnostic);
    }
}

/// Fans a diagnostic out to the client's log and its injected observer
#[derive(Clone)]
pub struct Reporter {
    log: DiagnosticLog,
    observer: Arc<dyn ClientObserver>,
}

impl Reporter {
    pub fn new(log: DiagnosticLog, observer: Arc<dyn ClientObserver>) -> Self {
        Self { log, observer }
    }

    pub fn report(&self, diagnostic: Diagnostic) {
        self.log.record(&diagnostic);
        self.observer.on_diagnostic(&diagnostic);
    }

    pub fn log(&self) -> &DiagnosticLog {
        &self.log
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("log_len", &self.log.len())
            .finish_non_exhaustive()
    }
}
