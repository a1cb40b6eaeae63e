//! Event dispatcher
//!
//! Consumes [`ProtocolEvent`]s from the transport channel, one at a time and
//! in arrival order. Handlers are synchronous: they update the connection
//! state, append to the store and report diagnostics, and never call back
//! into the transport.

use super::connection::ConnectionManager;
use crate::observability::diagnostics::{Diagnostic, Reporter};
use crate::protocol::{Message, PayloadCodec};
use crate::store::{AppendOutcome, MessageStore};
use crate::transport::ProtocolEvent;
use rumqttc::QoS;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub struct EventDispatcher {
    connection: Arc<ConnectionManager>,
    store: Arc<MessageStore>,
    codec: Arc<dyn PayloadCodec>,
    reporter: Reporter,
    broker: String,
}

impl EventDispatcher {
    pub fn new(
        connection: Arc<ConnectionManager>,
        store: Arc<MessageStore>,
        codec: Arc<dyn PayloadCodec>,
        reporter: Reporter,
        broker: impl Into<String>,
    ) -> Self {
        Self {
            connection,
            store,
            codec,
            reporter,
            broker: broker.into(),
        }
    }

    /// Process events until every sender is dropped
    pub async fn run(self, mut events: mpsc::Receiver<ProtocolEvent>) {
        debug!(broker = %self.broker, "Event dispatcher started");
        while let Some(event) = events.recv().await {
            self.dispatch(event);
        }
        debug!(broker = %self.broker, "Event dispatcher stopped");
    }

    pub fn dispatch(&self, event: ProtocolEvent) {
        match event {
            ProtocolEvent::ConnAck {
                code,
                session_present,
            } => self.on_connect(code, session_present),
            ProtocolEvent::Message {
                topic,
                payload,
                qos,
                retain,
            } => self.on_message(&topic, &payload, qos, retain),
            ProtocolEvent::PublishAck { pkid } => self.on_publish_ack(pkid),
            ProtocolEvent::SubscribeAck { pkid, granted } => self.on_subscribe_ack(pkid, granted),
            ProtocolEvent::ConnectionLost { reason } => self.on_connection_lost(reason),
        }
    }

    /// Apply a connect result; wakes any task waiting in `connect`
    pub fn on_connect(&self, code: u8, session_present: bool) {
        match self.connection.apply_connect_result(code) {
            Some(Ok(())) => self.reporter.report(Diagnostic::Connected {
                broker: self.broker.clone(),
                session_present,
            }),
            Some(Err(reason)) => self.reporter.report(Diagnostic::ConnectRejected(reason)),
            None => {}
        }
    }

    /// Decode best-effort and store under the topic as received
    pub fn on_message(&self, topic: &str, raw: &[u8], qos: QoS, retain: bool) {
        let decoded = self.codec.decode(raw);
        if let Some(warning) = decoded.warning {
            self.reporter.report(Diagnostic::DecodeWarning {
                topic: topic.to_string(),
                warning,
            });
        }

        let message = Message::new(topic, decoded.payload, qos, retain);
        match self.store.append(topic, message) {
            AppendOutcome::Stored { pending } => {
                self.reporter.report(Diagnostic::MessageStored {
                    topic: topic.to_string(),
                    pending,
                });
            }
            AppendOutcome::StoredWithEviction { pending, .. } => {
                self.reporter.report(Diagnostic::MessageEvicted {
                    topic: topic.to_string(),
                });
                self.reporter.report(Diagnostic::MessageStored {
                    topic: topic.to_string(),
                    pending,
                });
            }
        }
    }

    pub fn on_publish_ack(&self, pkid: u16) {
        self.reporter.report(Diagnostic::PublishAcknowledged { pkid });
    }

    pub fn on_subscribe_ack(&self, pkid: u16, granted: Vec<Option<QoS>>) {
        self.reporter
            .report(Diagnostic::SubscribeAcknowledged { pkid, granted });
    }

    pub fn on_connection_lost(&self, reason: String) {
        if self.connection.connection_lost() {
            self.reporter.report(Diagnostic::ConnectionLost { reason });
        } else {
            // Retries before the first CONNACK; the connect timeout covers these.
            info!(broker = %self.broker, "Connection attempt failed: {}", reason);
        }
    }
}
