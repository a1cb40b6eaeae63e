//! Mock implementations for testing
//!
//! [`MockTransport`] is an in-memory loopback broker: publishes are routed
//! back to matching subscriptions, and CONNACK / SUBACK / PUBACK events are
//! produced the way a broker would. It can be told to refuse or ignore
//! connects and to fail requests. [`RecordingObserver`] keeps every
//! diagnostic and lets async tests wait for one.

use crate::config::ConnectionConfig;
use crate::observability::diagnostics::{ClientObserver, Diagnostic};
use crate::protocol::{qos_level, topic_matches_filter};
use crate::transport::{ProtocolEvent, Transport, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::QoS;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// How the mock broker answers CONNECT
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnAckBehavior {
    /// CONNACK with return code 0
    #[default]
    Accept,
    /// CONNACK with the given non-zero code, then the connection closes
    Reject(u8),
    /// Never answer
    Silent,
}

/// A publish request seen by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Debug, Default)]
struct MockState {
    connack: ConnAckBehavior,
    events: Option<mpsc::Sender<ProtocolEvent>>,
    subscriptions: Vec<(String, QoS)>,
    subscribe_requests: usize,
    published: Vec<PublishedMessage>,
    open_count: usize,
    last_open: Option<(ConnectionConfig, bool)>,
    fail_open: bool,
    fail_publish: bool,
    fail_subscribe: bool,
    reject_subscriptions: bool,
    next_pkid: u16,
}

impl MockState {
    fn pkid(&mut self) -> u16 {
        self.next_pkid = self.next_pkid.wrapping_add(1).max(1);
        self.next_pkid
    }
}

/// Mock transport for testing; clones share the same broker state
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connack(behavior: ConnAckBehavior) -> Self {
        let transport = Self::new();
        transport.set_connack_behavior(behavior);
        transport
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_connack_behavior(&self, behavior: ConnAckBehavior) {
        self.lock().connack = behavior;
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.lock().fail_open = fail;
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.lock().fail_publish = fail;
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        self.lock().fail_subscribe = fail;
    }

    /// Answer every SUBSCRIBE with a failure return code
    pub fn set_reject_subscriptions(&self, reject: bool) {
        self.lock().reject_subscriptions = reject;
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.lock().subscriptions.clone()
    }

    /// SUBSCRIBE requests received, repeats included
    pub fn subscribe_count(&self) -> usize {
        self.lock().subscribe_requests
    }

    pub fn open_count(&self) -> usize {
        self.lock().open_count
    }

    pub fn last_clean_session(&self) -> Option<bool> {
        self.lock().last_open.as_ref().map(|(_, clean)| *clean)
    }

    pub fn last_connection_config(&self) -> Option<ConnectionConfig> {
        self.lock().last_open.as_ref().map(|(config, _)| config.clone())
    }

    pub fn is_open(&self) -> bool {
        self.lock().events.is_some()
    }

    /// Inject an event as if the broker had sent it
    pub async fn emit(&self, event: ProtocolEvent) -> Result<(), TransportError> {
        let sender = self.lock().events.clone().ok_or(TransportError::NotOpen)?;
        sender.send(event).await.map_err(|_| TransportError::Closed)
    }

    /// Deliver a message as if another client had published it.
    ///
    /// Subscriptions are not checked.
    pub async fn deliver(&self, topic: &str, payload: impl Into<Bytes>) -> Result<(), TransportError> {
        self.emit(ProtocolEvent::Message {
            topic: topic.to_string(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        })
        .await
    }

    fn request_error(what: &str) -> TransportError {
        TransportError::Client(Box::new(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Mock {what} failure"),
        )))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(
        &self,
        config: &ConnectionConfig,
        clean_session: bool,
        events: mpsc::Sender<ProtocolEvent>,
    ) -> Result<(), TransportError> {
        let behavior = {
            let mut state = self.lock();
            if state.events.is_some() {
                return Err(TransportError::AlreadyOpen);
            }
            if state.fail_open {
                return Err(Self::request_error("open"));
            }
            state.open_count += 1;
            state.last_open = Some((config.clone(), clean_session));
            if clean_session {
                state.subscriptions.clear();
            }
            if !matches!(state.connack, ConnAckBehavior::Reject(_)) {
                state.events = Some(events.clone());
            }
            state.connack
        };

        match behavior {
            ConnAckBehavior::Accept => {
                let _ = events
                    .send(ProtocolEvent::ConnAck {
                        code: 0,
                        session_present: !clean_session,
                    })
                    .await;
            }
            ConnAckBehavior::Reject(code) => {
                let _ = events
                    .send(ProtocolEvent::ConnAck {
                        code,
                        session_present: false,
                    })
                    .await;
            }
            ConnAckBehavior::Silent => {}
        }
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        let (sender, delivered, ack) = {
            let mut state = self.lock();
            let sender = state.events.clone().ok_or(TransportError::NotOpen)?;
            if state.fail_publish {
                return Err(Self::request_error("publish"));
            }
            state.published.push(PublishedMessage {
                topic: topic.to_string(),
                payload: payload.clone(),
                qos,
                retain,
            });

            // One delivery per publish, at the best grant among matching filters
            let delivered = state
                .subscriptions
                .iter()
                .filter(|(filter, _)| topic_matches_filter(topic, filter))
                .map(|(_, granted)| std::cmp::min_by_key(*granted, qos, |q| qos_level(*q)))
                .max_by_key(|q| qos_level(*q));
            let ack = (qos != QoS::AtMostOnce).then(|| state.pkid());
            (sender, delivered, ack)
        };

        if let Some(delivery_qos) = delivered {
            let _ = sender
                .send(ProtocolEvent::Message {
                    topic: topic.to_string(),
                    payload: Bytes::from(payload),
                    qos: delivery_qos,
                    retain,
                })
                .await;
        }
        if let Some(pkid) = ack {
            let _ = sender.send(ProtocolEvent::PublishAck { pkid }).await;
        }
        Ok(())
    }

    async fn subscribe(&self, topic_filter: &str, qos: QoS) -> Result<(), TransportError> {
        let (sender, pkid, granted) = {
            let mut state = self.lock();
            let sender = state.events.clone().ok_or(TransportError::NotOpen)?;
            if state.fail_subscribe {
                return Err(Self::request_error("subscribe"));
            }
            state.subscribe_requests += 1;
            let granted = if state.reject_subscriptions {
                None
            } else {
                state.subscriptions.retain(|(filter, _)| filter != topic_filter);
                state.subscriptions.push((topic_filter.to_string(), qos));
                Some(qos)
            };
            (sender, state.pkid(), granted)
        };

        let _ = sender
            .send(ProtocolEvent::SubscribeAck {
                pkid,
                granted: vec![granted],
            })
            .await;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.lock().events = None;
        Ok(())
    }
}

/// Observer that keeps every diagnostic it sees
#[derive(Debug, Default)]
pub struct RecordingObserver {
    records: Mutex<Vec<Diagnostic>>,
    notify: Notify,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<Diagnostic> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, predicate: impl Fn(&Diagnostic) -> bool) -> usize {
        self.recorded().iter().filter(|d| predicate(d)).count()
    }

    /// Wait until a matching diagnostic has been recorded
    pub async fn wait_for(
        &self,
        predicate: impl Fn(&Diagnostic) -> bool,
        timeout: Duration,
    ) -> Option<Diagnostic> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(found) = self.recorded().into_iter().find(|d| predicate(d)) {
                return Some(found);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }
}

impl ClientObserver for RecordingObserver {
    fn on_diagnostic(&self, diagnostic: &Diagnostic) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diagnostic.clone());
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open(transport: &MockTransport) -> mpsc::Receiver<ProtocolEvent> {
        let (tx, rx) = mpsc::channel(16);
        transport
            .open(&ConnectionConfig::new("mock", 1883), true, tx)
            .await
            .unwrap();
        rx
    }

    #[tokio::test]
    async fn test_accept_sends_connack() {
        let transport = MockTransport::new();
        let mut rx = open(&transport).await;
        assert_eq!(
            rx.recv().await,
            Some(ProtocolEvent::ConnAck {
                code: 0,
                session_present: false
            })
        );
        assert!(transport.is_open());
    }

    #[tokio::test]
    async fn test_reject_closes_stream() {
        let transport = MockTransport::with_connack(ConnAckBehavior::Reject(2));
        let mut rx = open(&transport).await;
        assert_eq!(
            rx.recv().await,
            Some(ProtocolEvent::ConnAck {
                code: 2,
                session_present: false
            })
        );
        assert_eq!(rx.recv().await, None);
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_loopback_routes_to_matching_subscription() {
        let transport = MockTransport::new();
        let mut rx = open(&transport).await;
        let _connack = rx.recv().await;

        transport.subscribe("home/sensors/#", QoS::AtMostOnce).await.unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(ProtocolEvent::SubscribeAck { granted, .. }) if granted == vec![Some(QoS::AtMostOnce)]
        ));

        transport
            .publish("home/other/x", b"1".to_vec(), QoS::AtMostOnce, false)
            .await
            .unwrap();
        transport
            .publish("home/sensors/humidity", b"2".to_vec(), QoS::AtLeastOnce, false)
            .await
            .unwrap();

        match rx.recv().await {
            Some(ProtocolEvent::Message { topic, qos, .. }) => {
                assert_eq!(topic, "home/sensors/humidity");
                assert_eq!(qos, QoS::AtMostOnce);
            }
            other => panic!("Expected loopback message, got {other:?}"),
        }
        assert!(matches!(rx.recv().await, Some(ProtocolEvent::PublishAck { .. })));
        assert_eq!(transport.published().len(), 2);
    }

    #[tokio::test]
    async fn test_requests_fail_when_closed() {
        let transport = MockTransport::new();
        assert!(matches!(
            transport.subscribe("a", QoS::AtMostOnce).await,
            Err(TransportError::NotOpen)
        ));
        assert!(matches!(
            transport.emit(ProtocolEvent::PublishAck { pkid: 1 }).await,
            Err(TransportError::NotOpen)
        ));
    }

    #[tokio::test]
    async fn test_recording_observer_wait_for() {
        let observer = Arc::new(RecordingObserver::new());
        let background = observer.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            background.on_diagnostic(&Diagnostic::PublishAcknowledged { pkid: 9 });
        });

        let found = observer
            .wait_for(
                |d| matches!(d, Diagnostic::PublishAcknowledged { pkid: 9 }),
                Duration::from_secs(2),
            )
            .await;
        assert_eq!(found, Some(Diagnostic::PublishAcknowledged { pkid: 9 }));
        assert!(observer
            .wait_for(|d| *d == Diagnostic::Disconnected, Duration::from_millis(20))
            .await
            .is_none());
    }
}
