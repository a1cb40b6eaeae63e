//! Client facade: connect, disconnect, publish, subscribe and drain
//!
//! `MqttManager` wires a [`Transport`] to the event dispatcher, owns the
//! connection state machine and the message store, and reports every
//! failed request to the observer as well as to the caller.

use super::connection::{ConnectionManager, ConnectionState};
use super::dispatcher::EventDispatcher;
use crate::config::{ClientConfig, ConnectionConfig};
use crate::error::{ClientError, ClientResult, RequestFailure};
use crate::observability::diagnostics::{
    ClientObserver, Diagnostic, DiagnosticLog, Reporter, TracingObserver,
};
use crate::protocol::{
    qos_from_level, validate_publish_topic, validate_topic_filter, CodecError, JsonCodec,
    Message, Payload, PayloadCodec,
};
use crate::store::MessageStore;
use crate::transport::mqtt::{RumqttTransport, TransportSettings};
use crate::transport::Transport;
use rumqttc::QoS;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// How long teardown waits for the dispatcher to drain its channel
const DISPATCHER_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub struct MqttManager<T: Transport = RumqttTransport> {
    config: ClientConfig,
    connection_config: ConnectionConfig,
    transport: Arc<T>,
    connection: Arc<ConnectionManager>,
    store: Arc<MessageStore>,
    codec: Arc<dyn PayloadCodec>,
    log: DiagnosticLog,
    reporter: Reporter,
    /// Dispatcher task of the current session; also serializes connect/disconnect setup
    session: Mutex<Option<JoinHandle<()>>>,
    /// Set by the first `connect` to see the current session established
    auto_subscribed: AtomicBool,
}

impl MqttManager<RumqttTransport> {
    /// Client backed by rumqttc
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        let transport = RumqttTransport::new(TransportSettings::from_session(&config.session));
        Self::with_transport(config, transport)
    }
}

impl<T: Transport> MqttManager<T> {
    pub fn with_transport(config: &ClientConfig, transport: T) -> ClientResult<Self> {
        config.validate()?;
        let connection_config = config.connection_config()?;
        let log = DiagnosticLog::new(config.store.diagnostics_capacity);
        let reporter = Reporter::new(log.clone(), Arc::new(TracingObserver));

        Ok(Self {
            config: config.clone(),
            connection_config,
            transport: Arc::new(transport),
            connection: Arc::new(ConnectionManager::new()),
            store: Arc::new(MessageStore::with_policy(config.store.capacity_policy())),
            codec: Arc::new(JsonCodec),
            log,
            reporter,
            session: Mutex::new(None),
            auto_subscribed: AtomicBool::new(false),
        })
    }

    /// Replace the default `TracingObserver`
    pub fn with_observer(mut self, observer: Arc<dyn ClientObserver>) -> Self {
        self.reporter = Reporter::new(self.log.clone(), observer);
        self
    }

    /// Replace the default `JsonCodec`
    pub fn with_codec(mut self, codec: Arc<dyn PayloadCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Connect and wait for the broker's answer.
    ///
    /// Returns `Ok` once CONNACK accepted the session, `ConnectRejected` if
    /// the broker refused it and `ConnectTimeout` if nothing arrived within
    /// `session.connect_timeout_ms`. A timed-out attempt keeps running in
    /// the transport; a later `connect` waits on it instead of starting over.
    pub async fn connect(&self, clean_session: bool) -> ClientResult<()> {
        let span = crate::mqtt_span!(
            operation = "connect",
            broker = %self.connection_config.broker_address(),
            client_id = %self.connection_config.client_id
        );

        async move {
            let outcome = {
                let mut session = self.session.lock().await;
                match self.connection.state() {
                    ConnectionState::Connected => {
                        debug!("Already connected");
                        return Ok(());
                    }
                    ConnectionState::Connecting if session.is_some() => {
                        debug!("Joining pending connection attempt");
                        self.connection.watch()
                    }
                    _ => {
                        self.teardown(&mut session).await?;
                        self.open_session(&mut session, clean_session).await?
                    }
                }
            };

            ConnectionManager::wait_for_outcome(outcome, self.config.connect_timeout()).await?;
            info!("Connection established");

            // Concurrent callers share one session; the transport restores
            // these filters itself after a reconnect.
            if !self.auto_subscribed.swap(true, Ordering::AcqRel) {
                self.auto_subscribe().await;
            }
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn open_session(
        &self,
        session: &mut Option<JoinHandle<()>>,
        clean_session: bool,
    ) -> ClientResult<tokio::sync::watch::Receiver<ConnectionState>> {
        let (events_tx, events_rx) = mpsc::channel(self.config.session.event_channel_capacity);
        let dispatcher = EventDispatcher::new(
            self.connection.clone(),
            self.store.clone(),
            self.codec.clone(),
            self.reporter.clone(),
            self.connection_config.broker_address(),
        );
        *session = Some(tokio::spawn(dispatcher.run(events_rx)));
        self.auto_subscribed.store(false, Ordering::Release);

        let outcome = self.connection.begin_connect();
        info!(clean_session, "Connecting to MQTT broker");

        if let Err(e) = self
            .transport
            .open(&self.connection_config, clean_session, events_tx)
            .await
        {
            self.connection.mark_disconnected();
            let _ = self.teardown(session).await;
            return Err(e.into());
        }

        Ok(outcome)
    }

    /// Close the transport and wait for the dispatcher to finish
    async fn teardown(&self, session: &mut Option<JoinHandle<()>>) -> ClientResult<()> {
        let Some(mut handle) = session.take() else {
            return Ok(());
        };

        let closed = self.transport.close().await;

        match tokio::time::timeout(DISPATCHER_SHUTDOWN_GRACE, &mut handle).await {
            Ok(Ok(())) => debug!("Event dispatcher shut down gracefully"),
            Ok(Err(e)) if !e.is_cancelled() => warn!("Event dispatcher ended with error: {}", e),
            Ok(Err(_)) => {}
            Err(_) => {
                warn!("Event dispatcher didn't shut down gracefully, forcing abort");
                handle.abort();
            }
        }

        closed.map_err(ClientError::from)
    }

    async fn auto_subscribe(&self) {
        for subscription in &self.config.session.auto_subscribe {
            let result = match qos_from_level(subscription.qos) {
                Some(qos) => self.subscribe(&subscription.topic, qos).await,
                None => {
                    let cause = RequestFailure::InvalidQos(subscription.qos);
                    Err(self.subscribe_failure(&subscription.topic, cause))
                }
            };
            if let Err(e) = result {
                warn!("Automatic subscription failed: {}", e);
            }
        }
    }

    /// Shut the connection down; safe to call in any state.
    ///
    /// A task still waiting in `connect` is released with `ConnectAborted`.
    pub async fn disconnect(&self) -> ClientResult<()> {
        let mut session = self.session.lock().await;
        let previous = self.connection.state();
        self.connection.mark_disconnected();

        let result = self.teardown(&mut session).await;
        if previous != ConnectionState::Disconnected {
            self.reporter.report(Diagnostic::Disconnected);
        }
        result
    }

    /// Publish to a concrete topic.
    ///
    /// `Payload::Json` values are serialized by the codec; text and bytes
    /// pass through. The broker's PUBACK/PUBCOMP shows up in the diagnostics.
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Payload>,
        qos: QoS,
        retain: bool,
    ) -> ClientResult<()> {
        let payload = payload.into();
        match self.try_publish(topic, &payload, qos, retain).await {
            Ok(()) => {
                debug!(topic = %topic, ?qos, retain, "Publish queued");
                Ok(())
            }
            Err(cause) => Err(self.publish_failure(topic, cause)),
        }
    }

    /// Serialize `value` to JSON and publish it
    pub async fn publish_json<V: Serialize>(
        &self,
        topic: &str,
        value: &V,
        qos: QoS,
        retain: bool,
    ) -> ClientResult<()> {
        match serde_json::to_value(value) {
            Ok(value) => self.publish(topic, Payload::Json(value), qos, retain).await,
            Err(e) => Err(self.publish_failure(topic, CodecError::Serialization(e))),
        }
    }

    async fn try_publish(
        &self,
        topic: &str,
        payload: &Payload,
        qos: QoS,
        retain: bool,
    ) -> Result<(), RequestFailure> {
        validate_publish_topic(topic)?;
        self.ensure_connected()?;
        let bytes = self.codec.encode(payload)?;
        self.transport.publish(topic, bytes, qos, retain).await?;
        Ok(())
    }

    /// Request a subscription; the granted QoS arrives later as a diagnostic
    pub async fn subscribe(&self, topic_filter: &str, qos: QoS) -> ClientResult<()> {
        match self.try_subscribe(topic_filter, qos).await {
            Ok(()) => {
                info!(topic_filter = %topic_filter, ?qos, "Subscription requested");
                Ok(())
            }
            Err(cause) => Err(self.subscribe_failure(topic_filter, cause)),
        }
    }

    async fn try_subscribe(&self, topic_filter: &str, qos: QoS) -> Result<(), RequestFailure> {
        validate_topic_filter(topic_filter)?;
        self.ensure_connected()?;
        self.transport.subscribe(topic_filter, qos).await?;
        Ok(())
    }

    fn ensure_connected(&self) -> Result<(), RequestFailure> {
        match self.connection.state() {
            ConnectionState::Connected => Ok(()),
            state => Err(RequestFailure::NotConnected { state }),
        }
    }

    fn publish_failure(&self, topic: &str, cause: impl Into<RequestFailure>) -> ClientError {
        let cause = cause.into();
        self.reporter.report(Diagnostic::PublishFailed {
            topic: topic.to_string(),
            cause: cause.to_string(),
        });
        ClientError::publish_failed(topic, cause)
    }

    fn subscribe_failure(&self, topic_filter: &str, cause: impl Into<RequestFailure>) -> ClientError {
        let cause = cause.into();
        self.reporter.report(Diagnostic::SubscribeFailed {
            topic_filter: topic_filter.to_string(),
            cause: cause.to_string(),
        });
        ClientError::subscribe_failed(topic_filter, cause)
    }

    /// Messages received on exactly `topic`, oldest first; `clear` empties the topic
    pub fn get_messages(&self, topic: &str, clear: bool) -> Vec<Message> {
        self.store.drain(topic, clear)
    }

    /// Messages from every stored topic matching a wildcard filter
    pub fn messages_matching(&self, topic_filter: &str, clear: bool) -> Vec<Message> {
        self.store.drain_matching(topic_filter, clear)
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Recent diagnostics, including failures nobody was waiting for
    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.log
    }

    pub fn client_id(&self) -> &str {
        &self.connection_config.client_id
    }

    pub fn connection_config(&self) -> &ConnectionConfig {
        &self.connection_config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::connection::ConnectFailure;
    use crate::config::AutoSubscription;
    use crate::protocol::TextCodec;
    use crate::testing::{ConnAckBehavior, MockTransport};
    use crate::transport::ProtocolEvent;
    use serde_json::json;

    fn manager(transport: MockTransport) -> MqttManager<MockTransport> {
        let mut config = ClientConfig::default();
        config.broker.client_id = Some("manager-test".to_string());
        config.session.connect_timeout_ms = 200;
        MqttManager::with_transport(&config, transport).unwrap()
    }

    #[tokio::test]
    async fn test_initial_state() {
        let manager = manager(MockTransport::new());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.is_connected());
        assert_eq!(manager.client_id(), "manager-test");
        assert!(manager.diagnostics().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = ClientConfig::default();
        config.session.keep_alive_secs = 1;
        assert!(matches!(
            MqttManager::with_transport(&config, MockTransport::new()),
            Err(ClientError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_accepted() {
        let transport = MockTransport::new();
        let manager = manager(transport.clone());

        manager.connect(true).await.unwrap();

        assert!(manager.is_connected());
        assert_eq!(transport.open_count(), 1);
        assert_eq!(transport.last_clean_session(), Some(true));
        let opened_with = transport.last_connection_config().unwrap();
        assert_eq!(opened_with.client_id, "manager-test");
        assert_eq!(opened_with.broker_address(), "localhost:1883");
    }

    #[tokio::test]
    async fn test_connect_twice_does_not_reopen() {
        let transport = MockTransport::new();
        let manager = manager(transport.clone());

        manager.connect(true).await.unwrap();
        manager.connect(false).await.unwrap();

        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_rejected_returns_reason() {
        let transport = MockTransport::with_connack(ConnAckBehavior::Reject(5));
        let manager = manager(transport);

        let error = manager.connect(true).await.unwrap_err();

        assert!(matches!(
            error,
            ClientError::ConnectRejected(ConnectFailure::NotAuthorized)
        ));
        assert_eq!(
            manager.state(),
            ConnectionState::Failed(ConnectFailure::NotAuthorized)
        );
        assert_eq!(manager.diagnostics().failures().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_after_rejection_reopens() {
        let transport = MockTransport::with_connack(ConnAckBehavior::Reject(3));
        let manager = manager(transport.clone());
        assert!(manager.connect(true).await.is_err());

        transport.set_connack_behavior(ConnAckBehavior::Accept);
        manager.connect(true).await.unwrap();

        assert!(manager.is_connected());
        assert_eq!(transport.open_count(), 2);
    }

    #[tokio::test]
    async fn test_connect_timeout_when_broker_silent() {
        let transport = MockTransport::with_connack(ConnAckBehavior::Silent);
        let manager = manager(transport);

        let error = manager.connect(true).await.unwrap_err();

        assert!(matches!(error, ClientError::ConnectTimeout(d) if d == Duration::from_millis(200)));
        assert_eq!(manager.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_open_failure_returns_to_disconnected() {
        let transport = MockTransport::new();
        transport.set_fail_open(true);
        let manager = manager(transport);

        assert!(matches!(
            manager.connect(true).await,
            Err(ClientError::Transport(_))
        ));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let transport = MockTransport::new();
        let manager = manager(transport.clone());

        let error = manager
            .publish("sensors/x", "hello", QoS::AtMostOnce, false)
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            ClientError::PublishFailed {
                cause: RequestFailure::NotConnected { .. },
                ..
            }
        ));
        assert!(transport.published().is_empty());
        assert!(matches!(
            manager.diagnostics().failures()[0].diagnostic,
            Diagnostic::PublishFailed { .. }
        ));
    }

    #[tokio::test]
    async fn test_publish_encodes_json() {
        let transport = MockTransport::new();
        let manager = manager(transport.clone());
        manager.connect(true).await.unwrap();

        manager
            .publish("sensors/x", json!({"value": 1}), QoS::AtLeastOnce, true)
            .await
            .unwrap();

        let published = transport.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "sensors/x");
        assert_eq!(published[0].payload, br#"{"value":1}"#.to_vec());
        assert_eq!(published[0].qos, QoS::AtLeastOnce);
        assert!(published[0].retain);
    }

    #[tokio::test]
    async fn test_publish_rejects_wildcard_topic() {
        let manager = manager(MockTransport::new());
        manager.connect(true).await.unwrap();

        assert!(matches!(
            manager.publish("sensors/#", "x", QoS::AtMostOnce, false).await,
            Err(ClientError::PublishFailed {
                cause: RequestFailure::InvalidTopic(_),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_publish_transport_failure_is_surfaced() {
        let transport = MockTransport::new();
        let manager = manager(transport.clone());
        manager.connect(true).await.unwrap();
        transport.set_fail_publish(true);

        let error = manager
            .publish("sensors/x", "x", QoS::AtMostOnce, false)
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            ClientError::PublishFailed {
                cause: RequestFailure::Transport(_),
                ..
            }
        ));
        assert!(error.is_connection_error());
    }

    #[tokio::test]
    async fn test_subscribe_validates_filter() {
        let transport = MockTransport::new();
        let manager = manager(transport.clone());
        manager.connect(true).await.unwrap();

        assert!(manager.subscribe("home/+/temp", QoS::AtLeastOnce).await.is_ok());
        assert!(manager.subscribe("home/#/temp", QoS::AtLeastOnce).await.is_err());
        assert_eq!(
            transport.subscriptions(),
            vec![("home/+/temp".to_string(), QoS::AtLeastOnce)]
        );
    }

    #[tokio::test]
    async fn test_subscribe_transport_failure_is_surfaced() {
        let transport = MockTransport::new();
        let manager = manager(transport.clone());
        manager.connect(true).await.unwrap();
        transport.set_fail_subscribe(true);

        let error = manager
            .subscribe("home/#", QoS::AtLeastOnce)
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            ClientError::SubscribeFailed {
                cause: RequestFailure::Transport(_),
                ..
            }
        ));
        assert!(transport.subscriptions().is_empty());
        assert!(matches!(
            &manager.diagnostics().failures()[0].diagnostic,
            Diagnostic::SubscribeFailed { topic_filter, .. } if topic_filter == "home/#"
        ));
    }

    #[tokio::test]
    async fn test_auto_subscribe_after_connect() {
        let transport = MockTransport::new();
        let mut config = ClientConfig::default();
        config.session.auto_subscribe = vec![
            crate::config::AutoSubscription {
                topic: "devices/+/status".to_string(),
                qos: 1,
            },
            crate::config::AutoSubscription {
                topic: "devices/config".to_string(),
                qos: 0,
            },
        ];
        let manager = MqttManager::with_transport(&config, transport.clone()).unwrap();

        manager.connect(true).await.unwrap();

        assert_eq!(
            transport.subscriptions(),
            vec![
                ("devices/+/status".to_string(), QoS::AtLeastOnce),
                ("devices/config".to_string(), QoS::AtMostOnce),
            ]
        );
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let transport = MockTransport::new();
        let manager = manager(transport.clone());

        manager.disconnect().await.unwrap();
        assert!(manager.diagnostics().is_empty());

        manager.connect(true).await.unwrap();
        manager.disconnect().await.unwrap();
        manager.disconnect().await.unwrap();

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!transport.is_open());
        let disconnects = manager
            .diagnostics()
            .snapshot()
            .into_iter()
            .filter(|r| r.diagnostic == Diagnostic::Disconnected)
            .count();
        assert_eq!(disconnects, 1);
    }

    #[tokio::test]
    async fn test_disconnect_releases_pending_connect() {
        let transport = MockTransport::with_connack(ConnAckBehavior::Silent);
        let mut config = ClientConfig::default();
        config.session.connect_timeout_ms = 5_000;
        let manager = Arc::new(MqttManager::with_transport(&config, transport).unwrap());

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.connect(true).await })
        };
        while manager.state() != ConnectionState::Connecting {
            tokio::task::yield_now().await;
        }

        manager.disconnect().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("connect should be released")
            .unwrap();
        assert!(matches!(result, Err(ClientError::ConnectAborted)));
    }

    fn auto_subscribe_config() -> ClientConfig {
        let mut config = ClientConfig::default();
        config.session.connect_timeout_ms = 5_000;
        config.session.auto_subscribe = vec![AutoSubscription {
            topic: "devices/+/status".to_string(),
            qos: 1,
        }];
        config
    }

    #[tokio::test]
    async fn test_concurrent_connects_auto_subscribe_once() {
        let transport = MockTransport::with_connack(ConnAckBehavior::Silent);
        let manager = Arc::new(
            MqttManager::with_transport(&auto_subscribe_config(), transport.clone()).unwrap(),
        );

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.connect(true).await })
            })
            .collect();
        while manager.state() != ConnectionState::Connecting {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        transport
            .emit(ProtocolEvent::ConnAck {
                code: 0,
                session_present: false,
            })
            .await
            .unwrap();
        for waiter in waiters {
            waiter.await.unwrap().unwrap();
        }

        assert_eq!(transport.open_count(), 1);
        assert_eq!(
            transport.subscriptions(),
            vec![("devices/+/status".to_string(), QoS::AtLeastOnce)]
        );
        assert_eq!(transport.subscribe_count(), 1);
    }

    #[tokio::test]
    async fn test_new_session_auto_subscribes_again() {
        let transport = MockTransport::new();
        let manager = MqttManager::with_transport(&auto_subscribe_config(), transport.clone()).unwrap();

        manager.connect(true).await.unwrap();
        manager.connect(true).await.unwrap();
        assert_eq!(transport.subscribe_count(), 1);

        manager.disconnect().await.unwrap();
        manager.connect(true).await.unwrap();

        assert_eq!(transport.open_count(), 2);
        assert_eq!(transport.subscribe_count(), 2);
    }

    #[tokio::test]
    async fn test_custom_codec_keeps_text_payloads() {
        let transport = MockTransport::new();
        let manager = manager(transport.clone()).with_codec(Arc::new(TextCodec));
        manager.connect(true).await.unwrap();

        transport
            .deliver("devices/7/status", r#"{"online":true}"#)
            .await
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while manager.store().len("devices/7/status") == 0 {
            assert!(tokio::time::Instant::now() < deadline, "message not stored");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let stored = manager.get_messages("devices/7/status", true);
        assert_eq!(
            stored[0].payload(),
            &Payload::Text(r#"{"online":true}"#.to_string())
        );
    }
}
