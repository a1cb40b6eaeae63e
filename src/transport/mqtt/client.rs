//! Impure I/O for the rumqttc transport
//!
//! `open` creates the rumqttc client and spawns a task that polls the event
//! loop, routes each event through [`route_event`] and forwards it to the
//! dispatcher channel. A refused CONNACK ends the task; network errors are
//! reported and retried with the configured backoff until `close`. When a
//! reconnect comes back without session state, every filter subscribed on
//! the session is requested again.

use super::connection::{
    configure_mqtt_options, ReconnectPolicy, SubscriptionRegistry, TransportSettings,
};
use super::message_handler::{return_code_value, route_event, EventRoute};
use crate::config::ConnectionConfig;
use crate::transport::{ProtocolEvent, Transport, TransportError};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, EventLoop, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct Session {
    client: AsyncClient,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
    connected: Arc<AtomicBool>,
    subscriptions: SubscriptionRegistry,
}

/// MQTT 3.1.1 transport backed by rumqttc
pub struct RumqttTransport {
    settings: TransportSettings,
    session: Mutex<Option<Session>>,
}

impl RumqttTransport {
    pub fn new(settings: TransportSettings) -> Self {
        Self {
            settings,
            session: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    async fn client(&self) -> Result<AsyncClient, TransportError> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.client.clone())
            .ok_or(TransportError::NotOpen)
    }

    /// Sleep that returns false as soon as shutdown is requested
    async fn interruptible_sleep(shutdown_rx: &mut watch::Receiver<bool>, delay: Duration) -> bool {
        tokio::select! {
            changed = shutdown_rx.changed() => changed.is_ok() && !*shutdown_rx.borrow(),
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Queue one SUBSCRIBE carrying every recorded filter.
    ///
    /// Uses the non-blocking request path: the event loop that drains the
    /// request channel is the caller.
    fn resubscribe(client: &AsyncClient, subscriptions: &SubscriptionRegistry) {
        let filters = subscriptions.subscribe_filters();
        if filters.is_empty() {
            return;
        }

        let count = filters.len();
        match client.try_subscribe_many(filters) {
            Ok(()) => info!(count, "Re-subscribing after reconnect"),
            Err(e) => error!(count, "Failed to re-subscribe after reconnect: {}", e),
        }
    }

    /// Drive the rumqttc event loop until shutdown, refusal or local disconnect
    #[allow(clippy::too_many_arguments)]
    async fn run_event_loop(
        mut event_loop: EventLoop,
        client: AsyncClient,
        subscriptions: SubscriptionRegistry,
        events: mpsc::Sender<ProtocolEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
        connected: Arc<AtomicBool>,
        reconnect: ReconnectPolicy,
        broker: String,
    ) {
        info!(broker = %broker, "Starting MQTT event loop");
        let mut attempt = 0u32;

        loop {
            let polled = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping event loop");
                        break;
                    }
                    continue;
                }
                polled = event_loop.poll() => polled,
            };

            let forward = match polled {
                Ok(event) => match route_event(&event) {
                    EventRoute::Forward(forward) => {
                        if let ProtocolEvent::ConnAck {
                            code: 0,
                            session_present,
                        } = &forward
                        {
                            connected.store(true, Ordering::Release);
                            attempt = 0;
                            if !*session_present {
                                Self::resubscribe(&client, &subscriptions);
                            }
                        }
                        forward
                    }
                    EventRoute::LocalDisconnect => {
                        debug!("DISCONNECT sent, stopping event loop");
                        connected.store(false, Ordering::Release);
                        break;
                    }
                    EventRoute::Ignore => continue,
                },
                Err(ConnectionError::ConnectionRefused(code)) => {
                    let code = return_code_value(code);
                    warn!(broker = %broker, code, "Broker refused connection");
                    let _ = events
                        .send(ProtocolEvent::ConnAck {
                            code,
                            session_present: false,
                        })
                        .await;
                    break;
                }
                Err(e) => {
                    connected.store(false, Ordering::Release);
                    attempt = attempt.saturating_add(1);
                    let delay = reconnect.delay_for_attempt(attempt);
                    warn!(broker = %broker, attempt, "MQTT event loop error: {}", e);

                    if events
                        .send(ProtocolEvent::ConnectionLost {
                            reason: e.to_string(),
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                    if !Self::interruptible_sleep(&mut shutdown_rx, delay).await {
                        break;
                    }
                    continue;
                }
            };

            if events.send(forward).await.is_err() {
                debug!("Event receiver dropped, stopping event loop");
                break;
            }
        }

        info!(broker = %broker, "MQTT event loop stopped");
    }
}

impl Default for RumqttTransport {
    fn default() -> Self {
        Self::new(TransportSettings::default())
    }
}

#[async_trait]
impl Transport for RumqttTransport {
    async fn open(
        &self,
        config: &ConnectionConfig,
        clean_session: bool,
        events: mpsc::Sender<ProtocolEvent>,
    ) -> Result<(), TransportError> {
        let mut session = self.session.lock().await;
        if session.as_ref().is_some_and(|s| !s.handle.is_finished()) {
            return Err(TransportError::AlreadyOpen);
        }

        let mqtt_options = configure_mqtt_options(config, clean_session);
        let (client, event_loop) = AsyncClient::new(mqtt_options, self.settings.request_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(false));
        let subscriptions = SubscriptionRegistry::new();

        let handle = tokio::spawn(Self::run_event_loop(
            event_loop,
            client.clone(),
            subscriptions.clone(),
            events,
            shutdown_rx,
            connected.clone(),
            self.settings.reconnect.clone(),
            config.broker_address(),
        ));

        *session = Some(Session {
            client,
            shutdown_tx,
            handle,
            connected,
            subscriptions,
        });
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        let client = self.client().await?;
        client
            .publish(topic, qos, retain, payload)
            .await
            .map_err(|e| TransportError::Client(Box::new(e)))
    }

    async fn subscribe(&self, topic_filter: &str, qos: QoS) -> Result<(), TransportError> {
        let (client, subscriptions) = {
            let session = self.session.lock().await;
            let session = session.as_ref().ok_or(TransportError::NotOpen)?;
            (session.client.clone(), session.subscriptions.clone())
        };
        client
            .subscribe(topic_filter, qos)
            .await
            .map_err(|e| TransportError::Client(Box::new(e)))?;
        subscriptions.record(topic_filter, qos);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let Some(mut session) = self.session.lock().await.take() else {
            return Ok(());
        };

        let mut result = Ok(());
        if session.connected.load(Ordering::Acquire) {
            if let Err(e) = session.client.disconnect().await {
                result = Err(TransportError::Client(Box::new(e)));
            }
        } else {
            let _ = session.shutdown_tx.send(true);
        }

        match tokio::time::timeout(self.settings.shutdown_grace, &mut session.handle).await {
            Ok(Ok(())) => info!("Event loop task shut down gracefully"),
            Ok(Err(e)) if !e.is_cancelled() => warn!("Event loop task ended with error: {}", e),
            Ok(Err(_)) => {}
            Err(_) => {
                warn!("Event loop task didn't shut down gracefully, forcing abort");
                let _ = session.shutdown_tx.send(true);
                session.handle.abort();
            }
        }

        result
    }
}

impl Drop for RumqttTransport {
    fn drop(&mut self) {
        // Async cleanup is impossible here; stop the background task only.
        if let Some(session) = self.session.get_mut().take() {
            let _ = session.shutdown_tx.send(true);
            session.handle.abort();
        }
    }
}
