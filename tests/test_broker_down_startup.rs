//! Connecting through rumqttc when no broker is listening
//!
//! Port 1 on loopback refuses TCP connections, so the transport keeps
//! retrying and `connect` must give up after the configured timeout.

use mqtt_inbox::{ClientConfig, ClientError, ConnectionState, Diagnostic, MqttManager};
use rumqttc::QoS;
use std::time::{Duration, Instant};

fn unreachable_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.broker.host = "127.0.0.1".to_string();
    config.broker.port = 1;
    config.broker.client_id = Some("broker-down".to_string());
    config.session.connect_timeout_ms = 500;
    config.session.reconnect_backoff_ms = vec![25, 50];
    config.session.reconnect_delay_ms = 100;
    config
}

#[tokio::test]
async fn test_connect_times_out_when_broker_unavailable() {
    let client = MqttManager::new(&unreachable_config()).expect("client creation should succeed");

    let start = Instant::now();
    let result = client.connect(true).await;
    let elapsed = start.elapsed();

    assert!(
        matches!(result, Err(ClientError::ConnectTimeout(d)) if d == Duration::from_millis(500)),
        "expected ConnectTimeout, got {result:?}"
    );
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_secs(5), "connect must not hang");
    assert_ne!(client.state(), ConnectionState::Connected);

    // Refused attempts before the first CONNACK are not connection losses.
    assert!(!client
        .diagnostics()
        .snapshot()
        .iter()
        .any(|r| matches!(r.diagnostic, Diagnostic::ConnectionLost { .. })));

    client.disconnect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_requests_fail_fast_while_broker_unavailable() {
    let client = MqttManager::new(&unreachable_config()).unwrap();
    let _ = client.connect(true).await;

    let result = client
        .publish("sensors/x", "value", QoS::AtLeastOnce, false)
        .await;
    assert!(matches!(result, Err(ClientError::PublishFailed { .. })));

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_during_retries_is_prompt() {
    let client = MqttManager::new(&unreachable_config()).unwrap();
    let _ = client.connect(true).await;

    let start = Instant::now();
    client.disconnect().await.unwrap();
    assert!(
        start.elapsed() < Duration::from_secs(3),
        "disconnect should not wait for the retry loop"
    );
}
