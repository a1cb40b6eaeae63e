//! Configuration for the MQTT inbox client
//!
//! A TOML file with `[broker]`, `[session]` and `[store]` sections. Every
//! field has a default, so an empty file (or `ClientConfig::default()`)
//! targets `localhost:1883`.

use crate::protocol::{qos_from_level, validate_topic_filter};
use crate::store::CapacityPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default MQTT port
pub const DEFAULT_PORT: u16 = 1883;

/// Prefix used for generated client identifiers
pub const CLIENT_ID_PREFIX: &str = "mqtt-client-";

/// Main client configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClientConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub store: StoreSection,
}

/// Broker section
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Client identifier (must match [a-zA-Z0-9._-]+); generated when absent
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
}

impl fmt::Debug for BrokerSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerSection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("username_env", &self.username_env)
            .field("password_env", &self.password_env)
            .finish()
    }
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: None,
            username: None,
            password: None,
            username_env: None,
            password_env: None,
        }
    }
}

/// Session section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// How long `connect` waits for CONNACK
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Capacity of the transport -> dispatcher event channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
    #[serde(default = "default_request_channel_capacity")]
    pub request_channel_capacity: usize,
    /// Delays for the first reconnect attempts after a network error
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: Vec<u64>,
    /// Delay once the backoff list is exhausted
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Filters subscribed once each new session is connected
    #[serde(default)]
    pub auto_subscribe: Vec<AutoSubscription>,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            clean_session: default_clean_session(),
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
            event_channel_capacity: default_event_channel_capacity(),
            request_channel_capacity: default_request_channel_capacity(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            auto_subscribe: Vec::new(),
        }
    }
}

/// One automatic subscription
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoSubscription {
    pub topic: String,
    #[serde(default)]
    pub qos: u8,
}

/// Store section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreSection {
    /// Oldest messages are evicted past this many per topic; unbounded when absent
    pub max_messages_per_topic: Option<usize>,
    #[serde(default = "default_diagnostics_capacity")]
    pub diagnostics_capacity: usize,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            max_messages_per_topic: None,
            diagnostics_capacity: default_diagnostics_capacity(),
        }
    }
}

impl StoreSection {
    pub fn capacity_policy(&self) -> CapacityPolicy {
        CapacityPolicy::from_limit(self.max_messages_per_topic)
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_clean_session() -> bool {
    true
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_event_channel_capacity() -> usize {
    64
}

fn default_request_channel_capacity() -> usize {
    10
}

fn default_reconnect_backoff_ms() -> Vec<u64> {
    vec![250, 500, 1000]
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_diagnostics_capacity() -> usize {
    crate::observability::diagnostics::DEFAULT_DIAGNOSTICS_CAPACITY
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid client ID format: {0}")]
    InvalidClientId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Username/password pair sent in CONNECT
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Resolved parameters for one broker connection
///
/// Built once before a connection attempt and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<Credentials>,
    pub keep_alive: Duration,
}

impl ConnectionConfig {
    /// Connection to `host:port` with a generated client id
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: generate_client_id(),
            credentials: None,
            keep_alive: Duration::from_secs(default_keep_alive_secs()),
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// `host:port`, used in logs and diagnostics
    pub fn broker_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Generate a `mqtt-client-<12 hex>` identifier
pub fn generate_client_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{CLIENT_ID_PREFIX}{}", &id[..12])
}

impl ClientConfig {
    /// Load configuration from TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Copy safe to print: an inline password is replaced with `***`
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.broker.password.is_some() {
            config.broker.password = Some("***".to_string());
        }
        config
    }

    /// Check value ranges and formats
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.host must not be empty".to_string(),
            ));
        }
        if self.broker.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.port must be non-zero".to_string(),
            ));
        }
        if let Some(client_id) = &self.broker.client_id {
            validate_client_id(client_id)?;
        }
        if self.session.keep_alive_secs < 5 {
            return Err(ConfigError::InvalidConfig(format!(
                "session.keep_alive_secs must be at least 5, got {}",
                self.session.keep_alive_secs
            )));
        }
        if self.session.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "session.connect_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.session.event_channel_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "session.event_channel_capacity must be greater than 0".to_string(),
            ));
        }
        for subscription in &self.session.auto_subscribe {
            validate_topic_filter(&subscription.topic).map_err(|e| {
                ConfigError::InvalidConfig(format!("session.auto_subscribe: {e}"))
            })?;
            if qos_from_level(subscription.qos).is_none() {
                return Err(ConfigError::InvalidConfig(format!(
                    "session.auto_subscribe: QoS {} for '{}' is not 0, 1 or 2",
                    subscription.qos, subscription.topic
                )));
            }
        }
        if self.store.max_messages_per_topic == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "store.max_messages_per_topic must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the immutable connection parameters
    ///
    /// Explicit credentials win over the `*_env` variables. A username
    /// without a password sends an empty password.
    pub fn connection_config(&self) -> Result<ConnectionConfig, ConfigError> {
        let mut connection = ConnectionConfig::new(&self.broker.host, self.broker.port)
            .with_keep_alive(Duration::from_secs(self.session.keep_alive_secs));

        if let Some(client_id) = &self.broker.client_id {
            validate_client_id(client_id)?;
            connection = connection.with_client_id(client_id);
        }

        let username = match &self.broker.username {
            Some(username) => Some(username.clone()),
            None => get_env_var_optional(self.broker.username_env.as_deref())?,
        };
        if let Some(username) = username {
            let password = match &self.broker.password {
                Some(password) => Some(password.clone()),
                None => get_env_var_optional(self.broker.password_env.as_deref())?,
            };
            connection =
                connection.with_credentials(Credentials::new(username, password.unwrap_or_default()));
        }

        Ok(connection)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.session.connect_timeout_ms)
    }
}

/// Read an env var named by the config; a named but missing variable is an error
fn get_env_var_optional(env_var_name: Option<&str>) -> Result<Option<String>, ConfigError> {
    match env_var_name {
        Some(name) => std::env::var(name)
            .map(Some)
            .map_err(|_| ConfigError::EnvVarNotFound(name.to_string())),
        None => Ok(None),
    }
}

/// Validate client identifier format
fn validate_client_id(client_id: &str) -> Result<(), ConfigError> {
    let valid_chars = client_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if client_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidClientId(format!(
            "Client ID '{client_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}
