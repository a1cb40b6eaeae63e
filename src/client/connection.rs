//! Connection lifecycle state machine
//!
//! The state lives in a `tokio::sync::watch` channel. The dispatcher writes
//! connect results and connection loss, `disconnect` writes `Disconnected`,
//! and `connect` waits on a receiver for the first settled state. The
//! channel gives waiters an acquire/release view of every transition.

use crate::error::ClientError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Reasons a broker refuses a connection (CONNACK return codes 1-5)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectFailure {
    #[error("Incorrect protocol version")]
    ProtocolVersionMismatch,
    #[error("Invalid client identifier")]
    InvalidClientId,
    #[error("Server unavailable")]
    ServerUnavailable,
    #[error("Bad username or password")]
    BadCredentials,
    #[error("Not authorized")]
    NotAuthorized,
    #[error("Unknown error (return code {0})")]
    Unknown(u8),
}

impl ConnectFailure {
    /// The broker return code this failure was translated from
    pub fn code(&self) -> u8 {
        match self {
            ConnectFailure::ProtocolVersionMismatch => 1,
            ConnectFailure::InvalidClientId => 2,
            ConnectFailure::ServerUnavailable => 3,
            ConnectFailure::BadCredentials => 4,
            ConnectFailure::NotAuthorized => 5,
            ConnectFailure::Unknown(code) => *code,
        }
    }
}

/// Translate a CONNACK return code into a connection outcome
pub fn translate_return_code(code: u8) -> Result<(), ConnectFailure> {
    match code {
        0 => Ok(()),
        1 => Err(ConnectFailure::ProtocolVersionMismatch),
        2 => Err(ConnectFailure::InvalidClientId),
        3 => Err(ConnectFailure::ServerUnavailable),
        4 => Err(ConnectFailure::BadCredentials),
        5 => Err(ConnectFailure::NotAuthorized),
        other => Err(ConnectFailure::Unknown(other)),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed(ConnectFailure),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether a pending connect attempt has an answer
    pub fn is_settled(&self) -> bool {
        !matches!(self, ConnectionState::Connecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Single owner of the connection state
#[derive(Debug)]
pub struct ConnectionManager {
    state_tx: watch::Sender<ConnectionState>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self { state_tx }
    }

    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state_tx.borrow().is_connected()
    }

    /// Receiver that observes every future transition
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Enter `Connecting` and return a receiver for the outcome.
    ///
    /// The receiver is created after the transition, so it can only settle
    /// on a result belonging to this attempt.
    pub fn begin_connect(&self) -> watch::Receiver<ConnectionState> {
        let previous = self.state_tx.send_replace(ConnectionState::Connecting);
        debug!(from = %previous, "Connection attempt started");
        self.state_tx.subscribe()
    }

    /// Apply a CONNACK return code delivered by the transport.
    ///
    /// Results arriving while `Disconnected` belong to a torn-down session;
    /// they are ignored and `None` is returned.
    pub fn apply_connect_result(&self, code: u8) -> Option<Result<(), ConnectFailure>> {
        let outcome = translate_return_code(code);
        let applied = self.state_tx.send_if_modified(|state| {
            if matches!(state, ConnectionState::Disconnected) {
                return false;
            }
            *state = match &outcome {
                Ok(()) => ConnectionState::Connected,
                Err(reason) => ConnectionState::Failed(reason.clone()),
            };
            true
        });
        if !applied {
            debug!(code, "Ignoring connect result after disconnect");
            return None;
        }
        Some(outcome)
    }

    /// The transport lost an established connection and is retrying
    pub fn connection_lost(&self) -> bool {
        let changed = self.state_tx.send_if_modified(|state| {
            if state.is_connected() {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if changed {
            warn!("Connection lost, waiting for transport to reconnect");
        }
        changed
    }

    /// Unconditionally return to `Disconnected`
    pub fn mark_disconnected(&self) {
        let previous = self.state_tx.send_replace(ConnectionState::Disconnected);
        if previous != ConnectionState::Disconnected {
            info!(from = %previous, "Connection state reset to disconnected");
        }
    }

    /// Wait until the attempt behind `state_rx` settles or `timeout` elapses
    pub async fn wait_for_outcome(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        let settled = tokio::time::timeout(timeout, async {
            state_rx
                .wait_for(ConnectionState::is_settled)
                .await
                .map(|state| state.clone())
        })
        .await;

        match settled {
            Err(_) => Err(ClientError::ConnectTimeout(timeout)),
            Ok(Err(_)) => Err(ClientError::ConnectAborted),
            Ok(Ok(ConnectionState::Connected)) => Ok(()),
            Ok(Ok(ConnectionState::Failed(reason))) => Err(ClientError::ConnectRejected(reason)),
            Ok(Ok(_)) => Err(ClientError::ConnectAborted),
        }
    }
}
