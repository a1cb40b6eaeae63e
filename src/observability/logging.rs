//! Structured logging setup for binaries using the tracing crate
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the binary. Logs go to stderr so demo output on stdout stays readable.
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: Log level (ERROR, WARN, INFO, DEBUG, TRACE) - defaults to INFO
//! - `LOG_FORMAT`: Output format (json, pretty, compact) - defaults to compact
//! - `LOG_SPANS`: Include span open/close events (true/false) - defaults to false
//! - `RUST_LOG`: Override log filtering (follows env_logger format)
//!
//! ```bash
//! # Machine-readable logs
//! LOG_FORMAT=json LOG_LEVEL=INFO mqtt-inbox run
//!
//! # Verbose terminal output with connect spans
//! LOG_LEVEL=DEBUG LOG_SPANS=true mqtt-inbox run
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON lines for log aggregation
    Json,
    /// Multi-line output with colors
    Pretty,
    /// Single-line output with colors
    Compact,
}

impl LogFormat {
    /// Parse log format from string; unknown values fall back to compact
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Compact,
        }
    }
}

/// Parse a `LOG_LEVEL` value; unknown values fall back to INFO
pub fn parse_level(s: &str) -> Level {
    match s.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

fn build_filter(level: Level) -> EnvFilter {
    if let Ok(rust_log) = env::var("RUST_LOG") {
        return EnvFilter::new(rust_log);
    }
    // rumqttc logs every reconnect attempt at error level
    EnvFilter::new(format!("{level},rumqttc=warn"))
}

fn span_events(include_spans: bool) -> FmtSpan {
    if include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

/// Install the global subscriber.
///
/// Returns false when a subscriber was already installed, which happens when
/// tests or an embedding application set one up first.
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) -> bool {
    let subscriber = tracing_subscriber::registry().with(build_filter(level));

    let result = match format {
        LogFormat::Json => subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
        LogFormat::Pretty => subscriber
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(true)
                    .with_writer(std::io::stderr)
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
        LogFormat::Compact => subscriber
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(true)
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
    };

    result.is_ok()
}

/// Initialize logging from environment variables
pub fn init_default_logging() -> bool {
    let level = parse_level(&env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()));
    let format = LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_default());
    let include_spans = env::var("LOG_SPANS")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    init_logging(level, format, include_spans)
}

/// Create an MQTT operation span
#[macro_export]
macro_rules! mqtt_span {
    ($($field:tt)*) => {
        tracing::info_span!("mqtt_operation", $($field)*)
    };
}

pub use crate::mqtt_span;
