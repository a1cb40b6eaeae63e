//! Logging and client diagnostics
//!
//! `logging` installs the `tracing` subscriber for binaries; `diagnostics`
//! carries typed client events to an injected observer and a bounded log.

pub mod diagnostics;
pub mod logging;

pub use diagnostics::{
    ClientObserver, Diagnostic, DiagnosticLog, DiagnosticRecord, Reporter, TracingObserver,
};
pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};

pub use crate::mqtt_span;
