//! Log output for the command-line tool
//!
//! Library code only emits `tracing` events. The binary installs a stderr
//! formatter filtered by `VMW_RPCI_LOG`, falling back to the configured
//! `log.filter` directive.

use std::io::IsTerminal;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a filter directive
pub const LOG_ENV: &str = "VMW_RPCI_LOG";

/// Logging setup errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter {directive:?}: {reason}")]
    InvalidFilter { directive: String, reason: String },

    #[error("failed to install log subscriber: {0}")]
    Install(String),
}

/// Build the filter: the environment wins over `configured`.
pub fn filter(configured: &str) -> Result<EnvFilter, LoggingError> {
    let directive = std::env::var(LOG_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| configured.to_string());

    EnvFilter::try_new(&directive).map_err(|e| LoggingError::InvalidFilter {
        directive,
        reason: e.to_string(),
    })
}

/// Enable log output to stderr.
pub fn enable(configured: &str) -> Result<(), LoggingError> {
    let filter = filter(configured)?;
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(true)
        .log_internal_errors(true)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .try_init()
        .map_err(|e| LoggingError::Install(e.to_string()))
}
