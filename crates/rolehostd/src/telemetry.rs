//! Structured telemetry for the host process.
//!
//! The subscriber writes to stderr so the platform's log collector picks it
//! up. Lifecycle events use the `rolehostd::lifecycle`, `rolehostd::health`,
//! and `rolehostd::process` targets; engine output arrives under
//! `rolehostd::trace`.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::time::UtcTime;

use rolehost_config::{HostConfig, LogFormat};

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Handle returned once telemetry is installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured filter expression did not parse.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Another subscriber was already installed.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global subscriber on first use; later calls are no-ops.
pub fn initialise(config: &HostConfig) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install(config))
        .map(|_| TelemetryHandle)
}

fn install(config: &HostConfig) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(config.log_filter())
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;

    // Delivery, engine, and shutdown threads are named.
    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format() {
        LogFormat::Json => Box::new(
            fmt::Subscriber::builder()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_names(true)
                .with_writer(io::stderr)
                .with_ansi(false)
                .with_timer(UtcTime::rfc_3339())
                .json()
                .flatten_event(true)
                .finish(),
        ),
        LogFormat::Compact => Box::new(
            fmt::Subscriber::builder()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_names(true)
                .with_writer(io::stderr)
                .with_ansi(io::stderr().is_terminal())
                .with_timer(UtcTime::rfc_3339())
                .compact()
                .finish(),
        ),
    };
    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}
