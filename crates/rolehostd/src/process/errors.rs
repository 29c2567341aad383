//! Defines the error surface for host launch and supervision.

use std::io;
use std::sync::Arc;

use ortho_config::OrthoError;
use thiserror::Error;

use crate::bootstrap::BootstrapError;
use crate::manager::LifecycleError;
use crate::telemetry::TelemetryError;

use super::shutdown::ShutdownError;

/// Errors surfaced while launching or supervising the host process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Config {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Assembling the host failed.
    #[error("host bootstrap failed: {source}")]
    Bootstrap {
        /// Underlying bootstrap error.
        #[source]
        source: BootstrapError,
    },
    /// A lifecycle hook failed.
    #[error("{source}")]
    Lifecycle {
        /// Underlying lifecycle error.
        #[source]
        source: LifecycleError,
    },
    /// The start hook declined to start the worker.
    #[error("worker start was declined")]
    StartDeclined,
    /// Waiting for shutdown failed.
    #[error("failed to await shutdown signal: {source}")]
    Shutdown {
        /// Underlying shutdown error.
        #[source]
        source: ShutdownError,
    },
    /// The shutdown watcher thread could not be spawned.
    #[error("failed to spawn shutdown watcher: {source}")]
    Watcher {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The shutdown watcher thread panicked.
    #[error("shutdown watcher panicked")]
    WatcherPanicked,
}

impl From<Arc<OrthoError>> for LaunchError {
    fn from(source: Arc<OrthoError>) -> Self {
        Self::Config { source }
    }
}

impl From<TelemetryError> for LaunchError {
    fn from(source: TelemetryError) -> Self {
        Self::Telemetry { source }
    }
}

impl From<BootstrapError> for LaunchError {
    fn from(source: BootstrapError) -> Self {
        Self::Bootstrap { source }
    }
}

impl From<LifecycleError> for LaunchError {
    fn from(source: LifecycleError) -> Self {
        Self::Lifecycle { source }
    }
}

impl From<ShutdownError> for LaunchError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}
