//! Shared configuration for the role host.
//!
//! [`HostConfig`] is the host's own configuration: where logs go, where the
//! settings document lives, how the scratch directory and worker identity
//! are derived, and which compute engine to launch. It is layered with
//! `ortho_config` (defaults, then the config file named by `--config-path` or
//! `ROLEHOST_CONFIG_PATH`, then `ROLEHOST_*` environment variables, then CLI
//! flags).
//!
//! The worker's connection settings are not part of this struct. They come
//! from the hosting platform's live settings (see [`settings`]) and may change
//! while the host runs.

mod defaults;
mod modes;
pub mod settings;

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_CONCURRENCY_MULTIPLIER, DEFAULT_CONNECTION_LIMIT, DEFAULT_LOG_FILTER,
    DEFAULT_SCRATCH_RESOURCE, DEFAULT_SETTINGS_POLL_INTERVAL_MS, DEFAULT_STOP_GRACE_PERIOD_SECS,
    default_log_filter, default_log_filter_string, default_log_format, default_resource_root,
    default_scratch_resource,
};
pub use modes::{IdentityMode, LogFormat, StartMode};
pub use settings::{
    EnvSettingsSource, SettingsDocument, SettingsError, SettingsSnapshot, SettingsSource,
};

/// Role host configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "ROLEHOST")]
pub struct HostConfig {
    /// `tracing` filter expression.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Log output format.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// JSON settings document watched for configuration changes.
    pub settings_path: Option<Utf8PathBuf>,
    /// Milliseconds between two reads of the settings document.
    #[ortho_config(default = DEFAULT_SETTINGS_POLL_INTERVAL_MS)]
    pub settings_poll_interval_ms: u64,
    /// Directory under which local resources are provisioned.
    pub resource_root: Option<Utf8PathBuf>,
    /// Local resource used as the scratch directory.
    #[ortho_config(default = default_scratch_resource())]
    pub scratch_resource: String,
    /// Process-wide outbound connection bound.
    #[ortho_config(default = DEFAULT_CONNECTION_LIMIT)]
    pub connection_limit: u32,
    /// Work items per available processing unit.
    #[ortho_config(default = DEFAULT_CONCURRENCY_MULTIPLIER)]
    pub concurrency_multiplier: u32,
    /// Explicit concurrency bound overriding the multiplier policy.
    pub max_concurrency: Option<u32>,
    /// Strategy for deriving the worker identity.
    #[ortho_config(default = IdentityMode::Machine)]
    pub identity_mode: IdentityMode,
    /// Identity used in [`IdentityMode::Fixed`].
    pub worker_id: Option<String>,
    /// Role instance identifier used in [`IdentityMode::Instance`].
    pub instance_id: Option<String>,
    /// Optional prefix prepended to the derived identity.
    pub identity_prefix: Option<String>,
    /// Whether the worker service starts in the background or blocks.
    #[ortho_config(default = StartMode::Background)]
    pub start_mode: StartMode,
    /// Executable of the compute engine.
    pub worker_command: Option<Utf8PathBuf>,
    /// Arguments passed to the compute engine.
    #[serde(default)]
    pub worker_args: Vec<String>,
    /// Seconds the engine gets to exit after a stop request.
    #[ortho_config(default = DEFAULT_STOP_GRACE_PERIOD_SECS)]
    pub stop_grace_period_secs: u64,
    /// File, relative to the working directory, receiving engine trace lines.
    pub log_file: Option<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            settings_path: None,
            settings_poll_interval_ms: DEFAULT_SETTINGS_POLL_INTERVAL_MS,
            resource_root: None,
            scratch_resource: default_scratch_resource(),
            connection_limit: DEFAULT_CONNECTION_LIMIT,
            concurrency_multiplier: DEFAULT_CONCURRENCY_MULTIPLIER,
            max_concurrency: None,
            identity_mode: IdentityMode::default(),
            worker_id: None,
            instance_id: None,
            identity_prefix: None,
            start_mode: StartMode::default(),
            worker_command: None,
            worker_args: Vec::new(),
            stop_grace_period_secs: DEFAULT_STOP_GRACE_PERIOD_SECS,
            log_file: None,
        }
    }
}

impl HostConfig {
    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Settings document path, when configured.
    #[must_use]
    pub fn settings_path(&self) -> Option<&Utf8Path> {
        self.settings_path.as_deref()
    }

    /// Settings polling period. Never shorter than one millisecond.
    #[must_use]
    pub fn settings_poll_interval(&self) -> Duration {
        Duration::from_millis(self.settings_poll_interval_ms.max(1))
    }

    /// Local resource root, falling back to [`default_resource_root`].
    #[must_use]
    pub fn resource_root(&self) -> Utf8PathBuf {
        self.resource_root
            .clone()
            .unwrap_or_else(default_resource_root)
    }

    /// Name of the scratch local resource.
    #[must_use]
    pub fn scratch_resource(&self) -> &str {
        self.scratch_resource.as_str()
    }

    /// Process-wide outbound connection bound.
    #[must_use]
    pub fn connection_limit(&self) -> u32 {
        self.connection_limit
    }

    /// Work items per processing unit.
    #[must_use]
    pub fn concurrency_multiplier(&self) -> u32 {
        self.concurrency_multiplier
    }

    /// Explicit concurrency override.
    #[must_use]
    pub fn max_concurrency(&self) -> Option<u32> {
        self.max_concurrency
    }

    /// Identity derivation strategy.
    #[must_use]
    pub fn identity_mode(&self) -> IdentityMode {
        self.identity_mode
    }

    /// Worker service start mode.
    #[must_use]
    pub fn start_mode(&self) -> StartMode {
        self.start_mode
    }

    /// Compute engine executable, when configured.
    #[must_use]
    pub fn worker_command(&self) -> Option<&Utf8Path> {
        self.worker_command.as_deref()
    }

    /// Compute engine arguments.
    #[must_use]
    pub fn worker_args(&self) -> &[String] {
        self.worker_args.as_slice()
    }

    /// Grace period granted to the engine on stop.
    #[must_use]
    pub fn stop_grace_period(&self) -> Duration {
        Duration::from_secs(self.stop_grace_period_secs)
    }

    /// Engine log file name, when configured.
    #[must_use]
    pub fn log_file(&self) -> Option<&str> {
        self.log_file.as_deref()
    }
}
