use std::env;

use camino::Utf8PathBuf;

use crate::modes::LogFormat;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Outbound connection bound sized for a worker that keeps many storage and
/// messaging connections open at once.
pub const DEFAULT_CONNECTION_LIMIT: u32 = 512;

/// Concurrent work items per available processing unit.
pub const DEFAULT_CONCURRENCY_MULTIPLIER: u32 = 8;

/// Local resource that backs the worker's filesystem cache.
pub const DEFAULT_SCRATCH_RESOURCE: &str = "LocalWorkerCache";

/// Period between two reads of the settings document.
pub const DEFAULT_SETTINGS_POLL_INTERVAL_MS: u64 = 2_000;

/// Time the worker service gets to wind down after a stop request.
pub const DEFAULT_STOP_GRACE_PERIOD_SECS: u64 = 30;

/// Default log filter expression.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Owned scratch resource name.
pub fn default_scratch_resource() -> String {
    DEFAULT_SCRATCH_RESOURCE.to_owned()
}

/// Directory under which host-provisioned local resources are created.
///
/// Prefers the platform's local data directory and falls back to the system
/// temporary directory when none is available.
pub fn default_resource_root() -> Utf8PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(env::temp_dir);
    let mut root = Utf8PathBuf::from_path_buf(base).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"));
    root.push("rolehost");
    root.push("resources");
    root
}
