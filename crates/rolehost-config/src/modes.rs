//! Small string-backed enums that select host behaviour.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Strategy used to derive the worker identity at startup.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum IdentityMode {
    /// Use the host name of the machine running the role instance.
    #[default]
    Machine,
    /// Use the trailing segment of the role instance identifier.
    Instance,
    /// Generate a random token; intended for local compute emulators where
    /// several instances share one machine name.
    Emulated,
    /// Use the configured `worker_id` verbatim.
    Fixed,
}

/// How the wrapped worker service is started.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum StartMode {
    /// `start` returns once the service has spawned its own execution.
    #[default]
    Background,
    /// `start` blocks until the service is told to stop; the host runs it on
    /// a dedicated execution thread.
    Foreground,
}

/// Line format of the host's own trace output.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event, for log shippers on the role instance.
    #[default]
    Json,
    /// Single-line human-readable output for interactive sessions.
    Compact,
}
