//! Named settings published by the hosting platform.
//!
//! The host exposes a flat key/value snapshot. Only a handful of names matter
//! to the worker; everything else is ignored. [`SettingsDocument`] is the
//! on-disk form the change feed watches: a JSON object holding the settings
//! map and the role topology (role name to instance count).

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Connection string of the storage backend. Required.
pub const STORAGE_CONNECTION_SETTING: &str = "Worker.StorageConnectionString";

/// Connection string of the messaging backend. Required.
pub const MESSAGING_CONNECTION_SETTING: &str = "Worker.MessagingConnectionString";

/// Access key for backends that take credentials out of band.
pub const ACCESS_KEY_SETTING: &str = "Worker.AccessKey";

/// Secret key paired with [`ACCESS_KEY_SETTING`].
pub const SECRET_KEY_SETTING: &str = "Worker.SecretKey";

/// Optional explicit bound on concurrently executing work items.
pub const MAX_CONCURRENCY_SETTING: &str = "Worker.MaxConcurrentWorkItems";

/// Every setting name that feeds the worker configuration.
pub const RECOGNISED_SETTINGS: [&str; 5] = [
    STORAGE_CONNECTION_SETTING,
    MESSAGING_CONNECTION_SETTING,
    ACCESS_KEY_SETTING,
    SECRET_KEY_SETTING,
    MAX_CONCURRENCY_SETTING,
];

/// Returns `true` when the name feeds the worker configuration.
#[must_use]
pub fn is_recognised_setting(name: &str) -> bool {
    RECOGNISED_SETTINGS.contains(&name)
}

/// Read access to the host's live settings.
pub trait SettingsSource: Send + Sync {
    /// Returns the current value of the named setting, if published.
    fn setting(&self, name: &str) -> Option<String>;
}

impl<T> SettingsSource for Arc<T>
where
    T: SettingsSource + ?Sized,
{
    fn setting(&self, name: &str) -> Option<String> {
        (**self).setting(name)
    }
}

/// Immutable snapshot of named settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsSnapshot {
    values: BTreeMap<String, String>,
}

impl SettingsSnapshot {
    /// Builds a snapshot from name/value pairs.
    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    /// Returns a copy with `name` set to `value`.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Returns a copy with `name` removed.
    #[must_use]
    pub fn without(mut self, name: &str) -> Self {
        self.values.remove(name);
        self
    }

    /// Looks up a value by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Iterates over all name/value pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Number of published settings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` when no setting is published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl SettingsSource for SettingsSnapshot {
    fn setting(&self, name: &str) -> Option<String> {
        self.get(name).map(str::to_owned)
    }
}

/// Settings and topology as published in the host's settings document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsDocument {
    /// Named settings.
    #[serde(default)]
    pub settings: SettingsSnapshot,
    /// Instance count per role.
    #[serde(default)]
    pub topology: BTreeMap<String, u32>,
}

impl SettingsDocument {
    /// Reads and parses the document at `path`.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl SettingsSource for SettingsDocument {
    fn setting(&self, name: &str) -> Option<String> {
        self.settings.setting(name)
    }
}

/// Reads settings from environment variables.
///
/// `Worker.StorageConnectionString` is looked up as
/// `WORKER_STORAGE_CONNECTION_STRING`; see [`setting_env_key`].
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSettingsSource;

impl SettingsSource for EnvSettingsSource {
    fn setting(&self, name: &str) -> Option<String> {
        env::var(setting_env_key(name)).ok()
    }
}

/// Maps a dotted, camel-cased setting name to an environment variable name.
#[must_use]
pub fn setting_env_key(name: &str) -> String {
    let mut key = String::with_capacity(name.len() + 8);
    let mut previous_lower = false;
    for character in name.chars() {
        if character == '.' || character == '-' {
            key.push('_');
            previous_lower = false;
            continue;
        }
        if character.is_ascii_uppercase() && previous_lower {
            key.push('_');
        }
        previous_lower = character.is_ascii_lowercase() || character.is_ascii_digit();
        key.push(character.to_ascii_uppercase());
    }
    key
}

/// Errors raised while reading the settings document.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The document could not be read.
    #[error("failed to read settings document '{path}': {source}")]
    Read {
        /// Document path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The document was not valid JSON of the expected shape.
    #[error("failed to parse settings document '{path}': {source}")]
    Parse {
        /// Document path.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}
