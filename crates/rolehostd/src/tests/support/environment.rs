//! Test doubles for environment preparation and settings.

use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};

use rolehost_config::settings::{SettingsSnapshot, SettingsSource};

use crate::environment::{EnvironmentError, EnvironmentInfo, EnvironmentPreparer};

use super::calls::{Call, CallLog};

/// Preparer that records the call and touches no process state.
pub struct RecordingPreparer {
    log: CallLog,
    scratch: PathBuf,
    failure: Mutex<Option<String>>,
}

impl RecordingPreparer {
    #[must_use]
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            scratch: std::env::temp_dir(),
            failure: Mutex::new(None),
        }
    }

    /// Makes every later preparation fail with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock().expect("preparer mutex poisoned") = Some(message.into());
    }
}

impl EnvironmentPreparer for RecordingPreparer {
    fn prepare(&self) -> Result<EnvironmentInfo, EnvironmentError> {
        self.log.record(Call::Prepare);
        if let Some(message) = self.failure.lock().expect("preparer mutex poisoned").clone() {
            return Err(EnvironmentError::ScratchResource {
                name: "LocalWorkerCache".to_owned(),
                path: self.scratch.clone(),
                source: io::Error::other(message),
            });
        }
        Ok(EnvironmentInfo::new(self.scratch.clone(), 512))
    }
}

/// Mutable settings source that records every read.
pub struct RecordingSettings {
    log: CallLog,
    values: RwLock<SettingsSnapshot>,
}

impl RecordingSettings {
    #[must_use]
    pub fn new(log: CallLog, values: SettingsSnapshot) -> Self {
        Self {
            log,
            values: RwLock::new(values),
        }
    }

    /// Publishes `values` as the current settings.
    pub fn replace(&self, values: SettingsSnapshot) {
        *self.values.write().expect("settings lock poisoned") = values;
    }

    /// Current settings.
    #[must_use]
    pub fn snapshot(&self) -> SettingsSnapshot {
        self.values.read().expect("settings lock poisoned").clone()
    }
}

impl SettingsSource for RecordingSettings {
    fn setting(&self, name: &str) -> Option<String> {
        self.log.record(Call::Read(name.to_owned()));
        self.values
            .read()
            .expect("settings lock poisoned")
            .setting(name)
    }
}
