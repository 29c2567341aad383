//! Test double for [`HealthReporter`] that records structured events for assertions.

use std::sync::Mutex;

use crate::environment::EnvironmentInfo;
use crate::events::ChangeEvent;
use crate::health::HealthReporter;
use crate::identity::WorkerIdentity;
use crate::manager::LifecycleError;
use crate::resolver::{ConfigurationError, WorkerConfiguration};

/// Structured health events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HealthEvent {
    StartRequested,
    EnvironmentPrepared,
    ConfigurationResolved,
    WorkerStarted(String),
    StartFailed(String),
    ChangeIgnored,
    ReconfigurationStarted(Vec<String>),
    ReconfigurationApplied,
    ReconfigurationRejected(String),
    ReconfigurationFailed(String),
    StopRequested,
    Stopped,
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn start_requested(&self) {
        self.record(HealthEvent::StartRequested);
    }

    fn environment_prepared(&self, _info: &EnvironmentInfo) {
        self.record(HealthEvent::EnvironmentPrepared);
    }

    fn configuration_resolved(&self, _configuration: &WorkerConfiguration) {
        self.record(HealthEvent::ConfigurationResolved);
    }

    fn worker_started(&self, identity: &WorkerIdentity, _max_concurrency: usize) {
        self.record(HealthEvent::WorkerStarted(identity.to_string()));
    }

    fn start_failed(&self, error: &LifecycleError) {
        self.record(HealthEvent::StartFailed(error.to_string()));
    }

    fn change_ignored(&self, _event: &ChangeEvent) {
        self.record(HealthEvent::ChangeIgnored);
    }

    fn reconfiguration_started(&self, settings: &[&str]) {
        self.record(HealthEvent::ReconfigurationStarted(
            settings.iter().map(|name| (*name).to_owned()).collect(),
        ));
    }

    fn reconfiguration_applied(&self) {
        self.record(HealthEvent::ReconfigurationApplied);
    }

    fn reconfiguration_rejected(&self, error: &ConfigurationError) {
        self.record(HealthEvent::ReconfigurationRejected(error.setting().to_owned()));
    }

    fn reconfiguration_failed(&self, error: &LifecycleError) {
        self.record(HealthEvent::ReconfigurationFailed(error.to_string()));
    }

    fn stop_requested(&self) {
        self.record(HealthEvent::StopRequested);
    }

    fn stopped(&self) {
        self.record(HealthEvent::Stopped);
    }
}
