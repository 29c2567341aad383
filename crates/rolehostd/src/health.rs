//! Structured health reporting for lifecycle events.

use std::sync::Arc;

use crate::environment::EnvironmentInfo;
use crate::events::ChangeEvent;
use crate::identity::WorkerIdentity;
use crate::manager::LifecycleError;
use crate::resolver::{ConfigurationError, WorkerConfiguration};

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked when the start hook begins.
    fn start_requested(&self);

    /// Invoked after the process environment has been prepared.
    fn environment_prepared(&self, info: &EnvironmentInfo);

    /// Invoked after a configuration was resolved at startup.
    fn configuration_resolved(&self, configuration: &WorkerConfiguration);

    /// Invoked once the worker is running.
    fn worker_started(&self, identity: &WorkerIdentity, max_concurrency: usize);

    /// Invoked when startup fails.
    fn start_failed(&self, error: &LifecycleError);

    /// Invoked when a change event touches no recognised setting.
    fn change_ignored(&self, event: &ChangeEvent);

    /// Invoked before the worker is cycled onto a new configuration.
    fn reconfiguration_started(&self, settings: &[&str]);

    /// Invoked when the worker runs on the new configuration.
    fn reconfiguration_applied(&self);

    /// Invoked when new settings fail validation; the worker is untouched.
    fn reconfiguration_rejected(&self, error: &ConfigurationError);

    /// Invoked when cycling the worker fails; the worker is left stopped.
    fn reconfiguration_failed(&self, error: &LifecycleError);

    /// Invoked when the stop hook begins.
    fn stop_requested(&self);

    /// Invoked once the worker has been stopped.
    fn stopped(&self);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter + ?Sized,
{
    fn start_requested(&self) {
        (**self).start_requested();
    }

    fn environment_prepared(&self, info: &EnvironmentInfo) {
        (**self).environment_prepared(info);
    }

    fn configuration_resolved(&self, configuration: &WorkerConfiguration) {
        (**self).configuration_resolved(configuration);
    }

    fn worker_started(&self, identity: &WorkerIdentity, max_concurrency: usize) {
        (**self).worker_started(identity, max_concurrency);
    }

    fn start_failed(&self, error: &LifecycleError) {
        (**self).start_failed(error);
    }

    fn change_ignored(&self, event: &ChangeEvent) {
        (**self).change_ignored(event);
    }

    fn reconfiguration_started(&self, settings: &[&str]) {
        (**self).reconfiguration_started(settings);
    }

    fn reconfiguration_applied(&self) {
        (**self).reconfiguration_applied();
    }

    fn reconfiguration_rejected(&self, error: &ConfigurationError) {
        (**self).reconfiguration_rejected(error);
    }

    fn reconfiguration_failed(&self, error: &LifecycleError) {
        (**self).reconfiguration_failed(error);
    }

    fn stop_requested(&self) {
        (**self).stop_requested();
    }

    fn stopped(&self) {
        (**self).stopped();
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn start_requested(&self) {
        tracing::info!(
            target: "rolehostd::health",
            event = "start_requested",
            "starting worker host"
        );
    }

    fn environment_prepared(&self, info: &EnvironmentInfo) {
        tracing::info!(
            target: "rolehostd::health",
            event = "environment_prepared",
            scratch = %info.scratch_dir().display(),
            connection_limit = info.connection_limit(),
            "process environment ready"
        );
    }

    fn configuration_resolved(&self, configuration: &WorkerConfiguration) {
        tracing::info!(
            target: "rolehostd::health",
            event = "configuration_resolved",
            storage = ?configuration.storage(),
            messaging = ?configuration.messaging(),
            credentials = configuration.credentials().is_some(),
            "worker configuration resolved"
        );
    }

    fn worker_started(&self, identity: &WorkerIdentity, max_concurrency: usize) {
        tracing::info!(
            target: "rolehostd::health",
            event = "worker_started",
            identity = %identity,
            max_concurrency,
            "worker running"
        );
    }

    fn start_failed(&self, error: &LifecycleError) {
        tracing::error!(
            target: "rolehostd::health",
            event = "start_failed",
            error = %error,
            "worker host failed to start"
        );
    }

    fn change_ignored(&self, event: &ChangeEvent) {
        tracing::info!(
            target: "rolehostd::health",
            event = "change_ignored",
            settings = event.settings().len(),
            topology = event.topology().len(),
            "change does not affect the worker configuration"
        );
    }

    fn reconfiguration_started(&self, settings: &[&str]) {
        tracing::info!(
            target: "rolehostd::health",
            event = "reconfiguration_started",
            settings = ?settings,
            "cycling worker onto new settings"
        );
    }

    fn reconfiguration_applied(&self) {
        tracing::info!(
            target: "rolehostd::health",
            event = "reconfiguration_applied",
            "worker running on new settings"
        );
    }

    fn reconfiguration_rejected(&self, error: &ConfigurationError) {
        tracing::warn!(
            target: "rolehostd::health",
            event = "reconfiguration_rejected",
            setting = error.setting(),
            error = %error,
            "new settings rejected; worker keeps its current configuration"
        );
    }

    fn reconfiguration_failed(&self, error: &LifecycleError) {
        tracing::error!(
            target: "rolehostd::health",
            event = "reconfiguration_failed",
            error = %error,
            "reconfiguration failed; worker left stopped"
        );
    }

    fn stop_requested(&self) {
        tracing::info!(
            target: "rolehostd::health",
            event = "stop_requested",
            "stopping worker host"
        );
    }

    fn stopped(&self) {
        tracing::info!(
            target: "rolehostd::health",
            event = "stopped",
            "worker host stopped"
        );
    }
}
