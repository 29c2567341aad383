//! Lifecycle state machine for the hosted worker.
//!
//! The hosting platform drives four hooks: start, run, change, and stop.
//! [`LifecycleManager`] serialises them behind one lock so a change event can
//! never interleave with startup, shutdown, or another change. The run hook
//! waits on a separate latch and never takes that lock.
//!
//! ```text
//! Idle --start--> Starting --ok--> Running --change--> Reconfiguring --ok--> Running
//!                     |                |                     |
//!                     +--fail--> Stopped <------fail---------+
//!                                      ^
//! any --stop--> Stopping --------------+
//! ```

mod concurrency;
mod errors;
pub(crate) mod latch;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use rolehost_config::StartMode;
use rolehost_config::settings::SettingsSource;

use crate::containment::{Phase, contain};
use crate::environment::{EnvironmentInfo, EnvironmentPreparer};
use crate::events::{ChangeEvent, ChangeFeed, ChangeListener};
use crate::health::HealthReporter;
use crate::identity::{IdentityPolicy, WorkerIdentity};
use crate::resolver::{ConfigurationError, ConfigurationResolver, WorkerConfiguration};
use crate::service::{HandleState, ServiceHandle, ServiceSpec, WorkerServiceFactory};
use crate::sink::LogSink;

pub use concurrency::ConcurrencyPolicy;
pub use errors::LifecycleError;

use latch::{Release, RunLatch};

const LIFECYCLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lifecycle");

/// Lifecycle state of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerState {
    /// Constructed; the start hook has not run.
    Idle,
    /// The start hook is in progress.
    Starting,
    /// The worker is processing work.
    Running,
    /// The worker is being cycled onto new settings.
    Reconfiguring,
    /// The stop hook is in progress.
    Stopping,
    /// Terminal: stopped on request or after a failure.
    Stopped,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Reconfiguring => "reconfiguring",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        formatter.write_str(label)
    }
}

/// What a change event did to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// The worker was not running; the event was dropped.
    NotRunning,
    /// No recognised setting changed.
    Ignored,
    /// The worker now runs on the new configuration.
    Applied,
    /// The new settings failed validation; the worker kept its configuration.
    Rejected(ConfigurationError),
}

/// Collaborators the manager drives.
pub struct ManagerParts<F> {
    /// One-time process preparation.
    pub preparer: Arc<dyn EnvironmentPreparer>,
    /// Live platform settings the configuration is resolved from.
    pub settings: Arc<dyn SettingsSource>,
    /// Builds the worker service.
    pub factory: F,
    /// Change notifications, subscribed once the worker is constructed.
    pub feed: Arc<dyn ChangeFeed>,
    /// Structured lifecycle telemetry.
    pub reporter: Arc<dyn HealthReporter>,
    /// Host trace sink, also attached to the worker.
    pub sink: Arc<dyn LogSink>,
    /// How the worker identity is derived.
    pub identity: IdentityPolicy,
    /// How the concurrency bound is derived.
    pub concurrency: ConcurrencyPolicy,
    /// Whether the worker's start call blocks.
    pub start_mode: StartMode,
}

struct Inner<S> {
    state: ManagerState,
    environment: Option<EnvironmentInfo>,
    configuration: Option<Arc<WorkerConfiguration>>,
    handle: Option<ServiceHandle<S>>,
}

/// Owns the worker and keeps it bound to the current settings.
pub struct LifecycleManager<F>
where
    F: WorkerServiceFactory,
{
    preparer: Arc<dyn EnvironmentPreparer>,
    settings: Arc<dyn SettingsSource>,
    factory: F,
    feed: Arc<dyn ChangeFeed>,
    reporter: Arc<dyn HealthReporter>,
    sink: Arc<dyn LogSink>,
    identity: IdentityPolicy,
    concurrency: ConcurrencyPolicy,
    start_mode: StartMode,
    resolver: ConfigurationResolver,
    inner: Mutex<Inner<F::Service>>,
    latch: Arc<RunLatch>,
}

impl<F> LifecycleManager<F>
where
    F: WorkerServiceFactory + 'static,
{
    /// Builds an idle manager.
    #[must_use]
    pub fn new(parts: ManagerParts<F>) -> Self {
        let ManagerParts {
            preparer,
            settings,
            factory,
            feed,
            reporter,
            sink,
            identity,
            concurrency,
            start_mode,
        } = parts;
        Self {
            preparer,
            settings,
            factory,
            feed,
            reporter,
            sink,
            identity,
            concurrency,
            start_mode,
            resolver: ConfigurationResolver::new(),
            inner: Mutex::new(Inner {
                state: ManagerState::Idle,
                environment: None,
                configuration: None,
                handle: None,
            }),
            latch: Arc::new(RunLatch::default()),
        }
    }

    /// Start hook: prepares the environment, resolves the configuration,
    /// constructs and starts the worker.
    ///
    /// Returns `Ok(true)` once the worker is running. Any failure leaves the
    /// manager stopped and releases the run hook with the failure.
    pub fn on_start(self: &Arc<Self>) -> Result<bool, LifecycleError> {
        let result = self.start_sequence();
        contain(&*self.sink, Phase::Start, result)
    }

    /// Run hook: blocks until the worker is stopped.
    ///
    /// Returns an error when startup failed, when a reconfiguration left the
    /// worker stopped, or when a foreground worker returned on its own.
    pub fn run(&self) -> Result<(), LifecycleError> {
        let result = self.wait_for_release();
        contain(&*self.sink, Phase::Run, result)
    }

    /// Change hook: cycles the worker when a recognised setting changed.
    ///
    /// Events are applied one at a time. New settings that fail validation
    /// are rejected without touching the worker. A failure after the worker
    /// was stopped leaves it stopped and is returned.
    pub fn on_changed(&self, event: &ChangeEvent) -> Result<ChangeOutcome, LifecycleError> {
        let result = self.apply_change(event);
        contain(&*self.sink, Phase::Change, result)
    }

    /// Stop hook: stops the worker and releases the run hook.
    pub fn on_stop(&self) -> Result<(), LifecycleError> {
        let result = self.stop_sequence();
        contain(&*self.sink, Phase::Stop, result)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ManagerState {
        self.lock().state
    }

    /// State of the worker service handle.
    #[must_use]
    pub fn handle_state(&self) -> HandleState {
        self.lock()
            .handle
            .as_ref()
            .map_or(HandleState::Uninitialized, ServiceHandle::state)
    }

    /// Configuration the worker is bound to.
    #[must_use]
    pub fn configuration(&self) -> Option<Arc<WorkerConfiguration>> {
        self.lock().configuration.clone()
    }

    /// Identity the worker registered under.
    #[must_use]
    pub fn identity(&self) -> Option<WorkerIdentity> {
        self.lock()
            .handle
            .as_ref()
            .map(|handle| handle.identity().clone())
    }

    /// Concurrency bound the worker is currently bound with.
    #[must_use]
    pub fn max_concurrency(&self) -> Option<usize> {
        self.lock().handle.as_ref().map(ServiceHandle::max_concurrency)
    }

    /// Facts established by environment preparation.
    #[must_use]
    pub fn environment(&self) -> Option<EnvironmentInfo> {
        self.lock().environment.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner<F::Service>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_sequence(self: &Arc<Self>) -> Result<bool, LifecycleError> {
        let mut inner = self.lock();
        if inner.state != ManagerState::Idle {
            return Err(LifecycleError::InvalidState {
                operation: "start",
                state: inner.state,
            });
        }
        inner.state = ManagerState::Starting;
        self.reporter.start_requested();

        match self.bring_up(&mut inner) {
            Ok(()) => {
                inner.state = ManagerState::Running;
                Ok(true)
            }
            Err(error) => {
                inner.state = ManagerState::Stopped;
                self.reporter.start_failed(&error);
                self.latch.release(Release::Halted(error.to_string()));
                Err(error)
            }
        }
    }

    fn bring_up(self: &Arc<Self>, inner: &mut Inner<F::Service>) -> Result<(), LifecycleError> {
        let environment = self.preparer.prepare()?;
        self.reporter.environment_prepared(&environment);
        let working_directory = environment.scratch_dir().to_path_buf();
        inner.environment = Some(environment);

        let configuration = Arc::new(self.resolver.resolve(&*self.settings)?);
        self.reporter.configuration_resolved(&configuration);

        let identity = self.identity.derive()?;
        let max_concurrency = self.concurrency.bound(&configuration);
        let spec = ServiceSpec {
            configuration: Arc::clone(&configuration),
            identity,
            working_directory,
            max_concurrency,
        };
        let handle = ServiceHandle::construct(
            &self.factory,
            spec,
            self.start_mode,
            Arc::clone(&self.latch),
        )?;
        handle.attach_logger(Arc::clone(&self.sink));
        inner.configuration = Some(configuration);
        let handle = inner.handle.insert(handle);

        let listener: Arc<dyn ChangeListener> = Arc::clone(self) as Arc<dyn ChangeListener>;
        self.feed.subscribe(Arc::downgrade(&listener))?;

        handle.start()?;
        self.reporter
            .worker_started(handle.identity(), handle.max_concurrency());
        Ok(())
    }

    fn wait_for_release(&self) -> Result<(), LifecycleError> {
        let state = self.state();
        if state == ManagerState::Idle {
            return Err(LifecycleError::InvalidState {
                operation: "run",
                state,
            });
        }
        match self.latch.wait() {
            Release::Stopped => Ok(()),
            Release::Halted(reason) => Err(LifecycleError::Halted { reason }),
        }
    }

    fn apply_change(&self, event: &ChangeEvent) -> Result<ChangeOutcome, LifecycleError> {
        let mut inner = self.lock();
        if inner.state != ManagerState::Running {
            debug!(
                target: LIFECYCLE_TARGET,
                state = %inner.state,
                "change event dropped; worker not running"
            );
            return Ok(ChangeOutcome::NotRunning);
        }

        for change in event.topology() {
            info!(
                target: LIFECYCLE_TARGET,
                role = %change.role,
                old_instances = ?change.old_instances,
                new_instances = ?change.new_instances,
                "topology changed; no action required"
            );
        }

        let relevant: Vec<&str> = event
            .relevant_settings()
            .map(|change| change.name.as_str())
            .collect();
        if relevant.is_empty() {
            self.reporter.change_ignored(event);
            return Ok(ChangeOutcome::Ignored);
        }

        let configuration = match self.resolver.resolve(&*self.settings) {
            Ok(configuration) => Arc::new(configuration),
            Err(error) => {
                self.sink
                    .write_line(&format!("settings change rejected: {error}"));
                self.reporter.reconfiguration_rejected(&error);
                return Ok(ChangeOutcome::Rejected(error));
            }
        };

        let max_concurrency = self.concurrency.bound(&configuration);
        inner.state = ManagerState::Reconfiguring;
        self.reporter.reconfiguration_started(&relevant);
        match cycle(&mut inner, configuration, max_concurrency) {
            Ok(()) => {
                inner.state = ManagerState::Running;
                self.reporter.reconfiguration_applied();
                Ok(ChangeOutcome::Applied)
            }
            Err(error) => {
                inner.state = ManagerState::Stopped;
                self.reporter.reconfiguration_failed(&error);
                self.latch.release(Release::Halted(error.to_string()));
                Err(error)
            }
        }
    }

    fn stop_sequence(&self) -> Result<(), LifecycleError> {
        let mut inner = self.lock();
        inner.state = ManagerState::Stopping;
        self.reporter.stop_requested();

        let result = match inner.handle.as_mut() {
            Some(handle) => handle.stop().map_err(LifecycleError::from),
            None => Ok(()),
        };

        inner.state = ManagerState::Stopped;
        self.latch.release(Release::Stopped);
        self.reporter.stopped();
        result
    }
}

fn cycle<S>(
    inner: &mut Inner<S>,
    configuration: Arc<WorkerConfiguration>,
    max_concurrency: usize,
) -> Result<(), LifecycleError>
where
    S: crate::service::WorkerService,
{
    let Inner {
        handle,
        configuration: bound,
        ..
    } = inner;
    let Some(handle) = handle.as_mut() else {
        return Err(LifecycleError::InvalidState {
            operation: "reconfigure",
            state: ManagerState::Reconfiguring,
        });
    };

    handle.stop()?;
    handle.rebind(Arc::clone(&configuration), max_concurrency)?;
    *bound = Some(configuration);
    handle.start()?;
    Ok(())
}

impl<F> ChangeListener for LifecycleManager<F>
where
    F: WorkerServiceFactory + 'static,
{
    fn notify(&self, event: &ChangeEvent) {
        // Failures are already traced; a fatal one has released the run hook.
        let _ = self.on_changed(event);
    }
}
