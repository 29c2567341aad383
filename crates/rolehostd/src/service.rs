//! Worker service seam and the handle that drives it.
//!
//! The compute engine is reached only through [`WorkerService`]. The handle
//! owns the constructed service, records which state it is in, and in
//! foreground mode runs the blocking start call on a dedicated execution
//! thread so the lifecycle hooks stay responsive.

use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use rolehost_config::StartMode;

use crate::identity::WorkerIdentity;
use crate::manager::latch::{Release, RunLatch};
use crate::resolver::WorkerConfiguration;
use crate::sink::LogSink;

const SERVICE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::service");
const EXECUTION_POLL_INTERVAL: Duration = Duration::from_millis(10);
const RESTOP_INTERVAL: Duration = Duration::from_millis(250);

/// Operation invoked on the worker service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceOperation {
    /// Building the service.
    Construct,
    /// Starting job processing.
    Start,
    /// Stopping job processing.
    Stop,
    /// Replacing the bound configuration.
    Rebind,
}

impl fmt::Display for ServiceOperation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Construct => "construct",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Rebind => "rebind",
        };
        formatter.write_str(label)
    }
}

/// Failure reported by a worker service implementation.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ServiceError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl ServiceError {
    /// Builds an error without an underlying source.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Builds an error that wraps an underlying source.
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Human-readable message describing the failure.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A worker service operation failed.
#[derive(Debug, Error)]
#[error("worker service {operation} failed: {source}")]
pub struct ServiceTransitionError {
    /// Operation that failed.
    pub operation: ServiceOperation,
    /// Failure reported by the service.
    #[source]
    pub source: ServiceError,
}

impl ServiceTransitionError {
    fn new(operation: ServiceOperation, source: ServiceError) -> Self {
        Self { operation, source }
    }
}

/// Inputs the factory needs to construct a worker service.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    /// Resolved configuration the service is bound to.
    pub configuration: Arc<WorkerConfiguration>,
    /// Identity the service registers under.
    pub identity: WorkerIdentity,
    /// Scratch directory used as the working directory.
    pub working_directory: PathBuf,
    /// Upper bound on concurrently processed work items.
    pub max_concurrency: usize,
}

/// Compute engine controlled by the host.
///
/// Methods take `&self`: the host shares the service with the foreground
/// execution thread, so implementations synchronise internally. In
/// foreground mode `start` may block until `stop` is called.
pub trait WorkerService: Send + Sync + 'static {
    /// Begins processing work.
    fn start(&self) -> Result<(), ServiceError>;

    /// Stops processing work. Called at most once per start by the host,
    /// but repeated shutdown signals may reach a stopped service.
    fn stop(&self) -> Result<(), ServiceError>;

    /// Replaces the bound configuration and concurrency bound. Only called
    /// while stopped.
    fn rebind(
        &self,
        configuration: Arc<WorkerConfiguration>,
        max_concurrency: usize,
    ) -> Result<(), ServiceError>;

    /// Attaches the host trace sink for the engine's own log output.
    fn attach_logger(&self, sink: Arc<dyn LogSink>) {
        let _ = sink;
    }
}

/// Builds worker services.
pub trait WorkerServiceFactory: Send + Sync {
    /// Service type produced by the factory.
    type Service: WorkerService;

    /// Constructs a stopped service bound to `spec`.
    fn construct(&self, spec: ServiceSpec) -> Result<Self::Service, ServiceError>;
}

/// Observable state of the worker service handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleState {
    /// No service has been constructed.
    Uninitialized,
    /// Constructed and bound, not yet started.
    Constructed,
    /// Processing work.
    Running,
    /// Stopped after running, or after a failed transition.
    Stopped,
}

impl fmt::Display for HandleState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Uninitialized => "uninitialized",
            Self::Constructed => "constructed",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        formatter.write_str(label)
    }
}

struct Execution {
    thread: JoinHandle<()>,
    stop_requested: Arc<AtomicBool>,
}

/// Exclusive owner of the constructed worker service.
pub(crate) struct ServiceHandle<S> {
    service: Arc<S>,
    identity: WorkerIdentity,
    max_concurrency: usize,
    configuration: Arc<WorkerConfiguration>,
    state: HandleState,
    mode: StartMode,
    execution: Option<Execution>,
    latch: Arc<RunLatch>,
}

impl<S> ServiceHandle<S>
where
    S: WorkerService,
{
    /// Constructs the service and binds it to `spec`.
    pub(crate) fn construct<F>(
        factory: &F,
        spec: ServiceSpec,
        mode: StartMode,
        latch: Arc<RunLatch>,
    ) -> Result<Self, ServiceTransitionError>
    where
        F: WorkerServiceFactory<Service = S>,
    {
        let identity = spec.identity.clone();
        let max_concurrency = spec.max_concurrency;
        let configuration = Arc::clone(&spec.configuration);
        let service = factory
            .construct(spec)
            .map_err(|source| ServiceTransitionError::new(ServiceOperation::Construct, source))?;
        debug!(
            target: SERVICE_TARGET,
            identity = %identity,
            max_concurrency,
            "worker service constructed"
        );
        Ok(Self {
            service: Arc::new(service),
            identity,
            max_concurrency,
            configuration,
            state: HandleState::Constructed,
            mode,
            execution: None,
            latch,
        })
    }

    pub(crate) fn attach_logger(&self, sink: Arc<dyn LogSink>) {
        self.service.attach_logger(sink);
    }

    pub(crate) fn state(&self) -> HandleState {
        self.state
    }

    pub(crate) fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    pub(crate) fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub(crate) fn configuration(&self) -> &Arc<WorkerConfiguration> {
        &self.configuration
    }

    /// Starts the service. A failed start leaves the handle stopped.
    pub(crate) fn start(&mut self) -> Result<(), ServiceTransitionError> {
        let result = match self.mode {
            StartMode::Background => self.service.start(),
            StartMode::Foreground => self.spawn_execution(),
        };
        match result {
            Ok(()) => {
                self.state = HandleState::Running;
                Ok(())
            }
            Err(source) => {
                self.state = HandleState::Stopped;
                Err(ServiceTransitionError::new(ServiceOperation::Start, source))
            }
        }
    }

    /// Stops the service and joins the execution thread, if any.
    ///
    /// The call is forwarded even when the handle is already stopped;
    /// whether a repeated stop is harmless is the service's contract.
    pub(crate) fn stop(&mut self) -> Result<(), ServiceTransitionError> {
        let execution = self.execution.take();
        if let Some(execution) = &execution {
            execution.stop_requested.store(true, Ordering::SeqCst);
        }

        let result = self.service.stop();
        self.state = HandleState::Stopped;
        if let Err(source) = result {
            // The engine may still be blocked in start; leave its thread detached.
            return Err(ServiceTransitionError::new(ServiceOperation::Stop, source));
        }

        if let Some(execution) = execution {
            self.await_execution(execution);
        }
        Ok(())
    }

    fn await_execution(&self, execution: Execution) {
        let mut since_stop = Duration::ZERO;
        while !execution.thread.is_finished() {
            thread::sleep(EXECUTION_POLL_INTERVAL);
            since_stop += EXECUTION_POLL_INTERVAL;
            if since_stop >= RESTOP_INTERVAL {
                since_stop = Duration::ZERO;
                // The first stop can land before start began blocking.
                if let Err(error) = self.service.stop() {
                    debug!(
                        target: SERVICE_TARGET,
                        identity = %self.identity,
                        error = %error,
                        "repeated stop request failed"
                    );
                }
            }
        }
        if execution.thread.join().is_err() {
            warn!(
                target: SERVICE_TARGET,
                identity = %self.identity,
                "worker execution thread panicked"
            );
        }
    }

    /// Rebinds the stopped service to `configuration` and a recomputed
    /// concurrency bound.
    pub(crate) fn rebind(
        &mut self,
        configuration: Arc<WorkerConfiguration>,
        max_concurrency: usize,
    ) -> Result<(), ServiceTransitionError> {
        if self.state == HandleState::Running {
            return Err(ServiceTransitionError::new(
                ServiceOperation::Rebind,
                ServiceError::new("cannot rebind a running worker service"),
            ));
        }
        self.service
            .rebind(Arc::clone(&configuration), max_concurrency)
            .map_err(|source| ServiceTransitionError::new(ServiceOperation::Rebind, source))?;
        self.configuration = configuration;
        self.max_concurrency = max_concurrency;
        Ok(())
    }

    fn spawn_execution(&mut self) -> Result<(), ServiceError> {
        let service = Arc::clone(&self.service);
        let latch = Arc::clone(&self.latch);
        let stop_requested = Arc::new(AtomicBool::new(false));
        let observed = Arc::clone(&stop_requested);
        let identity = self.identity.clone();

        let thread = thread::Builder::new()
            .name("rolehost-worker".to_owned())
            .spawn(move || {
                let outcome = service.start();
                if observed.load(Ordering::SeqCst) {
                    if let Err(error) = outcome {
                        debug!(
                            target: SERVICE_TARGET,
                            identity = %identity,
                            error = %error,
                            "worker returned an error while stopping"
                        );
                    }
                    return;
                }
                let reason = match outcome {
                    Ok(()) => "worker service returned from start without being stopped".to_owned(),
                    Err(error) => format!("worker service failed while running: {error}"),
                };
                warn!(target: SERVICE_TARGET, identity = %identity, %reason, "worker halted");
                latch.release(Release::Halted(reason));
            })
            .map_err(|source| ServiceError::with_source("failed to spawn worker thread", source))?;

        self.execution = Some(Execution {
            thread,
            stop_requested,
        });
        Ok(())
    }
}
