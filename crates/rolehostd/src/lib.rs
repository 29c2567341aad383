//! Lifecycle host for a long-running distributed compute worker.
//!
//! The hosting platform owns start, stop, and change signals; the compute
//! engine owns job execution. This crate sits between the two. It prepares
//! the process environment once, resolves the worker configuration from the
//! platform's live settings, constructs and starts the engine, and keeps it
//! bound to the current settings: when a connection string changes, the
//! engine is stopped, rebound, and started again.
//!
//! [`LifecycleManager`] owns that state machine. Every hook is serialised
//! behind a single lock, and every failure is written to the trace sink
//! before being returned to the caller unchanged. Reconfiguration that cannot
//! resolve a valid configuration is rejected and leaves the running worker
//! untouched; reconfiguration that fails after the engine was stopped leaves
//! the worker stopped.
//!
//! [`run_host`] wires the production collaborators: configuration through
//! [`rolehost_config::HostConfig`], structured telemetry, a polling change
//! feed over the settings document, and a child-process compute engine.

mod bootstrap;
mod command_service;
mod containment;
mod environment;
mod events;
mod feed;
mod health;
mod identity;
mod manager;
mod process;
mod resolver;
mod service;
mod sink;
mod telemetry;

pub use bootstrap::{
    BootstrapError, ConfigLoader, HostAssembly, StaticConfigLoader, SystemConfigLoader, assemble,
};
pub use command_service::{CommandWorkerFactory, CommandWorkerService};
pub use containment::Phase;
pub use environment::{
    DirectoryLocalResources, EnvironmentError, EnvironmentInfo, EnvironmentPreparer,
    LocalResourceProvider, SystemEnvironmentPreparer, TEMP_VARIABLES, connection_limit,
};
pub use events::{
    ChangeEvent, ChangeFeed, ChangeListener, FeedError, NoChangeFeed, SettingChange,
    TopologyChange,
};
pub use feed::{LiveSettings, PollingChangeFeed};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use identity::{IdentityPolicy, WorkerIdentity};
pub use manager::{
    ChangeOutcome, ConcurrencyPolicy, LifecycleError, LifecycleManager, ManagerParts,
    ManagerState,
};
pub use process::{LaunchError, ShutdownError, ShutdownSignal, SystemShutdownSignal, run_host};
pub use resolver::{
    ConfigurationError, ConfigurationResolver, ConnectionString, Credentials, EndpointKind,
    WorkerConfiguration,
};
pub use service::{
    HandleState, ServiceError, ServiceOperation, ServiceSpec, ServiceTransitionError,
    WorkerService, WorkerServiceFactory,
};
pub use sink::{HostTraceSink, LogSink, format_trace_line};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
