//! Supervises host launch and the lifecycle hooks.
//!
//! The process plays the hosting platform's part: it calls the start hook,
//! blocks in the run hook, and turns a termination signal into the stop hook
//! from a dedicated watcher thread.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{info, warn};

use crate::StructuredHealthReporter;
use crate::bootstrap::{ConfigLoader, HostAssembly, SystemConfigLoader, assemble};
use crate::health::HealthReporter;
use crate::manager::LifecycleManager;
use crate::service::WorkerServiceFactory;
use crate::telemetry;

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};

/// Collaborators required to launch the host.
pub(crate) struct LaunchPlan<L, S> {
    pub(crate) loader: L,
    pub(crate) shutdown: S,
    pub(crate) reporter: Arc<dyn HealthReporter>,
}

/// Runs the host using the production collaborators.
pub fn run_host() -> Result<(), LaunchError> {
    let plan = LaunchPlan {
        loader: SystemConfigLoader,
        shutdown: SystemShutdownSignal::new(),
        reporter: Arc::new(StructuredHealthReporter::new()),
    };
    run_host_with(plan)
}

/// Runs the host with injected collaborators.
pub(crate) fn run_host_with<L, S>(plan: LaunchPlan<L, S>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    S: ShutdownSignal + 'static,
{
    let LaunchPlan {
        loader,
        shutdown,
        reporter,
    } = plan;

    let config = loader.load()?;
    telemetry::initialise(&config)?;
    info!(
        target: PROCESS_TARGET,
        identity_mode = %config.identity_mode(),
        start_mode = %config.start_mode(),
        settings = ?config.settings_path(),
        "starting role host"
    );

    let HostAssembly { manager, feed } = assemble(&config, reporter)?;
    let outcome = supervise(&manager, shutdown);
    if let Some(feed) = feed {
        feed.shutdown();
    }
    info!(
        target: PROCESS_TARGET,
        success = outcome.is_ok(),
        "role host exited"
    );
    outcome
}

/// Drives the hooks of `manager` until it stops.
///
/// The watcher is armed before the start hook so a signal during startup
/// is not lost; its stop request waits for startup to finish.
pub(crate) fn supervise<F, S>(
    manager: &Arc<LifecycleManager<F>>,
    shutdown: S,
) -> Result<(), LaunchError>
where
    F: WorkerServiceFactory + 'static,
    S: ShutdownSignal + 'static,
{
    let watcher = spawn_watcher(Arc::clone(manager), shutdown)?;

    if !manager.on_start()? {
        return Err(LaunchError::StartDeclined);
    }

    match manager.run() {
        Ok(()) => watcher.join().map_err(|_| LaunchError::WatcherPanicked)?,
        Err(error) => {
            // The watcher stays parked on the signal; the process is exiting.
            if let Err(stop_error) = manager.on_stop() {
                warn!(
                    target: PROCESS_TARGET,
                    error = %stop_error,
                    "failed to stop the halted worker"
                );
            }
            Err(error.into())
        }
    }
}

fn spawn_watcher<F, S>(
    manager: Arc<LifecycleManager<F>>,
    shutdown: S,
) -> Result<JoinHandle<Result<(), LaunchError>>, LaunchError>
where
    F: WorkerServiceFactory + 'static,
    S: ShutdownSignal + 'static,
{
    thread::Builder::new()
        .name("rolehost-shutdown".to_owned())
        .spawn(move || {
            let waited = shutdown.wait();
            info!(target: PROCESS_TARGET, "stopping worker");
            // Stop even when the signal listener failed so the run hook returns.
            let stopped = manager.on_stop();
            waited?;
            stopped?;
            Ok(())
        })
        .map_err(|source| LaunchError::Watcher { source })
}
