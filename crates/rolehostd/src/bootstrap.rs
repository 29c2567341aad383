//! Assembly of the production collaborators.

use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use rolehost_config::settings::{EnvSettingsSource, SettingsDocument, SettingsError, SettingsSource};
use rolehost_config::HostConfig;

use crate::command_service::CommandWorkerFactory;
use crate::environment::{DirectoryLocalResources, SystemEnvironmentPreparer};
use crate::events::{ChangeFeed, NoChangeFeed};
use crate::feed::{LiveSettings, PollingChangeFeed};
use crate::health::HealthReporter;
use crate::identity::IdentityPolicy;
use crate::manager::{ConcurrencyPolicy, LifecycleManager, ManagerParts};
use crate::sink::HostTraceSink;

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the host configuration.
    fn load(&self) -> Result<HostConfig, Arc<OrthoError>>;
}

/// Loader that delegates to [`HostConfig::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<HostConfig, Arc<OrthoError>> {
        HostConfig::load()
    }
}

/// Loader that returns a fixed configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: HostConfig,
}

impl StaticConfigLoader {
    /// Wraps `config`.
    #[must_use]
    pub fn new(config: HostConfig) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<HostConfig, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced while assembling the host.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// No compute engine command is configured.
    #[error("no worker command is configured (set ROLEHOST_WORKER_COMMAND or --worker-command)")]
    MissingWorkerCommand,
    /// The initial settings document could not be read.
    #[error("failed to read the settings document: {source}")]
    Settings {
        /// Underlying settings error.
        #[source]
        source: SettingsError,
    },
}

/// Production collaborators wired together.
pub struct HostAssembly {
    /// Lifecycle manager driving the compute engine.
    pub manager: Arc<LifecycleManager<CommandWorkerFactory>>,
    /// Settings document feed, when a document is configured.
    pub feed: Option<Arc<PollingChangeFeed>>,
}

/// Wires the production collaborators described by `config`.
///
/// With a settings document the worker configuration is read from it and
/// kept current by polling; without one it is read from `WORKER_*`
/// environment variables and never changes.
pub fn assemble(
    config: &HostConfig,
    reporter: Arc<dyn HealthReporter>,
) -> Result<HostAssembly, BootstrapError> {
    let factory =
        CommandWorkerFactory::from_config(config).ok_or(BootstrapError::MissingWorkerCommand)?;

    let (settings, feed): (Arc<dyn SettingsSource>, Option<Arc<PollingChangeFeed>>) =
        match config.settings_path() {
            Some(path) => {
                let document = SettingsDocument::load(path.as_std_path())
                    .map_err(|source| BootstrapError::Settings { source })?;
                let live = Arc::new(LiveSettings::new(document));
                let feed = PollingChangeFeed::new(
                    path.as_std_path(),
                    config.settings_poll_interval(),
                    Arc::clone(&live),
                );
                (live, Some(Arc::new(feed)))
            }
            None => (Arc::new(EnvSettingsSource), None),
        };
    let change_feed: Arc<dyn ChangeFeed> = match &feed {
        Some(feed) => Arc::clone(feed) as Arc<dyn ChangeFeed>,
        None => Arc::new(NoChangeFeed),
    };

    let resources = DirectoryLocalResources::new(config.resource_root().into_std_path_buf());
    let manager = LifecycleManager::new(ManagerParts {
        preparer: Arc::new(SystemEnvironmentPreparer::new(config, resources)),
        settings,
        factory,
        feed: change_feed,
        reporter,
        sink: Arc::new(HostTraceSink::new()),
        identity: IdentityPolicy::from_config(config),
        concurrency: ConcurrencyPolicy::from_config(config),
        start_mode: config.start_mode(),
    });
    Ok(HostAssembly {
        manager: Arc::new(manager),
        feed,
    })
}
