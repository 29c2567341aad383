//! One-time process environment preparation.
//!
//! Before any worker configuration exists the host raises the outbound
//! connection ceiling, locates the scratch directory granted by the hosting
//! platform, and points every temporary-directory variable at it so that
//! libraries writing temporary files land on the scratch volume.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::{info, warn};

use rolehost_config::{HostConfig, IdentityMode};

const ENVIRONMENT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::environment");

/// Variables rebound to the scratch directory.
#[cfg(unix)]
pub const TEMP_VARIABLES: &[&str] = &["TMP", "TEMP", "TMPDIR"];
/// Variables rebound to the scratch directory.
#[cfg(not(unix))]
pub const TEMP_VARIABLES: &[&str] = &["TMP", "TEMP"];

static CONNECTION_LIMIT: OnceCell<u32> = OnceCell::new();

/// Returns the process-wide connection limit once it has been applied.
#[must_use]
pub fn connection_limit() -> Option<u32> {
    CONNECTION_LIMIT.get().copied()
}

/// Errors raised while preparing the process environment or deriving
/// environment-sourced identity.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    /// The configured connection limit was zero.
    #[error("connection limit must be greater than zero")]
    InvalidConnectionLimit,
    /// Raising the descriptor limit failed.
    #[error("failed to raise the connection limit to {limit}: {source}")]
    ConnectionLimit {
        /// Requested limit.
        limit: u32,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The local resource name cannot be mapped to a directory.
    #[error("local resource name '{name}' is not a plain directory name")]
    InvalidResourceName {
        /// Offending resource name.
        name: String,
    },
    /// The local resource directory could not be provisioned.
    #[error("failed to provision local resource '{name}' at '{path}': {source}")]
    ScratchResource {
        /// Resource name.
        name: String,
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The worker identity could not be derived.
    #[error("cannot derive {mode} worker identity: {reason}")]
    Identity {
        /// Identity mode that was requested.
        mode: IdentityMode,
        /// Why derivation failed.
        reason: String,
    },
}

/// Facts established by environment preparation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentInfo {
    scratch_dir: PathBuf,
    connection_limit: u32,
}

impl EnvironmentInfo {
    /// Builds environment facts from their parts.
    #[must_use]
    pub fn new(scratch_dir: impl Into<PathBuf>, connection_limit: u32) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            connection_limit,
        }
    }

    /// Scratch directory bound to the temporary-directory variables.
    #[must_use]
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Effective outbound connection limit.
    #[must_use]
    pub fn connection_limit(&self) -> u32 {
        self.connection_limit
    }
}

/// Performs process-global preparation before the worker is configured.
pub trait EnvironmentPreparer: Send + Sync {
    /// Applies the process-wide settings.
    ///
    /// Implementations must be idempotent: repeated calls return the facts
    /// established by the first successful call without reapplying them.
    fn prepare(&self) -> Result<EnvironmentInfo, EnvironmentError>;
}

/// Maps named local storage resources to directories.
#[cfg_attr(test, mockall::automock)]
pub trait LocalResourceProvider: Send + Sync {
    /// Returns the root directory of the named resource, creating it when
    /// necessary.
    fn root_path(&self, name: &str) -> Result<PathBuf, EnvironmentError>;
}

/// Resource provider that maps each resource to a subdirectory of a root.
#[derive(Debug, Clone)]
pub struct DirectoryLocalResources {
    root: PathBuf,
}

impl DirectoryLocalResources {
    /// Builds a provider rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory under which resources are provisioned.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl LocalResourceProvider for DirectoryLocalResources {
    fn root_path(&self, name: &str) -> Result<PathBuf, EnvironmentError> {
        let trimmed = name.trim();
        let plain = !trimmed.is_empty()
            && trimmed != "."
            && trimmed != ".."
            && !trimmed.contains(['/', '\\']);
        if !plain {
            return Err(EnvironmentError::InvalidResourceName {
                name: name.to_owned(),
            });
        }

        let path = self.root.join(trimmed);
        fs::create_dir_all(&path).map_err(|source| EnvironmentError::ScratchResource {
            name: trimmed.to_owned(),
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

/// Production preparer that applies the limit, scratch directory, and
/// temporary-directory bindings exactly once.
pub struct SystemEnvironmentPreparer<R> {
    resources: R,
    scratch_resource: String,
    connection_limit: u32,
    prepared: OnceCell<EnvironmentInfo>,
}

impl<R> SystemEnvironmentPreparer<R>
where
    R: LocalResourceProvider,
{
    /// Builds a preparer from the host configuration.
    #[must_use]
    pub fn new(config: &HostConfig, resources: R) -> Self {
        Self {
            resources,
            scratch_resource: config.scratch_resource().to_owned(),
            connection_limit: config.connection_limit(),
            prepared: OnceCell::new(),
        }
    }

    fn prepare_once(&self) -> Result<EnvironmentInfo, EnvironmentError> {
        if self.connection_limit == 0 {
            return Err(EnvironmentError::InvalidConnectionLimit);
        }
        let limit = *CONNECTION_LIMIT.get_or_init(|| self.connection_limit);
        raise_descriptor_limit(limit)?;

        let scratch_dir = self.resources.root_path(&self.scratch_resource)?;
        rebind_temp_variables(&scratch_dir);

        info!(
            target: ENVIRONMENT_TARGET,
            scratch = %scratch_dir.display(),
            connection_limit = limit,
            "process environment prepared"
        );
        Ok(EnvironmentInfo::new(scratch_dir, limit))
    }
}

impl<R> EnvironmentPreparer for SystemEnvironmentPreparer<R>
where
    R: LocalResourceProvider,
{
    fn prepare(&self) -> Result<EnvironmentInfo, EnvironmentError> {
        self.prepared
            .get_or_try_init(|| self.prepare_once())
            .cloned()
    }
}

fn rebind_temp_variables(scratch_dir: &Path) {
    for variable in TEMP_VARIABLES {
        // SAFETY: runs once per preparer, inside its `OnceCell`, from the
        // thread driving the start hook and before the change feed thread
        // is spawned. The shutdown watcher may already be parked on its
        // signal but never reads the environment.
        unsafe { env::set_var(variable, scratch_dir) };
    }
}

#[cfg(unix)]
fn raise_descriptor_limit(limit: u32) -> Result<(), EnvironmentError> {
    use nix::sys::resource::{Resource, getrlimit, setrlimit};

    let to_error = |errno: nix::errno::Errno| EnvironmentError::ConnectionLimit {
        limit,
        source: io::Error::from(errno),
    };
    let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE).map_err(to_error)?;
    let wanted = u64::from(limit);
    if soft >= wanted {
        return Ok(());
    }

    let raised = wanted.min(hard);
    setrlimit(Resource::RLIMIT_NOFILE, raised, hard).map_err(to_error)?;
    if raised < wanted {
        warn!(
            target: ENVIRONMENT_TARGET,
            requested = wanted,
            granted = raised,
            "descriptor limit capped by the hard limit"
        );
    }
    Ok(())
}

#[cfg(not(unix))]
fn raise_descriptor_limit(_limit: u32) -> Result<(), EnvironmentError> {
    Ok(())
}
