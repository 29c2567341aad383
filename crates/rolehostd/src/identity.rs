//! Worker identity derivation.

use std::fmt;

use uuid::Uuid;

use rolehost_config::{HostConfig, IdentityMode};

use crate::environment::EnvironmentError;

const EMULATOR_PREFIX: &str = "computeEmulator-";
const EMULATOR_TOKEN_LEN: usize = 30;

/// Name under which the worker registers with its backing services.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerIdentity(String);

impl WorkerIdentity {
    /// Wraps an already derived identity.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// How the identity is derived, captured from the host configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityPolicy {
    mode: IdentityMode,
    worker_id: Option<String>,
    instance_id: Option<String>,
    prefix: Option<String>,
}

impl IdentityPolicy {
    /// Builds a policy for `mode` with no inputs.
    #[must_use]
    pub fn new(mode: IdentityMode) -> Self {
        Self {
            mode,
            worker_id: None,
            instance_id: None,
            prefix: None,
        }
    }

    /// Captures the identity settings of `config`.
    #[must_use]
    pub fn from_config(config: &HostConfig) -> Self {
        Self {
            mode: config.identity_mode(),
            worker_id: config.worker_id.clone(),
            instance_id: config.instance_id.clone(),
            prefix: config.identity_prefix.clone(),
        }
    }

    /// Sets the explicit identity used in fixed mode.
    #[must_use]
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    /// Sets the platform instance identifier used in instance mode.
    #[must_use]
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    /// Sets the prefix joined to the derived identity with a dash.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Mode the policy derives with.
    #[must_use]
    pub fn mode(&self) -> IdentityMode {
        self.mode
    }

    /// Derives the identity. Emulated identities are random, so callers
    /// derive once and keep the result.
    pub fn derive(&self) -> Result<WorkerIdentity, EnvironmentError> {
        let base = match self.mode {
            IdentityMode::Machine => machine_name().map_err(|reason| self.failure(reason))?,
            IdentityMode::Instance => {
                let instance = non_blank(self.instance_id.as_deref())
                    .ok_or_else(|| self.failure("no instance identifier is configured"))?;
                instance_suffix(instance)
                    .ok_or_else(|| {
                        self.failure(format!("instance identifier '{instance}' ends with a dot"))
                    })?
                    .to_owned()
            }
            IdentityMode::Emulated => emulator_identity(),
            IdentityMode::Fixed => non_blank(self.worker_id.as_deref())
                .ok_or_else(|| self.failure("no worker identifier is configured"))?
                .to_owned(),
        };

        let identity = match non_blank(self.prefix.as_deref()) {
            Some(prefix) => format!("{prefix}-{base}"),
            None => base,
        };
        Ok(WorkerIdentity(identity))
    }

    fn failure(&self, reason: impl Into<String>) -> EnvironmentError {
        EnvironmentError::Identity {
            mode: self.mode,
            reason: reason.into(),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn machine_name() -> Result<String, String> {
    let name = hostname::get().map_err(|error| format!("failed to read hostname: {error}"))?;
    let name = name
        .into_string()
        .map_err(|_| "hostname is not valid UTF-8".to_owned())?;
    non_blank(Some(&name))
        .map(str::to_owned)
        .ok_or_else(|| "hostname is empty".to_owned())
}

fn instance_suffix(instance: &str) -> Option<&str> {
    instance
        .rsplit('.')
        .next()
        .map(str::trim)
        .filter(|suffix| !suffix.is_empty())
}

fn emulator_identity() -> String {
    let token = Uuid::new_v4().simple().to_string();
    let token = token.get(..EMULATOR_TOKEN_LEN).unwrap_or(&token);
    format!("{EMULATOR_PREFIX}{token}")
}
