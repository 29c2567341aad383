//! Errors surfaced by the lifecycle hooks.

use thiserror::Error;

use crate::environment::EnvironmentError;
use crate::events::FeedError;
use crate::resolver::ConfigurationError;
use crate::service::ServiceTransitionError;

use super::ManagerState;

/// Errors returned by [`LifecycleManager`](super::LifecycleManager) hooks.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Process environment preparation or identity derivation failed.
    #[error("environment preparation failed: {source}")]
    Environment {
        /// Underlying environment error.
        #[source]
        source: EnvironmentError,
    },
    /// The initial configuration could not be resolved.
    #[error("worker configuration could not be resolved: {source}")]
    Configuration {
        /// Underlying resolution error.
        #[source]
        source: ConfigurationError,
    },
    /// A worker service operation failed.
    #[error("{source}")]
    Transition {
        /// Underlying transition error.
        #[source]
        source: ServiceTransitionError,
    },
    /// Subscribing to change notifications failed.
    #[error("failed to subscribe to change notifications: {source}")]
    Subscription {
        /// Underlying feed error.
        #[source]
        source: FeedError,
    },
    /// The hook is not valid in the current state.
    #[error("cannot {operation} while the lifecycle manager is {state}")]
    InvalidState {
        /// Hook that was invoked.
        operation: &'static str,
        /// State the manager was in.
        state: ManagerState,
    },
    /// The worker stopped without being asked to.
    #[error("worker halted: {reason}")]
    Halted {
        /// Why the worker halted.
        reason: String,
    },
}

impl From<EnvironmentError> for LifecycleError {
    fn from(source: EnvironmentError) -> Self {
        Self::Environment { source }
    }
}

impl From<ConfigurationError> for LifecycleError {
    fn from(source: ConfigurationError) -> Self {
        Self::Configuration { source }
    }
}

impl From<ServiceTransitionError> for LifecycleError {
    fn from(source: ServiceTransitionError) -> Self {
        Self::Transition { source }
    }
}

impl From<FeedError> for LifecycleError {
    fn from(source: FeedError) -> Self {
        Self::Subscription { source }
    }
}
