//! Shared, ordered record of every collaborator call.

use std::sync::{Arc, Mutex};

/// A call observed by one of the recording doubles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// Environment preparation ran.
    Prepare,
    /// A setting was read.
    Read(String),
    /// The factory constructed a service.
    Construct {
        /// Identity in the service spec.
        identity: String,
        /// Raw storage connection string in the service spec.
        storage: String,
        /// Concurrency bound in the service spec.
        max_concurrency: usize,
    },
    /// The trace sink was attached to the service.
    AttachLogger,
    /// The manager subscribed to the change feed.
    Subscribe,
    /// The service was started.
    Start,
    /// The service was stopped.
    Stop,
    /// The service was rebound.
    Rebind {
        /// Raw storage connection string of the new configuration.
        storage: String,
        /// Concurrency bound passed with the new configuration.
        max_concurrency: usize,
    },
}

impl Call {
    /// Returns `true` for calls made on the worker service.
    #[must_use]
    pub fn is_service_transition(&self) -> bool {
        matches!(self, Self::Start | Self::Stop | Self::Rebind { .. })
    }
}

/// Cloneable handle to the shared call record.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    pub fn record(&self, call: Call) {
        self.calls.lock().expect("call log mutex poisoned").push(call);
    }

    /// Snapshot of every call so far.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("call log mutex poisoned").clone()
    }

    /// Worker service transitions only, in order.
    #[must_use]
    pub fn transitions(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(Call::is_service_transition)
            .collect()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.calls.lock().expect("call log mutex poisoned").clear();
    }

    /// Position of the first call matching `predicate`.
    #[must_use]
    pub fn position(&self, predicate: impl Fn(&Call) -> bool) -> Option<usize> {
        self.calls().iter().position(predicate)
    }

    /// Number of calls matching `predicate`.
    #[must_use]
    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| predicate(call)).count()
    }
}
