//! One-shot release signal the run hook blocks on.

use std::sync::{Condvar, Mutex, PoisonError};

/// Why the run hook was released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Release {
    /// The host asked the worker to stop.
    Stopped,
    /// The worker stopped on its own or could not be kept running.
    Halted(String),
}

/// First release wins; later releases are ignored.
#[derive(Debug, Default)]
pub(crate) struct RunLatch {
    release: Mutex<Option<Release>>,
    signal: Condvar,
}

impl RunLatch {
    pub(crate) fn release(&self, release: Release) {
        let mut slot = self.release.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(release);
            self.signal.notify_all();
        }
    }

    pub(crate) fn wait(&self) -> Release {
        let slot = self.release.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = self
            .signal
            .wait_while(slot, |slot| slot.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        slot.clone().unwrap_or(Release::Stopped)
    }

    pub(crate) fn peek(&self) -> Option<Release> {
        self.release
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
