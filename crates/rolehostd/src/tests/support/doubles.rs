//! Small collaborators: trace sink, change feed, and shutdown trigger.

use std::sync::{Arc, Condvar, Mutex, Weak};

use crate::events::{ChangeEvent, ChangeFeed, ChangeListener, FeedError};
use crate::process::{ShutdownError, ShutdownSignal};
use crate::sink::LogSink;

use super::calls::{Call, CallLog};

/// Sink that keeps every line in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("sink mutex poisoned").clone()
    }

    /// Returns `true` when some line contains `fragment`.
    #[must_use]
    pub fn contains(&self, fragment: &str) -> bool {
        self.lines().iter().any(|line| line.contains(fragment))
    }
}

impl LogSink for RecordingSink {
    fn write_line(&self, message: &str) {
        self.lines
            .lock()
            .expect("sink mutex poisoned")
            .push(message.to_owned());
    }
}

/// Feed that hands events to its listener only when told to.
pub struct ManualFeed {
    log: CallLog,
    listener: Mutex<Option<Weak<dyn ChangeListener>>>,
}

impl ManualFeed {
    #[must_use]
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            listener: Mutex::new(None),
        }
    }

    /// Delivers `event` as the platform would; returns `false` when no
    /// listener is alive.
    pub fn deliver(&self, event: &ChangeEvent) -> bool {
        let listener = self
            .listener
            .lock()
            .expect("feed mutex poisoned")
            .as_ref()
            .and_then(Weak::upgrade);
        match listener {
            Some(listener) => {
                listener.notify(event);
                true
            }
            None => false,
        }
    }
}

impl ChangeFeed for ManualFeed {
    fn subscribe(&self, listener: Weak<dyn ChangeListener>) -> Result<(), FeedError> {
        self.log.record(Call::Subscribe);
        *self.listener.lock().expect("feed mutex poisoned") = Some(listener);
        Ok(())
    }
}

/// Shutdown signal released by the test.
#[derive(Debug, Clone, Default)]
pub struct TriggeredShutdown {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl TriggeredShutdown {
    pub fn trigger(&self) {
        let (triggered, signal) = &*self.state;
        *triggered.lock().expect("shutdown mutex poisoned") = true;
        signal.notify_all();
    }
}

impl ShutdownSignal for TriggeredShutdown {
    fn wait(&self) -> Result<(), ShutdownError> {
        let (triggered, signal) = &*self.state;
        let guard = triggered.lock().expect("shutdown mutex poisoned");
        let _guard = signal
            .wait_while(guard, |triggered| !*triggered)
            .expect("shutdown mutex poisoned");
        Ok(())
    }
}
