//! Polling change feed over the settings document.
//!
//! The hosting platform publishes settings and topology as a JSON document.
//! [`PollingChangeFeed`] re-reads it on a fixed interval, publishes the new
//! snapshot through [`LiveSettings`], and delivers the difference to its
//! listener. A document that fails to parse is skipped and the previous
//! snapshot stays in force.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use rolehost_config::settings::{SettingsDocument, SettingsSource};

use crate::events::{ChangeEvent, ChangeFeed, ChangeListener, FeedError};

const FEED_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::feed");

/// Current settings document shared between the feed and the resolver.
#[derive(Debug, Default)]
pub struct LiveSettings {
    current: RwLock<SettingsDocument>,
}

impl LiveSettings {
    /// Publishes `document` as the initial snapshot.
    #[must_use]
    pub fn new(document: SettingsDocument) -> Self {
        Self {
            current: RwLock::new(document),
        }
    }

    /// Copy of the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SettingsDocument {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the current snapshot, returning the previous one.
    pub fn replace(&self, document: SettingsDocument) -> SettingsDocument {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, document)
    }
}

impl SettingsSource for LiveSettings {
    fn setting(&self, name: &str) -> Option<String> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .setting(name)
    }
}

#[derive(Default)]
struct StopFlag {
    stopped: Mutex<bool>,
    signal: Condvar,
}

impl StopFlag {
    fn raise(&self) {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.signal.notify_all();
    }

    /// Sleeps for `interval` unless raised first; returns `true` once raised.
    fn wait(&self, interval: Duration) -> bool {
        let stopped = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        let (stopped, _) = self
            .signal
            .wait_timeout_while(stopped, interval, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *stopped
    }
}

struct Poller {
    stop: Arc<StopFlag>,
    thread: JoinHandle<()>,
}

/// Feed that polls the settings document for changes.
pub struct PollingChangeFeed {
    path: PathBuf,
    interval: Duration,
    live: Arc<LiveSettings>,
    poller: Mutex<Option<Poller>>,
}

impl PollingChangeFeed {
    /// Builds a feed that polls `path` and publishes through `live`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, interval: Duration, live: Arc<LiveSettings>) -> Self {
        Self {
            path: path.into(),
            interval,
            live,
            poller: Mutex::new(None),
        }
    }

    /// Document the feed polls.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stops polling and joins the delivery thread.
    pub fn shutdown(&self) {
        let poller = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(poller) = poller {
            poller.stop.raise();
            if poller.thread.join().is_err() {
                warn!(target: FEED_TARGET, "change delivery thread panicked");
            }
        }
    }
}

impl ChangeFeed for PollingChangeFeed {
    fn subscribe(&self, listener: Weak<dyn ChangeListener>) -> Result<(), FeedError> {
        let mut poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        if poller.is_some() {
            return Err(FeedError::AlreadySubscribed);
        }

        let stop = Arc::new(StopFlag::default());
        let task = PollTask {
            path: self.path.clone(),
            interval: self.interval,
            live: Arc::clone(&self.live),
            stop: Arc::clone(&stop),
            listener,
        };
        let thread = thread::Builder::new()
            .name("rolehost-changes".to_owned())
            .spawn(move || task.run())
            .map_err(|source| FeedError::Spawn { source })?;
        *poller = Some(Poller { stop, thread });
        Ok(())
    }
}

impl Drop for PollingChangeFeed {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct PollTask {
    path: PathBuf,
    interval: Duration,
    live: Arc<LiveSettings>,
    stop: Arc<StopFlag>,
    listener: Weak<dyn ChangeListener>,
}

impl PollTask {
    fn run(self) {
        while !self.stop.wait(self.interval) {
            let current = match SettingsDocument::load(&self.path) {
                Ok(document) => document,
                Err(error) => {
                    warn!(
                        target: FEED_TARGET,
                        error = %error,
                        "settings document unreadable; keeping the previous snapshot"
                    );
                    continue;
                }
            };

            let previous = self.live.replace(current.clone());
            let event = ChangeEvent::between(&previous, &current);
            if event.is_empty() {
                continue;
            }

            let Some(listener) = self.listener.upgrade() else {
                debug!(target: FEED_TARGET, "change listener dropped; stopping delivery");
                return;
            };
            listener.notify(&event);
        }
    }
}
