//! Lifecycle manager wired to recording doubles.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rolehost_config::settings::{
    MESSAGING_CONNECTION_SETTING, STORAGE_CONNECTION_SETTING, SettingsSnapshot,
};
use rolehost_config::{IdentityMode, StartMode};

use crate::events::ChangeEvent;
use crate::identity::IdentityPolicy;
use crate::manager::{
    ChangeOutcome, ConcurrencyPolicy, LifecycleError, LifecycleManager, ManagerParts,
};

use super::calls::CallLog;
use super::doubles::{ManualFeed, RecordingSink};
use super::environment::{RecordingPreparer, RecordingSettings};
use super::reporter::RecordingHealthReporter;
use super::service::RecordingFactory;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub const STORAGE_A: &str = "AccountName=jobs;AccountKey=first";
pub const STORAGE_B: &str = "AccountName=jobs;AccountKey=second";
pub const MESSAGING: &str = "Endpoint=sb://queue;SharedAccessKey=secret";
pub const WORKER_ID: &str = "worker-test";

/// Settings that resolve to a complete configuration.
#[must_use]
pub fn valid_settings() -> SettingsSnapshot {
    SettingsSnapshot::from_pairs([
        (STORAGE_CONNECTION_SETTING, STORAGE_A),
        (MESSAGING_CONNECTION_SETTING, MESSAGING),
    ])
}

/// Builder for [`Host`].
pub struct HostBuilder {
    settings: SettingsSnapshot,
    start_mode: StartMode,
    concurrency: ConcurrencyPolicy,
}

impl HostBuilder {
    #[must_use]
    pub fn settings(mut self, settings: SettingsSnapshot) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn foreground(mut self) -> Self {
        self.start_mode = StartMode::Foreground;
        self
    }

    #[must_use]
    pub fn concurrency(mut self, concurrency: ConcurrencyPolicy) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn build(self) -> Host {
        let log = CallLog::default();
        let preparer = Arc::new(RecordingPreparer::new(log.clone()));
        let settings = Arc::new(RecordingSettings::new(log.clone(), self.settings));
        let mut factory = RecordingFactory::new(log.clone());
        if self.start_mode == StartMode::Foreground {
            factory = factory.blocking();
        }
        let feed = Arc::new(ManualFeed::new(log.clone()));
        let reporter = Arc::new(RecordingHealthReporter::default());
        let sink = Arc::new(RecordingSink::default());

        let manager = Arc::new(LifecycleManager::new(ManagerParts {
            preparer: Arc::clone(&preparer) as _,
            settings: Arc::clone(&settings) as _,
            factory: factory.clone(),
            feed: Arc::clone(&feed) as _,
            reporter: Arc::clone(&reporter) as _,
            sink: Arc::clone(&sink) as _,
            identity: IdentityPolicy::new(IdentityMode::Fixed).with_worker_id(WORKER_ID),
            concurrency: self.concurrency,
            start_mode: self.start_mode,
        }));

        Host {
            log,
            preparer,
            settings,
            factory,
            feed,
            reporter,
            sink,
            manager,
        }
    }
}

/// A manager and every double it talks to.
pub struct Host {
    pub log: CallLog,
    pub preparer: Arc<RecordingPreparer>,
    pub settings: Arc<RecordingSettings>,
    pub factory: RecordingFactory,
    pub feed: Arc<ManualFeed>,
    pub reporter: Arc<RecordingHealthReporter>,
    pub sink: Arc<RecordingSink>,
    pub manager: Arc<LifecycleManager<RecordingFactory>>,
}

impl Host {
    #[must_use]
    pub fn builder() -> HostBuilder {
        HostBuilder {
            settings: valid_settings(),
            start_mode: StartMode::Background,
            concurrency: ConcurrencyPolicy::fixed(4),
        }
    }

    /// Background host with valid settings.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Runs the start hook, panicking unless it succeeds.
    pub fn start(&self) {
        let started = self.manager.on_start().expect("start hook should succeed");
        assert!(started, "start hook declined to run");
    }

    /// Publishes `storage` as the new storage connection string and returns
    /// the matching change event.
    pub fn change_storage(&self, storage: &str) -> ChangeEvent {
        let previous = self.settings.snapshot();
        let old = previous.get(STORAGE_CONNECTION_SETTING).map(str::to_owned);
        self.settings
            .replace(previous.with(STORAGE_CONNECTION_SETTING, storage));
        ChangeEvent::new().with_setting(STORAGE_CONNECTION_SETTING, old.as_deref(), Some(storage))
    }

    /// Publishes `settings` and returns an event naming `changed`.
    pub fn publish(&self, settings: SettingsSnapshot, changed: &str) -> ChangeEvent {
        let new_value = settings.get(changed).map(str::to_owned);
        self.settings.replace(settings);
        ChangeEvent::new().with_setting(changed, None, new_value.as_deref())
    }

    pub fn apply(&self, event: &ChangeEvent) -> Result<ChangeOutcome, LifecycleError> {
        self.manager.on_changed(event)
    }

    /// Calls the run hook on a separate thread.
    #[must_use]
    pub fn spawn_run(&self) -> JoinHandle<Result<(), LifecycleError>> {
        let manager = Arc::clone(&self.manager);
        thread::spawn(move || manager.run())
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::new()
    }
}

/// Polls `condition` until it holds or [`WAIT_TIMEOUT`] elapses.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(POLL_INTERVAL);
    }
    condition()
}

/// Joins `handle`, failing if it has not finished within [`WAIT_TIMEOUT`].
pub fn join_within<T>(handle: JoinHandle<T>) -> T {
    assert!(
        wait_until(|| handle.is_finished()),
        "thread did not finish in time"
    );
    handle.join().expect("joined thread panicked")
}
