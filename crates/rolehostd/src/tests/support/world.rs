//! Scenario worlds shared across BDD steps.

use std::cell::RefCell;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::manager::{ChangeOutcome, LifecycleError};
use crate::process::LaunchError;
use crate::process::launch::supervise;

use super::doubles::TriggeredShutdown;
use super::host::{Host, HostBuilder};

/// Lifecycle scenario state.
pub struct TestWorld {
    builder: Option<HostBuilder>,
    host: Option<Host>,
    pub start_result: Option<Result<bool, LifecycleError>>,
    pub change_result: Option<Result<ChangeOutcome, LifecycleError>>,
    pub stop_result: Option<Result<(), LifecycleError>>,
    run: Option<JoinHandle<Result<(), LifecycleError>>>,
    pub run_result: Option<Result<(), LifecycleError>>,
}

impl TestWorld {
    pub fn new() -> Self {
        Self {
            builder: Some(Host::builder()),
            host: None,
            start_result: None,
            change_result: None,
            stop_result: None,
            run: None,
            run_result: None,
        }
    }

    /// Adjusts the host before it is built.
    pub fn configure(&mut self, adjust: impl FnOnce(HostBuilder) -> HostBuilder) {
        if let Some(builder) = self.builder.take() {
            self.builder = Some(adjust(builder));
        }
    }

    /// Host under test, built on first use.
    pub fn host(&mut self) -> &Host {
        if self.host.is_none() {
            let builder = self.builder.take().unwrap_or_else(Host::builder);
            self.host = Some(builder.build());
        }
        self.host.as_ref().expect("host was just built")
    }

    pub fn start(&mut self) {
        let result = self.host().manager.on_start();
        self.start_result = Some(result);
    }

    pub fn spawn_run(&mut self) {
        let handle = self.host().spawn_run();
        self.run = Some(handle);
    }

    pub fn stop(&mut self) {
        let result = self.host().manager.on_stop();
        self.stop_result = Some(result);
    }

    /// Joins the run hook thread, if one was spawned.
    pub fn finish_run(&mut self) {
        if let Some(handle) = self.run.take() {
            self.run_result = Some(super::host::join_within(handle));
        }
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a fresh lifecycle world.
pub fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new())
}

/// Process supervision scenario state.
pub struct ProcessWorld {
    pub host: Host,
    pub shutdown: TriggeredShutdown,
    handle: Option<JoinHandle<Result<(), LaunchError>>>,
    pub result: Option<Result<(), LaunchError>>,
}

impl ProcessWorld {
    pub fn new() -> Self {
        Self::with_host(Host::new())
    }

    pub fn with_host(host: Host) -> Self {
        Self {
            host,
            shutdown: TriggeredShutdown::default(),
            handle: None,
            result: None,
        }
    }

    /// Supervises the host on a background thread.
    pub fn launch(&mut self) {
        let manager = Arc::clone(&self.host.manager);
        let shutdown = self.shutdown.clone();
        self.handle = Some(thread::spawn(move || supervise(&manager, shutdown)));
    }

    /// Waits for supervision to end.
    pub fn finish(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.result = Some(super::host::join_within(handle));
        }
    }
}

impl Drop for ProcessWorld {
    fn drop(&mut self) {
        // Releases a watcher left parked by a failed supervision.
        self.shutdown.trigger();
    }
}

impl Default for ProcessWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a fresh process world.
pub fn process_world() -> RefCell<ProcessWorld> {
    RefCell::new(ProcessWorld::new())
}
