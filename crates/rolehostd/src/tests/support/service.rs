//! Recording worker service and factory with injectable faults.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use crate::resolver::WorkerConfiguration;
use crate::service::{ServiceError, ServiceSpec, WorkerService, WorkerServiceFactory};
use crate::sink::LogSink;

use super::calls::{Call, CallLog};

#[derive(Debug, Default)]
struct Faults {
    construct: Option<String>,
    fail_start_on: Option<usize>,
    starts: usize,
    stop: Option<String>,
    rebind: Option<String>,
    start_delay: Duration,
}

/// Blocks a foreground start until a matching stop or halt arrives.
///
/// Counting rather than flagging means a stop that lands before the start
/// began blocking still releases it.
#[derive(Debug, Default)]
struct Gate {
    counts: Mutex<GateCounts>,
    signal: Condvar,
}

#[derive(Debug, Default)]
struct GateCounts {
    starts: usize,
    releases: usize,
}

impl Gate {
    fn enter(&self) {
        let mut counts = self.counts.lock().expect("gate mutex poisoned");
        counts.starts += 1;
        let _counts = self
            .signal
            .wait_while(counts, |counts| counts.releases < counts.starts)
            .expect("gate mutex poisoned");
    }

    fn release(&self) {
        self.counts.lock().expect("gate mutex poisoned").releases += 1;
        self.signal.notify_all();
    }
}

/// Factory producing [`RecordingService`] instances that share its log,
/// faults, and foreground gate.
#[derive(Debug, Clone, Default)]
pub struct RecordingFactory {
    log: CallLog,
    faults: Arc<Mutex<Faults>>,
    gate: Arc<Gate>,
    blocking: bool,
}

impl RecordingFactory {
    #[must_use]
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Services block in `start` until stopped, like a foreground engine.
    #[must_use]
    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    pub fn fail_construct(&self, message: impl Into<String>) {
        self.faults().construct = Some(message.into());
    }

    /// Fails the `nth` start call, counting from one.
    pub fn fail_start_on(&self, nth: usize) {
        self.faults().fail_start_on = Some(nth);
    }

    pub fn fail_stop(&self, message: impl Into<String>) {
        self.faults().stop = Some(message.into());
    }

    pub fn fail_rebind(&self, message: impl Into<String>) {
        self.faults().rebind = Some(message.into());
    }

    /// Widens the window in which concurrent events could interleave.
    pub fn delay_starts(&self, delay: Duration) {
        self.faults().start_delay = delay;
    }

    /// Makes a blocked foreground start return as if the engine exited.
    pub fn halt_engine(&self) {
        self.gate.release();
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().expect("fault mutex poisoned")
    }
}

impl WorkerServiceFactory for RecordingFactory {
    type Service = RecordingService;

    fn construct(&self, spec: ServiceSpec) -> Result<RecordingService, ServiceError> {
        self.log.record(Call::Construct {
            identity: spec.identity.to_string(),
            storage: storage_of(&spec.configuration),
            max_concurrency: spec.max_concurrency,
        });
        if let Some(message) = self.faults().construct.clone() {
            return Err(ServiceError::new(message));
        }
        Ok(RecordingService {
            log: self.log.clone(),
            faults: Arc::clone(&self.faults),
            gate: Arc::clone(&self.gate),
            blocking: self.blocking,
        })
    }
}

/// Worker service that records its transitions.
#[derive(Debug)]
pub struct RecordingService {
    log: CallLog,
    faults: Arc<Mutex<Faults>>,
    gate: Arc<Gate>,
    blocking: bool,
}

impl WorkerService for RecordingService {
    fn start(&self) -> Result<(), ServiceError> {
        self.log.record(Call::Start);
        let (fail, delay) = {
            let mut faults = self.faults.lock().expect("fault mutex poisoned");
            faults.starts += 1;
            (faults.fail_start_on == Some(faults.starts), faults.start_delay)
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if fail {
            return Err(ServiceError::new("engine refused to start"));
        }
        if self.blocking {
            self.gate.enter();
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), ServiceError> {
        self.log.record(Call::Stop);
        let failure = self.faults.lock().expect("fault mutex poisoned").stop.clone();
        if let Some(message) = failure {
            return Err(ServiceError::new(message));
        }
        if self.blocking {
            self.gate.release();
        }
        Ok(())
    }

    fn rebind(
        &self,
        configuration: Arc<WorkerConfiguration>,
        max_concurrency: usize,
    ) -> Result<(), ServiceError> {
        self.log.record(Call::Rebind {
            storage: storage_of(&configuration),
            max_concurrency,
        });
        let failure = self
            .faults
            .lock()
            .expect("fault mutex poisoned")
            .rebind
            .clone();
        match failure {
            Some(message) => Err(ServiceError::new(message)),
            None => Ok(()),
        }
    }

    fn attach_logger(&self, sink: Arc<dyn LogSink>) {
        sink.write_line("recording service attached");
        self.log.record(Call::AttachLogger);
    }
}

fn storage_of(configuration: &WorkerConfiguration) -> String {
    configuration
        .storage()
        .map(|connection| connection.expose().to_owned())
        .unwrap_or_default()
}
