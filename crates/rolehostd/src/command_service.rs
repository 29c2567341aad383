//! Worker service backed by a child process.
//!
//! The compute engine runs as an external command. The resolved
//! configuration reaches it through environment variables named after the
//! settings (`Worker.StorageConnectionString` becomes
//! `WORKER_STORAGE_CONNECTION_STRING`), the scratch directory is its working
//! directory, and its standard output and error are forwarded line by line
//! to the host trace sink and, when configured, to a log file in the scratch
//! directory.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use rolehost_config::settings::{ACCESS_KEY_SETTING, SECRET_KEY_SETTING, setting_env_key};
use rolehost_config::{HostConfig, StartMode};

use crate::identity::WorkerIdentity;
use crate::resolver::{EndpointKind, WorkerConfiguration};
use crate::service::{ServiceError, ServiceSpec, WorkerService, WorkerServiceFactory};
use crate::sink::{LogSink, format_trace_line};

const ENGINE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::engine");
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Identity variable exported to the engine.
pub const WORKER_ID_VAR: &str = "WORKER_ID";
/// Concurrency bound variable exported to the engine.
pub const WORKER_MAX_CONCURRENCY_VAR: &str = "WORKER_MAX_CONCURRENCY";
/// Working directory variable exported to the engine.
pub const WORKER_WORKING_DIRECTORY_VAR: &str = "WORKER_WORKING_DIRECTORY";

#[derive(Debug, Clone)]
struct Launch {
    program: PathBuf,
    args: Vec<String>,
    grace_period: Duration,
    blocking: bool,
    log_file: Option<String>,
}

/// Builds [`CommandWorkerService`] instances.
#[derive(Debug, Clone)]
pub struct CommandWorkerFactory {
    launch: Launch,
}

impl CommandWorkerFactory {
    /// Builds a factory that runs `program` with `args`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            launch: Launch {
                program: program.into(),
                args,
                grace_period: Duration::from_secs(rolehost_config::DEFAULT_STOP_GRACE_PERIOD_SECS),
                blocking: false,
                log_file: None,
            },
        }
    }

    /// Builds a factory from the host configuration, if an engine command
    /// is configured.
    #[must_use]
    pub fn from_config(config: &HostConfig) -> Option<Self> {
        let program = config.worker_command()?;
        let factory = Self::new(program.as_std_path(), config.worker_args().to_vec())
            .with_grace_period(config.stop_grace_period())
            .with_start_mode(config.start_mode());
        Some(match config.log_file() {
            Some(log_file) => factory.with_log_file(log_file),
            None => factory,
        })
    }

    /// Sets how long stop waits after the termination request before
    /// killing the engine.
    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.launch.grace_period = grace_period;
        self
    }

    /// In foreground mode `start` blocks until the engine exits.
    #[must_use]
    pub fn with_start_mode(mut self, mode: StartMode) -> Self {
        self.launch.blocking = mode == StartMode::Foreground;
        self
    }

    /// Appends engine output to `file_name` inside the working directory.
    #[must_use]
    pub fn with_log_file(mut self, file_name: impl Into<String>) -> Self {
        self.launch.log_file = Some(file_name.into());
        self
    }
}

impl WorkerServiceFactory for CommandWorkerFactory {
    type Service = CommandWorkerService;

    fn construct(&self, spec: ServiceSpec) -> Result<CommandWorkerService, ServiceError> {
        if !spec.working_directory.is_dir() {
            return Err(ServiceError::new(format!(
                "working directory '{}' does not exist",
                spec.working_directory.display()
            )));
        }
        let log_path = self
            .launch
            .log_file
            .as_deref()
            .map(|file_name| spec.working_directory.join(file_name));
        Ok(CommandWorkerService {
            launch: self.launch.clone(),
            identity: spec.identity,
            working_directory: spec.working_directory,
            log_path,
            engine: Mutex::new(Engine {
                configuration: spec.configuration,
                max_concurrency: spec.max_concurrency,
                child: None,
                stop_requested: false,
            }),
            sink: Mutex::new(None),
        })
    }
}

struct Engine {
    configuration: Arc<WorkerConfiguration>,
    max_concurrency: usize,
    child: Option<Child>,
    stop_requested: bool,
}

/// Compute engine running as a child process.
pub struct CommandWorkerService {
    launch: Launch,
    identity: WorkerIdentity,
    working_directory: PathBuf,
    log_path: Option<PathBuf>,
    engine: Mutex<Engine>,
    sink: Mutex<Option<Arc<dyn LogSink>>>,
}

impl CommandWorkerService {
    /// Identity exported to the engine.
    #[must_use]
    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    /// Working directory of the engine.
    #[must_use]
    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    /// Log file engine output is appended to, if any.
    #[must_use]
    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Environment exported to the engine for `configuration` under
    /// `max_concurrency`.
    #[must_use]
    pub fn environment(
        &self,
        configuration: &WorkerConfiguration,
        max_concurrency: usize,
    ) -> Vec<(String, String)> {
        let mut variables = Vec::new();
        for kind in EndpointKind::ALL {
            if let Some(connection) = configuration.endpoint(kind) {
                variables.push((
                    setting_env_key(kind.setting_name()),
                    connection.expose().to_owned(),
                ));
            }
        }
        if let Some(credentials) = configuration.credentials() {
            variables.push((
                setting_env_key(ACCESS_KEY_SETTING),
                credentials.access_key().to_owned(),
            ));
            variables.push((
                setting_env_key(SECRET_KEY_SETTING),
                credentials.secret_key().to_owned(),
            ));
        }
        variables.push((WORKER_ID_VAR.to_owned(), self.identity.to_string()));
        variables.push((
            WORKER_MAX_CONCURRENCY_VAR.to_owned(),
            max_concurrency.to_string(),
        ));
        variables.push((
            WORKER_WORKING_DIRECTORY_VAR.to_owned(),
            self.working_directory.display().to_string(),
        ));
        variables
    }

    fn engine(&self) -> MutexGuard<'_, Engine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn(&self, engine: &mut Engine) -> Result<(), ServiceError> {
        if let Some(child) = engine.child.as_mut() {
            match child.try_wait() {
                Ok(None) => return Err(ServiceError::new("compute engine is already running")),
                Ok(Some(_)) | Err(_) => engine.child = None,
            }
        }

        let mut command = Command::new(&self.launch.program);
        command
            .args(&self.launch.args)
            .current_dir(&self.working_directory)
            .envs(self.environment(&engine.configuration, engine.max_concurrency))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = command.spawn().map_err(|source| {
            ServiceError::with_source(
                format!(
                    "failed to launch compute engine '{}'",
                    self.launch.program.display()
                ),
                source,
            )
        })?;

        if let Err(error) = self.forward_output(&mut child) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(error);
        }

        info!(
            target: ENGINE_TARGET,
            identity = %self.identity,
            pid = child.id(),
            program = %self.launch.program.display(),
            "compute engine launched"
        );
        engine.child = Some(child);
        engine.stop_requested = false;
        Ok(())
    }

    fn forward_output(&self, child: &mut Child) -> Result<(), ServiceError> {
        let sink = self
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let file = match &self.log_path {
            Some(path) => Some(Arc::new(Mutex::new(open_log(path)?))),
            None => None,
        };

        if let Some(stdout) = child.stdout.take() {
            spawn_forwarder("rolehost-engine-out", stdout, sink.clone(), file.clone())?;
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_forwarder("rolehost-engine-err", stderr, sink, file)?;
        }
        Ok(())
    }

    fn wait_for_exit(&self) -> Result<(), ServiceError> {
        loop {
            {
                let mut engine = self.engine();
                let stop_requested = engine.stop_requested;
                let Some(child) = engine.child.as_mut() else {
                    return Ok(());
                };
                match child.try_wait() {
                    Ok(None) => {}
                    Ok(Some(status)) => {
                        engine.child = None;
                        if stop_requested || status.success() {
                            return Ok(());
                        }
                        return Err(ServiceError::new(format!(
                            "compute engine exited with {status}"
                        )));
                    }
                    Err(source) => {
                        return Err(ServiceError::with_source(
                            "failed to poll the compute engine",
                            source,
                        ));
                    }
                }
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }
}

impl WorkerService for CommandWorkerService {
    fn start(&self) -> Result<(), ServiceError> {
        {
            let mut engine = self.engine();
            self.spawn(&mut engine)?;
        }
        if self.launch.blocking {
            self.wait_for_exit()
        } else {
            Ok(())
        }
    }

    fn stop(&self) -> Result<(), ServiceError> {
        let mut engine = self.engine();
        engine.stop_requested = true;
        let Some(mut child) = engine.child.take() else {
            debug!(target: ENGINE_TARGET, identity = %self.identity, "compute engine not running");
            return Ok(());
        };
        terminate(&mut child, self.launch.grace_period)?;
        info!(target: ENGINE_TARGET, identity = %self.identity, "compute engine stopped");
        Ok(())
    }

    fn rebind(
        &self,
        configuration: Arc<WorkerConfiguration>,
        max_concurrency: usize,
    ) -> Result<(), ServiceError> {
        let mut engine = self.engine();
        let running = match engine.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        };
        if running {
            return Err(ServiceError::new(
                "cannot rebind while the compute engine is running",
            ));
        }
        engine.configuration = configuration;
        engine.max_concurrency = max_concurrency;
        Ok(())
    }

    fn attach_logger(&self, sink: Arc<dyn LogSink>) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }
}

fn open_log(path: &Path) -> Result<File, ServiceError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| {
            ServiceError::with_source(
                format!("failed to open engine log '{}'", path.display()),
                source,
            )
        })
}

fn spawn_forwarder<R>(
    name: &str,
    stream: R,
    sink: Option<Arc<dyn LogSink>>,
    file: Option<Arc<Mutex<File>>>,
) -> Result<(), ServiceError>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(move || {
            for line in BufReader::new(stream).lines().map_while(Result::ok) {
                if let Some(file) = &file {
                    let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
                    let _ = writeln!(file, "{}", format_trace_line(OffsetDateTime::now_utc(), &line));
                }
                if let Some(sink) = &sink {
                    sink.write_line(&line);
                }
            }
        })
        .map(drop)
        .map_err(|source| ServiceError::with_source("failed to spawn output forwarder", source))
}

fn terminate(child: &mut Child, grace_period: Duration) -> Result<(), ServiceError> {
    if matches!(child.try_wait(), Ok(Some(_))) {
        return Ok(());
    }
    request_termination(child);

    let deadline = Instant::now() + grace_period;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(_)) => return Ok(()),
            Ok(None) => thread::sleep(EXIT_POLL_INTERVAL),
            Err(source) => {
                return Err(ServiceError::with_source(
                    "failed to poll the compute engine",
                    source,
                ));
            }
        }
    }

    warn!(
        target: ENGINE_TARGET,
        pid = child.id(),
        grace_ms = grace_period.as_millis(),
        "compute engine ignored the termination request; killing"
    );
    child
        .kill()
        .map_err(|source| ServiceError::with_source("failed to kill the compute engine", source))?;
    child
        .wait()
        .map(drop)
        .map_err(|source| ServiceError::with_source("failed to reap the compute engine", source))
}

#[cfg(unix)]
fn request_termination(child: &Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Ok(pid) = i32::try_from(child.id()) else {
        return;
    };
    if let Err(errno) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        debug!(target: ENGINE_TARGET, pid, %errno, "termination request not delivered");
    }
}

#[cfg(not(unix))]
fn request_termination(_child: &Child) {}
