//! Uniform failure handling for lifecycle hooks.
//!
//! Every hook passes its result through [`contain`]. Failures are written to
//! the host trace sink and to structured telemetry, then returned unchanged so
//! the platform still sees them.

use std::error::Error;
use std::fmt;

use tracing::error;

use crate::sink::LogSink;

const CONTAINMENT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lifecycle");

/// Lifecycle hook a failure escaped from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Host start hook.
    Start,
    /// Host run hook.
    Run,
    /// Settings or topology change hook.
    Change,
    /// Host stop hook.
    Stop,
}

impl fmt::Display for Phase {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Start => "start",
            Self::Run => "run",
            Self::Change => "change",
            Self::Stop => "stop",
        };
        formatter.write_str(label)
    }
}

pub(crate) fn contain<T, E>(sink: &dyn LogSink, phase: Phase, result: Result<T, E>) -> Result<T, E>
where
    E: Error,
{
    if let Err(failure) = &result {
        sink.write_line(&format!("role host {phase} hook failed: {failure}"));
        error!(
            target: CONTAINMENT_TARGET,
            %phase,
            error = %failure,
            "lifecycle hook failed"
        );
    }
    result
}
