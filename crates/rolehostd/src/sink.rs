//! Host trace sink.
//!
//! Operators of the hosting platform read a plain line-oriented trace in
//! addition to the structured telemetry stream. Every line carries a UTC
//! timestamp followed by ` : ` and the message.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::info;

const TRACE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::trace");

/// Destination for human-readable trace lines.
pub trait LogSink: Send + Sync {
    /// Writes one message. Implementations add the timestamp.
    fn write_line(&self, message: &str);
}

/// Formats a trace line as `<timestamp> : <message>`.
#[must_use]
pub fn format_trace_line(timestamp: OffsetDateTime, message: &str) -> String {
    let stamp = timestamp
        .format(&Rfc3339)
        .unwrap_or_else(|_| timestamp.unix_timestamp().to_string());
    format!("{stamp} : {message}")
}

/// Sink that forwards lines to `tracing` and optionally appends them to a
/// file.
#[derive(Debug, Default)]
pub struct HostTraceSink {
    file: Option<Mutex<File>>,
}

impl HostTraceSink {
    /// Builds a sink that only emits through `tracing`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a sink that also appends to `path`.
    pub fn with_file(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Some(Mutex::new(file)),
        })
    }
}

impl LogSink for HostTraceSink {
    fn write_line(&self, message: &str) {
        let line = format_trace_line(OffsetDateTime::now_utc(), message);
        info!(target: TRACE_TARGET, "{line}");
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
            // Trace output is best effort; a full disk must not take the host down.
            let _ = writeln!(file, "{line}");
        }
    }
}
