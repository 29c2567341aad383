//! Concurrency bound applied when the worker is constructed.

use std::num::NonZeroUsize;
use std::thread;

use rolehost_config::HostConfig;

use crate::resolver::WorkerConfiguration;

/// Derives the bound on concurrently processed work items.
///
/// A bound published in the settings wins, then the host override, then
/// available processors times the multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyPolicy {
    multiplier: u32,
    fixed: Option<u32>,
}

impl ConcurrencyPolicy {
    /// Scales available processors by `multiplier`.
    #[must_use]
    pub fn per_processor(multiplier: u32) -> Self {
        Self {
            multiplier,
            fixed: None,
        }
    }

    /// Uses `bound` regardless of the processor count.
    #[must_use]
    pub fn fixed(bound: u32) -> Self {
        Self {
            multiplier: 1,
            fixed: Some(bound),
        }
    }

    /// Captures the concurrency settings of `config`.
    #[must_use]
    pub fn from_config(config: &HostConfig) -> Self {
        Self {
            multiplier: config.concurrency_multiplier(),
            fixed: config.max_concurrency(),
        }
    }

    /// Bound for a worker bound to `configuration`. Never zero.
    #[must_use]
    pub fn bound(&self, configuration: &WorkerConfiguration) -> usize {
        if let Some(bound) = configuration.max_concurrency() {
            return widen(bound.get());
        }
        if let Some(bound) = self.fixed.filter(|bound| *bound > 0) {
            return widen(bound);
        }
        let processors = thread::available_parallelism().map_or(1, NonZeroUsize::get);
        processors.saturating_mul(widen(self.multiplier)).max(1)
    }
}

impl Default for ConcurrencyPolicy {
    fn default() -> Self {
        Self::per_processor(rolehost_config::DEFAULT_CONCURRENCY_MULTIPLIER)
    }
}

fn widen(value: u32) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}
