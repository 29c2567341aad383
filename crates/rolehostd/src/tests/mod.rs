//! Test suites for the role host.

use std::sync::Mutex;

use once_cell::sync::Lazy;

mod support;

/// Held by tests that write process environment variables.
pub(crate) static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));
