//! Test harness utilities for the lifecycle and process suites.

mod calls;
mod doubles;
mod environment;
mod host;
mod reporter;
mod service;
mod world;

pub use calls::Call;
pub use doubles::TriggeredShutdown;
pub use host::{
    Host, MESSAGING, STORAGE_A, STORAGE_B, WORKER_ID, join_within, valid_settings,
    wait_until,
};
pub use reporter::{HealthEvent, RecordingHealthReporter};
pub use world::{ProcessWorld, TestWorld, process_world, world};
