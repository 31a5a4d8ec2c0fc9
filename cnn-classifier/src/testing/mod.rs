//! Test doubles and fixture builders.
//!
//! Fixture builders panic on I/O failure; they are meant for tests and
//! benchmarks only.

mod fixtures;
mod mocks;

pub use fixtures::{write_config_files, write_image_dataset, zip_directory};
pub use mocks::{FailingStage, LocalFileFetcher, RecordingStage, StaticBatches};
