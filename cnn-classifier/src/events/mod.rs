//! Structured lifecycle events.
//!
//! Components receive an `Arc<dyn EventSink>` and report what they did under
//! the names below. Stage-specific events use the stage's own prefix
//! (`ingestion.`, `base_model.`, `training.`, `evaluation.`).

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RecordedEvent};

/// A run has begun.
pub const PIPELINE_STARTED: &str = "pipeline.started";
/// Every stage finished.
pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
/// A stage failed and the run stopped.
pub const PIPELINE_FAILED: &str = "pipeline.failed";
/// A stage is about to run.
pub const STAGE_STARTED: &str = "stage.started";
/// A stage finished and its artifacts exist.
pub const STAGE_COMPLETED: &str = "stage.completed";
/// A stage returned an error.
pub const STAGE_FAILED: &str = "stage.failed";
