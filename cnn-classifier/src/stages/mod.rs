//! The four training stages and the trait they share.
//!
//! Each stage wraps one component (`DataIngestion`, `PrepareBaseModel`,
//! `Training`, `Evaluation`). The component owns its configuration record and
//! does the work; the stage fetches that record from the context, drives the
//! component and reports the artifacts it left on disk.

mod evaluation;
mod ingestion;
mod prepare_base_model;
mod result;
mod training;

pub use evaluation::{Evaluation, EvaluationStage};
pub use ingestion::{drive_download_url, DataIngestion, DataIngestionStage, Fetcher, HttpFetcher};
#[cfg(test)]
pub use ingestion::MockFetcher;
pub use prepare_base_model::{PrepareBaseModel, PrepareBaseModelStage};
pub use result::StageResult;
pub use training::{Training, TrainingStage};

use crate::context::StageContext;
use crate::core::StageArtifact;
use crate::errors::Result;
use async_trait::async_trait;
use std::fmt::Debug;

/// A unit of work in the pipeline.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name used in log markers and events.
    fn name(&self) -> &str;

    /// Runs the stage and returns the artifacts it produced.
    ///
    /// Every returned artifact must exist on disk when this returns `Ok`.
    async fn run(&self, ctx: &StageContext) -> Result<Vec<StageArtifact>>;
}
