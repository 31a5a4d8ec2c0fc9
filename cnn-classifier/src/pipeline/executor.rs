//! Sequential stage execution.

use super::PipelineBuilder;
use crate::context::StageContext;
use crate::core::StageArtifact;
use crate::errors::{PipelineError, Result};
use crate::events::{
    PIPELINE_COMPLETED, PIPELINE_FAILED, PIPELINE_STARTED, STAGE_COMPLETED, STAGE_FAILED,
    STAGE_STARTED,
};
use crate::stages::{
    DataIngestionStage, EvaluationStage, Fetcher, PrepareBaseModelStage, Stage, StageResult,
    TrainingStage,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Name of the built-in four-stage pipeline.
pub const TRAINING_PIPELINE: &str = "cnn-classifier";

/// An ordered list of stages.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub(super) fn new(name: String, stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { name, stages }
    }

    /// Starts a builder.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    /// Ingestion, base model preparation, training and evaluation, downloading
    /// over HTTP.
    #[must_use]
    pub fn training() -> Self {
        Self::training_builder(Arc::new(DataIngestionStage::default())).build()
    }

    /// The same four stages with a custom dataset fetcher.
    #[must_use]
    pub fn training_with_fetcher(fetcher: Arc<dyn Fetcher>) -> Self {
        Self::training_builder(Arc::new(DataIngestionStage::new(fetcher))).build()
    }

    fn training_builder(ingestion: Arc<dyn Stage>) -> PipelineBuilder {
        Self::builder(TRAINING_PIPELINE)
            .stage(ingestion)
            .stage(Arc::new(PrepareBaseModelStage))
            .stage(Arc::new(TrainingStage))
            .stage(Arc::new(EvaluationStage))
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Runs every stage in order.
    ///
    /// A stage succeeds only if it returns `Ok` and every artifact it reports
    /// exists. The first failure is logged, reported through the event sink
    /// and returned unchanged; later stages do not run.
    pub async fn run(&self, ctx: &StageContext) -> Result<PipelineRun> {
        let started_at = Utc::now();
        info!(
            pipeline = %self.name,
            run_id = %ctx.run_id(),
            stages = self.stages.len(),
            "Pipeline started"
        );
        ctx.emit_event(
            PIPELINE_STARTED,
            Some(json!({"pipeline": self.name, "stages": self.stage_names()})),
        )
        .await;

        let mut results = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            let name = stage.name();
            let stage_started = Utc::now();
            info!(">>>>>> Stage {name} started <<<<<<");
            ctx.emit_event(STAGE_STARTED, Some(json!({"stage": name}))).await;

            match run_stage(stage.as_ref(), ctx).await {
                Ok(artifacts) => {
                    for artifact in &artifacts {
                        info!(stage = name, kind = %artifact.kind, "Artifact: {artifact}");
                    }
                    let result = StageResult::completed(name, stage_started, artifacts);
                    ctx.emit_event(
                        STAGE_COMPLETED,
                        Some(json!({
                            "stage": name,
                            "duration_ms": result.duration_ms(),
                            "artifacts": result.artifacts,
                        })),
                    )
                    .await;
                    results.push(result);
                    info!(">>>>>> Stage {name} completed <<<<<<\n\nx==========x");
                }
                Err(err) => {
                    let failed = StageResult::failed(name, stage_started, err.to_string());
                    error!(
                        stage = name,
                        error_kind = err.kind(),
                        duration_ms = failed.duration_ms(),
                        ">>>>>> Stage {name} failed <<<<<<: {err}"
                    );
                    ctx.emit_event(
                        STAGE_FAILED,
                        Some(json!({
                            "stage": name,
                            "duration_ms": failed.duration_ms(),
                            "error": err.to_dict(),
                        })),
                    )
                    .await;
                    ctx.emit_event(
                        PIPELINE_FAILED,
                        Some(json!({
                            "pipeline": self.name,
                            "stage": name,
                            "completed_stages": results.len(),
                            "error": err.to_string(),
                        })),
                    )
                    .await;
                    return Err(err);
                }
            }
        }

        let run = PipelineRun {
            run_id: ctx.run_id(),
            pipeline: self.name.clone(),
            started_at,
            ended_at: Utc::now(),
            results,
        };
        run.log_summary();
        ctx.emit_event(
            PIPELINE_COMPLETED,
            Some(json!({"pipeline": self.name, "duration_ms": run.duration_ms()})),
        )
        .await;
        Ok(run)
    }
}

async fn run_stage(stage: &dyn Stage, ctx: &StageContext) -> Result<Vec<StageArtifact>> {
    let artifacts = stage.run(ctx).await?;
    if let Some(missing) = artifacts.iter().find(|a| !a.exists()) {
        return Err(PipelineError::MissingArtifact {
            stage: stage.name().to_string(),
            path: missing.path.clone(),
        });
    }
    Ok(artifacts)
}

/// Record of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    /// Run id, shared with every emitted event.
    pub run_id: Uuid,
    /// Pipeline name.
    pub pipeline: String,
    /// When the first stage started.
    pub started_at: DateTime<Utc>,
    /// When the last stage ended.
    pub ended_at: DateTime<Utc>,
    /// One result per stage, in execution order.
    pub results: Vec<StageResult>,
}

impl PipelineRun {
    /// Wall-clock duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds()
    }

    /// Looks up a stage result by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.results.iter().find(|r| r.name == name)
    }

    /// Logs one line per stage with its timing and artifact count.
    pub fn log_summary(&self) {
        for result in &self.results {
            info!(
                stage = %result.name,
                status = ?result.status,
                duration_ms = result.duration_ms(),
                artifacts = result.artifacts.len(),
                "Stage summary"
            );
        }
        info!(
            pipeline = %self.pipeline,
            run_id = %self.run_id,
            duration_ms = self.duration_ms(),
            "Pipeline completed"
        );
    }
}
