//! Scoring the trained model on the validation split.

use super::training::validation_generator;
use super::Stage;
use crate::config::EvaluationConfig;
use crate::context::StageContext;
use crate::core::{ArtifactKind, StageArtifact};
use crate::data::BatchSource;
use crate::errors::{PipelineError, Result};
use crate::framework::{Framework, Scores};
use crate::utils::save_json;
use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

/// Evaluates the trained model and records its scores.
pub struct Evaluation<'a> {
    config: EvaluationConfig,
    framework: &'a dyn Framework,
    scores: Option<Scores>,
}

impl<'a> Evaluation<'a> {
    /// Creates the component.
    #[must_use]
    pub fn new(config: EvaluationConfig, framework: &'a dyn Framework) -> Self {
        Self {
            config,
            framework,
            scores: None,
        }
    }

    /// Runs one full pass over a fresh validation generator.
    pub fn evaluation(&mut self) -> Result<Scores> {
        let model = self.framework.load_model(&self.config.path_of_model, true)?;
        let mut valid = validation_generator(
            &self.config.training_data,
            self.config.image_size,
            self.config.batch_size,
        )?;
        if valid.samples() == 0 {
            return Err(PipelineError::Evaluation(format!(
                "the validation split of {} is empty",
                self.config.training_data.display()
            )));
        }

        let steps = valid.len();
        let scores = self.framework.evaluate(&model, &mut valid, steps)?;
        if !scores.is_finite() {
            return Err(PipelineError::Evaluation(format!(
                "non-finite scores: loss={} accuracy={}",
                scores.loss, scores.accuracy
            )));
        }

        info!(loss = scores.loss, accuracy = scores.accuracy, steps, "Evaluation finished");
        self.scores = Some(scores);
        Ok(scores)
    }

    /// Writes `{"loss", "accuracy"}` to `scores_path`.
    pub fn save_score(&self) -> Result<PathBuf> {
        let scores = self.scores.ok_or_else(|| {
            PipelineError::Evaluation("evaluation must run before save_score".to_string())
        })?;
        save_json(&self.config.scores_path, &scores)?;
        info!(path = %self.config.scores_path.display(), "Scores saved");
        Ok(self.config.scores_path.clone())
    }
}

/// Stage 4: evaluate and persist the scores.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvaluationStage;

impl EvaluationStage {
    /// Stage name used in log markers.
    pub const NAME: &'static str = "Evaluation Stage";
}

#[async_trait]
impl Stage for EvaluationStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, ctx: &StageContext) -> Result<Vec<StageArtifact>> {
        let config = ctx.configs().evaluation_config()?;
        let (scores, path) = {
            let mut evaluation = Evaluation::new(config, ctx.framework());
            let scores = evaluation.evaluation()?;
            (scores, evaluation.save_score()?)
        };

        ctx.emit_event(
            "evaluation.scored",
            Some(json!({"loss": scores.loss, "accuracy": scores.accuracy})),
        )
        .await;

        Ok(vec![StageArtifact::file(ArtifactKind::Scores, path)?])
    }
}
