//! Backbone construction and classification head.

use super::Stage;
use crate::config::PrepareBaseModelConfig;
use crate::context::StageContext;
use crate::core::{ArtifactKind, StageArtifact};
use crate::errors::{PipelineError, Result};
use crate::framework::{
    Activation, BackboneSpec, CompileConfig, Framework, Layer, Loss, Model,
};
use async_trait::async_trait;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tracing::info;

const HEAD_NAME: &str = "dense_head";

/// Builds the base model and the fine-tuning model derived from it.
pub struct PrepareBaseModel<'a> {
    config: PrepareBaseModelConfig,
    framework: &'a dyn Framework,
    model: Option<Model>,
}

impl<'a> PrepareBaseModel<'a> {
    /// Creates the component.
    #[must_use]
    pub fn new(config: PrepareBaseModelConfig, framework: &'a dyn Framework) -> Self {
        Self {
            config,
            framework,
            model: None,
        }
    }

    /// Obtains the backbone from the framework and saves it to
    /// `base_model_path`.
    pub fn get_base_model(&mut self) -> Result<&Model> {
        let spec = BackboneSpec {
            input_shape: self.config.image_size,
            weights: self.config.weights.clone(),
            include_top: self.config.include_top,
            seed: self.config.seed,
        };
        let model = self.framework.backbone(&spec)?;
        self.framework
            .save_model(&model, &self.config.base_model_path)?;
        info!(
            path = %self.config.base_model_path.display(),
            params = model.param_count(),
            "Base model saved"
        );
        Ok(self.model.insert(model))
    }

    /// Freezes the backbone, appends the classification head, compiles, and
    /// saves the result to `updated_base_model_path`.
    ///
    /// Uses the backbone from [`Self::get_base_model`], or loads it from
    /// `base_model_path` when this instance has not built one.
    pub fn update_base_model(&mut self) -> Result<Model> {
        let mut model = match self.model.take() {
            Some(model) => model,
            None => self
                .framework
                .load_model(&self.config.base_model_path, false)?,
        };

        model.freeze(self.config.freeze_till);
        model.push(self.classification_head(model.output_size())?)?;

        let loss = Loss::for_output_shape(&model.output_shape());
        model.compile(CompileConfig::new(
            self.config.optimizer,
            self.config.learning_rate,
            loss,
        ));

        self.framework
            .save_model(&model, &self.config.updated_base_model_path)?;
        info!(
            path = %self.config.updated_base_model_path.display(),
            loss = %loss,
            optimizer = %self.config.optimizer,
            "Updated base model saved"
        );
        info!("\n{}", model.summary());
        Ok(model)
    }

    fn classification_head(&self, inputs: usize) -> Result<Layer> {
        let classes = self.config.classes;
        if classes == 0 {
            return Err(PipelineError::ModelBuild(
                "the classification head needs at least one class".to_string(),
            ));
        }
        let activation = if classes == 1 {
            Activation::Sigmoid
        } else {
            Activation::Softmax
        };

        let limit = (6.0 / (inputs + classes) as f32).sqrt();
        let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(1));
        let weights = Array2::from_shape_fn((inputs, classes), |_| rng.gen_range(-limit..limit));
        Ok(Layer::dense(HEAD_NAME, weights, Array1::zeros(classes), activation))
    }
}

/// Stage 2: build, freeze and extend the backbone.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrepareBaseModelStage;

impl PrepareBaseModelStage {
    /// Stage name used in log markers.
    pub const NAME: &'static str = "Prepare Base Model Stage";
}

#[async_trait]
impl Stage for PrepareBaseModelStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, ctx: &StageContext) -> Result<Vec<StageArtifact>> {
        let config = ctx.configs().prepare_base_model_config()?;
        let base_path = config.base_model_path.clone();
        let updated_path = config.updated_base_model_path.clone();

        let mut component = PrepareBaseModel::new(config, ctx.framework());
        component.get_base_model()?;
        let model = component.update_base_model()?;

        ctx.emit_event(
            "base_model.prepared",
            Some(json!({
                "params": model.param_count(),
                "trainable_params": model.trainable_param_count(),
                "output_units": model.output_size(),
            })),
        )
        .await;

        Ok(vec![
            StageArtifact::file(ArtifactKind::Model, base_path)?,
            StageArtifact::file(ArtifactKind::Model, updated_path)?,
        ])
    }
}
