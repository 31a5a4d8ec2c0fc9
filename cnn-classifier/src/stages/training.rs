//! Fine-tuning on the extracted dataset.

use super::Stage;
use crate::config::TrainingConfig;
use crate::context::StageContext;
use crate::core::{ArtifactKind, StageArtifact};
use crate::data::{
    steps_for, AugmentationPolicy, BatchSource, DirectoryIterator, FlowOptions,
    ImageDataGenerator, Subset,
};
use crate::errors::{PipelineError, Result};
use crate::framework::{
    CompileConfig, FitOptions, Framework, History, InputShape, Loss, Model, OptimizerKind,
};
use crate::utils::create_directories;
use async_trait::async_trait;
use serde_json::json;
use std::fs;
use std::path::Path;
use tracing::info;

/// Pixel scale applied by every generator.
pub(crate) const RESCALE: f32 = 1.0 / 255.0;
/// Fraction of each class held out for validation.
pub(crate) const VALIDATION_SPLIT: f64 = 0.2;
/// Learning rate used when the training stage recompiles the model.
const ADAM_DEFAULT_LEARNING_RATE: f32 = 0.001;

/// The unshuffled, unaugmented validation subset of `directory`.
pub(crate) fn validation_generator(
    directory: &Path,
    image_size: InputShape,
    batch_size: usize,
) -> Result<DirectoryIterator> {
    ImageDataGenerator::new(RESCALE, VALIDATION_SPLIT).flow_from_directory(
        directory,
        FlowOptions::new(image_size, batch_size)
            .with_subset(Subset::Validation)
            .with_shuffle(false),
    )
}

/// Loads the updated base model, fits it and saves the result.
pub struct Training<'a> {
    config: TrainingConfig,
    framework: &'a dyn Framework,
    model: Option<Model>,
    generators: Option<(DirectoryIterator, DirectoryIterator)>,
}

impl<'a> Training<'a> {
    /// Creates the component.
    #[must_use]
    pub fn new(config: TrainingConfig, framework: &'a dyn Framework) -> Self {
        Self {
            config,
            framework,
            model: None,
            generators: None,
        }
    }

    /// Loads the updated base model without its optimizer state and
    /// recompiles it with Adam.
    ///
    /// A single output unit selects binary cross-entropy, anything else
    /// sparse categorical cross-entropy.
    pub fn get_base_model(&mut self) -> Result<&Model> {
        let mut model = self
            .framework
            .load_model(&self.config.updated_base_model_path, false)?;
        let loss = Loss::for_output_shape(&model.output_shape());
        model.compile(CompileConfig::new(
            OptimizerKind::Adam,
            ADAM_DEFAULT_LEARNING_RATE,
            loss,
        ));
        info!(loss = %loss, output_shape = ?model.output_shape(), "Recompiled base model");
        Ok(self.model.insert(model))
    }

    /// Builds the training and validation generators over `training_data`.
    pub fn train_valid_generator(&mut self) -> Result<()> {
        let image_size = self.config.image_size;
        let batch_size = self.config.batch_size;

        let valid = validation_generator(&self.config.training_data, image_size, batch_size)?;

        let mut train_gen = ImageDataGenerator::new(RESCALE, VALIDATION_SPLIT);
        if self.config.augmentation {
            train_gen = train_gen.with_augmentation(AugmentationPolicy::standard());
        }
        let train = train_gen.flow_from_directory(
            &self.config.training_data,
            FlowOptions::new(image_size, batch_size)
                .with_subset(Subset::Training)
                .with_shuffle(true)
                .with_seed(self.config.seed),
        )?;

        self.generators = Some((train, valid));
        Ok(())
    }

    /// Fits for `epochs` epochs and saves to `trained_model_path`.
    pub fn train(&mut self) -> Result<History> {
        let (model, (train, valid)) = match (self.model.as_mut(), self.generators.as_mut()) {
            (Some(model), Some(generators)) => (model, generators),
            _ => {
                return Err(PipelineError::Training(
                    "get_base_model and train_valid_generator must run before train".to_string(),
                ))
            }
        };

        let options = FitOptions {
            epochs: self.config.epochs,
            steps_per_epoch: steps_for(train.samples(), train.batch_size()),
            validation_steps: steps_for(valid.samples(), valid.batch_size()),
        };
        info!(
            steps_per_epoch = options.steps_per_epoch,
            validation_steps = options.validation_steps,
            epochs = options.epochs,
            "Starting fit"
        );

        let history = self
            .framework
            .fit(model, train, Some(valid as &mut dyn BatchSource), &options)?;
        self.framework
            .save_model(model, &self.config.trained_model_path)?;
        info!(path = %self.config.trained_model_path.display(), "Trained model saved");
        Ok(history)
    }

    /// Copies the trained model to `export_model_path`.
    pub fn export_model(&self) -> Result<()> {
        let target = &self.config.export_model_path;
        if let Some(parent) = target.parent() {
            create_directories(&[parent])?;
        }
        fs::copy(&self.config.trained_model_path, target)
            .map_err(|e| PipelineError::io(&self.config.trained_model_path, e))?;
        info!("Trained model copied to {}", target.display());
        Ok(())
    }
}

/// Stage 3: fine-tune the updated base model.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrainingStage;

impl TrainingStage {
    /// Stage name used in log markers.
    pub const NAME: &'static str = "Model Training Stage";
}

#[async_trait]
impl Stage for TrainingStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, ctx: &StageContext) -> Result<Vec<StageArtifact>> {
        let config = ctx.configs().training_config()?;
        let trained_path = config.trained_model_path.clone();
        let export_path = config.export_model_path.clone();

        let history = {
            let mut training = Training::new(config, ctx.framework());
            training.get_base_model()?;
            training.train_valid_generator()?;
            let history = training.train()?;
            training.export_model()?;
            history
        };

        ctx.emit_event(
            "training.completed",
            Some(json!({
                "epochs": history.epochs.len(),
                "final": history.last(),
            })),
        )
        .await;

        Ok(vec![
            StageArtifact::file(ArtifactKind::Model, trained_path)?,
            StageArtifact::file(ArtifactKind::Model, export_path)?,
        ])
    }
}
