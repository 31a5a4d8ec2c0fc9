//! Loads the configuration documents and hands out per-stage records.

use super::entity::{
    DataIngestionConfig, EvaluationConfig, PrepareBaseModelConfig, TrainingConfig,
};
use super::schema::{ConfigDocument, ParamsDocument};
use crate::errors::{PipelineError, Result};
use crate::framework::{InputShape, OptimizerKind, WeightSource};
use crate::utils::{create_directories, read_yaml};
use std::path::{Path, PathBuf};

/// Default location of the structural configuration document.
pub const CONFIG_FILE_PATH: &str = "config/config.yaml";

/// Default location of the hyperparameter document.
pub const PARAMS_FILE_PATH: &str = "params.yaml";

/// Validated hyperparameters.
#[derive(Debug, Clone, PartialEq)]
struct Params {
    augmentation: bool,
    image_size: InputShape,
    batch_size: usize,
    include_top: bool,
    epochs: usize,
    classes: usize,
    learning_rate: f32,
    weights: WeightSource,
    freeze_till: Option<usize>,
    optimizer: OptimizerKind,
    seed: u64,
}

impl Params {
    fn from_document(doc: ParamsDocument, path: &Path) -> Result<Self> {
        let invalid = |message: String| PipelineError::config(path, message);

        let image_size = match doc.image_size.as_slice() {
            &[height, width, channels] => InputShape::new(height, width, channels),
            other => {
                return Err(invalid(format!(
                    "IMAGE_SIZE must be [height, width, channels], got {other:?}"
                )))
            }
        };
        if image_size.height == 0 || image_size.width == 0 {
            return Err(invalid(format!("IMAGE_SIZE has a zero dimension: {image_size}")));
        }
        if !matches!(image_size.channels, 1 | 3) {
            return Err(invalid(format!(
                "IMAGE_SIZE channels must be 1 or 3, got {}",
                image_size.channels
            )));
        }
        if doc.batch_size == 0 {
            return Err(invalid("BATCH_SIZE must be greater than zero".to_string()));
        }
        if doc.epochs == 0 {
            return Err(invalid("EPOCHS must be greater than zero".to_string()));
        }
        if doc.classes == 0 {
            return Err(invalid("CLASSES must be greater than zero".to_string()));
        }
        if !doc.learning_rate.is_finite() || doc.learning_rate <= 0.0 {
            return Err(invalid(format!(
                "LEARNING_RATE must be a positive number, got {}",
                doc.learning_rate
            )));
        }
        let optimizer = doc
            .optimizer
            .parse::<OptimizerKind>()
            .map_err(invalid)?;

        Ok(Self {
            augmentation: doc.augmentation,
            image_size,
            batch_size: doc.batch_size,
            include_top: doc.include_top,
            epochs: doc.epochs,
            classes: doc.classes,
            learning_rate: doc.learning_rate,
            weights: WeightSource::parse(&doc.weights),
            freeze_till: doc.freeze_till,
            optimizer,
            seed: doc.seed,
        })
    }
}

/// Source of every stage configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct ConfigurationManager {
    config: ConfigDocument,
    params: Params,
}

impl ConfigurationManager {
    /// Loads both documents and creates the artifacts root.
    pub fn new(config_path: impl AsRef<Path>, params_path: impl AsRef<Path>) -> Result<Self> {
        let config: ConfigDocument = read_yaml(config_path.as_ref())?;
        let params_doc: ParamsDocument = read_yaml(params_path.as_ref())?;
        let params = Params::from_document(params_doc, params_path.as_ref())?;

        create_directories(&[&config.artifacts_root])?;

        Ok(Self { config, params })
    }

    /// Loads `config/config.yaml` and `params.yaml` from the working directory.
    pub fn from_default_paths() -> Result<Self> {
        Self::new(CONFIG_FILE_PATH, PARAMS_FILE_PATH)
    }

    /// Returns the data ingestion record, creating its root directory.
    pub fn data_ingestion_config(&self) -> Result<DataIngestionConfig> {
        let section = &self.config.data_ingestion;
        create_directories(&[&section.root_dir])?;

        Ok(DataIngestionConfig {
            root_dir: section.root_dir.clone(),
            source_url: section.source_url.clone(),
            local_data_file: section.local_data_file.clone(),
            unzip_dir: section.unzip_dir.clone(),
        })
    }

    /// Returns the base model preparation record, creating its root directory.
    pub fn prepare_base_model_config(&self) -> Result<PrepareBaseModelConfig> {
        let section = &self.config.prepare_base_model;
        create_directories(&[&section.root_dir])?;

        Ok(PrepareBaseModelConfig {
            root_dir: section.root_dir.clone(),
            base_model_path: section.base_model_path.clone(),
            updated_base_model_path: section.updated_base_model_path.clone(),
            image_size: self.params.image_size,
            learning_rate: self.params.learning_rate,
            include_top: self.params.include_top,
            weights: self.params.weights.clone(),
            classes: self.params.classes,
            freeze_till: self.params.freeze_till,
            optimizer: self.params.optimizer,
            seed: self.params.seed,
        })
    }

    /// Returns the training record, creating its root directory.
    pub fn training_config(&self) -> Result<TrainingConfig> {
        let section = &self.config.training;
        create_directories(&[&section.root_dir])?;

        Ok(TrainingConfig {
            root_dir: section.root_dir.clone(),
            trained_model_path: section.trained_model_path.clone(),
            export_model_path: section.export_model_path.clone(),
            updated_base_model_path: self
                .config
                .prepare_base_model
                .updated_base_model_path
                .clone(),
            training_data: self.training_data(),
            epochs: self.params.epochs,
            batch_size: self.params.batch_size,
            augmentation: self.params.augmentation,
            image_size: self.params.image_size,
            seed: self.params.seed,
        })
    }

    /// Returns the evaluation record, creating its root directory.
    pub fn evaluation_config(&self) -> Result<EvaluationConfig> {
        let section = &self.config.evaluation;
        create_directories(&[&section.root_dir])?;

        Ok(EvaluationConfig {
            root_dir: section.root_dir.clone(),
            path_of_model: self.config.training.trained_model_path.clone(),
            training_data: self.training_data(),
            scores_path: section.scores_path.clone(),
            image_size: self.params.image_size,
            batch_size: self.params.batch_size,
        })
    }

    fn training_data(&self) -> PathBuf {
        let ingestion = &self.config.data_ingestion;
        ingestion.unzip_dir.join(&ingestion.dataset_dir)
    }
}
