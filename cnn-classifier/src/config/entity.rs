//! Typed, per-stage configuration records.
//!
//! Each record is produced by [`super::ConfigurationManager`] and handed to
//! exactly one component, which only ever reads it.

use crate::framework::{InputShape, OptimizerKind, WeightSource};
use std::path::PathBuf;

/// Everything the data ingestion stage needs.
#[derive(Debug, Clone, PartialEq)]
pub struct DataIngestionConfig {
    /// Stage artifact directory.
    pub root_dir: PathBuf,
    /// Shareable-drive URL of the dataset archive.
    pub source_url: String,
    /// Where the archive is downloaded to.
    pub local_data_file: PathBuf,
    /// Where the archive is extracted to.
    pub unzip_dir: PathBuf,
}

/// Everything the base model preparation stage needs.
#[derive(Debug, Clone, PartialEq)]
pub struct PrepareBaseModelConfig {
    /// Stage artifact directory.
    pub root_dir: PathBuf,
    /// Where the untouched backbone is saved.
    pub base_model_path: PathBuf,
    /// Where the frozen backbone plus new head is saved.
    pub updated_base_model_path: PathBuf,
    /// Model input shape.
    pub image_size: InputShape,
    /// Learning rate the updated model is compiled with.
    pub learning_rate: f32,
    /// Whether the backbone keeps its own top layer.
    pub include_top: bool,
    /// Where backbone weights come from.
    pub weights: WeightSource,
    /// Width of the new classification head.
    pub classes: usize,
    /// `None` freezes every backbone layer, `Some(k)` the first `k`.
    pub freeze_till: Option<usize>,
    /// Optimizer the updated model is compiled with.
    pub optimizer: OptimizerKind,
    /// Seed for weight initialisation.
    pub seed: u64,
}

/// Everything the training stage needs.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    /// Stage artifact directory.
    pub root_dir: PathBuf,
    /// Where the fitted model is saved.
    pub trained_model_path: PathBuf,
    /// Convenience copy of the fitted model.
    pub export_model_path: PathBuf,
    /// Model produced by base model preparation.
    pub updated_base_model_path: PathBuf,
    /// Directory with one subdirectory per class.
    pub training_data: PathBuf,
    /// Number of epochs.
    pub epochs: usize,
    /// Images per batch.
    pub batch_size: usize,
    /// Whether the training generator augments images.
    pub augmentation: bool,
    /// Model input shape.
    pub image_size: InputShape,
    /// Seed for shuffling and augmentation.
    pub seed: u64,
}

/// Everything the evaluation stage needs.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationConfig {
    /// Stage artifact directory.
    pub root_dir: PathBuf,
    /// The fitted model.
    pub path_of_model: PathBuf,
    /// Directory with one subdirectory per class.
    pub training_data: PathBuf,
    /// Where `{loss, accuracy}` is written.
    pub scores_path: PathBuf,
    /// Model input shape.
    pub image_size: InputShape,
    /// Images per batch.
    pub batch_size: usize,
}
