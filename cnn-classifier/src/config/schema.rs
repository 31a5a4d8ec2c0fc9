//! On-disk shapes of `config/config.yaml` and `params.yaml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The structural configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigDocument {
    /// Root of every stage's artifact directory.
    pub artifacts_root: PathBuf,
    /// Data ingestion section.
    pub data_ingestion: DataIngestionSection,
    /// Base model preparation section.
    pub prepare_base_model: PrepareBaseModelSection,
    /// Training section.
    pub training: TrainingSection,
    /// Evaluation section.
    pub evaluation: EvaluationSection,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataIngestionSection {
    pub root_dir: PathBuf,
    #[serde(rename = "source_URL")]
    pub source_url: String,
    pub local_data_file: PathBuf,
    pub unzip_dir: PathBuf,
    /// Folder inside `unzip_dir` holding one subdirectory per class.
    pub dataset_dir: PathBuf,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrepareBaseModelSection {
    pub root_dir: PathBuf,
    pub base_model_path: PathBuf,
    pub updated_base_model_path: PathBuf,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainingSection {
    pub root_dir: PathBuf,
    pub trained_model_path: PathBuf,
    pub export_model_path: PathBuf,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvaluationSection {
    pub root_dir: PathBuf,
    pub scores_path: PathBuf,
}

/// The hyperparameter document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ParamsDocument {
    /// Whether the training generator augments images.
    pub augmentation: bool,
    /// `[height, width, channels]`.
    pub image_size: Vec<usize>,
    /// Images per batch.
    pub batch_size: usize,
    /// Whether the backbone keeps its own classification layer.
    pub include_top: bool,
    /// Number of training epochs.
    pub epochs: usize,
    /// Number of output classes.
    pub classes: usize,
    /// Learning rate for the compiled head.
    pub learning_rate: f32,
    /// `none` or a path to a saved model to take backbone weights from.
    #[serde(default = "default_weights")]
    pub weights: String,
    /// Number of leading layers to freeze; `null` freezes all of them.
    #[serde(default)]
    pub freeze_till: Option<usize>,
    /// `sgd` or `adam`.
    #[serde(default = "default_optimizer")]
    pub optimizer: String,
    /// Seed for weight initialisation and shuffling.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_weights() -> String {
    "none".to_string()
}

fn default_optimizer() -> String {
    "sgd".to_string()
}

const fn default_seed() -> u64 {
    42
}
