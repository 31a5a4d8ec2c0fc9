//! Configuration documents and the per-stage records built from them.

mod entity;
mod manager;
pub mod schema;

pub use entity::{DataIngestionConfig, EvaluationConfig, PrepareBaseModelConfig, TrainingConfig};
pub use manager::{ConfigurationManager, CONFIG_FILE_PATH, PARAMS_FILE_PATH};
