//! Error types for the classifier pipeline.
//!
//! Every stage, component and utility reports failures through the single
//! closed [`PipelineError`] enum. Errors are raised where the failure happens
//! and travel up unchanged; the orchestrator only logs them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// The main error type for pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A configuration document is missing, malformed, or fails validation.
    #[error("Failed to load configuration from {path}: {message}")]
    ConfigLoad {
        /// The offending document.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// The dataset download failed (bad URL shape, network or HTTP error).
    #[error("Download failed: {0}")]
    Download(String),

    /// The downloaded archive could not be extracted.
    #[error("Failed to extract {archive}: {message}")]
    Extraction {
        /// The archive being extracted.
        archive: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// The framework could not construct or adapt a model.
    #[error("Model build error: {0}")]
    ModelBuild(String),

    /// The fit loop failed.
    #[error("Training error: {0}")]
    Training(String),

    /// Model evaluation failed.
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// The image dataset could not be read or split.
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// A stage reported an artifact that is not on disk.
    #[error("Stage '{stage}' did not produce artifact {path}")]
    MissingArtifact {
        /// The stage that reported the artifact.
        stage: String,
        /// The missing path.
        path: PathBuf,
    },

    /// A file read or write failed.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PipelineError {
    /// Creates an I/O error bound to a path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Creates a configuration load error.
    #[must_use]
    pub fn config(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Creates an extraction error.
    #[must_use]
    pub fn extraction(archive: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Extraction {
            archive: archive.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Returns true if this is an I/O error caused by a missing file.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }

    /// Returns a stable short name for the error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigLoad { .. } => "ConfigLoadError",
            Self::Download(_) => "DownloadError",
            Self::Extraction { .. } => "ExtractionError",
            Self::ModelBuild(_) => "ModelBuildError",
            Self::Training(_) => "TrainingError",
            Self::Evaluation(_) => "EvaluationError",
            Self::Dataset(_) => "DatasetError",
            Self::MissingArtifact { .. } => "MissingArtifactError",
            Self::Io { .. } => "IOError",
            Self::Serialization(_) => "SerializationError",
        }
    }

    /// Converts to a dictionary representation for event payloads.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.kind()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        match self {
            Self::ConfigLoad { path, .. } | Self::Io { path, .. } => {
                map.insert("path".to_string(), serde_json::json!(path.display().to_string()));
            }
            Self::Extraction { archive, .. } => {
                map.insert("archive".to_string(), serde_json::json!(archive.display().to_string()));
            }
            Self::MissingArtifact { stage, path } => {
                map.insert("stage".to_string(), serde_json::json!(stage));
                map.insert("path".to_string(), serde_json::json!(path.display().to_string()));
            }
            _ => {}
        }
        map
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
