//! Files and directories produced by stages.

use crate::errors::Result;
use crate::utils::get_size;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// What an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A downloaded archive.
    Archive,
    /// An extracted directory tree.
    Directory,
    /// A saved model.
    Model,
    /// A scores document.
    Scores,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Archive => write!(f, "archive"),
            Self::Directory => write!(f, "directory"),
            Self::Model => write!(f, "model"),
            Self::Scores => write!(f, "scores"),
        }
    }
}

/// An artifact on disk, identified by its path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageArtifact {
    /// What the artifact holds.
    pub kind: ArtifactKind,
    /// Where it lives.
    pub path: PathBuf,
    /// Size at creation, e.g. `~ 12 KB`; `None` for directories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    /// When the artifact was recorded (ISO 8601).
    pub created_at: String,
}

impl StageArtifact {
    /// Records an existing file, capturing its size.
    pub fn file(kind: ArtifactKind, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Ok(Self {
            kind,
            path: path.to_path_buf(),
            size: Some(get_size(path)?),
            created_at: crate::utils::iso_timestamp(),
        })
    }

    /// Records a directory.
    #[must_use]
    pub fn directory(path: impl AsRef<Path>) -> Self {
        Self {
            kind: ArtifactKind::Directory,
            path: path.as_ref().to_path_buf(),
            size: None,
            created_at: crate::utils::iso_timestamp(),
        }
    }

    /// Returns true if the artifact is present on disk.
    #[must_use]
    pub fn exists(&self) -> bool {
        match self.kind {
            ArtifactKind::Directory => self.path.is_dir(),
            _ => self.path.is_file(),
        }
    }
}

impl fmt::Display for StageArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.path.display())?;
        if let Some(size) = &self.size {
            write!(f, " ({size})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_artifact_records_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.zip");
        std::fs::write(&path, vec![0_u8; 3 * 1024]).unwrap();

        let artifact = StageArtifact::file(ArtifactKind::Archive, &path).unwrap();
        assert_eq!(artifact.size.as_deref(), Some("~ 3 KB"));
        assert!(artifact.exists());
        assert!(artifact.to_string().starts_with("archive "));
    }

    #[test]
    fn test_file_artifact_requires_file() {
        let dir = tempdir().unwrap();
        let err = StageArtifact::file(ArtifactKind::Model, dir.path().join("missing.json")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_directory_artifact_existence() {
        let dir = tempdir().unwrap();
        let artifact = StageArtifact::directory(dir.path());
        assert!(artifact.exists());
        assert!(artifact.size.is_none());

        let gone = StageArtifact::directory(dir.path().join("nope"));
        assert!(!gone.exists());
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&ArtifactKind::Scores).unwrap(), r#""scores""#);
    }
}
