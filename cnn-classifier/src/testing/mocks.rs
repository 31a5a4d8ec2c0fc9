//! Test doubles for stages, fetchers and batch sources.

use crate::context::StageContext;
use crate::core::{ArtifactKind, StageArtifact};
use crate::data::{Batch, BatchSource};
use crate::errors::{PipelineError, Result};
use crate::stages::{Fetcher, Stage};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A stage that appends its name to a shared log and optionally reports an
/// artifact.
#[derive(Debug, Clone)]
pub struct RecordingStage {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
    artifact: Option<PathBuf>,
    write_artifact: bool,
}

impl RecordingStage {
    /// Creates a stage that only records its call.
    #[must_use]
    pub fn new(name: impl Into<String>, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.into(),
            log,
            artifact: None,
            write_artifact: false,
        }
    }

    /// Writes `path` when run and reports it as an artifact.
    #[must_use]
    pub fn with_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact = Some(path.into());
        self.write_artifact = true;
        self
    }

    /// Reports `path` as an artifact without writing it.
    #[must_use]
    pub fn with_phantom_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact = Some(path.into());
        self.write_artifact = false;
        self
    }
}

#[async_trait]
impl Stage for RecordingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &StageContext) -> Result<Vec<StageArtifact>> {
        self.log.lock().push(self.name.clone());
        let Some(path) = &self.artifact else {
            return Ok(Vec::new());
        };
        if self.write_artifact {
            crate::utils::save_bin(self.name.as_bytes(), path)?;
            return Ok(vec![StageArtifact::file(ArtifactKind::Scores, path)?]);
        }
        Ok(vec![StageArtifact {
            kind: ArtifactKind::Scores,
            path: path.clone(),
            size: None,
            created_at: crate::utils::iso_timestamp(),
        }])
    }
}

type ErrorFactory = Box<dyn Fn() -> PipelineError + Send + Sync>;

/// A stage that always fails with the error its factory builds.
pub struct FailingStage {
    name: String,
    make_error: ErrorFactory,
}

impl FailingStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        make_error: impl Fn() -> PipelineError + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            make_error: Box::new(make_error),
        }
    }
}

impl fmt::Debug for FailingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailingStage")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for FailingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &StageContext) -> Result<Vec<StageArtifact>> {
        Err((self.make_error)())
    }
}

/// Serves every download from a local file and remembers requested URLs.
#[derive(Debug, Default)]
pub struct LocalFileFetcher {
    source: PathBuf,
    requested: Mutex<Vec<String>>,
}

impl LocalFileFetcher {
    /// Creates a fetcher that copies `source` on every request.
    #[must_use]
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            requested: Mutex::new(Vec::new()),
        }
    }

    /// URLs requested so far.
    #[must_use]
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().clone()
    }
}

#[async_trait]
impl Fetcher for LocalFileFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
        self.requested.lock().push(url.to_string());
        tokio::fs::copy(&self.source, dest)
            .await
            .map_err(|e| PipelineError::io(&self.source, e))
    }
}

/// Replays a fixed list of batches forever.
#[derive(Debug, Clone)]
pub struct StaticBatches {
    batches: Vec<Batch>,
    cursor: usize,
}

impl StaticBatches {
    /// Creates the source.
    #[must_use]
    pub const fn new(batches: Vec<Batch>) -> Self {
        Self { batches, cursor: 0 }
    }
}

impl BatchSource for StaticBatches {
    fn next_batch(&mut self) -> Result<Batch> {
        if self.batches.is_empty() {
            return Err(PipelineError::Dataset("no batches configured".to_string()));
        }
        let batch = self.batches[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.batches.len();
        Ok(batch)
    }

    fn samples(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }

    fn batch_size(&self) -> usize {
        self.batches.first().map_or(0, Batch::len)
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }
}
