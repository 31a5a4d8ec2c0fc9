//! Pipeline builder.

use super::Pipeline;
use crate::stages::Stage;
use std::sync::Arc;

/// Builder for sequential pipelines.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Appends a stage; stages run in the order they were added.
    #[must_use]
    pub fn stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Builds the pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline {
        Pipeline::new(self.name, self.stages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingStage;
    use parking_lot::Mutex;

    fn recording(name: &str) -> Arc<dyn Stage> {
        Arc::new(RecordingStage::new(name, Arc::new(Mutex::new(Vec::new()))))
    }

    #[test]
    fn test_builder_creation() {
        let builder = PipelineBuilder::new("test");
        assert_eq!(builder.name(), "test");
        assert_eq!(builder.stage_count(), 0);
    }

    #[test]
    fn test_builder_keeps_insertion_order() {
        let pipeline = PipelineBuilder::new("test")
            .stage(recording("b"))
            .stage(recording("a"))
            .stage(recording("c"))
            .build();

        assert_eq!(pipeline.name(), "test");
        assert_eq!(pipeline.stage_names(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_empty_builder_builds_empty_pipeline() {
        let pipeline = PipelineBuilder::new("empty").build();
        assert!(pipeline.stage_names().is_empty());
    }
}
