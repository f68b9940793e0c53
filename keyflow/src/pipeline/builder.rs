//! Pipeline builder with validation.

use super::{RetryEdge, StageGraph, StageSpec};
use crate::errors::{PipelineValidationError, ViolationKind};
use std::collections::{BTreeSet, HashMap};

/// Default name of the feedback key.
pub const DEFAULT_FEEDBACK_KEY: &str = "feedback";

/// Builder for creating validated pipelines.
///
/// Stages are added with their key contracts; the dependency edges, layers
/// and stage kinds are derived when [`PipelineBuilder::build`] is called.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    /// The pipeline name.
    name: String,
    /// The stage specifications.
    stages: HashMap<String, StageSpec>,
    /// Insertion order for stages.
    stage_order: Vec<String>,
    /// Keys supplied by the caller at run start.
    seed_keys: BTreeSet<String>,
    /// Key holding accumulated retry feedback.
    feedback_key: String,
    /// The optional back-edge.
    retry_edge: Option<RetryEdge>,
    /// Errors found by infallible builder methods, reported by `build`.
    deferred: Vec<PipelineValidationError>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: HashMap::new(),
            stage_order: Vec::new(),
            seed_keys: BTreeSet::new(),
            feedback_key: DEFAULT_FEEDBACK_KEY.to_string(),
            retry_edge: None,
            deferred: Vec::new(),
        }
    }

    /// Adds a stage to the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage is invalid on its own or its name is taken.
    pub fn stage(mut self, spec: StageSpec) -> Result<Self, PipelineValidationError> {
        self.add_stage_spec(spec)?;
        Ok(self)
    }

    /// Adds a stage with a specification.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn add_stage_spec(&mut self, spec: StageSpec) -> Result<(), PipelineValidationError> {
        spec.validate()?;

        if self.stages.contains_key(&spec.name) {
            return Err(PipelineValidationError::new(
                ViolationKind::DuplicateStage,
                format!("Stage '{}' is declared twice", spec.name),
            )
            .with_stages(vec![spec.name.clone()]));
        }

        self.stage_order.push(spec.name.clone());
        self.stages.insert(spec.name.clone(), spec);
        Ok(())
    }

    /// Adds several stages, deferring every check to [`PipelineBuilder::build`].
    #[must_use]
    pub fn with_specs(mut self, specs: impl IntoIterator<Item = StageSpec>) -> Self {
        for spec in specs {
            if let Err(err) = self.add_stage_spec(spec) {
                self.deferred.push(err);
            }
        }
        self
    }

    /// Declares the keys the caller supplies at run start.
    #[must_use]
    pub fn seed_keys(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.seed_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Overrides the feedback key name.
    #[must_use]
    pub fn feedback_key(mut self, key: impl Into<String>) -> Self {
        self.feedback_key = key.into();
        self
    }

    /// Declares the retry back-edge.
    ///
    /// A pipeline has at most one; a second declaration fails the build.
    #[must_use]
    pub fn retry_edge(mut self, edge: RetryEdge) -> Self {
        if let Some(existing) = &self.retry_edge {
            self.deferred.push(
                PipelineValidationError::new(
                    ViolationKind::InvalidRetryEdge,
                    format!(
                        "Pipeline already has a retry edge {} -> {}",
                        existing.source, existing.target
                    ),
                )
                .with_stages(vec![existing.source.clone(), edge.source.clone()]),
            );
            return self;
        }
        self.retry_edge = Some(edge);
        self
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the declarations do not form a valid graph.
    pub fn build(mut self) -> Result<StageGraph, PipelineValidationError> {
        if !self.deferred.is_empty() {
            return Err(self.deferred.remove(0));
        }
        StageGraph::build(
            self.name,
            self.stages,
            self.stage_order,
            self.seed_keys,
            self.feedback_key,
            self.retry_edge,
        )
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticStage;
    use std::sync::Arc;

    fn spec(name: &str, inputs: &[&str], outputs: &[&str]) -> StageSpec {
        StageSpec::new(name, Arc::new(StaticStage::new(name, outputs.iter().copied())))
            .with_inputs(inputs.iter().copied())
            .with_outputs(outputs.iter().copied())
    }

    #[test]
    fn test_builder_creation() {
        let builder = PipelineBuilder::new("test");
        assert_eq!(builder.name(), "test");
        assert_eq!(builder.stage_count(), 0);
    }

    #[test]
    fn test_builder_add_stage() {
        let builder = PipelineBuilder::new("test")
            .stage(spec("stage1", &[], &["a"]))
            .unwrap();

        assert_eq!(builder.stage_count(), 1);
    }

    #[test]
    fn test_builder_duplicate_stage() {
        let result = PipelineBuilder::new("test")
            .stage(spec("stage1", &[], &["a"]))
            .unwrap()
            .stage(spec("stage1", &[], &["b"]));

        let err = result.unwrap_err();
        assert_eq!(err.error_info.code, "CONTRACT-004-DUPLICATE");
    }

    #[test]
    fn test_builder_rejects_second_retry_edge() {
        let result = PipelineBuilder::new("test")
            .stage(spec("gen", &[], &["code"]))
            .unwrap()
            .stage(spec("check", &["code"], &["ok"]))
            .unwrap()
            .retry_edge(RetryEdge::new("check", "gen", "ok"))
            .retry_edge(RetryEdge::new("check", "gen", "ok"))
            .build();

        assert_eq!(result.unwrap_err().kind, ViolationKind::InvalidRetryEdge);
    }

    #[test]
    fn test_with_specs_defers_errors() {
        let result = PipelineBuilder::new("test")
            .with_specs([spec("a", &[], &["x"]), spec("a", &[], &["y"])])
            .build();

        assert_eq!(result.unwrap_err().kind, ViolationKind::DuplicateStage);
    }

    #[test]
    fn test_builder_empty_build() {
        let err = PipelineBuilder::new("test").build().unwrap_err();
        assert_eq!(err.error_info.code, "CONTRACT-004-EMPTY");
        assert!(err.error_info.fix_hint.is_some());
    }

    #[test]
    fn test_builder_build_success() {
        let graph = PipelineBuilder::new("test")
            .seed_keys(["input"])
            .feedback_key("notes")
            .stage(spec("stage1", &["input"], &["x"]))
            .unwrap()
            .stage(spec("stage2", &["x"], &["y"]))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(graph.name(), "test");
        assert_eq!(graph.feedback_key(), "notes");
        assert_eq!(graph.stage_count(), 2);
    }
}
