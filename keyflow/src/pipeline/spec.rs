//! Stage specifications.

use crate::core::StageKind;
use crate::errors::{PipelineValidationError, ViolationKind};
use crate::stages::Stage;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Default maximum execution duration of a stage.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Specification for a single stage in a pipeline.
///
/// Dependencies are never wired by hand: they are derived from which stage
/// produces the keys this stage reads.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// The stage implementation.
    pub runner: Arc<dyn Stage>,
    /// Keys that must be present before the stage may run.
    pub required_inputs: BTreeSet<String>,
    /// Keys passed when present; they order the stage after their producer
    /// but never block it.
    pub optional_inputs: BTreeSet<String>,
    /// Keys this stage alone writes.
    pub produced_outputs: BTreeSet<String>,
    /// Maximum wall-clock duration of one execution.
    pub timeout: Duration,
    /// The declared kind. Retry roles are checked against the retry edge.
    pub kind: Option<StageKind>,
}

impl StageSpec {
    /// Creates a new stage specification.
    #[must_use]
    pub fn new(name: impl Into<String>, runner: Arc<dyn Stage>) -> Self {
        Self {
            name: name.into(),
            runner,
            required_inputs: BTreeSet::new(),
            optional_inputs: BTreeSet::new(),
            produced_outputs: BTreeSet::new(),
            timeout: DEFAULT_STAGE_TIMEOUT,
            kind: None,
        }
    }

    /// Sets the required inputs.
    #[must_use]
    pub fn with_inputs(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.required_inputs = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Adds an optional input.
    #[must_use]
    pub fn with_optional_input(mut self, key: impl Into<String>) -> Self {
        self.optional_inputs.insert(key.into());
        self
    }

    /// Sets the produced outputs.
    #[must_use]
    pub fn with_outputs(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.produced_outputs = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Declares the stage kind.
    #[must_use]
    pub fn with_kind(mut self, kind: StageKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Returns every key the stage may read.
    #[must_use]
    pub fn readable_keys(&self) -> BTreeSet<String> {
        self.required_inputs
            .union(&self.optional_inputs)
            .cloned()
            .collect()
    }

    /// Validates the stage specification on its own.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is blank, the timeout is zero, or the
    /// stage reads one of its own outputs.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::new(
                ViolationKind::InvalidStage,
                "Stage name cannot be empty or whitespace-only",
            ));
        }

        if self.timeout.is_zero() {
            return Err(PipelineValidationError::new(
                ViolationKind::InvalidStage,
                format!("Stage '{}' has a zero timeout", self.name),
            )
            .with_stages(vec![self.name.clone()]));
        }

        if let Some(key) = self
            .readable_keys()
            .intersection(&self.produced_outputs)
            .next()
        {
            return Err(PipelineValidationError::new(
                ViolationKind::InvalidStage,
                format!("Stage '{}' reads its own output '{}'", self.name, key),
            )
            .with_stages(vec![self.name.clone()])
            .with_context_entry("key", key.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticStage;

    fn runner(name: &str) -> Arc<dyn Stage> {
        Arc::new(StaticStage::new(name, ["out"]))
    }

    #[test]
    fn test_stage_spec_creation() {
        let spec = StageSpec::new("test", runner("test"))
            .with_inputs(["a", "b"])
            .with_optional_input("feedback")
            .with_outputs(["out"])
            .with_kind(StageKind::Join);

        assert_eq!(spec.name, "test");
        assert_eq!(spec.required_inputs.len(), 2);
        assert_eq!(spec.readable_keys().len(), 3);
        assert_eq!(spec.kind, Some(StageKind::Join));
        assert_eq!(spec.timeout, DEFAULT_STAGE_TIMEOUT);
    }

    #[test]
    fn test_stage_reading_own_output() {
        let spec = StageSpec::new("loop", runner("loop"))
            .with_inputs(["out"])
            .with_outputs(["out"]);

        let err = spec.validate().unwrap_err();
        assert_eq!(err.kind, ViolationKind::InvalidStage);
    }

    #[test]
    fn test_stage_empty_name_and_zero_timeout() {
        assert!(StageSpec::new("  ", runner("x")).validate().is_err());
        assert!(StageSpec::new("x", runner("x"))
            .with_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }
}
