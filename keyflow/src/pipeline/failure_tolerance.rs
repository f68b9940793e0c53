//! Partial-failure policy for parallel layers.
//!
//! Fail-fast aborts the run at the first failing layer member. The tolerant
//! mode lets a parallel layer complete with missing members; every stage
//! whose required inputs are then missing is blocked instead of running on
//! partial data.

use super::StageSpec;
use crate::context::SharedState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How to handle a stage failure inside a parallel layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Stop the run on the first failure (default).
    #[default]
    FailFast,
    /// Record the failure as a warning and keep going; dependants are blocked.
    ContinueOnFailure,
}

/// Tracks degraded and blocked stages during a run.
#[derive(Debug, Default)]
pub struct FailureCollector {
    /// Failure mode.
    pub mode: FailureMode,
    degraded: BTreeSet<String>,
    blocked: BTreeSet<String>,
}

impl FailureCollector {
    /// Creates a new failure collector.
    #[must_use]
    pub fn new(mode: FailureMode) -> Self {
        Self {
            mode,
            degraded: BTreeSet::new(),
            blocked: BTreeSet::new(),
        }
    }

    /// Returns true if a failure in a layer of this size may be tolerated.
    ///
    /// Single-member layers are never tolerated: nothing else in the layer
    /// made progress, so there is nothing to degrade to.
    #[must_use]
    pub fn tolerates(&self, layer_size: usize) -> bool {
        self.mode == FailureMode::ContinueOnFailure && layer_size >= 2
    }

    /// Records a tolerated member failure.
    pub fn record_degraded(&mut self, stage: &str) {
        self.degraded.insert(stage.to_string());
    }

    /// Records a stage that will not run.
    pub fn record_blocked(&mut self, stage: &str) {
        self.blocked.insert(stage.to_string());
    }

    /// Returns the required inputs of `spec` that are absent from `state`.
    #[must_use]
    pub fn missing_inputs(spec: &StageSpec, state: &SharedState) -> Vec<String> {
        spec.required_inputs
            .iter()
            .filter(|key| !state.contains(key))
            .cloned()
            .collect()
    }

    /// Returns true if the stage failed and was tolerated.
    #[must_use]
    pub fn is_degraded(&self, stage: &str) -> bool {
        self.degraded.contains(stage)
    }

    /// Returns true if the stage was blocked.
    #[must_use]
    pub fn is_blocked(&self, stage: &str) -> bool {
        self.blocked.contains(stage)
    }

    /// Returns the blocked stages, sorted.
    #[must_use]
    pub fn blocked(&self) -> &BTreeSet<String> {
        &self.blocked
    }

    /// Returns true if the stage neither failed nor was blocked.
    #[must_use]
    pub fn is_live(&self, stage: &str) -> bool {
        !self.is_degraded(stage) && !self.is_blocked(stage)
    }
}
