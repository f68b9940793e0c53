//! The single bounded retry loop.
//!
//! One back-edge runs from a retry source (a validating stage) to a retry
//! target (the stage that produced what was validated). When the source's
//! predicate key is `false`, the scheduler resets the chain between them,
//! appends feedback, and runs the chain again, until the predicate passes or
//! the attempt counter reaches `max_retries`.

use crate::context::SharedState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The declared back-edge from retry source to retry target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryEdge {
    /// The stage whose predicate decides whether to retry.
    pub source: String,
    /// The stage re-executed on validation failure.
    pub target: String,
    /// Output key of the source holding a JSON boolean.
    pub predicate_key: String,
    /// Output key of the source whose value becomes the feedback entry.
    /// When unset, all other source outputs are used.
    #[serde(default)]
    pub feedback_from: Option<String>,
}

impl RetryEdge {
    /// Creates a new retry edge.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        predicate_key: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            predicate_key: predicate_key.into(),
            feedback_from: None,
        }
    }

    /// Sets the output key used as feedback.
    #[must_use]
    pub fn with_feedback_from(mut self, key: impl Into<String>) -> Self {
        self.feedback_from = Some(key.into());
        self
    }

    /// Reads the predicate from the merged state.
    ///
    /// `source_outputs` are the source's declared outputs.
    #[must_use]
    pub fn evaluate(&self, source_outputs: &BTreeSet<String>, state: &SharedState) -> PredicateOutcome {
        match state.value(&self.predicate_key) {
            Some(serde_json::Value::Bool(true)) => PredicateOutcome::Passed,
            Some(serde_json::Value::Bool(false)) => PredicateOutcome::Failed {
                feedback: self.collect_feedback(source_outputs, state),
            },
            Some(other) => PredicateOutcome::Invalid(format!(
                "predicate key '{}' holds {other}, expected a boolean",
                self.predicate_key
            )),
            None => PredicateOutcome::Invalid(format!(
                "predicate key '{}' is missing",
                self.predicate_key
            )),
        }
    }

    fn collect_feedback(&self, source_outputs: &BTreeSet<String>, state: &SharedState) -> serde_json::Value {
        if let Some(key) = &self.feedback_from {
            return state.value(key).cloned().unwrap_or(serde_json::Value::Null);
        }

        let fields: serde_json::Map<String, serde_json::Value> = source_outputs
            .iter()
            .filter(|key| **key != self.predicate_key)
            .filter_map(|key| state.value(key).map(|v| (key.clone(), v.clone())))
            .collect();
        serde_json::Value::Object(fields)
    }
}

/// Result of reading the retry predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum PredicateOutcome {
    /// Validation passed; the run moves on.
    Passed,
    /// Validation failed with the given feedback.
    Failed {
        /// Feedback extracted from the source's outputs.
        feedback: serde_json::Value,
    },
    /// The predicate key is missing or not a boolean.
    Invalid(String),
}

/// What to do after a validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-run the chain; carries the attempt counter after incrementing.
    Retry {
        /// Retry attempts recorded so far.
        attempts: u32,
    },
    /// The counter reached `max_retries`; the run fails.
    Exhausted {
        /// Retry attempts recorded.
        attempts: u32,
    },
}

/// Runtime state of the retry loop for one run.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    /// Number of validation failures recorded.
    pub attempts: u32,
    /// Number of times the retry target has started.
    pub target_executions: u32,
}

impl RetryState {
    /// Creates a new runtime state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failed validation and decides whether another attempt is allowed.
    ///
    /// Returns the feedback entry to append along with the decision.
    pub fn record_failure(
        &mut self,
        stage: &str,
        feedback: serde_json::Value,
        max_retries: u32,
    ) -> (serde_json::Value, RetryDecision) {
        self.attempts += 1;
        let entry = serde_json::json!({
            "attempt": self.attempts,
            "stage": stage,
            "feedback": feedback,
        });

        let decision = if self.attempts >= max_retries {
            RetryDecision::Exhausted {
                attempts: self.attempts,
            }
        } else {
            RetryDecision::Retry {
                attempts: self.attempts,
            }
        };
        (entry, decision)
    }

    /// Returns the attempt number the next target execution will carry.
    #[must_use]
    pub fn current_attempt(&self) -> u32 {
        self.attempts + 1
    }
}
