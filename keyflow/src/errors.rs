//! Error types for the keyflow engine.
//!
//! Construction-time contract violations (`PipelineValidationError`) are kept
//! apart from runtime stage failures (`StageFailure`) so callers can tell a
//! run that never started from one that started and aborted.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use thiserror::Error;

/// The main error type for keyflow operations.
///
/// Every variant means the run never produced a report: either the graph or
/// the seed was rejected up front, or a wiring bug was caught at a merge point.
#[derive(Debug, Error)]
pub enum KeyflowError {
    /// The pipeline graph failed validation.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A merge into the shared state broke the disjoint-write invariant.
    #[error("{0}")]
    Disjointness(#[from] DisjointnessViolation),

    /// The seed handed to a run does not match the graph's declared seed keys.
    #[error("{0}")]
    InvalidSeed(#[from] InvalidSeedError),

    /// The engine configuration is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for KeyflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONTRACT-004-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Fills in the fix hint from [`ContractSuggestions`] when none was given.
    #[must_use]
    pub fn with_default_hint(mut self) -> Self {
        if self.fix_hint.is_none() {
            self.fix_hint = ContractSuggestions::get(&self.code).map(str::to_string);
        }
        self
    }
}

/// The specific rule a pipeline graph broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// The pipeline has no stages.
    Empty,
    /// Two stages share a name.
    DuplicateStage,
    /// A single stage declaration is malformed.
    InvalidStage,
    /// Two producers (stages, seed, or the feedback slot) claim the same key.
    OverlappingOutputs,
    /// A required input is produced by nobody.
    MissingProducer,
    /// The derived dependency edges form a cycle.
    Cycle,
    /// The retry back-edge is malformed.
    InvalidRetryEdge,
}

impl ViolationKind {
    /// Returns the contract error code for this violation.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Empty => "CONTRACT-004-EMPTY",
            Self::DuplicateStage => "CONTRACT-004-DUPLICATE",
            Self::InvalidStage => "CONTRACT-004-INVALID_STAGE",
            Self::OverlappingOutputs => "CONTRACT-005-OVERLAP",
            Self::MissingProducer => "CONTRACT-005-MISSING_PRODUCER",
            Self::Cycle => "CONTRACT-004-CYCLE",
            Self::InvalidRetryEdge => "CONTRACT-006-RETRY_EDGE",
        }
    }
}

/// Error raised when pipeline validation fails.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// Which rule was broken.
    pub kind: ViolationKind,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(kind: ViolationKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            error_info: ContractErrorInfo::new(kind.code(), message.clone()).with_default_hint(),
            message,
            kind,
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Replaces the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.error_info.fix_hint = Some(hint.into());
        self
    }

    /// Adds a context entry to the contract info.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.error_info = self.error_info.with_context_entry(key, value);
        self
    }
}

/// Error raised when a cycle is detected in the pipeline graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in pipeline: {}", .cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of stages forming the cycle.
    pub cycle_path: Vec<String>,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }
}

impl From<CycleDetectedError> for PipelineValidationError {
    fn from(err: CycleDetectedError) -> Self {
        PipelineValidationError::new(ViolationKind::Cycle, err.to_string())
            .with_stages(err.cycle_path)
    }
}

/// Why a merge into the shared state was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisjointnessReason {
    /// The output key set differs from the declared outputs.
    KeySetMismatch {
        /// Keys returned but never declared.
        unexpected: BTreeSet<String>,
        /// Declared keys that were not returned.
        missing: BTreeSet<String>,
    },
    /// The key already holds a value and is not retry-resettable.
    AlreadySet {
        /// The conflicting key.
        key: String,
    },
}

/// Error raised when a merge would break the disjoint-write invariant.
#[derive(Debug, Clone, Error)]
#[error("Disjointness violation by stage '{stage}': {}", describe_reason(.reason))]
pub struct DisjointnessViolation {
    /// The stage whose outputs were being merged.
    pub stage: String,
    /// What went wrong.
    pub reason: DisjointnessReason,
}

fn describe_reason(reason: &DisjointnessReason) -> String {
    match reason {
        DisjointnessReason::KeySetMismatch { unexpected, missing } => format!(
            "output keys differ from declared outputs (unexpected: {unexpected:?}, missing: {missing:?})"
        ),
        DisjointnessReason::AlreadySet { key } => {
            format!("key '{key}' already exists and is not retry-resettable")
        }
    }
}

impl DisjointnessViolation {
    /// Creates a key set mismatch violation.
    #[must_use]
    pub fn key_set_mismatch(
        stage: impl Into<String>,
        unexpected: BTreeSet<String>,
        missing: BTreeSet<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            reason: DisjointnessReason::KeySetMismatch { unexpected, missing },
        }
    }

    /// Creates an already-set violation.
    #[must_use]
    pub fn already_set(stage: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            reason: DisjointnessReason::AlreadySet { key: key.into() },
        }
    }
}

/// Error raised when a stage reads a key it did not declare.
#[derive(Debug, Clone, Error)]
#[error("Undeclared input: stage '{stage}' attempted to read '{key}' which was not declared as an input")]
pub struct UndeclaredInputError {
    /// The stage attempting access.
    pub stage: String,
    /// The undeclared key.
    pub key: String,
}

impl UndeclaredInputError {
    /// Creates a new undeclared input error.
    #[must_use]
    pub fn new(stage: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            key: key.into(),
        }
    }
}

/// Error raised when a run seed does not match the declared seed keys.
#[derive(Debug, Clone, Error)]
#[error("Invalid seed: {message} ({})", .keys.join(", "))]
pub struct InvalidSeedError {
    /// What is wrong with the seed.
    pub message: String,
    /// The offending keys.
    pub keys: Vec<String>,
}

impl InvalidSeedError {
    /// Creates a new invalid seed error.
    #[must_use]
    pub fn new(message: impl Into<String>, keys: Vec<String>) -> Self {
        Self {
            message: message.into(),
            keys,
        }
    }
}

/// Error raised when an engine configuration is rejected.
#[derive(Debug, Clone, Error)]
#[error("Invalid configuration for '{field}': {message}")]
pub struct ConfigError {
    /// The offending field.
    pub field: String,
    /// Description of the problem.
    pub message: String,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// A runtime failure of a single stage execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageFailure {
    /// The stage did not finish within its timeout.
    #[error("Stage '{stage}' timed out after {}ms", .timeout.as_millis())]
    Timeout {
        /// The stage name.
        stage: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The stage reported a failure.
    #[error("Stage '{stage}' failed: {reason}")]
    Execution {
        /// The stage name.
        stage: String,
        /// The reason reported by the stage.
        reason: String,
    },

    /// The stage returned a key set other than its declared outputs.
    #[error("Stage '{stage}' broke its output contract: {reason}")]
    ContractViolation {
        /// The stage name.
        stage: String,
        /// Description of the mismatch.
        reason: String,
    },

    /// The stage panicked.
    #[error("Stage '{stage}' panicked: {message}")]
    Panicked {
        /// The stage name.
        stage: String,
        /// The panic payload, when it was a string.
        message: String,
    },
}

impl StageFailure {
    /// Returns the name of the failing stage.
    #[must_use]
    pub fn stage(&self) -> &str {
        match self {
            Self::Timeout { stage, .. }
            | Self::Execution { stage, .. }
            | Self::ContractViolation { stage, .. }
            | Self::Panicked { stage, .. } => stage,
        }
    }

    /// Returns true for a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true when the failure may be routed through the retry loop.
    ///
    /// Only plain execution failures qualify.
    #[must_use]
    pub const fn is_routable(&self) -> bool {
        matches!(self, Self::Execution { .. })
    }
}

/// Provides default suggestions for common contract error codes.
pub struct ContractSuggestions;

impl ContractSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "CONTRACT-004-CYCLE" => Some(
                "Check the stages' input and output keys for circular reads. \
                 Only the declared retry edge may point backwards.",
            ),
            "CONTRACT-005-MISSING_PRODUCER" => Some(
                "Declare the key as a seed key or add a stage that produces it. \
                 Check for typos in key names.",
            ),
            "CONTRACT-005-OVERLAP" => Some(
                "Every key must have exactly one writer. Rename one of the outputs.",
            ),
            "CONTRACT-004-DUPLICATE" => Some("Give every stage a unique name."),
            "CONTRACT-004-EMPTY" => Some(
                "Add at least one stage to the pipeline before building.",
            ),
            "CONTRACT-006-RETRY_EDGE" => Some(
                "The retry source must run downstream of the retry target and \
                 produce the predicate key.",
            ),
            _ => None,
        }
    }
}
