//! Execution reports.
//!
//! The scheduler feeds a [`RunLedger`] as the run progresses. When the run
//! terminates, [`RunLedger::finish`] projects the ledger and the shared state
//! into an immutable [`ExecutionReport`]. Assembly makes no decisions: the
//! status and failure detail are handed in by the scheduler.

use crate::context::{SharedState, StateMap};
use crate::core::StageOutcome;
use crate::errors::{KeyflowError, StageFailure};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every live stage ran and the retry predicate, if any, passed.
    Succeeded,
    /// The run stopped at a terminal failure.
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Category of a terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A stage exceeded its timeout.
    Timeout,
    /// A stage reported failure.
    Execution,
    /// A stage returned keys other than its declared outputs.
    ContractViolation,
    /// A stage panicked.
    Panicked,
    /// Validation kept failing until the retry bound was reached.
    RetryExhausted,
    /// The retry predicate was missing or not a boolean.
    InvalidPredicate,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Execution => write!(f, "execution"),
            Self::ContractViolation => write!(f, "contract_violation"),
            Self::Panicked => write!(f, "panicked"),
            Self::RetryExhausted => write!(f, "retry_exhausted"),
            Self::InvalidPredicate => write!(f, "invalid_predicate"),
        }
    }
}

impl From<&StageFailure> for FailureKind {
    fn from(failure: &StageFailure) -> Self {
        match failure {
            StageFailure::Timeout { .. } => Self::Timeout,
            StageFailure::Execution { .. } => Self::Execution,
            StageFailure::ContractViolation { .. } => Self::ContractViolation,
            StageFailure::Panicked { .. } => Self::Panicked,
        }
    }
}

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    /// The stage the failure is attributed to.
    pub stage: String,
    /// Human-readable reason.
    pub reason: String,
    /// Failure category.
    pub kind: FailureKind,
    /// Retry attempts recorded when the run stopped.
    pub retry_attempts: u32,
    /// Feedback accumulated when the run stopped.
    pub feedback: Vec<serde_json::Value>,
}

impl FailureDetail {
    /// Creates a failure detail with no retry history.
    #[must_use]
    pub fn new(stage: impl Into<String>, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            reason: reason.into(),
            kind,
            retry_attempts: 0,
            feedback: Vec::new(),
        }
    }

    /// Builds the detail for a stage failure.
    #[must_use]
    pub fn from_stage_failure(failure: &StageFailure) -> Self {
        Self::new(failure.stage(), FailureKind::from(failure), failure.to_string())
    }
}

/// One stage execution as recorded by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Stage name.
    pub stage: String,
    /// Attempt number; above 1 only for re-executed retry chain stages.
    pub attempt: u32,
    /// How the execution ended.
    pub outcome: StageOutcome,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Error text for unsuccessful outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageRecord {
    /// Creates a record.
    #[must_use]
    pub fn new(stage: impl Into<String>, attempt: u32, outcome: StageOutcome, duration: Duration) -> Self {
        Self {
            stage: stage.into(),
            attempt,
            outcome,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            error: None,
        }
    }

    /// Attaches error text.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// A non-fatal condition observed during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunWarning {
    /// The stage the warning concerns.
    pub stage: String,
    /// Description.
    pub message: String,
}

/// How a run ended, as decided by the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The run completed.
    Succeeded,
    /// The run stopped at a terminal failure.
    Failed(FailureDetail),
}

/// The immutable summary of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Unique run identifier.
    pub run_id: Uuid,
    /// Pipeline name.
    pub pipeline: String,
    /// Terminal status.
    pub status: RunStatus,
    /// Shared state at termination.
    pub final_state: StateMap,
    /// Failure detail, present only when the run failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetail>,
    /// Warnings in the order they were raised.
    pub warnings: Vec<RunWarning>,
    /// Validation failures recorded by the retry loop.
    pub retry_attempts: u32,
    /// Every stage execution, in completion order per layer.
    pub records: Vec<StageRecord>,
    /// Stages that contributed no outputs: tolerated failures and stages
    /// blocked by a missing required input.
    pub skipped: Vec<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Total wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl ExecutionReport {
    /// Returns true if the run succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Gets a value from the final state.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.final_state.get(key)
    }

    /// Returns the final state's keys, sorted.
    #[must_use]
    pub fn state_keys(&self) -> BTreeSet<String> {
        self.final_state.keys().cloned().collect()
    }

    /// Counts how many times a stage started.
    #[must_use]
    pub fn executions_of(&self, stage: &str) -> usize {
        self.records
            .iter()
            .filter(|r| r.stage == stage && r.outcome != StageOutcome::Blocked)
            .count()
    }

    /// Returns the accumulated feedback entries.
    #[must_use]
    pub fn feedback(&self, feedback_key: &str) -> Vec<serde_json::Value> {
        match self.final_state.get(feedback_key) {
            Some(serde_json::Value::Array(items)) => items.clone(),
            _ => self
                .failure
                .as_ref()
                .map(|f| f.feedback.clone())
                .unwrap_or_default(),
        }
    }

    /// Serializes the report to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if a state value cannot be encoded.
    pub fn to_json(&self) -> Result<String, KeyflowError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Compact payload for the terminal pipeline event.
    #[must_use]
    pub fn summary_payload(&self) -> serde_json::Value {
        let mut keys: Vec<&String> = self.final_state.keys().collect();
        keys.sort();
        let mut payload = serde_json::json!({
            "pipeline": self.pipeline,
            "run_id": self.run_id.to_string(),
            "status": self.status.to_string(),
            "retry_attempts": self.retry_attempts,
            "warnings": self.warnings.len(),
            "skipped": self.skipped,
            "duration_ms": self.duration_ms,
            "state_keys": keys,
        });
        if let Some(failure) = &self.failure {
            payload["failure"] = serde_json::json!({
                "stage": failure.stage,
                "kind": failure.kind.to_string(),
                "reason": failure.reason,
            });
        }
        payload
    }
}

/// Accumulates the observable history of a run.
#[derive(Debug)]
pub struct RunLedger {
    run_id: Uuid,
    pipeline: String,
    started_at: DateTime<Utc>,
    clock: Instant,
    records: Vec<StageRecord>,
    warnings: Vec<RunWarning>,
    skipped: Vec<String>,
    retry_attempts: u32,
}

impl RunLedger {
    /// Opens a ledger for a run starting now.
    #[must_use]
    pub fn new(pipeline: impl Into<String>, run_id: Uuid) -> Self {
        Self {
            run_id,
            pipeline: pipeline.into(),
            started_at: Utc::now(),
            clock: Instant::now(),
            records: Vec::new(),
            warnings: Vec::new(),
            skipped: Vec::new(),
            retry_attempts: 0,
        }
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Appends a stage record.
    pub fn record(&mut self, record: StageRecord) {
        self.records.push(record);
    }

    /// Appends a warning.
    pub fn warn(&mut self, stage: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(RunWarning {
            stage: stage.into(),
            message: message.into(),
        });
    }

    /// Records a stage whose outputs are absent from the final state.
    pub fn skip(&mut self, stage: impl Into<String>) {
        let stage = stage.into();
        if !self.skipped.contains(&stage) {
            self.skipped.push(stage);
        }
    }

    /// Updates the retry attempt counter.
    pub fn set_retry_attempts(&mut self, attempts: u32) {
        self.retry_attempts = attempts;
    }

    /// Returns the warnings so far.
    #[must_use]
    pub fn warnings(&self) -> &[RunWarning] {
        &self.warnings
    }

    /// Projects the terminal report.
    #[must_use]
    pub fn finish(self, state: SharedState, outcome: RunOutcome) -> ExecutionReport {
        let (status, failure) = match outcome {
            RunOutcome::Succeeded => (RunStatus::Succeeded, None),
            RunOutcome::Failed(detail) => (RunStatus::Failed, Some(detail)),
        };
        ExecutionReport {
            run_id: self.run_id,
            pipeline: self.pipeline,
            status,
            final_state: state.into_inner(),
            failure,
            warnings: self.warnings,
            retry_attempts: self.retry_attempts,
            records: self.records,
            skipped: self.skipped,
            started_at: self.started_at,
            finished_at: Utc::now(),
            duration_ms: u64::try_from(self.clock.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }
}
