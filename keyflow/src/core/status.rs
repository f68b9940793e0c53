//! Stage status, kind and outcome enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The role a stage plays in the pipeline topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// A stage that runs alone in its layer.
    #[default]
    Sequential,
    /// A stage that shares its layer with at least one sibling.
    ParallelMember,
    /// A stage that consumes the outputs of several members of one parallel layer.
    Join,
    /// The stage re-executed when validation fails.
    RetryTarget,
    /// The stage whose predicate decides whether to retry.
    RetrySource,
}

impl StageKind {
    /// Returns true for either end of the retry back-edge.
    #[must_use]
    pub const fn is_retry_role(&self) -> bool {
        matches!(self, Self::RetryTarget | Self::RetrySource)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::ParallelMember => write!(f, "parallel_member"),
            Self::Join => write!(f, "join"),
            Self::RetryTarget => write!(f, "retry_target"),
            Self::RetrySource => write!(f, "retry_source"),
        }
    }
}

/// The status a stage reports for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage completed successfully.
    Ok,
    /// Stage failed.
    Fail,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status indicates success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Fail)
    }
}

/// How one stage execution ended, as recorded by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// The stage returned its declared outputs.
    Completed,
    /// The stage reported a failure or broke its output contract.
    Failed,
    /// The stage exceeded its timeout.
    TimedOut,
    /// The stage was aborted because a layer sibling failed first.
    Aborted,
    /// The stage never ran because a required input is missing.
    Blocked,
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Aborted => write!(f, "aborted"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_kind_display() {
        assert_eq!(StageKind::Sequential.to_string(), "sequential");
        assert_eq!(StageKind::ParallelMember.to_string(), "parallel_member");
        assert_eq!(StageKind::Join.to_string(), "join");
        assert_eq!(StageKind::RetryTarget.to_string(), "retry_target");
        assert_eq!(StageKind::RetrySource.to_string(), "retry_source");
    }

    #[test]
    fn test_stage_kind_retry_role() {
        assert!(StageKind::RetryTarget.is_retry_role());
        assert!(StageKind::RetrySource.is_retry_role());
        assert!(!StageKind::Join.is_retry_role());
    }

    #[test]
    fn test_stage_status_serialize() {
        let json = serde_json::to_string(&StageStatus::Ok).unwrap();
        assert_eq!(json, r#""ok""#);

        let deserialized: StageStatus = serde_json::from_str(r#""fail""#).unwrap();
        assert_eq!(deserialized, StageStatus::Fail);
    }

    #[test]
    fn test_stage_kind_serialize() {
        let json = serde_json::to_string(&StageKind::ParallelMember).unwrap();
        assert_eq!(json, r#""parallel_member""#);
    }

    #[test]
    fn test_stage_outcome_display() {
        assert_eq!(StageOutcome::TimedOut.to_string(), "timed_out");
        assert_eq!(StageOutcome::Blocked.to_string(), "blocked");
    }
}
