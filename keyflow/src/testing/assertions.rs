//! Test assertions for stage outputs and execution reports.

use crate::core::StageOutput;
use crate::pipeline::StageGraph;
use crate::report::{ExecutionReport, FailureKind};

/// Asserts that the output indicates success.
pub fn assert_output_succeeded(output: &StageOutput) {
    assert!(
        output.is_success(),
        "Expected success, got status: {:?} ({:?})",
        output.status,
        output.error
    );
}

/// Asserts that the output indicates failure.
pub fn assert_output_failed(output: &StageOutput) {
    assert!(
        output.is_failure(),
        "Expected failure, got status: {:?}",
        output.status
    );
}

/// Asserts that the output contains a specific key.
pub fn assert_output_contains(output: &StageOutput, key: &str) {
    assert!(
        output.get(key).is_some(),
        "Expected output to contain key '{}', but it doesn't. Keys: {:?}",
        key,
        output.data.keys().collect::<Vec<_>>()
    );
}

/// Asserts that the run succeeded.
pub fn assert_run_succeeded(report: &ExecutionReport) {
    assert!(
        report.is_success(),
        "Expected run to succeed, got failure: {:?}",
        report.failure
    );
}

/// Asserts that the run failed at `stage` with the given kind.
pub fn assert_run_failed(report: &ExecutionReport, stage: &str, kind: FailureKind) {
    let failure = report
        .failure
        .as_ref()
        .unwrap_or_else(|| panic!("Expected run to fail at '{stage}', but it succeeded"));
    assert_eq!(
        (failure.stage.as_str(), failure.kind),
        (stage, kind),
        "Unexpected failure: {}",
        failure.reason
    );
}

/// Asserts that the final state holds every listed key.
pub fn assert_state_has_keys<'a>(report: &ExecutionReport, keys: impl IntoIterator<Item = &'a str>) {
    for key in keys {
        assert!(
            report.final_state.contains_key(key),
            "Expected final state to contain '{}'. Keys: {:?}",
            key,
            report.state_keys()
        );
    }
}

/// Asserts that the final state holds none of the listed keys.
pub fn assert_state_lacks_keys<'a>(report: &ExecutionReport, keys: impl IntoIterator<Item = &'a str>) {
    for key in keys {
        assert!(
            !report.final_state.contains_key(key),
            "Expected final state not to contain '{}'",
            key
        );
    }
}

/// Asserts that every stage that was not skipped left its outputs in the final state.
pub fn assert_live_outputs_present(graph: &StageGraph, report: &ExecutionReport) {
    for spec in graph.stages() {
        if report.skipped.contains(&spec.name) {
            continue;
        }
        for key in &spec.produced_outputs {
            assert!(
                report.final_state.contains_key(key),
                "Stage '{}' ran but its output '{}' is missing",
                spec.name,
                key
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SharedState;
    use crate::report::{FailureDetail, RunLedger, RunOutcome};
    use uuid::Uuid;

    #[test]
    fn test_assert_output_succeeded() {
        let output = StageOutput::ok_value("key", serde_json::json!("value"));
        assert_output_succeeded(&output);
        assert_output_contains(&output, "key");
    }

    #[test]
    #[should_panic(expected = "Expected success")]
    fn test_assert_output_succeeded_fails() {
        let output = StageOutput::fail("error");
        assert_output_succeeded(&output);
    }

    #[test]
    fn test_assert_output_failed() {
        let output = StageOutput::fail("error");
        assert_output_failed(&output);
    }

    #[test]
    fn test_assert_run_failed() {
        let detail = FailureDetail::new("analyzer_3", FailureKind::Timeout, "too slow");
        let report = RunLedger::new("p", Uuid::new_v4()).finish(SharedState::default(), RunOutcome::Failed(detail));
        assert_run_failed(&report, "analyzer_3", FailureKind::Timeout);
        assert_state_lacks_keys(&report, ["schema_analysis"]);
    }

    #[test]
    #[should_panic(expected = "Expected run to succeed")]
    fn test_assert_run_succeeded_fails() {
        let detail = FailureDetail::new("parser", FailureKind::Execution, "bad json");
        let report = RunLedger::new("p", Uuid::new_v4()).finish(SharedState::default(), RunOutcome::Failed(detail));
        assert_run_succeeded(&report);
    }
}
