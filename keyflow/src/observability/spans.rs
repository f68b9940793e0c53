//! Span construction and timing for pipeline runs.

use crate::core::StageKind;
use std::time::{Duration, Instant};
use tracing::Span;
use uuid::Uuid;

/// Attributes attached to the run span.
#[derive(Debug, Clone)]
pub struct PipelineSpanAttributes {
    /// Pipeline name.
    pub pipeline: String,
    /// Run identifier.
    pub run_id: Uuid,
    /// Retry bound in force for the run.
    pub max_retries: u32,
}

impl PipelineSpanAttributes {
    /// Creates the attributes of a run.
    #[must_use]
    pub fn new(pipeline: impl Into<String>, run_id: Uuid, max_retries: u32) -> Self {
        Self {
            pipeline: pipeline.into(),
            run_id,
            max_retries,
        }
    }

    /// Opens the `pipeline.run` span.
    #[must_use]
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "pipeline.run",
            pipeline = %self.pipeline,
            run_id = %self.run_id,
            max_retries = self.max_retries,
        )
    }

    /// Event payload identifying the run.
    #[must_use]
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "pipeline": self.pipeline,
            "run_id": self.run_id.to_string(),
            "max_retries": self.max_retries,
        })
    }
}

/// Attributes attached to a stage span and its events.
#[derive(Debug, Clone)]
pub struct StageSpanAttributes {
    /// Stage name.
    pub stage: String,
    /// Effective stage kind.
    pub kind: StageKind,
    /// Attempt number.
    pub attempt: u32,
    /// Layer index.
    pub layer: usize,
}

impl StageSpanAttributes {
    /// Creates the attributes of one stage execution.
    #[must_use]
    pub fn new(stage: impl Into<String>, kind: StageKind, attempt: u32, layer: usize) -> Self {
        Self {
            stage: stage.into(),
            kind,
            attempt,
            layer,
        }
    }

    /// Opens the `stage` span.
    #[must_use]
    pub fn span(&self) -> Span {
        tracing::debug_span!(
            "stage",
            stage = %self.stage,
            kind = %self.kind,
            attempt = self.attempt,
            layer = self.layer,
        )
    }

    /// Event payload identifying the stage execution.
    #[must_use]
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "stage": self.stage,
            "kind": self.kind.to_string(),
            "attempt": self.attempt,
            "layer": self.layer,
        })
    }
}

/// Simple span timing helper.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
}

impl SpanTimer {
    /// Starts a new timer.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Returns the elapsed time.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_payload() {
        let run_id = Uuid::new_v4();
        let attrs = PipelineSpanAttributes::new("codegen", run_id, 3);

        let payload = attrs.to_payload();
        assert_eq!(payload["pipeline"], "codegen");
        assert_eq!(payload["run_id"], run_id.to_string());
        assert_eq!(payload["max_retries"], 3);
        let _span = attrs.span();
    }

    #[test]
    fn test_stage_payload() {
        let attrs = StageSpanAttributes::new("generator", StageKind::RetryTarget, 2, 5);

        let payload = attrs.to_payload();
        assert_eq!(payload["stage"], "generator");
        assert_eq!(payload["kind"], "retry_target");
        assert_eq!(payload["attempt"], 2);
        let _span = attrs.span();
    }

    #[test]
    fn test_span_timer() {
        let timer = SpanTimer::start();
        std::thread::sleep(Duration::from_millis(10));
        assert!(timer.elapsed() >= Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 10.0);
    }
}
