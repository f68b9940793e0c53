//! The reference code-generation pipeline.
//!
//! Nine stage groups: an orchestrator, a parser, a collection validator,
//! four parallel analyzers, an aggregator, a code generator, a tester, a
//! code validator (the retry source, looping back to the generator) and a
//! formatter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{ScriptedValidator, StaticStage};
use crate::context::StateMap;
use crate::pipeline::{PipelineBuilder, RetryEdge, StageSpec};
use crate::stages::Stage;

/// Name of the reference pipeline.
pub const CODEGEN_PIPELINE: &str = "codegen";

/// The four analyzers and the key each produces.
pub const CODEGEN_ANALYZERS: [(&str, &str); 4] = [
    ("analyzer_1", "auth_analysis"),
    ("analyzer_2", "endpoint_analysis"),
    ("analyzer_3", "schema_analysis"),
    ("analyzer_4", "dependency_analysis"),
];

/// Stage name, required inputs, produced outputs.
type Contract = (&'static str, &'static [&'static str], &'static [&'static str]);

const ANALYZER_INPUTS: &[&str] = &["parsed_collection", "collection_report"];

const CONTRACTS: [Contract; 12] = [
    ("orchestrator", &["collection_location", "export_target"], &["run_plan"]),
    ("parser", &["collection_location", "run_plan"], &["parsed_collection"]),
    ("validator", &["parsed_collection"], &["collection_report"]),
    ("analyzer_1", ANALYZER_INPUTS, &["auth_analysis"]),
    ("analyzer_2", ANALYZER_INPUTS, &["endpoint_analysis"]),
    ("analyzer_3", ANALYZER_INPUTS, &["schema_analysis"]),
    ("analyzer_4", ANALYZER_INPUTS, &["dependency_analysis"]),
    (
        "aggregator",
        &["auth_analysis", "endpoint_analysis", "schema_analysis", "dependency_analysis"],
        &["aggregated_analysis"],
    ),
    ("generator", &["aggregated_analysis"], &["generated_code"]),
    ("tester", &["generated_code"], &["test_results"]),
    ("code_validator", &["generated_code", "test_results"], &["is_valid", "validation_feedback"]),
    ("formatter", &["generated_code", "is_valid", "export_target"], &["formatted_output"]),
];

/// Builds the reference pipeline with replaceable stage implementations.
#[derive(Debug, Default, Clone)]
pub struct CodegenFixture {
    runners: HashMap<String, Arc<dyn Stage>>,
    timeouts: HashMap<String, Duration>,
}

impl CodegenFixture {
    /// Creates a fixture where every stage succeeds and validation passes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the implementation of one stage.
    #[must_use]
    pub fn with_stage(mut self, name: impl Into<String>, runner: Arc<dyn Stage>) -> Self {
        self.runners.insert(name.into(), runner);
        self
    }

    /// Overrides the timeout of one stage.
    #[must_use]
    pub fn with_timeout(mut self, name: impl Into<String>, timeout: Duration) -> Self {
        self.timeouts.insert(name.into(), timeout);
        self
    }

    /// Returns the stage specifications in declaration order.
    #[must_use]
    pub fn specs(&self) -> Vec<StageSpec> {
        CONTRACTS
            .iter()
            .map(|(name, inputs, outputs)| {
                let runner = self.runners.get(*name).cloned().unwrap_or_else(|| default_runner(name, outputs));
                let spec = StageSpec::new(*name, runner)
                    .with_inputs(inputs.iter().copied())
                    .with_outputs(outputs.iter().copied());
                match self.timeouts.get(*name) {
                    Some(timeout) => spec.with_timeout(*timeout),
                    None => spec,
                }
            })
            .collect()
    }

    /// Returns a builder holding the whole pipeline and its retry edge.
    #[must_use]
    pub fn builder(&self) -> PipelineBuilder {
        PipelineBuilder::new(CODEGEN_PIPELINE)
            .seed_keys(["collection_location", "export_target"])
            .with_specs(self.specs())
            .retry_edge(
                RetryEdge::new("code_validator", "generator", "is_valid")
                    .with_feedback_from("validation_feedback"),
            )
    }
}

fn default_runner(name: &str, outputs: &[&str]) -> Arc<dyn Stage> {
    if name == "code_validator" {
        Arc::new(ScriptedValidator::always_valid(name))
    } else {
        Arc::new(StaticStage::new(name, outputs.iter().copied()))
    }
}

/// The reference pipeline with default stages.
#[must_use]
pub fn codegen_pipeline() -> PipelineBuilder {
    CodegenFixture::new().builder()
}

/// A seed satisfying the reference pipeline.
#[must_use]
pub fn codegen_seed() -> StateMap {
    let mut seed = StateMap::new();
    seed.insert(
        "collection_location".to_string(),
        serde_json::json!("collections/petstore.postman.json"),
    );
    seed.insert("export_target".to_string(), serde_json::json!("out/petstore-client"));
    seed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_specs() {
        let specs = CodegenFixture::new().specs();
        assert_eq!(specs.len(), 12);
        assert_eq!(specs[0].name, "orchestrator");
        assert!(specs.iter().any(|s| s.produced_outputs.contains("formatted_output")));
    }

    #[test]
    fn test_fixture_overrides() {
        let specs = CodegenFixture::new()
            .with_timeout("analyzer_3", Duration::from_millis(20))
            .specs();
        let analyzer = specs.iter().find(|s| s.name == "analyzer_3").unwrap();
        assert_eq!(analyzer.timeout, Duration::from_millis(20));
    }

    #[test]
    fn test_fixture_builds() {
        let graph = codegen_pipeline().build().unwrap();
        assert_eq!(graph.stage_count(), 12);
        assert!(graph.validate_seed(&codegen_seed()).is_ok());
    }
}
