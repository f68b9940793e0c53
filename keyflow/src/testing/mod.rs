//! Testing utilities for keyflow pipelines.
//!
//! This module provides:
//! - Mock stages with scripted behaviour
//! - The reference code-generation pipeline fixture
//! - Assertions over stage outputs and execution reports

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_live_outputs_present, assert_output_contains, assert_output_failed,
    assert_output_succeeded, assert_run_failed, assert_run_succeeded, assert_state_has_keys,
    assert_state_lacks_keys,
};
pub use fixtures::{
    codegen_pipeline, codegen_seed, CodegenFixture, CODEGEN_ANALYZERS, CODEGEN_PIPELINE,
};
pub use mocks::{
    mock_value, FailingStage, JitteredStage, PanickingStage, RecordedExecution, ScriptedValidator,
    SlowStage, StaticStage,
};
