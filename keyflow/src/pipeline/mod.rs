//! Pipeline building and execution.
//!
//! This module provides:
//! - Stage specifications
//! - Pipeline builder with validation
//! - The derived stage graph and its layering
//! - The layered scheduler with its retry loop
//! - Failure tolerance modes

mod builder;
mod dag;
mod failure_tolerance;
mod retry;
mod scheduler;
mod spec;


pub use builder::{PipelineBuilder, DEFAULT_FEEDBACK_KEY};
pub use dag::{RetryPlan, StageGraph};
pub use failure_tolerance::{FailureCollector, FailureMode};
pub use retry::{PredicateOutcome, RetryDecision, RetryEdge, RetryState};
pub use scheduler::Engine;
pub use spec::{StageSpec, DEFAULT_STAGE_TIMEOUT};
