//! # Keyflow
//!
//! Layered stage orchestration over a key-partitioned shared state.
//!
//! Keyflow runs a fixed graph of opaque stages:
//!
//! - **Key contracts**: every stage declares the keys it reads and the keys it
//!   alone writes; dependency edges are derived from those declarations
//! - **Layered scheduling**: stages whose inputs are ready run concurrently,
//!   joined by a barrier before their outputs are merged
//! - **Bounded retry**: one back-edge from a validating stage to the stage
//!   that produced what it validated, with accumulated feedback
//! - **Execution reports**: every started run ends in a serializable report
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keyflow::prelude::*;
//!
//! let graph = PipelineBuilder::new("codegen")
//!     .seed_keys(["spec"])
//!     .stage(StageSpec::new("generate", generator).with_inputs(["spec"]).with_outputs(["code"]))?
//!     .stage(StageSpec::new("check", checker).with_inputs(["code"]).with_outputs(["ok", "notes"]))?
//!     .retry_edge(RetryEdge::new("check", "generate", "ok").with_feedback_from("notes"))
//!     .build()?;
//!
//! let report = Engine::new(graph).run(seed, 3).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod report;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{EngineConfig, LoggingConfig};
    pub use crate::context::{SharedState, StageContext, StateMap, StateSnapshot};
    pub use crate::core::{StageKind, StageOutcome, StageOutput, StageStatus};
    pub use crate::errors::{
        ContractErrorInfo, DisjointnessViolation, InvalidSeedError, KeyflowError,
        PipelineValidationError, StageFailure, ViolationKind,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::init_tracing;
    pub use crate::pipeline::{
        Engine, FailureMode, PipelineBuilder, RetryEdge, StageGraph, StageSpec,
    };
    pub use crate::report::{ExecutionReport, FailureDetail, FailureKind, RunStatus};
    pub use crate::stages::{FnStage, Stage, TryFnStage};
}
