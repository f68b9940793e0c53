//! Event sink system for observability.
//!
//! The engine emits one event per lifecycle transition of a run. Sinks are
//! injected per engine; the default discards everything.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A run started.
pub const PIPELINE_STARTED: &str = "pipeline.started";
/// A layer is about to execute.
pub const LAYER_STARTED: &str = "layer.started";
/// A stage task was spawned.
pub const STAGE_STARTED: &str = "stage.started";
/// A stage returned its declared outputs.
pub const STAGE_COMPLETED: &str = "stage.completed";
/// A stage failed, panicked, or broke its output contract.
pub const STAGE_FAILED: &str = "stage.failed";
/// A stage exceeded its timeout.
pub const STAGE_TIMED_OUT: &str = "stage.timed_out";
/// A stage will not run because a required input is missing.
pub const STAGE_BLOCKED: &str = "stage.blocked";
/// Every member of a layer returned and outputs were merged.
pub const LAYER_JOINED: &str = "layer.joined";
/// Validation failed and the retry chain will run again.
pub const RETRY_SCHEDULED: &str = "retry.scheduled";
/// A run succeeded.
pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
/// A run failed.
pub const PIPELINE_FAILED: &str = "pipeline.failed";
