//! Core domain model types for keyflow.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Stage kind, status and outcome enums
//! - Stage output type with factory methods

mod output;
mod status;

pub use output::StageOutput;
pub use status::{StageKind, StageOutcome, StageStatus};
