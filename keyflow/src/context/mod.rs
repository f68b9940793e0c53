//! State and context management for pipeline execution.
//!
//! This module provides:
//! - The shared state container with its disjoint-write merge contract
//! - Read-only snapshots of declared inputs
//! - The per-execution stage context

mod execution;
mod snapshot;
mod state;

pub use execution::StageContext;
pub use snapshot::StateSnapshot;
pub use state::{SharedState, StateMap};
