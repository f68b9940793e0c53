//! Stage trait and implementations.
//!
//! Stages are the opaque units of work the engine schedules. The engine only
//! knows their declared keys; what a stage computes is its own business.

mod invoke;

pub use invoke::invoke_stage;

use crate::context::{StageContext, StateMap};
use crate::core::StageOutput;
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for pipeline stages.
///
/// A stage receives a read-only context holding its declared inputs and
/// returns an output that must contain exactly its declared output keys.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Executes the stage.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The stage execution context
    ///
    /// # Returns
    ///
    /// The stage output indicating success or failure.
    async fn execute(&self, ctx: &StageContext) -> StageOutput;
}

/// A simple function-based stage.
pub struct FnStage<F>
where
    F: Fn(&StageContext) -> StageOutput + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&StageContext) -> StageOutput + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&StageContext) -> StageOutput + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&StageContext) -> StageOutput + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        (self.func)(ctx)
    }
}

/// A fallible function-based stage.
///
/// The closure returns `anyhow::Result`; an error becomes a failed output
/// carrying the full error chain.
pub struct TryFnStage<F>
where
    F: Fn(&StageContext) -> anyhow::Result<StateMap> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> TryFnStage<F>
where
    F: Fn(&StageContext) -> anyhow::Result<StateMap> + Send + Sync,
{
    /// Creates a new fallible function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for TryFnStage<F>
where
    F: Fn(&StageContext) -> anyhow::Result<StateMap> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TryFnStage")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F> Stage for TryFnStage<F>
where
    F: Fn(&StageContext) -> anyhow::Result<StateMap> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        StageOutput::from((self.func)(ctx))
    }
}
