//! Mock stages for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use crate::context::{StageContext, StateMap};
use crate::core::StageOutput;
use crate::stages::Stage;

/// What a mock stage saw on one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedExecution {
    /// Attempt number from the context.
    pub attempt: u32,
    /// Input keys present in the snapshot.
    pub inputs: BTreeSet<String>,
    /// Number of feedback entries visible to the stage.
    pub feedback_len: usize,
}

impl RecordedExecution {
    fn capture(ctx: &StageContext) -> Self {
        Self {
            attempt: ctx.attempt(),
            inputs: ctx.snapshot().keys().into_iter().map(str::to_string).collect(),
            feedback_len: ctx.feedback().len(),
        }
    }
}

#[derive(Debug, Default)]
struct Recorder {
    executions: Mutex<Vec<RecordedExecution>>,
}

impl Recorder {
    fn record(&self, ctx: &StageContext) -> usize {
        let mut executions = self.executions.lock();
        executions.push(RecordedExecution::capture(ctx));
        executions.len()
    }

    fn executions(&self) -> Vec<RecordedExecution> {
        self.executions.lock().clone()
    }

    fn count(&self) -> usize {
        self.executions.lock().len()
    }
}

/// Deterministic value a mock stage writes for one key.
#[must_use]
pub fn mock_value(stage: &str, key: &str) -> serde_json::Value {
    serde_json::json!({ "stage": stage, "key": key })
}

fn mock_outputs(stage: &str, keys: &[String], overrides: &StateMap) -> StateMap {
    keys.iter()
        .map(|key| {
            let value = overrides
                .get(key)
                .cloned()
                .unwrap_or_else(|| mock_value(stage, key));
            (key.clone(), value)
        })
        .collect()
}

/// A stage that returns a fixed value for each of its output keys.
#[derive(Debug)]
pub struct StaticStage {
    name: String,
    outputs: Vec<String>,
    overrides: StateMap,
    recorder: Recorder,
}

impl StaticStage {
    /// Creates a stage producing [`mock_value`] for every key.
    #[must_use]
    pub fn new(name: impl Into<String>, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            outputs: keys.into_iter().map(Into::into).collect(),
            overrides: HashMap::new(),
            recorder: Recorder::default(),
        }
    }

    /// Overrides the value written for one key.
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.overrides.insert(key.into(), value);
        self
    }

    /// Returns what the stage saw on each call.
    #[must_use]
    pub fn executions(&self) -> Vec<RecordedExecution> {
        self.recorder.executions()
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn execution_count(&self) -> usize {
        self.recorder.count()
    }
}

#[async_trait]
impl Stage for StaticStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        self.recorder.record(ctx);
        StageOutput::ok(mock_outputs(&self.name, &self.outputs, &self.overrides))
    }
}

/// A stage that reports failure, optionally recovering after some calls.
#[derive(Debug)]
pub struct FailingStage {
    name: String,
    error: String,
    recover_after: Option<usize>,
    outputs: Vec<String>,
    recorder: Recorder,
}

impl FailingStage {
    /// Creates a stage that always fails.
    #[must_use]
    pub fn new(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: error.into(),
            recover_after: None,
            outputs: Vec::new(),
            recorder: Recorder::default(),
        }
    }

    /// Fails the first `failures` calls, then succeeds with the given keys.
    #[must_use]
    pub fn recovering_after(
        mut self,
        failures: usize,
        keys: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.recover_after = Some(failures);
        self.outputs = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn execution_count(&self) -> usize {
        self.recorder.count()
    }
}

#[async_trait]
impl Stage for FailingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        let call = self.recorder.record(ctx);
        match self.recover_after {
            Some(failures) if call > failures => {
                StageOutput::ok(mock_outputs(&self.name, &self.outputs, &StateMap::new()))
            }
            _ => StageOutput::fail(self.error.clone()),
        }
    }
}

/// A stage that sleeps before producing its outputs.
#[derive(Debug)]
pub struct SlowStage {
    name: String,
    delay: Duration,
    outputs: Vec<String>,
}

impl SlowStage {
    /// Creates a slow stage with no outputs.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            outputs: Vec::new(),
        }
    }

    /// Sets the keys produced once the delay has elapsed.
    #[must_use]
    pub fn with_outputs(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.outputs = keys.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl Stage for SlowStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> StageOutput {
        tokio::time::sleep(self.delay).await;
        StageOutput::ok(mock_outputs(&self.name, &self.outputs, &StateMap::new()))
    }
}

/// A stage that panics with a fixed message.
#[derive(Debug)]
pub struct PanickingStage {
    name: String,
    message: String,
}

impl PanickingStage {
    /// Creates a panicking stage.
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Stage for PanickingStage {
    fn name(&self) -> &str {
        &self.name
    }

    #[allow(clippy::panic)]
    async fn execute(&self, _ctx: &StageContext) -> StageOutput {
        panic!("{}", self.message)
    }
}

/// A validator returning a scripted sequence of verdicts.
///
/// Call `n` uses verdict `n`; once the script runs out the last verdict
/// repeats. An empty script always passes.
#[derive(Debug)]
pub struct ScriptedValidator {
    name: String,
    verdicts: Vec<bool>,
    predicate_key: String,
    feedback_key: String,
    recorder: Recorder,
}

impl ScriptedValidator {
    /// Creates a validator writing `is_valid` and `validation_feedback`.
    #[must_use]
    pub fn new(name: impl Into<String>, verdicts: impl IntoIterator<Item = bool>) -> Self {
        Self {
            name: name.into(),
            verdicts: verdicts.into_iter().collect(),
            predicate_key: "is_valid".to_string(),
            feedback_key: "validation_feedback".to_string(),
            recorder: Recorder::default(),
        }
    }

    /// A validator that always passes.
    #[must_use]
    pub fn always_valid(name: impl Into<String>) -> Self {
        Self::new(name, [true])
    }

    /// Overrides the output keys.
    #[must_use]
    pub fn with_keys(mut self, predicate_key: impl Into<String>, feedback_key: impl Into<String>) -> Self {
        self.predicate_key = predicate_key.into();
        self.feedback_key = feedback_key.into();
        self
    }

    /// Returns what the validator saw on each call.
    #[must_use]
    pub fn executions(&self) -> Vec<RecordedExecution> {
        self.recorder.executions()
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn execution_count(&self) -> usize {
        self.recorder.count()
    }
}

#[async_trait]
impl Stage for ScriptedValidator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        let call = self.recorder.record(ctx);
        let valid = self
            .verdicts
            .get(call - 1)
            .or_else(|| self.verdicts.last())
            .copied()
            .unwrap_or(true);
        let feedback = if valid {
            serde_json::json!("ok")
        } else {
            serde_json::json!(format!("attempt {}: generated code rejected", ctx.attempt()))
        };

        StageOutput::ok_empty()
            .with_value(self.predicate_key.clone(), serde_json::json!(valid))
            .with_value(self.feedback_key.clone(), feedback)
    }
}

/// A stage that sleeps a random duration before producing deterministic outputs.
#[derive(Debug)]
pub struct JitteredStage {
    name: String,
    outputs: Vec<String>,
    max_delay: Duration,
}

impl JitteredStage {
    /// Creates a jittered stage.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        keys: impl IntoIterator<Item = impl Into<String>>,
        max_delay: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            outputs: keys.into_iter().map(Into::into).collect(),
            max_delay,
        }
    }
}

#[async_trait]
impl Stage for JitteredStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> StageOutput {
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let delay = Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms));
        tokio::time::sleep(delay).await;
        StageOutput::ok(mock_outputs(&self.name, &self.outputs, &StateMap::new()))
    }
}
