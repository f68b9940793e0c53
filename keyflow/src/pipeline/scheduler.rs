//! Layered execution of a [`StageGraph`].
//!
//! Each layer runs its members as concurrent tokio tasks and waits for all of
//! them at a join barrier before merging outputs into the shared state. The
//! retry loop rewinds to the retry target's layer and re-executes only the
//! retry chain.

use super::{
    FailureCollector, PredicateOutcome, RetryDecision, RetryPlan, RetryState, StageGraph, StageSpec,
};
use crate::config::EngineConfig;
use crate::context::{SharedState, StageContext, StateMap};
use crate::core::{StageKind, StageOutcome};
use crate::errors::{ConfigError, KeyflowError, StageFailure};
use crate::events::{self, EventSink, NoOpEventSink};
use crate::observability::{PipelineSpanAttributes, SpanTimer, StageSpanAttributes};
use crate::report::{ExecutionReport, FailureDetail, FailureKind, RunLedger, RunOutcome, StageRecord};
use crate::stages::invoke_stage;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Runs a validated stage graph.
pub struct Engine {
    graph: StageGraph,
    config: EngineConfig,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("pipeline", &self.graph.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine with the default configuration and no event sink.
    #[must_use]
    pub fn new(graph: StageGraph) -> Self {
        let config = EngineConfig::default().with_feedback_key(graph.feedback_key());
        Self {
            graph,
            config,
            sink: Arc::new(NoOpEventSink),
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Returns the graph.
    #[must_use]
    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs the pipeline with the retry bound from the configuration.
    ///
    /// # Errors
    ///
    /// See [`Engine::run`].
    pub async fn run_configured(&self, seed: StateMap) -> Result<ExecutionReport, KeyflowError> {
        self.run(seed, self.config.max_retries).await
    }

    /// Runs the pipeline once.
    ///
    /// Stage failures, timeouts and retry exhaustion produce a report with
    /// status `failed`; they are not errors.
    ///
    /// # Errors
    ///
    /// Returns an error without starting the run if the configuration is
    /// invalid or the seed does not match the declared seed keys. A merge
    /// rejected by the shared state also surfaces as an error.
    pub async fn run(&self, seed: StateMap, max_retries: u32) -> Result<ExecutionReport, KeyflowError> {
        self.config.validate()?;
        if self.config.feedback_key != self.graph.feedback_key() {
            return Err(ConfigError::new(
                "feedback_key",
                format!(
                    "engine expects '{}' but the graph uses '{}'",
                    self.config.feedback_key,
                    self.graph.feedback_key()
                ),
            )
            .into());
        }
        self.graph.validate_seed(&seed)?;

        let run_id = Uuid::new_v4();
        let attrs = PipelineSpanAttributes::new(self.graph.name(), run_id, max_retries);
        let span = attrs.span();
        Run::new(self, run_id, seed, max_retries)
            .execute(&attrs)
            .instrument(span)
            .await
    }
}

/// How a layer ended.
enum LayerResult {
    /// Every member returned; `merged` ran successfully.
    Joined {
        merged: BTreeSet<String>,
        routed: Option<StageFailure>,
    },
    /// A member failure stopped the run; nothing was merged.
    Aborted(StageFailure),
}

/// What the scheduler does after a layer.
enum Step<'a> {
    Next,
    Rewind(&'a RetryPlan),
    Stop(FailureDetail),
}

/// Mutable state of one run.
struct Run<'a> {
    engine: &'a Engine,
    run_id: Uuid,
    max_retries: u32,
    state: SharedState,
    ledger: RunLedger,
    retry: RetryState,
    failures: FailureCollector,
}

impl<'a> Run<'a> {
    fn new(engine: &'a Engine, run_id: Uuid, seed: StateMap, max_retries: u32) -> Self {
        Self {
            engine,
            run_id,
            max_retries,
            state: engine.graph.new_state(seed),
            ledger: RunLedger::new(engine.graph.name(), run_id),
            retry: RetryState::new(),
            failures: FailureCollector::new(engine.config.failure_mode),
        }
    }

    async fn emit(&self, event_type: &str, payload: serde_json::Value) {
        self.engine.sink.emit(event_type, Some(payload)).await;
    }

    async fn execute(mut self, attrs: &PipelineSpanAttributes) -> Result<ExecutionReport, KeyflowError> {
        let engine = self.engine;
        let graph = &engine.graph;
        let layers = graph.layers();
        let plan = graph.retry_plan();

        self.emit(events::PIPELINE_STARTED, attrs.to_payload()).await;
        info!(
            stages = graph.stage_count(),
            layers = layers.len(),
            failure_mode = ?engine.config.failure_mode,
            "pipeline run started"
        );

        let mut idx = 0;
        let mut rerun: Option<&RetryPlan> = None;
        while idx < layers.len() {
            let members = self.select_members(idx, rerun).await;
            let result = if members.is_empty() {
                LayerResult::Joined {
                    merged: BTreeSet::new(),
                    routed: None,
                }
            } else {
                self.execute_layer(idx, members).await?
            };

            let step = match (result, plan) {
                (LayerResult::Aborted(failure), _) => Step::Stop(self.failure_detail(&failure)),
                (
                    LayerResult::Joined {
                        routed: Some(failure),
                        ..
                    },
                    Some(plan),
                ) => {
                    let feedback = json!({ "error": failure.to_string() });
                    self.on_validation_failure(plan, failure.stage(), feedback).await
                }
                (LayerResult::Joined { merged, .. }, Some(plan))
                    if plan.source_layer == idx && merged.contains(&plan.edge.source) =>
                {
                    self.check_predicate(plan).await
                }
                _ => Step::Next,
            };

            match step {
                Step::Next => {
                    if rerun.is_some_and(|p| idx >= p.source_layer) {
                        rerun = None;
                    }
                    idx += 1;
                }
                Step::Rewind(plan) => {
                    idx = plan.target_layer;
                    rerun = Some(plan);
                }
                Step::Stop(detail) => return Ok(self.fail(detail).await),
            }
        }

        Ok(self.succeed().await)
    }

    fn attempt_of(&self, stage: &str) -> u32 {
        match self.engine.graph.retry_plan() {
            Some(plan) if plan.contains(stage) => self.retry.current_attempt(),
            _ => 1,
        }
    }

    /// Picks the stages of a layer that will run, blocking those with missing inputs.
    async fn select_members(&mut self, idx: usize, rerun: Option<&RetryPlan>) -> Vec<&'a StageSpec> {
        let engine = self.engine;
        let graph = &engine.graph;
        let mut members = Vec::new();

        for name in &graph.layers()[idx] {
            if rerun.is_some_and(|plan| !plan.contains(name)) || self.failures.is_blocked(name) {
                continue;
            }
            let Some(spec) = graph.stage(name) else {
                continue;
            };

            let missing = FailureCollector::missing_inputs(spec, &self.state);
            if missing.is_empty() {
                members.push(spec);
                continue;
            }

            let message = format!("blocked: missing required inputs {}", missing.join(", "));
            let attempt = self.attempt_of(name);
            warn!(stage = %name, missing = ?missing, "stage blocked");
            self.failures.record_blocked(name);
            self.ledger.skip(name.clone());
            self.ledger.warn(name.clone(), message.clone());
            self.ledger.record(
                StageRecord::new(name.clone(), attempt, StageOutcome::Blocked, Duration::ZERO)
                    .with_error(message),
            );
            self.emit(events::STAGE_BLOCKED, json!({ "stage": name, "missing": missing }))
                .await;
        }

        members
    }

    async fn execute_layer(
        &mut self,
        idx: usize,
        members: Vec<&'a StageSpec>,
    ) -> Result<LayerResult, KeyflowError> {
        let engine = self.engine;
        let graph = &engine.graph;
        let layer_size = graph.layers()[idx].len();
        let names: Vec<&str> = members.iter().map(|s| s.name.as_str()).collect();

        debug!(layer = idx, stages = ?names, "layer started");
        self.emit(events::LAYER_STARTED, json!({ "layer": idx, "stages": names }))
            .await;

        let mut tasks = JoinSet::new();
        let mut pending: BTreeSet<String> = BTreeSet::new();
        for spec in members {
            let attempt = self.attempt_of(&spec.name);
            let kind = graph.kind_of(&spec.name).unwrap_or_default();
            let attrs = StageSpanAttributes::new(spec.name.clone(), kind, attempt, idx);
            let ctx = StageContext::new(spec.name.clone(), self.run_id, self.state.get(&spec.readable_keys()))
                .with_attempt(attempt)
                .with_timeout(spec.timeout)
                .with_feedback_key(graph.feedback_key());

            if kind == StageKind::RetryTarget {
                self.retry.target_executions += 1;
            }
            self.emit(events::STAGE_STARTED, attrs.to_payload()).await;
            pending.insert(spec.name.clone());

            let spec = spec.clone();
            let span = attrs.span();
            tasks.spawn(
                async move {
                    let timer = SpanTimer::start();
                    let result = invoke_stage(&spec, ctx).await;
                    (spec.name, attempt, timer.elapsed(), result)
                }
                .instrument(span),
            );
        }

        let routable_target = engine.config.route_target_failures
            && graph
                .retry_plan()
                .is_some_and(|plan| pending.contains(&plan.edge.target));

        let mut outputs: Vec<(String, StateMap)> = Vec::new();
        let mut routed: Option<StageFailure> = None;
        let mut fatal: Option<StageFailure> = None;

        while let Some(joined) = tasks.join_next().await {
            let (name, attempt, elapsed, result) = joined
                .map_err(|e| KeyflowError::Internal(format!("stage task did not complete: {e}")))?;
            pending.remove(&name);

            match result {
                Ok(data) => {
                    let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                    debug!(stage = %name, elapsed_ms, "stage completed");
                    self.ledger
                        .record(StageRecord::new(name.clone(), attempt, StageOutcome::Completed, elapsed));
                    let mut keys: Vec<&String> = data.keys().collect();
                    keys.sort();
                    self.emit(
                        events::STAGE_COMPLETED,
                        json!({ "stage": name, "attempt": attempt, "keys": keys }),
                    )
                    .await;
                    outputs.push((name, data));
                }
                Err(failure) => {
                    let (outcome, event) = if failure.is_timeout() {
                        (StageOutcome::TimedOut, events::STAGE_TIMED_OUT)
                    } else {
                        (StageOutcome::Failed, events::STAGE_FAILED)
                    };
                    self.ledger.record(
                        StageRecord::new(name.clone(), attempt, outcome, elapsed).with_error(failure.to_string()),
                    );
                    self.emit(
                        event,
                        json!({ "stage": name, "attempt": attempt, "error": failure.to_string() }),
                    )
                    .await;

                    let is_target = graph
                        .retry_plan()
                        .is_some_and(|plan| plan.edge.target == name);
                    if routable_target && is_target && failure.is_routable() {
                        warn!(stage = %name, error = %failure, "retry target failed; routing to retry loop");
                        routed = Some(failure);
                    } else if self.failures.tolerates(layer_size) {
                        warn!(stage = %name, error = %failure, "parallel member failed; continuing without it");
                        self.failures.record_degraded(&name);
                        self.ledger.skip(name.clone());
                        self.ledger.warn(name, failure.to_string());
                    } else {
                        fatal = Some(failure);
                        break;
                    }
                }
            }
        }

        if let Some(failure) = fatal {
            tasks.abort_all();
            for name in pending {
                let attempt = self.attempt_of(&name);
                self.ledger.record(
                    StageRecord::new(name.clone(), attempt, StageOutcome::Aborted, Duration::ZERO)
                        .with_error(format!("aborted after '{}' failed", failure.stage())),
                );
            }
            return Ok(LayerResult::Aborted(failure));
        }

        let mut merged = BTreeSet::new();
        for (name, data) in outputs {
            self.state.merge(&name, data)?;
            merged.insert(name);
        }

        debug!(layer = idx, merged = ?merged, "layer joined");
        self.emit(
            events::LAYER_JOINED,
            json!({ "layer": idx, "merged": merged, "state_keys": self.state.len() }),
        )
        .await;

        Ok(LayerResult::Joined { merged, routed })
    }

    async fn check_predicate(&mut self, plan: &'a RetryPlan) -> Step<'a> {
        let source_outputs = self
            .engine
            .graph
            .stage(&plan.edge.source)
            .map(|spec| spec.produced_outputs.clone())
            .unwrap_or_default();

        match plan.edge.evaluate(&source_outputs, &self.state) {
            PredicateOutcome::Passed => {
                debug!(source = %plan.edge.source, attempts = self.retry.attempts, "validation passed");
                Step::Next
            }
            PredicateOutcome::Failed { feedback } => {
                self.on_validation_failure(plan, &plan.edge.source, feedback).await
            }
            PredicateOutcome::Invalid(reason) => Step::Stop(self.with_retry_history(FailureDetail::new(
                plan.edge.source.clone(),
                FailureKind::InvalidPredicate,
                reason,
            ))),
        }
    }

    async fn on_validation_failure(
        &mut self,
        plan: &'a RetryPlan,
        stage: &str,
        feedback: serde_json::Value,
    ) -> Step<'a> {
        let (entry, decision) = self.retry.record_failure(stage, feedback, self.max_retries);
        self.state.append_feedback(entry);
        self.ledger.set_retry_attempts(self.retry.attempts);

        match decision {
            RetryDecision::Exhausted { attempts } => {
                let reason = format!(
                    "validation by '{}' failed {attempts} time(s); retry limit {} reached",
                    stage, self.max_retries
                );
                Step::Stop(self.with_retry_history(FailureDetail::new(
                    plan.edge.target.clone(),
                    FailureKind::RetryExhausted,
                    reason,
                )))
            }
            RetryDecision::Retry { attempts } => {
                let cleared = self.state.reset(&plan.resettable);
                warn!(
                    target_stage = %plan.edge.target,
                    attempt = attempts,
                    max_retries = self.max_retries,
                    target_executions = self.retry.target_executions,
                    "validation failed; retrying"
                );
                self.emit(
                    events::RETRY_SCHEDULED,
                    json!({
                        "attempt": attempts,
                        "source": stage,
                        "target": plan.edge.target,
                        "cleared": cleared,
                    }),
                )
                .await;
                Step::Rewind(plan)
            }
        }
    }

    fn with_retry_history(&self, mut detail: FailureDetail) -> FailureDetail {
        detail.retry_attempts = self.retry.attempts;
        detail.feedback = self.state.feedback().to_vec();
        detail
    }

    fn failure_detail(&self, failure: &StageFailure) -> FailureDetail {
        self.with_retry_history(FailureDetail::from_stage_failure(failure))
    }

    async fn fail(self, detail: FailureDetail) -> ExecutionReport {
        let engine = self.engine;
        error!(
            stage = %detail.stage,
            kind = %detail.kind,
            reason = %detail.reason,
            "pipeline run failed"
        );
        let report = self.ledger.finish(self.state, RunOutcome::Failed(detail));
        engine
            .sink
            .emit(events::PIPELINE_FAILED, Some(report.summary_payload()))
            .await;
        report
    }

    async fn succeed(self) -> ExecutionReport {
        let engine = self.engine;
        let report = self.ledger.finish(self.state, RunOutcome::Succeeded);
        info!(
            duration_ms = report.duration_ms,
            retry_attempts = report.retry_attempts,
            warnings = report.warnings.len(),
            "pipeline run completed"
        );
        engine
            .sink
            .emit(events::PIPELINE_COMPLETED, Some(report.summary_payload()))
            .await;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageOutput;
    use crate::pipeline::{PipelineBuilder, RetryEdge};
    use crate::stages::FnStage;
    use crate::testing::{codegen_pipeline, codegen_seed, StaticStage};

    #[tokio::test]
    async fn test_engine_rejects_mismatched_feedback_key() {
        let graph = codegen_pipeline().build().unwrap();
        let engine = Engine::new(graph).with_config(EngineConfig::default().with_feedback_key("notes"));

        let err = engine.run(codegen_seed(), 3).await.unwrap_err();
        assert!(matches!(err, KeyflowError::Config(_)));
    }

    #[tokio::test]
    async fn test_engine_rejects_invalid_seed_before_start() {
        let graph = codegen_pipeline().build().unwrap();
        let engine = Engine::new(graph);

        let err = engine.run(StateMap::new(), 3).await.unwrap_err();
        assert!(matches!(err, KeyflowError::InvalidSeed(_)));
    }

    #[tokio::test]
    async fn test_engine_sequential_run() {
        let graph = PipelineBuilder::new("seq")
            .seed_keys(["input"])
            .stage(
                StageSpec::new("a", Arc::new(StaticStage::new("a", ["x"])))
                    .with_inputs(["input"])
                    .with_outputs(["x"]),
            )
            .unwrap()
            .stage(
                StageSpec::new("b", Arc::new(StaticStage::new("b", ["y"])))
                    .with_inputs(["x"])
                    .with_outputs(["y"]),
            )
            .unwrap()
            .build()
            .unwrap();

        let mut seed = StateMap::new();
        seed.insert("input".to_string(), json!(1));
        let report = Engine::new(graph).run_configured(seed).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.records.len(), 2);
        assert!(report.final_state.contains_key("y"));
        assert!(!report.final_state.contains_key("feedback"));
    }

    #[tokio::test]
    async fn test_retry_reruns_side_branches_of_target() {
        let generate = FnStage::new("gen", |ctx: &StageContext| {
            StageOutput::ok_value("code", json!(ctx.attempt()))
        });
        let side = FnStage::new("side", |ctx: &StageContext| {
            StageOutput::ok_value("doc", ctx.get("code").cloned().unwrap_or_default())
        });
        let check = FnStage::new("check", |ctx: &StageContext| {
            StageOutput::ok_empty()
                .with_value("ok", json!(ctx.get("code") == Some(&json!(2))))
                .with_value("notes", json!("code must be 2"))
        });
        let graph = PipelineBuilder::new("side")
            .seed_keys(["input"])
            .stage(StageSpec::new("gen", Arc::new(generate)).with_inputs(["input"]).with_outputs(["code"]))
            .unwrap()
            .stage(StageSpec::new("side", Arc::new(side)).with_inputs(["code"]).with_outputs(["doc"]))
            .unwrap()
            .stage(
                StageSpec::new("check", Arc::new(check))
                    .with_inputs(["code"])
                    .with_outputs(["ok", "notes"]),
            )
            .unwrap()
            .retry_edge(RetryEdge::new("check", "gen", "ok").with_feedback_from("notes"))
            .build()
            .unwrap();

        let mut seed = StateMap::new();
        seed.insert("input".to_string(), json!(0));
        let report = Engine::new(graph).run(seed, 3).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.retry_attempts, 1);
        assert_eq!(report.get("code"), Some(&json!(2)));
        assert_eq!(report.get("doc"), Some(&json!(2)));
        assert_eq!(report.executions_of("side"), 2);
    }
}
