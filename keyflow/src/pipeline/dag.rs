//! Validated stage graph with derived edges and topological layers.
//!
//! Edges are never declared by hand: stage B depends on stage A when A
//! produces a key B reads. The only manual edge is the optional retry
//! back-edge, which is kept out of the DAG and handled by the scheduler.

use super::{RetryEdge, StageSpec};
use crate::context::{SharedState, StateMap};
use crate::core::StageKind;
use crate::errors::{CycleDetectedError, InvalidSeedError, PipelineValidationError, ViolationKind};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::Write as _;

/// Who owns a key in the shared state.
#[derive(Debug, Clone, PartialEq, Eq)]
enum KeyOwner {
    Seed,
    Feedback,
    Stage(String),
}

impl KeyOwner {
    fn label(&self) -> String {
        match self {
            Self::Seed => "<seed>".to_string(),
            Self::Feedback => "<feedback>".to_string(),
            Self::Stage(name) => name.clone(),
        }
    }
}

/// The resolved retry loop: the edge plus the chain it re-executes.
#[derive(Debug, Clone)]
pub struct RetryPlan {
    /// The declared back-edge.
    pub edge: RetryEdge,
    /// The target and every stage downstream of it up to the source's layer,
    /// in execution order.
    pub chain: Vec<String>,
    /// Every key the chain produces; these may be written again on retry.
    pub resettable: BTreeSet<String>,
    /// Index of the layer holding the retry target.
    pub target_layer: usize,
    /// Index of the layer holding the retry source.
    pub source_layer: usize,
}

impl RetryPlan {
    /// Returns true if the stage is re-executed on retry.
    #[must_use]
    pub fn contains(&self, stage: &str) -> bool {
        self.chain.iter().any(|s| s == stage)
    }
}

/// A validated directed acyclic graph of stages.
#[derive(Debug)]
pub struct StageGraph {
    /// The pipeline name.
    name: String,
    /// Stage specifications.
    stages: HashMap<String, StageSpec>,
    /// Declaration order.
    stage_order: Vec<String>,
    seed_keys: BTreeSet<String>,
    feedback_key: String,
    dependencies: HashMap<String, BTreeSet<String>>,
    layers: Vec<Vec<String>>,
    layer_of: HashMap<String, usize>,
    kinds: HashMap<String, StageKind>,
    retry: Option<RetryPlan>,
}

impl StageGraph {
    /// Validates the declarations and builds the graph.
    ///
    /// # Errors
    ///
    /// Returns the specific violation: empty pipeline, overlapping outputs,
    /// missing producer, cycle, or malformed retry edge.
    pub fn build(
        name: String,
        mut stages: HashMap<String, StageSpec>,
        stage_order: Vec<String>,
        seed_keys: BTreeSet<String>,
        feedback_key: String,
        retry_edge: Option<RetryEdge>,
    ) -> Result<Self, PipelineValidationError> {
        if stages.is_empty() {
            return Err(PipelineValidationError::new(
                ViolationKind::Empty,
                "Pipeline has no stages",
            ));
        }

        let owners = collect_owners(&stages, &stage_order, &seed_keys, &feedback_key)?;

        if let Some(edge) = &retry_edge {
            validate_retry_endpoints(edge, &stages)?;
            if let Some(target) = stages.get_mut(&edge.target) {
                target.optional_inputs.insert(feedback_key.clone());
            }
        }

        let dependencies = derive_dependencies(&stages, &stage_order, &owners)?;
        detect_cycles(&stage_order, &dependencies)?;
        let layers = compute_layers(&stage_order, &dependencies);
        let layer_of: HashMap<String, usize> = layers
            .iter()
            .enumerate()
            .flat_map(|(idx, layer)| layer.iter().map(move |s| (s.clone(), idx)))
            .collect();

        let retry = match retry_edge {
            Some(edge) => Some(resolve_retry_plan(edge, &stages, &stage_order, &dependencies, &layer_of)?),
            None => None,
        };

        let kinds = infer_kinds(&stages, &stage_order, &dependencies, &layers, &layer_of, retry.as_ref())?;

        Ok(Self {
            name,
            stages,
            stage_order,
            seed_keys,
            feedback_key,
            dependencies,
            layers,
            layer_of,
            kinds,
            retry,
        })
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Gets a stage specification.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageSpec> {
        self.stages.get(name)
    }

    /// Iterates the stages in declaration order.
    pub fn stages(&self) -> impl Iterator<Item = &StageSpec> {
        self.stage_order.iter().filter_map(|name| self.stages.get(name))
    }

    /// Returns the topological layers.
    #[must_use]
    pub fn layers(&self) -> &[Vec<String>] {
        &self.layers
    }

    /// Returns the layer index of a stage.
    #[must_use]
    pub fn layer_of(&self, stage: &str) -> Option<usize> {
        self.layer_of.get(stage).copied()
    }

    /// Returns the stages flattened in execution order.
    #[must_use]
    pub fn execution_order(&self) -> Vec<String> {
        self.layers.iter().flatten().cloned().collect()
    }

    /// Returns the effective kind of a stage.
    #[must_use]
    pub fn kind_of(&self, stage: &str) -> Option<StageKind> {
        self.kinds.get(stage).copied()
    }

    /// Returns the upstream stages of a stage.
    #[must_use]
    pub fn dependencies_of(&self, stage: &str) -> Option<&BTreeSet<String>> {
        self.dependencies.get(stage)
    }

    /// Returns the retry plan, if a retry edge was declared.
    #[must_use]
    pub fn retry_plan(&self) -> Option<&RetryPlan> {
        self.retry.as_ref()
    }

    /// Returns the declared seed keys.
    #[must_use]
    pub fn seed_keys(&self) -> &BTreeSet<String> {
        &self.seed_keys
    }

    /// Returns the feedback key.
    #[must_use]
    pub fn feedback_key(&self) -> &str {
        &self.feedback_key
    }

    /// Checks a run seed against the declared seed keys.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSeedError` if a declared seed key is missing, or if the
    /// seed carries a key owned by a stage or the feedback slot.
    pub fn validate_seed(&self, seed: &StateMap) -> Result<(), InvalidSeedError> {
        let missing: Vec<String> = self
            .seed_keys
            .iter()
            .filter(|key| !seed.contains_key(*key))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(InvalidSeedError::new("missing declared seed keys", missing));
        }

        let mut owned: Vec<String> = seed
            .keys()
            .filter(|key| {
                **key == self.feedback_key
                    || self.stages.values().any(|s| s.produced_outputs.contains(*key))
            })
            .cloned()
            .collect();
        if !owned.is_empty() {
            owned.sort();
            return Err(InvalidSeedError::new(
                "seed carries keys owned by stages or the feedback slot",
                owned,
            ));
        }

        Ok(())
    }

    /// Creates the shared state for a run, wired with key ownership.
    #[must_use]
    pub fn new_state(&self, seed: StateMap) -> SharedState {
        let mut state = SharedState::new(seed).with_feedback_key(self.feedback_key.clone());
        for spec in self.stages() {
            state = state.with_owner(spec.name.clone(), spec.produced_outputs.iter().cloned());
        }
        if let Some(plan) = &self.retry {
            state = state.with_resettable(plan.resettable.iter().cloned());
        }
        state
    }

    /// Renders the execution plan, one layer per line.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = format!("pipeline '{}'\n", self.name);
        for (idx, layer) in self.layers.iter().enumerate() {
            let members: Vec<String> = layer
                .iter()
                .map(|s| match self.kind_of(s) {
                    Some(kind) => format!("{s} ({kind})"),
                    None => s.clone(),
                })
                .collect();
            let _ = writeln!(out, "  layer {idx}: {}", members.join(", "));
        }
        if let Some(plan) = &self.retry {
            let _ = writeln!(
                out,
                "  retry: {} -> {} on '{}' (chain: {})",
                plan.edge.source,
                plan.edge.target,
                plan.edge.predicate_key,
                plan.chain.join(" -> ")
            );
        }
        out
    }
}

fn collect_owners(
    stages: &HashMap<String, StageSpec>,
    stage_order: &[String],
    seed_keys: &BTreeSet<String>,
    feedback_key: &str,
) -> Result<HashMap<String, KeyOwner>, PipelineValidationError> {
    let mut owners: HashMap<String, KeyOwner> = HashMap::new();
    for key in seed_keys {
        owners.insert(key.clone(), KeyOwner::Seed);
    }
    if let Some(existing) = owners.insert(feedback_key.to_string(), KeyOwner::Feedback) {
        return Err(overlap_error(feedback_key, &existing, &KeyOwner::Feedback));
    }

    for name in stage_order {
        let Some(spec) = stages.get(name) else {
            continue;
        };
        for key in &spec.produced_outputs {
            let owner = KeyOwner::Stage(name.clone());
            if let Some(existing) = owners.get(key) {
                return Err(overlap_error(key, existing, &owner));
            }
            owners.insert(key.clone(), owner);
        }
    }
    Ok(owners)
}

fn overlap_error(key: &str, first: &KeyOwner, second: &KeyOwner) -> PipelineValidationError {
    PipelineValidationError::new(
        ViolationKind::OverlappingOutputs,
        format!(
            "Key '{}' is claimed by both '{}' and '{}'",
            key,
            first.label(),
            second.label()
        ),
    )
    .with_stages(vec![first.label(), second.label()])
    .with_context_entry("key", key)
}

fn validate_retry_endpoints(
    edge: &RetryEdge,
    stages: &HashMap<String, StageSpec>,
) -> Result<(), PipelineValidationError> {
    let invalid = |message: String| {
        PipelineValidationError::new(ViolationKind::InvalidRetryEdge, message)
            .with_stages(vec![edge.source.clone(), edge.target.clone()])
    };

    if edge.source == edge.target {
        return Err(invalid(format!(
            "Retry edge for '{}' cannot target itself",
            edge.source
        )));
    }
    let source = stages
        .get(&edge.source)
        .ok_or_else(|| invalid(format!("Retry edge references unknown source stage '{}'", edge.source)))?;
    if !stages.contains_key(&edge.target) {
        return Err(invalid(format!(
            "Retry edge references unknown target stage '{}'",
            edge.target
        )));
    }
    if !source.produced_outputs.contains(&edge.predicate_key) {
        return Err(invalid(format!(
            "Retry source '{}' does not produce predicate key '{}'",
            edge.source, edge.predicate_key
        )));
    }
    if let Some(key) = &edge.feedback_from {
        if !source.produced_outputs.contains(key) {
            return Err(invalid(format!(
                "Retry source '{}' does not produce feedback key '{}'",
                edge.source, key
            )));
        }
    }
    Ok(())
}

fn derive_dependencies(
    stages: &HashMap<String, StageSpec>,
    stage_order: &[String],
    owners: &HashMap<String, KeyOwner>,
) -> Result<HashMap<String, BTreeSet<String>>, PipelineValidationError> {
    let mut dependencies = HashMap::new();
    for name in stage_order {
        let Some(spec) = stages.get(name) else {
            continue;
        };
        let mut deps = BTreeSet::new();
        for key in spec.readable_keys() {
            match owners.get(&key) {
                Some(KeyOwner::Stage(producer)) => {
                    deps.insert(producer.clone());
                }
                Some(KeyOwner::Seed | KeyOwner::Feedback) => {}
                None if spec.required_inputs.contains(&key) => {
                    return Err(PipelineValidationError::new(
                        ViolationKind::MissingProducer,
                        format!(
                            "Stage '{}' requires key '{}' which no stage or seed produces",
                            name, key
                        ),
                    )
                    .with_stages(vec![name.clone()])
                    .with_context_entry("key", key));
                }
                None => {}
            }
        }
        dependencies.insert(name.clone(), deps);
    }
    Ok(dependencies)
}

/// Detects cycles in the derived dependency graph.
fn detect_cycles(
    stage_order: &[String],
    dependencies: &HashMap<String, BTreeSet<String>>,
) -> Result<(), CycleDetectedError> {
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for name in stage_order {
        if !visited.contains(name) {
            if let Some(cycle) = dfs_cycle(name, dependencies, &mut visited, &mut rec_stack, &mut path) {
                return Err(CycleDetectedError::new(cycle));
            }
        }
    }

    Ok(())
}

fn dfs_cycle(
    node: &str,
    dependencies: &HashMap<String, BTreeSet<String>>,
    visited: &mut HashSet<String>,
    rec_stack: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> Option<Vec<String>> {
    visited.insert(node.to_string());
    rec_stack.insert(node.to_string());
    path.push(node.to_string());

    if let Some(deps) = dependencies.get(node) {
        for dep in deps {
            if !visited.contains(dep) {
                if let Some(cycle) = dfs_cycle(dep, dependencies, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(dep) {
                let cycle_start = path.iter().position(|n| n == dep).unwrap_or(0);
                let mut cycle: Vec<String> = path[cycle_start..].to_vec();
                cycle.push(dep.clone());
                return Some(cycle);
            }
        }
    }

    path.pop();
    rec_stack.remove(node);
    None
}

/// Groups stages by longest distance from a root; declaration order within a layer.
fn compute_layers(
    stage_order: &[String],
    dependencies: &HashMap<String, BTreeSet<String>>,
) -> Vec<Vec<String>> {
    let mut depth: HashMap<&str, usize> = HashMap::new();
    let mut remaining: Vec<&String> = stage_order.iter().collect();

    // Acyclic by now, so every pass places at least one stage.
    while !remaining.is_empty() {
        remaining.retain(|name| {
            let deps = dependencies.get(*name);
            let placed = deps.map_or(true, |d| d.iter().all(|dep| depth.contains_key(dep.as_str())));
            if !placed {
                return true;
            }
            let level = deps
                .into_iter()
                .flatten()
                .filter_map(|dep| depth.get(dep.as_str()))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(String::as_str(*name), level);
            false
        });
    }

    let layer_count = depth.values().copied().max().map_or(0, |d| d + 1);
    let mut layers = vec![Vec::new(); layer_count];
    for name in stage_order {
        if let Some(level) = depth.get(name.as_str()) {
            layers[*level].push(name.clone());
        }
    }
    layers
}

fn descendants(stage: &str, dependencies: &HashMap<String, BTreeSet<String>>) -> HashSet<String> {
    let mut found = HashSet::new();
    let mut frontier = vec![stage.to_string()];
    while let Some(current) = frontier.pop() {
        for (name, deps) in dependencies {
            if deps.contains(&current) && found.insert(name.clone()) {
                frontier.push(name.clone());
            }
        }
    }
    found
}

fn resolve_retry_plan(
    edge: RetryEdge,
    stages: &HashMap<String, StageSpec>,
    stage_order: &[String],
    dependencies: &HashMap<String, BTreeSet<String>>,
    layer_of: &HashMap<String, usize>,
) -> Result<RetryPlan, PipelineValidationError> {
    let downstream = descendants(&edge.target, dependencies);
    if !downstream.contains(&edge.source) {
        return Err(PipelineValidationError::new(
            ViolationKind::InvalidRetryEdge,
            format!(
                "Retry source '{}' does not run downstream of retry target '{}'",
                edge.source, edge.target
            ),
        )
        .with_stages(vec![edge.source.clone(), edge.target.clone()]));
    }

    let source_layer = layer_of.get(&edge.source).copied().unwrap_or(0);
    let mut chain: Vec<String> = stage_order
        .iter()
        .filter(|name| {
            **name == edge.target
                || (downstream.contains(*name)
                    && layer_of.get(*name).is_some_and(|layer| *layer <= source_layer))
        })
        .cloned()
        .collect();
    chain.sort_by_key(|name| layer_of.get(name).copied().unwrap_or(usize::MAX));

    let resettable = chain
        .iter()
        .filter_map(|name| stages.get(name))
        .flat_map(|spec| spec.produced_outputs.iter().cloned())
        .collect();

    Ok(RetryPlan {
        target_layer: layer_of.get(&edge.target).copied().unwrap_or(0),
        source_layer,
        edge,
        chain,
        resettable,
    })
}

fn infer_kinds(
    stages: &HashMap<String, StageSpec>,
    stage_order: &[String],
    dependencies: &HashMap<String, BTreeSet<String>>,
    layers: &[Vec<String>],
    layer_of: &HashMap<String, usize>,
    retry: Option<&RetryPlan>,
) -> Result<HashMap<String, StageKind>, PipelineValidationError> {
    let mut kinds = HashMap::new();
    for name in stage_order {
        let layer_size = |stage: &str| layer_of.get(stage).map_or(0, |idx| layers[*idx].len());

        let joins_parallel_layer = {
            let mut per_layer: HashMap<usize, usize> = HashMap::new();
            for dep in dependencies.get(name).into_iter().flatten() {
                if layer_size(dep) >= 2 {
                    if let Some(idx) = layer_of.get(dep) {
                        *per_layer.entry(*idx).or_default() += 1;
                    }
                }
            }
            per_layer.values().any(|count| *count >= 2)
        };

        let inferred = match retry {
            Some(plan) if plan.edge.target == *name => StageKind::RetryTarget,
            Some(plan) if plan.edge.source == *name => StageKind::RetrySource,
            _ if joins_parallel_layer => StageKind::Join,
            _ if layer_size(name) >= 2 => StageKind::ParallelMember,
            _ => StageKind::Sequential,
        };

        if let Some(declared) = stages.get(name).and_then(|s| s.kind) {
            if (declared.is_retry_role() || inferred.is_retry_role()) && declared != inferred {
                return Err(PipelineValidationError::new(
                    ViolationKind::InvalidRetryEdge,
                    format!(
                        "Stage '{}' is declared {} but its role in the retry edge is {}",
                        name, declared, inferred
                    ),
                )
                .with_stages(vec![name.clone()]));
            }
        }

        kinds.insert(name.clone(), inferred);
    }
    Ok(kinds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineBuilder;
    use crate::testing::{codegen_pipeline, StaticStage};
    use std::sync::Arc;

    fn stage(name: &str, inputs: &[&str], outputs: &[&str]) -> StageSpec {
        StageSpec::new(name, Arc::new(StaticStage::new(name, outputs.iter().copied())))
            .with_inputs(inputs.iter().copied())
            .with_outputs(outputs.iter().copied())
    }

    #[test]
    fn test_codegen_layers() {
        let graph = codegen_pipeline().build().unwrap();
        let layers = graph.layers();

        assert_eq!(layers.len(), 9);
        assert_eq!(layers[0], vec!["orchestrator".to_string()]);
        assert_eq!(
            layers[3],
            vec![
                "analyzer_1".to_string(),
                "analyzer_2".to_string(),
                "analyzer_3".to_string(),
                "analyzer_4".to_string(),
            ]
        );
        assert_eq!(layers[8], vec!["formatter".to_string()]);
    }

    #[test]
    fn test_codegen_kinds() {
        let graph = codegen_pipeline().build().unwrap();

        assert_eq!(graph.kind_of("orchestrator"), Some(StageKind::Sequential));
        assert_eq!(graph.kind_of("analyzer_2"), Some(StageKind::ParallelMember));
        assert_eq!(graph.kind_of("aggregator"), Some(StageKind::Join));
        assert_eq!(graph.kind_of("generator"), Some(StageKind::RetryTarget));
        assert_eq!(graph.kind_of("code_validator"), Some(StageKind::RetrySource));
    }

    #[test]
    fn test_codegen_retry_chain() {
        let graph = codegen_pipeline().build().unwrap();
        let plan = graph.retry_plan().unwrap();

        assert_eq!(
            plan.chain,
            vec![
                "generator".to_string(),
                "tester".to_string(),
                "code_validator".to_string(),
            ]
        );
        assert!(plan.resettable.contains("generated_code"));
        assert!(plan.resettable.contains("is_valid"));
        assert!(!plan.resettable.contains("formatted_output"));
        assert!(plan.target_layer < plan.source_layer);

        let generator = graph.stage("generator").unwrap();
        assert!(generator.optional_inputs.contains("feedback"));
    }

    #[test]
    fn test_retry_chain_includes_side_branches_of_target() {
        let graph = PipelineBuilder::new("side")
            .seed_keys(["input"])
            .stage(stage("gen", &["input"], &["code"]))
            .unwrap()
            .stage(stage("side", &["code"], &["doc"]))
            .unwrap()
            .stage(stage("check", &["code"], &["ok"]))
            .unwrap()
            .stage(stage("publish", &["doc", "ok"], &["release"]))
            .unwrap()
            .retry_edge(RetryEdge::new("check", "gen", "ok"))
            .build()
            .unwrap();
        let plan = graph.retry_plan().unwrap();

        assert_eq!(
            plan.chain,
            vec!["gen".to_string(), "side".to_string(), "check".to_string()]
        );
        assert!(plan.resettable.contains("doc"));
        assert!(!plan.resettable.contains("release"));
    }

    #[test]
    fn test_dependencies_are_derived_from_keys() {
        let graph = PipelineBuilder::new("derived")
            .seed_keys(["input"])
            .stage(stage("a", &["input"], &["x"]))
            .unwrap()
            .stage(stage("b", &["x"], &["y"]))
            .unwrap()
            .build()
            .unwrap();

        let deps = graph.dependencies_of("b").unwrap();
        assert!(deps.contains("a"));
        assert!(graph.dependencies_of("a").unwrap().is_empty());
        assert_eq!(graph.execution_order(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_overlapping_outputs_rejected() {
        let err = PipelineBuilder::new("overlap")
            .stage(stage("a", &[], &["x"]))
            .unwrap()
            .stage(stage("b", &[], &["x"]))
            .unwrap()
            .build()
            .unwrap_err();

        assert_eq!(err.kind, ViolationKind::OverlappingOutputs);
        assert_eq!(err.stages, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(err.error_info.context.get("key"), Some(&"x".to_string()));
    }

    #[test]
    fn test_output_overlapping_seed_rejected() {
        let err = PipelineBuilder::new("overlap")
            .seed_keys(["x"])
            .stage(stage("a", &[], &["x"]))
            .unwrap()
            .build()
            .unwrap_err();

        assert_eq!(err.kind, ViolationKind::OverlappingOutputs);
    }

    #[test]
    fn test_output_overlapping_feedback_rejected() {
        let err = PipelineBuilder::new("overlap")
            .stage(stage("a", &[], &["feedback"]))
            .unwrap()
            .build()
            .unwrap_err();

        assert_eq!(err.kind, ViolationKind::OverlappingOutputs);
    }

    #[test]
    fn test_missing_producer_rejected() {
        let err = PipelineBuilder::new("missing")
            .stage(stage("a", &["nowhere"], &["x"]))
            .unwrap()
            .build()
            .unwrap_err();

        assert_eq!(err.kind, ViolationKind::MissingProducer);
        assert_eq!(err.error_info.code, "CONTRACT-005-MISSING_PRODUCER");
    }

    #[test]
    fn test_optional_input_without_producer_is_fine() {
        let graph = PipelineBuilder::new("optional")
            .stage(stage("a", &[], &["x"]).with_optional_input("hint"))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(graph.layers().len(), 1);
    }

    #[test]
    fn test_cycle_rejected() {
        let err = PipelineBuilder::new("cycle")
            .stage(stage("a", &["y"], &["x"]))
            .unwrap()
            .stage(stage("b", &["x"], &["y"]))
            .unwrap()
            .build()
            .unwrap_err();

        assert_eq!(err.kind, ViolationKind::Cycle);
        assert!(err.message.contains("->"));
        assert_eq!(err.stages.first(), err.stages.last());
    }

    #[test]
    fn test_retry_source_must_be_downstream() {
        let err = PipelineBuilder::new("retry")
            .stage(stage("check", &[], &["ok"]))
            .unwrap()
            .stage(stage("gen", &["ok"], &["code"]))
            .unwrap()
            .retry_edge(RetryEdge::new("check", "gen", "ok"))
            .build()
            .unwrap_err();

        assert_eq!(err.kind, ViolationKind::InvalidRetryEdge);
    }

    #[test]
    fn test_retry_predicate_must_be_source_output() {
        let err = PipelineBuilder::new("retry")
            .stage(stage("gen", &[], &["code"]))
            .unwrap()
            .stage(stage("check", &["code"], &["ok"]))
            .unwrap()
            .retry_edge(RetryEdge::new("check", "gen", "is_valid"))
            .build()
            .unwrap_err();

        assert_eq!(err.kind, ViolationKind::InvalidRetryEdge);
    }

    #[test]
    fn test_declared_retry_role_must_match_edge() {
        let err = PipelineBuilder::new("roles")
            .stage(stage("gen", &[], &["code"]))
            .unwrap()
            .stage(stage("check", &["code"], &["ok"]).with_kind(StageKind::RetryTarget))
            .unwrap()
            .build()
            .unwrap_err();

        assert_eq!(err.kind, ViolationKind::InvalidRetryEdge);
    }

    #[test]
    fn test_validate_seed() {
        let graph = codegen_pipeline().build().unwrap();

        let mut seed = StateMap::new();
        seed.insert("collection_location".to_string(), serde_json::json!("c.json"));
        let err = graph.validate_seed(&seed).unwrap_err();
        assert_eq!(err.keys, vec!["export_target".to_string()]);

        seed.insert("export_target".to_string(), serde_json::json!("out/"));
        assert!(graph.validate_seed(&seed).is_ok());

        seed.insert("parsed_collection".to_string(), serde_json::json!({}));
        assert!(graph.validate_seed(&seed).is_err());
    }

    #[test]
    fn test_describe_lists_layers_and_retry() {
        let graph = codegen_pipeline().build().unwrap();
        let text = graph.describe();

        assert!(text.contains("layer 3: analyzer_1 (parallel_member)"));
        assert!(text.contains("retry: code_validator -> generator"));
    }
}
