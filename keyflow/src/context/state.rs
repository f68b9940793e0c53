//! The shared state container owned by the scheduler.

use super::StateSnapshot;
use crate::errors::DisjointnessViolation;
use std::collections::{BTreeSet, HashMap, HashSet};

/// A mapping from state keys to opaque JSON payloads.
pub type StateMap = HashMap<String, serde_json::Value>;

/// The single key-value store accumulated across a run.
///
/// Every key has exactly one owner: the seed, one stage, or the scheduler's
/// feedback slot. Keys are written once, except the retry-resettable keys and
/// the feedback array, which only ever grows.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    values: StateMap,
    owners: HashMap<String, BTreeSet<String>>,
    resettable: HashSet<String>,
    feedback_key: String,
}

impl SharedState {
    /// Creates a state holding the seed values.
    #[must_use]
    pub fn new(seed: StateMap) -> Self {
        Self {
            values: seed,
            owners: HashMap::new(),
            resettable: HashSet::new(),
            feedback_key: "feedback".to_string(),
        }
    }

    /// Registers the keys a stage is solely responsible for writing.
    #[must_use]
    pub fn with_owner(
        mut self,
        stage: impl Into<String>,
        keys: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.owners
            .insert(stage.into(), keys.into_iter().map(Into::into).collect());
        self
    }

    /// Marks keys that a retry attempt may write again.
    #[must_use]
    pub fn with_resettable(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.resettable.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Sets the key that holds accumulated retry feedback.
    #[must_use]
    pub fn with_feedback_key(mut self, key: impl Into<String>) -> Self {
        self.feedback_key = key.into();
        self
    }

    /// Copies the requested keys that are currently present.
    ///
    /// Keys that are absent are simply left out of the snapshot.
    #[must_use]
    pub fn get<'a>(&self, keys: impl IntoIterator<Item = &'a String>) -> StateSnapshot {
        let declared: BTreeSet<String> = keys.into_iter().cloned().collect();
        let values = declared
            .iter()
            .filter_map(|key| self.values.get(key).map(|v| (key.clone(), v.clone())))
            .collect();
        StateSnapshot::new(declared, values)
    }

    /// Merges a stage's outputs into the state.
    ///
    /// # Errors
    ///
    /// Returns `DisjointnessViolation` if the key set is not exactly the
    /// stage's registered outputs, or if a key already holds a value and is
    /// not retry-resettable. Nothing is written on error.
    pub fn merge(&mut self, stage: &str, outputs: StateMap) -> Result<(), DisjointnessViolation> {
        let declared = self.owners.get(stage).cloned().unwrap_or_default();
        let returned: BTreeSet<String> = outputs.keys().cloned().collect();

        if returned != declared {
            return Err(DisjointnessViolation::key_set_mismatch(
                stage,
                returned.difference(&declared).cloned().collect(),
                declared.difference(&returned).cloned().collect(),
            ));
        }

        if let Some(key) = returned
            .iter()
            .find(|key| self.values.contains_key(*key) && !self.resettable.contains(*key))
        {
            return Err(DisjointnessViolation::already_set(stage, key.clone()));
        }

        self.values.extend(outputs);
        Ok(())
    }

    /// Removes retry-resettable keys ahead of a retry attempt.
    ///
    /// Returns the keys that were actually removed. Keys outside the
    /// resettable list are left in place.
    pub fn reset<'a>(&mut self, keys: impl IntoIterator<Item = &'a String>) -> Vec<String> {
        let mut removed = Vec::new();
        for key in keys {
            if self.resettable.contains(key) && self.values.remove(key).is_some() {
                removed.push(key.clone());
            }
        }
        removed
    }

    /// Appends one entry to the feedback array, creating it on first use.
    pub fn append_feedback(&mut self, entry: serde_json::Value) {
        let slot = self
            .values
            .entry(self.feedback_key.clone())
            .or_insert_with(|| serde_json::Value::Array(Vec::new()));

        match slot {
            serde_json::Value::Array(items) => items.push(entry),
            other => {
                let previous = other.take();
                *other = serde_json::Value::Array(vec![previous, entry]);
            }
        }
    }

    /// Returns the accumulated feedback entries.
    #[must_use]
    pub fn feedback(&self) -> &[serde_json::Value] {
        match self.values.get(&self.feedback_key) {
            Some(serde_json::Value::Array(items)) => items,
            _ => &[],
        }
    }

    /// Returns the feedback key.
    #[must_use]
    pub fn feedback_key(&self) -> &str {
        &self.feedback_key
    }

    /// Checks if a key exists.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Gets a single value.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// Returns all keys, sorted.
    #[must_use]
    pub fn keys(&self) -> BTreeSet<String> {
        self.values.keys().cloned().collect()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the state is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consumes the state and returns its values.
    #[must_use]
    pub fn into_inner(self) -> StateMap {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DisjointnessReason;
    use serde_json::json;

    fn seed() -> StateMap {
        let mut seed = StateMap::new();
        seed.insert("collection_location".to_string(), json!("/tmp/c.json"));
        seed
    }

    fn outputs(pairs: &[(&str, serde_json::Value)]) -> StateMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_get_returns_only_present_keys() {
        let state = SharedState::new(seed());
        let keys = vec!["collection_location".to_string(), "absent".to_string()];
        let snapshot = state.get(&keys);

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains("collection_location"));
        assert!(snapshot.is_declared("absent"));
        assert!(!snapshot.contains("absent"));
    }

    #[test]
    fn test_merge_declared_outputs() {
        let mut state = SharedState::new(seed()).with_owner("parser", ["parsed"]);
        state
            .merge("parser", outputs(&[("parsed", json!({"n": 1}))]))
            .unwrap();

        assert!(state.contains("parsed"));
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn test_merge_rejects_wrong_key_set() {
        let mut state = SharedState::new(seed()).with_owner("parser", ["parsed"]);
        let err = state
            .merge("parser", outputs(&[("other", json!(1))]))
            .unwrap_err();

        match err.reason {
            DisjointnessReason::KeySetMismatch { unexpected, missing } => {
                assert!(unexpected.contains("other"));
                assert!(missing.contains("parsed"));
            }
            DisjointnessReason::AlreadySet { .. } => panic!("expected key set mismatch"),
        }
        assert!(!state.contains("other"));
    }

    #[test]
    fn test_merge_rejects_unregistered_stage() {
        let mut state = SharedState::new(seed());
        assert!(state.merge("ghost", outputs(&[("x", json!(1))])).is_err());
    }

    #[test]
    fn test_merge_rejects_rewrite_of_written_key() {
        let mut state = SharedState::new(seed()).with_owner("parser", ["parsed"]);
        state.merge("parser", outputs(&[("parsed", json!(1))])).unwrap();

        let err = state
            .merge("parser", outputs(&[("parsed", json!(2))]))
            .unwrap_err();
        assert_eq!(
            err.reason,
            DisjointnessReason::AlreadySet {
                key: "parsed".to_string()
            }
        );
        assert_eq!(state.value("parsed"), Some(&json!(1)));
    }

    #[test]
    fn test_merge_allows_rewrite_of_resettable_key() {
        let mut state = SharedState::new(seed())
            .with_owner("generator", ["code"])
            .with_resettable(["code"]);
        state.merge("generator", outputs(&[("code", json!("v1"))])).unwrap();
        state.merge("generator", outputs(&[("code", json!("v2"))])).unwrap();

        assert_eq!(state.value("code"), Some(&json!("v2")));
    }

    #[test]
    fn test_reset_only_touches_resettable_keys() {
        let mut state = SharedState::new(seed())
            .with_owner("generator", ["code"])
            .with_resettable(["code"]);
        state.merge("generator", outputs(&[("code", json!("v1"))])).unwrap();

        let keys = vec!["code".to_string(), "collection_location".to_string()];
        let removed = state.reset(&keys);

        assert_eq!(removed, vec!["code".to_string()]);
        assert!(state.contains("collection_location"));
        assert!(!state.contains("code"));
    }

    #[test]
    fn test_feedback_is_append_only() {
        let mut state = SharedState::new(seed()).with_feedback_key("feedback");
        assert!(state.feedback().is_empty());

        state.append_feedback(json!({"attempt": 1}));
        state.append_feedback(json!({"attempt": 2}));

        assert_eq!(state.feedback(), &[json!({"attempt": 1}), json!({"attempt": 2})]);
        assert_eq!(state.feedback_key(), "feedback");
    }

    #[test]
    fn test_merge_order_does_not_matter() {
        let build = || {
            SharedState::new(seed())
                .with_owner("a", ["ka"])
                .with_owner("b", ["kb"])
        };

        let mut forward = build();
        forward.merge("a", outputs(&[("ka", json!(1))])).unwrap();
        forward.merge("b", outputs(&[("kb", json!(2))])).unwrap();

        let mut backward = build();
        backward.merge("b", outputs(&[("kb", json!(2))])).unwrap();
        backward.merge("a", outputs(&[("ka", json!(1))])).unwrap();

        assert_eq!(forward.into_inner(), backward.into_inner());
    }
}
