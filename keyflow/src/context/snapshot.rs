//! Read-only snapshots handed to stages.

use super::StateMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// An immutable copy of the state keys a stage declared as inputs.
///
/// `declared` lists every key the stage may read; `values` holds the ones
/// that were present when the snapshot was taken. Optional inputs may be
/// declared but absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    declared: BTreeSet<String>,
    values: StateMap,
}

impl StateSnapshot {
    /// Creates a new snapshot.
    #[must_use]
    pub fn new(declared: BTreeSet<String>, values: StateMap) -> Self {
        Self { declared, values }
    }

    /// Gets a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// Checks if a value is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Checks if the key was declared by the stage.
    #[must_use]
    pub fn is_declared(&self, key: &str) -> bool {
        self.declared.contains(key)
    }

    /// Returns the declared keys.
    #[must_use]
    pub fn declared(&self) -> &BTreeSet<String> {
        &self.declared
    }

    /// Returns the present keys, sorted.
    #[must_use]
    pub fn keys(&self) -> BTreeSet<&str> {
        self.values.keys().map(String::as_str).collect()
    }

    /// Returns the number of present values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no values are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consumes the snapshot and returns its values.
    #[must_use]
    pub fn into_inner(self) -> StateMap {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_accessors() {
        let declared: BTreeSet<String> = ["a".to_string(), "b".to_string()].into_iter().collect();
        let mut values = StateMap::new();
        values.insert("a".to_string(), json!(1));

        let snapshot = StateSnapshot::new(declared, values);

        assert_eq!(snapshot.get("a"), Some(&json!(1)));
        assert!(snapshot.is_declared("b"));
        assert!(!snapshot.contains("b"));
        assert_eq!(snapshot.keys().into_iter().collect::<Vec<_>>(), vec!["a"]);
        assert!(!snapshot.is_empty());
    }

    #[test]
    fn test_default_snapshot_is_empty() {
        let snapshot = StateSnapshot::default();
        assert!(snapshot.is_empty());
        assert!(snapshot.declared().is_empty());
    }
}
