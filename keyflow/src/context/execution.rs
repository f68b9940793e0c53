//! The per-execution context passed to a stage.

use super::StateSnapshot;
use crate::errors::UndeclaredInputError;
use serde::de::DeserializeOwned;
use std::time::Duration;
use uuid::Uuid;

/// Everything a stage may see during one execution.
///
/// The context owns a snapshot of the stage's declared inputs; it holds no
/// reference to the shared state, so stages cannot observe or mutate keys
/// they did not declare.
#[derive(Debug, Clone)]
pub struct StageContext {
    stage_name: String,
    run_id: Uuid,
    attempt: u32,
    timeout: Duration,
    feedback_key: String,
    snapshot: StateSnapshot,
}

impl StageContext {
    /// Creates a new stage context.
    #[must_use]
    pub fn new(stage_name: impl Into<String>, run_id: Uuid, snapshot: StateSnapshot) -> Self {
        Self {
            stage_name: stage_name.into(),
            run_id,
            attempt: 1,
            timeout: Duration::from_secs(60),
            feedback_key: "feedback".to_string(),
            snapshot,
        }
    }

    /// Sets the attempt number (1-indexed).
    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Sets the timeout the stage runs under.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the key holding retry feedback.
    #[must_use]
    pub fn with_feedback_key(mut self, key: impl Into<String>) -> Self {
        self.feedback_key = key.into();
        self
    }

    /// Returns the stage name.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    /// Returns the run ID.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the attempt number (1 on first execution).
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns the timeout the stage runs under.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the input snapshot.
    #[must_use]
    pub fn snapshot(&self) -> &StateSnapshot {
        &self.snapshot
    }

    /// Gets an input value without the declaration check.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.snapshot.get(key)
    }

    /// Gets a declared input.
    ///
    /// # Errors
    ///
    /// Returns `UndeclaredInputError` if the key was not declared.
    pub fn input(&self, key: &str) -> Result<Option<&serde_json::Value>, UndeclaredInputError> {
        if !self.snapshot.is_declared(key) {
            return Err(UndeclaredInputError::new(&self.stage_name, key));
        }
        Ok(self.snapshot.get(key))
    }

    /// Reads a declared, present input and deserializes it.
    pub fn input_as<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<T> {
        let value = self
            .input(key)?
            .ok_or_else(|| anyhow::anyhow!("input '{key}' is not present"))?;
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Returns the accumulated retry feedback visible to this stage.
    ///
    /// Empty unless the stage declared the feedback key and a retry happened.
    #[must_use]
    pub fn feedback(&self) -> &[serde_json::Value] {
        match self.snapshot.get(&self.feedback_key) {
            Some(serde_json::Value::Array(items)) => items,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StateMap;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn context() -> StageContext {
        let declared: BTreeSet<String> = ["count", "feedback", "maybe"]
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        let mut values = StateMap::new();
        values.insert("count".to_string(), json!(3));
        values.insert("feedback".to_string(), json!([{"attempt": 1}]));

        StageContext::new("generator", Uuid::new_v4(), StateSnapshot::new(declared, values))
            .with_attempt(2)
    }

    #[test]
    fn test_input_declared_and_present() {
        let ctx = context();
        assert_eq!(ctx.input("count").unwrap(), Some(&json!(3)));
        assert_eq!(ctx.input("maybe").unwrap(), None);
    }

    #[test]
    fn test_input_undeclared() {
        let ctx = context();
        let err = ctx.input("secret").unwrap_err();
        assert_eq!(err.stage, "generator");
        assert_eq!(err.key, "secret");
    }

    #[test]
    fn test_input_as() {
        let ctx = context();
        let count: u32 = ctx.input_as("count").unwrap();
        assert_eq!(count, 3);
        assert!(ctx.input_as::<u32>("maybe").is_err());
        assert!(ctx.input_as::<String>("count").is_err());
    }

    #[test]
    fn test_feedback_and_attempt() {
        let ctx = context();
        assert_eq!(ctx.attempt(), 2);
        assert_eq!(ctx.feedback().len(), 1);
        assert_eq!(ctx.stage_name(), "generator");
    }
}
