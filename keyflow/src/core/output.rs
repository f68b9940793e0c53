//! Stage output type with factory methods.

use super::StageStatus;
use crate::context::StateMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The output of a stage execution.
///
/// A successful output carries the values for the stage's declared output
/// keys. The engine checks the key set; it never looks inside the values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutput {
    /// The status of the stage execution.
    pub status: StageStatus,

    /// The produced values (for successful executions).
    #[serde(default)]
    pub data: StateMap,

    /// Additional metadata, kept in the execution record only.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Error message (for failed executions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for StageOutput {
    fn default() -> Self {
        Self::ok_empty()
    }
}

impl StageOutput {
    /// Creates a successful output with data.
    #[must_use]
    pub fn ok(data: StateMap) -> Self {
        Self {
            status: StageStatus::Ok,
            data,
            metadata: HashMap::new(),
            error: None,
        }
    }

    /// Creates a successful output with no data.
    #[must_use]
    pub fn ok_empty() -> Self {
        Self::ok(StateMap::new())
    }

    /// Creates a successful output with a single value.
    #[must_use]
    pub fn ok_value(key: impl Into<String>, value: serde_json::Value) -> Self {
        let mut data = StateMap::new();
        data.insert(key.into(), value);
        Self::ok(data)
    }

    /// Creates a failure output with an error message.
    #[must_use]
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Fail,
            data: StateMap::new(),
            metadata: HashMap::new(),
            error: Some(error.into()),
        }
    }

    /// Adds a single value to the output.
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Adds data to the output (merges with existing data).
    #[must_use]
    pub fn with_data(mut self, data: StateMap) -> Self {
        self.data.extend(data);
        self
    }

    /// Adds a single metadata entry.
    #[must_use]
    pub fn add_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns true if the output indicates success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns true if the output indicates failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        self.status.is_failure()
    }

    /// Gets a value from the data.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }
}

impl From<anyhow::Result<StateMap>> for StageOutput {
    fn from(result: anyhow::Result<StateMap>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(err) => Self::fail(format!("{err:#}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_output() {
        let output = StageOutput::ok_value("result", serde_json::json!("success"));
        assert_eq!(output.status, StageStatus::Ok);
        assert!(output.is_success());
        assert!(!output.is_failure());
        assert_eq!(output.get("result"), Some(&serde_json::json!("success")));
    }

    #[test]
    fn test_ok_empty() {
        let output = StageOutput::ok_empty();
        assert!(output.is_success());
        assert!(output.data.is_empty());
    }

    #[test]
    fn test_fail_output() {
        let output = StageOutput::fail("upstream unavailable");
        assert!(output.is_failure());
        assert_eq!(output.error.as_deref(), Some("upstream unavailable"));
        assert!(output.data.is_empty());
    }

    #[test]
    fn test_with_value_and_data() {
        let mut extra = StateMap::new();
        extra.insert("b".to_string(), serde_json::json!(2));

        let output = StageOutput::ok_empty()
            .with_value("a", serde_json::json!(1))
            .with_data(extra)
            .add_metadata("model", serde_json::json!("stub"));

        assert_eq!(output.data.len(), 2);
        assert_eq!(output.metadata.get("model"), Some(&serde_json::json!("stub")));
    }

    #[test]
    fn test_from_anyhow_result() {
        let err: anyhow::Result<StateMap> = Err(anyhow::anyhow!("parse error").context("parser"));
        let output = StageOutput::from(err);
        assert!(output.is_failure());
        assert_eq!(output.error.as_deref(), Some("parser: parse error"));

        let ok: anyhow::Result<StateMap> = Ok(StateMap::new());
        assert!(StageOutput::from(ok).is_success());
    }

    #[test]
    fn test_output_serialization() {
        let output = StageOutput::fail("nope");
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["status"], "fail");
        assert_eq!(json["error"], "nope");
    }
}
