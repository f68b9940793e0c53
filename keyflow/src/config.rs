//! Engine configuration.

use crate::errors::ConfigError;
use crate::pipeline::FailureMode;
use serde::{Deserialize, Serialize};

fn default_max_retries() -> u32 {
    3
}

fn default_feedback_key() -> String {
    "feedback".to_string()
}

fn default_filter() -> String {
    "info".to_string()
}

/// Runtime knobs for an [`Engine`](crate::pipeline::Engine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Retry attempts allowed before the run fails.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Policy for failures inside parallel layers.
    pub failure_mode: FailureMode,
    /// Route execution failures of the retry target into the retry loop.
    pub route_target_failures: bool,
    /// Expected feedback key; must match the graph's.
    #[serde(default = "default_feedback_key")]
    pub feedback_key: String,
    /// Log output settings.
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            failure_mode: FailureMode::default(),
            route_target_failures: false,
            feedback_key: default_feedback_key(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry bound.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the failure mode.
    #[must_use]
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Enables or disables routing retry-target failures into the retry loop.
    #[must_use]
    pub fn with_route_target_failures(mut self, enabled: bool) -> Self {
        self.route_target_failures = enabled;
        self
    }

    /// Sets the feedback key.
    #[must_use]
    pub fn with_feedback_key(mut self, key: impl Into<String>) -> Self {
        self.feedback_key = key.into();
        self
    }

    /// Sets the logging configuration.
    #[must_use]
    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Parses a configuration from JSON, filling in defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the JSON is malformed or fails validation.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| ConfigError::new("<root>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values the engine cannot honor.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feedback_key.trim().is_empty() {
            return Err(ConfigError::new("feedback_key", "must not be empty"));
        }
        if self.logging.filter.trim().is_empty() {
            return Err(ConfigError::new("logging.filter", "must not be empty"));
        }
        Ok(())
    }
}

/// Log output settings consumed by [`init_tracing`](crate::observability::init_tracing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.failure_mode, FailureMode::FailFast);
        assert!(!config.route_target_failures);
        assert_eq!(config.feedback_key, "feedback");
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{"max_retries": 5, "failure_mode": "continue_on_failure", "logging": {"json": true}}"#,
        )
        .unwrap();

        assert_eq!(config.max_retries, 5);
        assert_eq!(config.failure_mode, FailureMode::ContinueOnFailure);
        assert_eq!(config.feedback_key, "feedback");
        assert!(config.logging.json);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::new()
            .with_max_retries(1)
            .with_route_target_failures(true)
            .with_feedback_key("notes");

        assert_eq!(config.max_retries, 1);
        assert!(config.route_target_failures);
        assert_eq!(config.feedback_key, "notes");
    }

    #[test]
    fn test_validation_rejects_blank_feedback_key() {
        let err = EngineConfig::from_json_str(r#"{"feedback_key": " "}"#).unwrap_err();
        assert_eq!(err.field, "feedback_key");
    }

    #[test]
    fn test_malformed_json() {
        assert!(EngineConfig::from_json_str("{").is_err());
    }
}
