//! Error types for Turnstile

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using TurnstileError
pub type Result<T> = std::result::Result<T, TurnstileError>;

/// Main error type for Turnstile operations
///
/// Admission itself never fails: a cancelled or deferred task is a normal
/// outcome reported through the coordinator's decision, not an error. These
/// errors cover the surroundings (configuration, scenario files, I/O).
#[derive(Debug, Error)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Scenario-related errors
    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    NotFound(PathBuf),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Scenario file errors
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// Scenario file not found
    #[error("Scenario file not found at {0}")]
    NotFound(PathBuf),

    /// Scenario declares no tasks
    #[error("Scenario contains no tasks")]
    Empty,

    /// A task or context has an empty name
    #[error("{kind} at index {index} has an empty name")]
    EmptyName { kind: &'static str, index: usize },

    /// Two tasks or two contexts share a name
    #[error("Duplicate {kind} name: {name}")]
    DuplicateName { kind: &'static str, name: String },

    /// A condition names a task that is not declared
    #[error("Task '{task}' references unknown task '{reference}'")]
    UnknownTask { task: String, reference: String },

    /// A task names a context that is not declared
    #[error("Task '{task}' references unknown context '{context}'")]
    UnknownContext { task: String, context: String },

    /// A condition names the task that declares it
    #[error("Task '{0}' references itself in a condition")]
    SelfReference(String),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading scenario: {0}")]
    Io(#[from] std::io::Error),
}

impl TurnstileError {
    /// Create a new "other" error with a message
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue {
            field: "runner.timeout_ms".to_string(),
            message: "must be greater than zero".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid configuration: runner.timeout_ms - must be greater than zero"
        );
    }

    #[test]
    fn test_scenario_error_wraps_transparently() {
        let err: TurnstileError = ScenarioError::SelfReference("upload".to_string()).into();
        assert_eq!(err.to_string(), "Task 'upload' references itself in a condition");
    }
}
