/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use super::types::{InlineString, Pid};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors, raised eagerly before any pass runs
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ConfigError {
    #[error("Unknown feature: {0}")]
    #[diagnostic(
        code(config::unknown_feature),
        help("Known features: tiered_cached_adj, cpu_time_capability, proactive_kills, kill_isolated_without_services, rank_by_memory.")
    )]
    UnknownFeature(InlineString),

    #[error("Invalid quota: {0}")]
    #[diagnostic(
        code(config::invalid_quota),
        help("Cached and empty quotas must be positive and max_empty must not exceed max_cached.")
    )]
    InvalidQuota(InlineString),

    #[error("Invalid cached bucket layout: {0}")]
    #[diagnostic(
        code(config::invalid_buckets),
        help("Bucket spacing must be positive and fit inside the cached adj range.")
    )]
    InvalidBuckets(InlineString),

    #[error("Invalid freezer cutoff: {0}")]
    #[diagnostic(
        code(config::invalid_cutoff),
        help("The freezer cutoff must lie between the perceptible and unknown adj values.")
    )]
    InvalidCutoff(i32),

    #[error("Invalid threshold: {0}")]
    #[diagnostic(
        code(config::invalid_threshold),
        help("Swap thresholds are fractions between 0.0 and 1.0.")
    )]
    InvalidThreshold(InlineString),

    #[error("Malformed configuration: {0}")]
    #[diagnostic(
        code(config::malformed),
        help("The configuration document could not be parsed. Check field names and types.")
    )]
    Malformed(InlineString),
}

/// Dependency graph errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum GraphError {
    #[error("Process {0} not found")]
    #[diagnostic(
        code(graph::process_not_found),
        help("The process may have terminated or never attached.")
    )]
    ProcessNotFound(Pid),

    #[error("Process {0} already attached")]
    #[diagnostic(
        code(graph::duplicate_process),
        help("Remove the previous record before attaching a process with the same pid.")
    )]
    DuplicateProcess(Pid),

    #[error("Connection {0} not found")]
    #[diagnostic(
        code(graph::connection_not_found),
        help("The binding may already have been removed.")
    )]
    ConnectionNotFound(u64),
}

/// Failures reported by the OS-level process controller
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ControllerError {
    #[error("Permission denied for process {0}")]
    #[diagnostic(
        code(controller::permission_denied),
        help("The controller lacks the privilege to change this process.")
    )]
    PermissionDenied(Pid),

    #[error("Process {0} is gone")]
    #[diagnostic(
        code(controller::process_gone),
        help("The process exited before the request was delivered.")
    )]
    ProcessGone(Pid),

    #[error("Controller failure: {0}")]
    #[diagnostic(code(controller::failed))]
    Failed(InlineString),
}

/// Unified adjuster error type with miette diagnostics
#[derive(Error, Debug, Diagnostic)]
pub enum AdjusterError {
    #[error("Configuration error: {0}")]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error("Graph error: {0}")]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error("Controller error: {0}")]
    #[diagnostic(transparent)]
    Controller(#[from] ControllerError),

    #[error("Adjuster task has shut down")]
    #[diagnostic(
        code(adjuster::shutdown),
        help("Requests cannot be issued after shutdown().await has completed.")
    )]
    Shutdown,

    #[error("I/O error: {0}")]
    #[diagnostic(code(adjuster::io_error))]
    Io(InlineString),

    #[error("Internal error: {0}")]
    #[diagnostic(
        code(adjuster::internal_error),
        help("An unexpected internal error occurred. Please report this issue.")
    )]
    Internal(InlineString),
}

impl From<std::io::Error> for AdjusterError {
    fn from(err: std::io::Error) -> Self {
        AdjusterError::Io(err.to_string().into())
    }
}

impl From<String> for AdjusterError {
    fn from(msg: String) -> Self {
        AdjusterError::Internal(msg.into())
    }
}

impl From<&str> for AdjusterError {
    fn from(msg: &str) -> Self {
        AdjusterError::Internal(msg.into())
    }
}

/// Serializable error representation for reports
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SerializableError {
    pub error_type: InlineString,
    pub message: InlineString,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<InlineString>,
}

impl SerializableError {
    pub fn new(error_type: impl Into<InlineString>, message: impl Into<InlineString>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        error_type: impl Into<InlineString>,
        message: impl Into<InlineString>,
        details: impl Into<InlineString>,
    ) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            details: Some(details.into()),
        }
    }
}

impl From<&ControllerError> for SerializableError {
    fn from(err: &ControllerError) -> Self {
        SerializableError::new("controller_error", err.to_string())
    }
}

impl From<AdjusterError> for SerializableError {
    fn from(err: AdjusterError) -> Self {
        let error_type = match &err {
            AdjusterError::Config(_) => "config_error",
            AdjusterError::Graph(_) => "graph_error",
            AdjusterError::Controller(_) => "controller_error",
            AdjusterError::Shutdown => "shutdown",
            AdjusterError::Io(_) => "io_error",
            AdjusterError::Internal(_) => "internal_error",
        };
        SerializableError::new(error_type, err.to_string())
    }
}

/// Result type for adjuster operations
///
/// # Must Use
/// Configuration and graph operations can fail and must be handled
pub type Result<T> = std::result::Result<T, AdjusterError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_error_serialization() {
        let error = ConfigError::UnknownFeature("turbo_mode".into());
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("unknown_feature"));
        let deserialized: ConfigError = serde_json::from_str(&json).unwrap();
        assert_eq!(error, deserialized);
    }

    #[test]
    fn test_graph_error_display() {
        let error = GraphError::ProcessNotFound(42);
        assert_eq!(error.to_string(), "Process 42 not found");
    }

    #[test]
    fn test_adjuster_error_from_config() {
        let error: AdjusterError = ConfigError::InvalidCutoff(5).into();
        assert!(matches!(error, AdjusterError::Config(_)));
        assert_eq!(error.to_string(), "Configuration error: Invalid freezer cutoff: 5");
    }

    #[test]
    fn test_serializable_error_from_adjuster_error() {
        let serializable: SerializableError = AdjusterError::Shutdown.into();
        assert_eq!(serializable.error_type, "shutdown");
        assert_eq!(serializable.details, None);
    }

    #[test]
    fn test_serializable_error_with_details() {
        let error = SerializableError::with_details("controller_error", "failed", "pid 7");
        assert_eq!(error.details.as_ref().map(|s| s.as_str()), Some("pid 7"));
    }

    #[test]
    fn test_adjuster_error_from_str() {
        let error: AdjusterError = "boom".into();
        assert!(matches!(error, AdjusterError::Internal(_)));
    }
}
