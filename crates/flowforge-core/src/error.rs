// Flowforge Core - Error types
//
// Single error enum shared by every crate in the workspace. Step-level
// failures (script, provider, resolution) are retryable and flow through the
// retry policy; parse, validation, and cycle errors terminate the run before
// any step executes.

use crate::validate::ValidationError;
use thiserror::Error;

/// Result alias used throughout the workspace
pub type ForgeResult<T> = Result<T, ForgeError>;

/// Errors produced by the Flowforge engine
#[derive(Debug, Error)]
pub enum ForgeError {
    /// YAML document could not be parsed into a workflow tree
    #[error("parse error: {0}")]
    Parse(String),

    /// Semantic validation rejected the workflow
    #[error("workflow validation failed: {}", format_validation(.0))]
    Validation(Vec<ValidationError>),

    /// Configuration problem outside the workflow document itself
    #[error("configuration error: {0}")]
    Config(String),

    /// Variable reference could not be resolved
    #[error("variable resolution failed: {0}")]
    Resolution(String),

    /// Condition expression could not be evaluated
    #[error("condition evaluation failed: {0}")]
    Condition(String),

    /// Dependency graph contains a cycle
    #[error("circular dependency: {0}")]
    Cycle(String),

    /// Script path or path-shaped input escaped the project root
    #[error("path sandbox violation: {0}")]
    Sandbox(String),

    /// Script process failed (non-zero exit, bad output, spawn failure)
    #[error("script execution failed: {0}")]
    Script(String),

    /// Script process exceeded its timeout budget
    #[error("script timed out after {0} ms")]
    ScriptTimeout(u64),

    /// LLM backend call failed
    #[error("model provider error: {0}")]
    Provider(String),

    /// Circuit breaker rejected the call without an attempt
    #[error("Circuit breaker is OPEN for resource '{0}'")]
    CircuitOpen(String),

    /// Loop iterable failed a safety check
    #[error("loop safety violation: {0}")]
    LoopSafety(String),

    /// Fallback step missing or itself failed
    #[error("fallback error: {0}")]
    Fallback(String),

    /// Execution was cancelled (fail-fast or external abort)
    #[error("execution cancelled")]
    Cancelled,

    /// Step failure carrying the offending step id
    #[error("step '{step_id}' failed: {message}")]
    Step { step_id: String, message: String },

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForgeError {
    /// The step id this error is attributed to, when known
    pub fn step_id(&self) -> Option<&str> {
        match self {
            ForgeError::Step { step_id, .. } => Some(step_id),
            _ => None,
        }
    }

    /// Wrap any error into a step failure, preserving the message
    pub fn for_step(step_id: impl Into<String>, err: impl std::fmt::Display) -> Self {
        ForgeError::Step {
            step_id: step_id.into(),
            message: err.to_string(),
        }
    }
}

fn format_validation(errors: &[ValidationError]) -> String {
    let fatal = errors.iter().filter(|e| e.is_error()).count();
    let first = errors
        .iter()
        .find(|e| e.is_error())
        .map(|e| format!("{}: {}", e.field, e.message))
        .unwrap_or_else(|| "unknown error".to_string());
    if fatal > 1 {
        format!("{} (and {} more)", first, fatal - 1)
    } else {
        first
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::Severity;

    #[test]
    fn test_step_error_carries_id() {
        let err = ForgeError::for_step("fetch", "boom");
        assert_eq!(err.step_id(), Some("fetch"));
        assert_eq!(err.to_string(), "step 'fetch' failed: boom");
    }

    #[test]
    fn test_validation_error_display() {
        let errors = vec![
            ValidationError::new(Severity::Error, "workflow.name", "name is required"),
            ValidationError::new(Severity::Warning, "env.HOME", "not set"),
            ValidationError::new(Severity::Error, "steps", "at least one step is required"),
        ];
        let err = ForgeError::Validation(errors);
        let text = err.to_string();
        assert!(text.contains("workflow.name"));
        assert!(text.contains("1 more"));
    }

    #[test]
    fn test_circuit_open_message() {
        let err = ForgeError::CircuitOpen("api".to_string());
        assert!(err.to_string().contains("Circuit breaker is OPEN"));
    }
}
