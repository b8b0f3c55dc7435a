// Flowforge Core - Workflow model, parsing, validation, and graph analysis
//
// This crate holds everything the engine needs before a step runs: the typed
// workflow tree, the YAML parser, the semantic validator, the variable
// resolver, the condition evaluator, and the dependency analyzer. Execution
// lives in flowforge-runtime.

pub mod analyzer;
pub mod condition;
pub mod context;
pub mod error;
pub mod parser;
pub mod resolver;
pub mod validate;
pub mod workflow;

// Re-export core types
pub use analyzer::{analyze, independent_steps, ExecutionPlan};
pub use condition::{evaluate_condition, evaluate_resolved, ConditionOutcome};
pub use context::{ExecutionContext, LoopContext};
pub use error::{ForgeError, ForgeResult};
pub use parser::{
    parse_workflow, parse_workflow_file, parse_workflow_with_limit, serialize_workflow,
    DEFAULT_MAX_DOCUMENT_BYTES,
};
pub use resolver::{find_references, lookup, resolve_string, resolve_value, Resolution};
pub use validate::{is_valid, validate, Severity, ValidationError};
pub use workflow::{
    CircuitBreakerConfig, DelayStrategy, ErrorPropagation, ExecutionResult, InputDecl, InputType,
    Position, RetryPolicy, Step, StepRecord, StepStatus, StepType, UiMetadata, UiNode, Viewport,
    Workflow, WorkflowMeta,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
