// Flowforge Runtime - Workflow execution engine
//
// Executes validated workflows: level scheduling with bounded parallelism,
// per-step retry with circuit breaking, an external script runner with a
// JSON-over-stdio contract, a debug controller, and lifecycle event
// fan-out. Parsing and validation live in flowforge-core; LLM backends in
// flowforge-llm.

pub mod breaker;
pub mod debug;
pub mod events;
pub mod executor;
pub mod retry;
pub mod script;

pub use breaker::{CircuitBreakerRegistry, CircuitDecision, CircuitState};
pub use debug::{DebugContext, DebugController, DebugMode, DebugState, StepMode};
pub use events::{EventBus, ListenerId, WorkflowEvent};
pub use executor::{ExecutorOptions, WorkflowExecutor};
pub use retry::{RetryExecutor, RetryOutcome};
pub use script::{RunOptions, ScriptOutput, ScriptRunner, DEFAULT_SCRIPT_TIMEOUT_MS};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
