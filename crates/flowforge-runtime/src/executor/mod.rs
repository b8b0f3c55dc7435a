// Flowforge Runtime - Executor module
//
// The workflow executor walks dependency levels and dispatches steps by
// type; conditional and loop steps delegate to their sub-executors.

mod conditional;
mod loop_exec;
mod workflow_executor;

pub use workflow_executor::{ExecutorOptions, WorkflowExecutor};
