// Flowforge Core - Execution context
//
// The resolver's view of one workflow execution: supplied inputs, the
// append-only map of step outputs, the current loop scope, and the
// environment snapshot. step_outputs is written exactly once per step by
// the executor; dependent steps only read it after the level barrier.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Execution context for variable resolution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Inputs supplied to `execute`, keyed by input id
    #[serde(default)]
    pub workflow_inputs: HashMap<String, Value>,

    /// Outputs recorded per completed step, keyed by step id
    #[serde(default)]
    pub step_outputs: HashMap<String, Value>,

    /// Current loop scope, present only while executing loop body steps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_context: Option<LoopContext>,

    /// Environment snapshot visible to `env.*` references
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Per-iteration loop scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopContext {
    /// Current element (for objects, the `[key, value]` pair)
    pub item: Value,

    /// Zero-based iteration index
    pub index: usize,

    /// Entry key when iterating an object
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Entry value when iterating an object
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ExecutionContext {
    /// Context with the given workflow inputs and a process-env snapshot
    pub fn new(workflow_inputs: HashMap<String, Value>) -> Self {
        Self {
            workflow_inputs,
            step_outputs: HashMap::new(),
            loop_context: None,
            env: std::env::vars().collect(),
        }
    }

    /// Replace the environment snapshot (tests, sandboxed runs)
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Record a step's output. Outputs are append-only within one run;
    /// loop bodies overwrite their own id each iteration by design of the
    /// loop sub-executor.
    pub fn record_output(&mut self, step_id: &str, output: Value) {
        self.step_outputs.insert(step_id.to_string(), output);
    }

    /// Derive a child context for one loop iteration
    pub fn for_iteration(&self, loop_context: LoopContext) -> Self {
        let mut child = self.clone();
        child.loop_context = Some(loop_context);
        child
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_output() {
        let mut ctx = ExecutionContext::default();
        ctx.record_output("fetch", json!({"rows": 42}));
        assert_eq!(ctx.step_outputs["fetch"]["rows"], json!(42));
    }

    #[test]
    fn test_for_iteration_keeps_outputs() {
        let mut ctx = ExecutionContext::default();
        ctx.record_output("before", json!({"ok": true}));

        let child = ctx.for_iteration(LoopContext {
            item: json!("a"),
            index: 0,
            key: None,
            value: None,
        });

        assert!(child.loop_context.is_some());
        assert_eq!(child.step_outputs["before"]["ok"], json!(true));
        assert!(ctx.loop_context.is_none());
    }
}
