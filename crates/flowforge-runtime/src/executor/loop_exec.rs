// Flowforge Runtime - Loop sub-executor
//
// Resolves the step's iterable (array, object, or a "range(start, end)"
// expression), refuses oversize iterables before the first body step runs,
// and executes the body as a bounded sub-workflow sharing the outer step
// outputs. Each iteration gets its own loop context; a body step's output
// overwrites the previous iteration's under the same id.

use crate::executor::workflow_executor::{
    DispatchResult, RunState, SharedContext, WorkflowExecutor,
};
use flowforge_core::workflow::{Step, StepStatus};
use flowforge_core::{resolver, ExecutionContext, LoopContext};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

const DEFAULT_MAX_ITERATIONS: usize = 100;

pub(crate) async fn execute(
    executor: &WorkflowExecutor,
    step: &Step,
    ctx: SharedContext,
    state: &RunState,
    run_id: &str,
    rctx: &ExecutionContext,
) -> DispatchResult {
    let raw_items = step.items.clone().unwrap_or(Value::Null);
    let resolution = resolver::resolve_value(&raw_items, rctx);
    if !resolution.is_ok() {
        return DispatchResult {
            output: None,
            error: Some(resolution.errors.join("; ")),
            attempts: 1,
            fatal: false,
        };
    }

    let entries = match build_entries(&resolution.value) {
        Ok(entries) => entries,
        Err(message) => {
            return DispatchResult {
                output: None,
                error: Some(message),
                attempts: 1,
                fatal: false,
            }
        }
    };

    // Cap is checked against the resolved length before any body step runs
    let max_iterations = step.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS);
    if entries.len() > max_iterations {
        return DispatchResult {
            output: None,
            error: Some(format!(
                "iterable has {} entries which exceeds max iterations ({})",
                entries.len(),
                max_iterations
            )),
            attempts: 1,
            fatal: false,
        };
    }

    let empty = Vec::new();
    let body = step.loop_steps.as_ref().unwrap_or(&empty);
    let mut results: Vec<Value> = Vec::with_capacity(entries.len());

    debug!(step_id = %step.id, iterations = entries.len(), "loop starting");

    for (index, entry) in entries.into_iter().enumerate() {
        let scope = LoopContext {
            item: entry.item,
            index,
            key: entry.key,
            value: entry.value,
        };

        for id in body {
            let Some(idx) = executor.workflow().step_index(id) else {
                continue;
            };
            executor
                .run_step(idx, Arc::clone(&ctx), state, run_id, Some(scope.clone()))
                .await;

            if state.aborted() {
                return DispatchResult {
                    output: None,
                    error: Some(format!(
                        "loop body step '{}' failed at iteration {}",
                        id, index
                    )),
                    attempts: 1,
                    fatal: false,
                };
            }
            if state.status(id) == StepStatus::Failed {
                // A fail-silent body records its sentinel and the loop
                // carries on; anything else has aborted above
                debug!(step_id = %id, iteration = index, "loop body step failed silently");
            }
        }

        // Iteration outputs keyed by body step id
        let mut iteration = Map::new();
        {
            let guard = ctx.read().await;
            for id in body {
                if let Some(output) = guard.step_outputs.get(id.as_str()) {
                    iteration.insert(id.clone(), output.clone());
                }
            }
        }
        results.push(Value::Object(iteration));
    }

    DispatchResult {
        output: Some(json!({
            "iterations": results.len(),
            "results": results,
        })),
        error: None,
        attempts: 1,
        fatal: false,
    }
}

struct Entry {
    item: Value,
    key: Option<String>,
    value: Option<Value>,
}

/// Turn the resolved items value into concrete iteration entries
fn build_entries(items: &Value) -> Result<Vec<Entry>, String> {
    match items {
        Value::Array(values) => Ok(values
            .iter()
            .map(|v| Entry {
                item: v.clone(),
                key: None,
                value: None,
            })
            .collect()),
        Value::Object(map) => Ok(map
            .iter()
            .map(|(k, v)| Entry {
                item: json!([k, v]),
                key: Some(k.clone()),
                value: Some(v.clone()),
            })
            .collect()),
        Value::String(s) => {
            let range = parse_range(s)?;
            Ok(range
                .into_iter()
                .map(|n| Entry {
                    item: json!(n),
                    key: None,
                    value: None,
                })
                .collect())
        }
        _ => Err("items must be array, object, or range expression".to_string()),
    }
}

/// Parse "range(start, end)" or "range(start, end, step)"
fn parse_range(text: &str) -> Result<Vec<i64>, String> {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix("range(")
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| "items must be array, object, or range expression".to_string())?;

    let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(format!("range expression '{}' takes 2 or 3 arguments", trimmed));
    }

    let parse = |s: &str| {
        s.parse::<i64>()
            .map_err(|_| format!("range argument '{}' is not an integer", s))
    };
    let start = parse(parts[0])?;
    let end = parse(parts[1])?;
    let step = if parts.len() == 3 { parse(parts[2])? } else { 1 };

    if step == 0 {
        return Err("range step must not be zero".to_string());
    }

    let mut values = Vec::new();
    let mut current = start;
    if step > 0 {
        while current < end {
            values.push(current);
            current += step;
        }
    } else {
        while current > end {
            values.push(current);
            current += step;
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range_basic() {
        assert_eq!(parse_range("range(0, 4)").unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(parse_range("range(1, 10, 3)").unwrap(), vec![1, 4, 7]);
        assert_eq!(parse_range("range(5, 1, -2)").unwrap(), vec![5, 3]);
        assert_eq!(parse_range("range(3, 3)").unwrap(), Vec::<i64>::new());
    }

    #[test]
    fn test_parse_range_rejects_garbage() {
        assert!(parse_range("range(a, b)").is_err());
        assert!(parse_range("range(1)").is_err());
        assert!(parse_range("range(1, 2, 0)").is_err());
        assert!(parse_range("not a range").is_err());
    }

    #[test]
    fn test_build_entries_array() {
        let entries = build_entries(&json!(["a", "b"])).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].item, json!("b"));
        assert!(entries[0].key.is_none());
    }

    #[test]
    fn test_build_entries_object() {
        let entries = build_entries(&json!({"x": 1, "y": 2})).unwrap();
        assert_eq!(entries.len(), 2);
        let first = &entries[0];
        assert_eq!(first.key.as_deref(), Some("x"));
        assert_eq!(first.value, Some(json!(1)));
        assert_eq!(first.item, json!(["x", 1]));
    }

    #[test]
    fn test_build_entries_rejects_scalars() {
        assert!(build_entries(&json!(42)).is_err());
        assert!(build_entries(&json!(null)).is_err());
    }
}
