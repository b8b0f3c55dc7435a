// Flowforge Runtime - Conditional sub-executor
//
// Evaluates the step's condition, executes the taken branch in declaration
// order, and marks every step of the untaken branch as skipped. Dependents
// that rest only on skipped steps are skipped transitively by the step
// runner. A condition that cannot be evaluated fails the whole workflow;
// no propagation strategy may absorb it.

use crate::executor::workflow_executor::{
    DispatchResult, RunState, SharedContext, WorkflowExecutor,
};
use flowforge_core::workflow::{Step, StepStatus};
use flowforge_core::{evaluate_condition, ExecutionContext, LoopContext};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

pub(crate) async fn execute(
    executor: &WorkflowExecutor,
    step: &Step,
    ctx: SharedContext,
    state: &RunState,
    run_id: &str,
    rctx: &ExecutionContext,
    loop_scope: Option<LoopContext>,
) -> DispatchResult {
    let expression = step.condition.as_deref().unwrap_or_default();
    let outcome = evaluate_condition(expression, rctx);

    if let Some(error) = outcome.error {
        return DispatchResult {
            output: None,
            error: Some(format!(
                "condition '{}' could not be evaluated: {}",
                expression, error
            )),
            attempts: 1,
            fatal: true,
        };
    }

    let empty = Vec::new();
    let then_steps = step.then_steps.as_ref().unwrap_or(&empty);
    let else_steps = step.else_steps.as_ref().unwrap_or(&empty);

    let (active, inactive) = if outcome.result {
        (then_steps, else_steps)
    } else {
        (else_steps, then_steps)
    };

    debug!(
        step_id = %step.id,
        result = outcome.result,
        resolved = %outcome.resolved,
        "conditional branch selected"
    );

    // The untaken branch is skipped before the taken branch runs so
    // transitive skip decisions see a consistent picture
    for id in inactive {
        if state.status(id) == StepStatus::Pending {
            state.set_status(id, StepStatus::Skipped);
        }
    }

    for id in active {
        let Some(idx) = executor.workflow().step_index(id) else {
            continue;
        };
        executor
            .run_step(idx, Arc::clone(&ctx), state, run_id, loop_scope.clone())
            .await;
        if state.aborted() {
            break;
        }
    }

    DispatchResult {
        output: Some(json!({
            "result": outcome.result,
            "resolved_condition": outcome.resolved,
            "branch_taken": if outcome.result { "true" } else { "false" },
            "then_steps": then_steps,
            "active_branch_steps": active,
        })),
        error: None,
        attempts: 1,
        fatal: false,
    }
}
