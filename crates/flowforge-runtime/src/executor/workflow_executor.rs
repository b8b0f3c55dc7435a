// Flowforge Runtime - Workflow executor
//
// Top-level orchestrator. Validates inputs, asks the analyzer for execution
// levels, and walks them in order. Within a level, steps run sequentially
// in YAML order or concurrently under a semaphore bound. Every step
// dispatch consults the debug controller, runs through the retry policy
// where applicable, and publishes lifecycle events. Error propagation is
// applied per step: fail-fast cancels the run, fail-silent records a
// sentinel and continues, fallback executes the designated sibling.

use crate::breaker::CircuitBreakerRegistry;
use crate::debug::DebugController;
use crate::events::{EventBus, WorkflowEvent};
use crate::executor::{conditional, loop_exec};
use crate::retry::RetryExecutor;
use crate::script::{RunOptions, ScriptRunner};
use chrono::Utc;
use dashmap::DashMap;
use flowforge_core::workflow::{
    ErrorPropagation, ExecutionResult, RetryPolicy, Step, StepRecord, StepStatus, StepType,
    Workflow,
};
use flowforge_core::{
    analyze, resolver, validate, ExecutionContext, ForgeError, ForgeResult, LoopContext,
};
use flowforge_llm::ProviderRegistry;
use futures::future::{join_all, BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Executor configuration
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Run level members concurrently
    pub enable_parallel_execution: bool,

    /// Concurrency bound within one level
    pub max_concurrency: usize,

    /// Workflow-wide default error propagation
    pub error_propagation_strategy: ErrorPropagation,

    /// Root directory scripts are sandboxed to
    pub project_root: PathBuf,

    /// Interpreter binary for script steps
    pub interpreter: String,

    /// Per-script timeout budget
    pub script_timeout_ms: u64,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            enable_parallel_execution: false,
            max_concurrency: 4,
            error_propagation_strategy: ErrorPropagation::FailFast,
            project_root: PathBuf::from("."),
            interpreter: "python3".to_string(),
            script_timeout_ms: 30_000,
        }
    }
}

pub(crate) type SharedContext = Arc<RwLock<ExecutionContext>>;

/// Result of dispatching one step, before propagation
pub(crate) struct DispatchResult {
    pub(crate) output: Option<Value>,
    pub(crate) error: Option<String>,
    pub(crate) attempts: u32,
    /// Failure that no propagation strategy may absorb
    pub(crate) fatal: bool,
}

/// Mutable state of one `execute` call
pub(crate) struct RunState {
    pub statuses: DashMap<String, StepStatus>,
    pub records: DashMap<String, StepRecord>,
    abort: Mutex<Option<(String, String)>>,
}

impl RunState {
    fn new(workflow: &Workflow) -> Self {
        let statuses = DashMap::new();
        for step in &workflow.steps {
            statuses.insert(step.id.clone(), StepStatus::Pending);
        }
        Self {
            statuses,
            records: DashMap::new(),
            abort: Mutex::new(None),
        }
    }

    pub fn aborted(&self) -> bool {
        self.abort.lock().is_some()
    }

    fn request_abort(&self, step_id: &str, error: &str) {
        let mut slot = self.abort.lock();
        if slot.is_none() {
            *slot = Some((step_id.to_string(), error.to_string()));
        }
    }

    fn abort_info(&self) -> Option<(String, String)> {
        self.abort.lock().clone()
    }

    pub fn status(&self, step_id: &str) -> StepStatus {
        self.statuses
            .get(step_id)
            .map(|s| *s)
            .unwrap_or(StepStatus::Pending)
    }

    pub fn set_status(&self, step_id: &str, status: StepStatus) {
        self.statuses.insert(step_id.to_string(), status);
    }
}

/// Workflow execution engine
pub struct WorkflowExecutor {
    workflow: Workflow,
    options: ExecutorOptions,
    bus: Arc<EventBus>,
    breakers: Arc<CircuitBreakerRegistry>,
    debug: Arc<DebugController>,
    providers: Arc<ProviderRegistry>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for WorkflowExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowExecutor")
            .field("workflow", &self.workflow)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl WorkflowExecutor {
    /// Build an executor for a validated workflow
    pub fn new(workflow: Workflow, options: ExecutorOptions) -> ForgeResult<Self> {
        let report = validate(&workflow);
        if !flowforge_core::is_valid(&report) {
            return Err(ForgeError::Validation(report));
        }

        Ok(Self {
            workflow,
            options,
            bus: EventBus::global(),
            breakers: CircuitBreakerRegistry::global(),
            debug: DebugController::global(),
            providers: Arc::new(ProviderRegistry::new()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_breakers(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = breakers;
        self
    }

    pub fn with_debug(mut self, debug: Arc<DebugController>) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_providers(mut self, providers: Arc<ProviderRegistry>) -> Self {
        self.providers = providers;
        self
    }

    /// Token cancelling this execution from outside
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// Execute the workflow once
    pub async fn execute(&self, inputs: HashMap<String, Value>) -> ForgeResult<ExecutionResult> {
        let started = Instant::now();
        let run_id = Uuid::new_v4().to_string();

        let inputs = self.prepare_inputs(inputs)?;
        let plan = analyze(&self.workflow.steps)?;
        let ctx: SharedContext = Arc::new(RwLock::new(ExecutionContext::new(inputs)));
        let state = RunState::new(&self.workflow);
        let managed = self.container_managed_ids();

        info!(run_id = %run_id, workflow = self.workflow.name(), "workflow started");
        self.bus.emit(&WorkflowEvent::WorkflowStarted {
            workflow_id: run_id.clone(),
            total_steps: Some(self.workflow.steps.len()),
            start_time: Utc::now(),
        });

        'levels: for level in &plan.levels {
            let mut members: Vec<usize> = level
                .iter()
                .copied()
                .filter(|&idx| !managed.contains(self.workflow.steps[idx].id.as_str()))
                .filter(|&idx| state.status(&self.workflow.steps[idx].id) == StepStatus::Pending)
                .collect();
            members.sort_unstable();

            if members.is_empty() {
                continue;
            }

            if self.options.enable_parallel_execution && members.len() > 1 {
                let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));
                let futures = members.into_iter().map(|idx| {
                    let semaphore = Arc::clone(&semaphore);
                    let ctx = Arc::clone(&ctx);
                    let state = &state;
                    let run_id = run_id.as_str();
                    async move {
                        let _permit = semaphore.acquire().await;
                        self.run_step(idx, ctx, state, run_id, None).await;
                    }
                });
                join_all(futures).await;
            } else {
                for idx in members {
                    self.run_step(idx, Arc::clone(&ctx), &state, &run_id, None)
                        .await;
                    if state.aborted() {
                        break 'levels;
                    }
                }
            }

            if state.aborted() {
                break;
            }
        }

        let outputs = ctx.read().await.step_outputs.clone();
        let mut success_count = 0;
        let mut failure_count = 0;
        for entry in state.statuses.iter() {
            match *entry.value() {
                StepStatus::Succeeded => success_count += 1,
                StepStatus::Failed => failure_count += 1,
                _ => {}
            }
        }

        let abort = state.abort_info();
        let total_duration_ms = started.elapsed().as_millis() as u64;

        self.bus.emit(&WorkflowEvent::WorkflowCompleted {
            workflow_id: run_id.clone(),
            total_duration_ms,
            results: serde_json::to_value(&outputs).unwrap_or_default(),
            success_count,
            failure_count,
            timestamp: Utc::now(),
        });
        self.debug.mark_completed();

        info!(
            run_id = %run_id,
            success = abort.is_none(),
            success_count,
            failure_count,
            "workflow completed"
        );

        Ok(ExecutionResult {
            success: abort.is_none(),
            outputs,
            success_count,
            failure_count,
            failed_step_id: abort.as_ref().map(|(id, _)| id.clone()),
            error: abort.map(|(_, err)| err),
            total_duration_ms,
        })
    }

    /// Apply defaults and check required inputs; unknown inputs are allowed
    /// but noted
    fn prepare_inputs(
        &self,
        mut supplied: HashMap<String, Value>,
    ) -> ForgeResult<HashMap<String, Value>> {
        for decl in &self.workflow.inputs {
            if !supplied.contains_key(&decl.id) {
                if let Some(default) = &decl.default {
                    supplied.insert(decl.id.clone(), default.clone());
                } else if decl.required {
                    return Err(ForgeError::Config(format!(
                        "required input '{}' was not supplied",
                        decl.id
                    )));
                }
            }
        }
        for key in supplied.keys() {
            if self.workflow.input(key).is_none() {
                warn!(input = %key, "input is not declared by the workflow");
            }
        }
        Ok(supplied)
    }

    /// Step ids owned by a conditional branch, a loop body, or reserved as
    /// a fallback; these are executed by their container (or on demand),
    /// not by the level walk
    fn container_managed_ids(&self) -> HashSet<&str> {
        let mut managed = HashSet::new();
        for step in &self.workflow.steps {
            for list in [&step.then_steps, &step.else_steps, &step.loop_steps] {
                if let Some(ids) = list {
                    managed.extend(ids.iter().map(String::as_str));
                }
            }
            if let Some(fallback) = &step.fallback_step {
                managed.insert(fallback.as_str());
            }
        }
        managed
    }

    /// Execute one step including propagation. Re-entered by the
    /// conditional/loop sub-executors and the fallback path.
    pub(crate) fn run_step<'a>(
        &'a self,
        idx: usize,
        ctx: SharedContext,
        state: &'a RunState,
        run_id: &'a str,
        loop_scope: Option<LoopContext>,
    ) -> BoxFuture<'a, ()> {
        async move {
            let step = &self.workflow.steps[idx];
            let step_id = step.id.clone();

            if self.cancel.is_cancelled() {
                debug!(step_id = %step_id, "cancelled before start");
                if state.status(&step_id) == StepStatus::Pending {
                    state.set_status(&step_id, StepStatus::Skipped);
                }
                return;
            }

            // Transitive skip: a step whose dependencies were all skipped
            // belongs to an inactive branch itself
            if !step.depends_on.is_empty()
                && step
                    .depends_on
                    .iter()
                    .all(|dep| state.status(dep) == StepStatus::Skipped)
            {
                debug!(step_id = %step_id, "skipped: all dependencies skipped");
                state.set_status(&step_id, StepStatus::Skipped);
                return;
            }

            state.set_status(&step_id, StepStatus::Running);
            self.bus.emit(&WorkflowEvent::StepStarted {
                workflow_id: run_id.to_string(),
                step_id: step_id.clone(),
                step_index: Some(idx),
                timestamp: Utc::now(),
            });
            let started = Instant::now();

            // Debug gate: pause here when the controller says so, and fold
            // any variable mutations back into the live context
            {
                let mut snapshot = ctx.read().await.clone();
                self.debug.check_breakpoint(&step_id, &mut snapshot).await;
                let mut guard = ctx.write().await;
                guard.workflow_inputs = snapshot.workflow_inputs;
                guard.step_outputs.extend(snapshot.step_outputs);
            }

            let dispatch = self
                .dispatch(idx, Arc::clone(&ctx), state, run_id, loop_scope)
                .await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match dispatch {
                DispatchResult {
                    output: Some(output),
                    error: None,
                    attempts,
                    ..
                } => {
                    state.set_status(&step_id, StepStatus::Succeeded);
                    ctx.write().await.record_output(&step_id, output.clone());
                    state.records.insert(
                        step_id.clone(),
                        StepRecord {
                            step_id: step_id.clone(),
                            status: StepStatus::Succeeded,
                            output: Some(output.clone()),
                            error: None,
                            attempts,
                            duration_ms,
                        },
                    );
                    self.bus.emit(&WorkflowEvent::StepCompleted {
                        workflow_id: run_id.to_string(),
                        step_id,
                        outputs: output,
                        duration_ms,
                        timestamp: Utc::now(),
                    });
                }
                DispatchResult {
                    error,
                    attempts,
                    fatal,
                    ..
                } => {
                    let message = error.unwrap_or_else(|| "unknown error".to_string());
                    self.handle_failure(
                        idx,
                        ctx,
                        state,
                        run_id,
                        message,
                        attempts,
                        duration_ms,
                        fatal,
                    )
                    .await;
                }
            }
        }
        .boxed()
    }

    /// Apply the effective error propagation strategy to a failed step
    #[allow(clippy::too_many_arguments)]
    async fn handle_failure(
        &self,
        idx: usize,
        ctx: SharedContext,
        state: &RunState,
        run_id: &str,
        message: String,
        attempts: u32,
        duration_ms: u64,
        fatal: bool,
    ) {
        let step = &self.workflow.steps[idx];
        let step_id = step.id.clone();
        let effective = step
            .error_propagation
            .unwrap_or(self.options.error_propagation_strategy);

        let fail = |status_error: String| {
            state.set_status(&step_id, StepStatus::Failed);
            state.records.insert(
                step_id.clone(),
                StepRecord {
                    step_id: step_id.clone(),
                    status: StepStatus::Failed,
                    output: None,
                    error: Some(status_error.clone()),
                    attempts,
                    duration_ms,
                },
            );
            self.bus.emit(&WorkflowEvent::StepFailed {
                workflow_id: run_id.to_string(),
                step_id: step_id.clone(),
                error: status_error,
                duration_ms,
                exit_code: None,
                timestamp: Utc::now(),
            });
        };

        if fatal {
            fail(message.clone());
            state.request_abort(&step_id, &message);
            self.cancel.cancel();
            return;
        }

        match effective {
            ErrorPropagation::FailFast => {
                warn!(step_id = %step_id, error = %message, "fail-fast abort");
                fail(message.clone());
                state.request_abort(&step_id, &message);
                self.cancel.cancel();
            }
            ErrorPropagation::FailSilent => {
                warn!(step_id = %step_id, error = %message, "fail-silent, continuing");
                let sentinel = json!({ "_failed": true, "_error": message });
                ctx.write().await.record_output(&step_id, sentinel);
                fail(message);
            }
            ErrorPropagation::Fallback => {
                let Some(fallback_id) = step.fallback_step.clone() else {
                    let combined =
                        format!("step '{}' failed with no fallback_step: {}", step_id, message);
                    fail(combined.clone());
                    state.request_abort(&step_id, &combined);
                    self.cancel.cancel();
                    return;
                };
                let Some(fallback_idx) = self.workflow.step_index(&fallback_id) else {
                    let combined = format!(
                        "fallback step '{}' for '{}' does not exist",
                        fallback_id, step_id
                    );
                    fail(combined.clone());
                    state.request_abort(&step_id, &combined);
                    self.cancel.cancel();
                    return;
                };

                info!(step_id = %step_id, fallback = %fallback_id, "running fallback step");

                // Expose the primary error for the fallback's references
                ctx.write().await.record_output(
                    &step_id,
                    json!({ "_failed": true, "_error": message }),
                );

                self.run_step(fallback_idx, Arc::clone(&ctx), state, run_id, None)
                    .await;

                if state.status(&fallback_id) == StepStatus::Succeeded {
                    let sentinel = json!({
                        "_fallback_used": true,
                        "_primary_error": message,
                    });
                    state.set_status(&step_id, StepStatus::Succeeded);
                    ctx.write().await.record_output(&step_id, sentinel.clone());
                    state.records.insert(
                        step_id.clone(),
                        StepRecord {
                            step_id: step_id.clone(),
                            status: StepStatus::Succeeded,
                            output: Some(sentinel.clone()),
                            error: None,
                            attempts,
                            duration_ms,
                        },
                    );
                    self.bus.emit(&WorkflowEvent::StepCompleted {
                        workflow_id: run_id.to_string(),
                        step_id: step_id.clone(),
                        outputs: sentinel,
                        duration_ms,
                        timestamp: Utc::now(),
                    });
                } else {
                    let fallback_error = state
                        .records
                        .get(&fallback_id)
                        .and_then(|r| r.error.clone())
                        .unwrap_or_else(|| "fallback did not run".to_string());
                    let combined = format!(
                        "step '{}' failed ({}); fallback '{}' failed ({})",
                        step_id, message, fallback_id, fallback_error
                    );
                    fail(combined.clone());
                    state.request_abort(&step_id, &combined);
                    self.cancel.cancel();
                }
            }
        }
    }

    /// Dispatch a step by type
    async fn dispatch(
        &self,
        idx: usize,
        ctx: SharedContext,
        state: &RunState,
        run_id: &str,
        loop_scope: Option<LoopContext>,
    ) -> DispatchResult {
        let step = &self.workflow.steps[idx];

        // Snapshot the context for resolution; loop scope applies only to
        // this dispatch
        let rctx = {
            let guard = ctx.read().await;
            let mut snapshot = guard.clone();
            snapshot.loop_context = loop_scope.clone();
            snapshot
        };

        match step.step_type {
            Some(StepType::Output) => self.dispatch_output(step, &rctx),
            Some(StepType::Python) => self.dispatch_script(step, &rctx).await,
            Some(StepType::Llm) => self.dispatch_llm(step, &rctx).await,
            Some(StepType::Conditional) => {
                conditional::execute(self, step, ctx, state, run_id, &rctx, loop_scope).await
            }
            Some(StepType::Loop) => {
                loop_exec::execute(self, step, ctx, state, run_id, &rctx).await
            }
            None => DispatchResult {
                output: None,
                error: Some(format!("step '{}' has no type", step.id)),
                attempts: 1,
                fatal: true,
            },
        }
    }

    fn dispatch_output(&self, step: &Step, rctx: &ExecutionContext) -> DispatchResult {
        let template = step.message.as_deref().unwrap_or_default();
        let resolution = resolver::resolve_string(template, rctx);
        if !resolution.is_ok() {
            return DispatchResult {
                output: None,
                error: Some(resolution.errors.join("; ")),
                attempts: 1,
                fatal: false,
            };
        }
        let message = match resolution.value {
            Value::String(s) => Value::String(s),
            other => other,
        };
        DispatchResult {
            output: Some(json!({ "message": message })),
            error: None,
            attempts: 1,
            fatal: false,
        }
    }

    async fn dispatch_script(&self, step: &Step, rctx: &ExecutionContext) -> DispatchResult {
        let script = step.script.clone().unwrap_or_default();

        let raw_inputs = Value::Object(step.inputs.clone().into_iter().collect());
        let resolution = resolver::resolve_value(&raw_inputs, rctx);
        if !resolution.is_ok() {
            return DispatchResult {
                output: None,
                error: Some(resolution.errors.join("; ")),
                attempts: 1,
                fatal: false,
            };
        }
        let inputs = resolution.value;

        let runner = ScriptRunner::new(self.options.project_root.clone())
            .with_interpreter(self.options.interpreter.clone());
        let run_options = RunOptions {
            timeout_ms: self.options.script_timeout_ms,
            ..Default::default()
        };

        let policy = step.retry_policy.clone().unwrap_or_default();
        let retry = self
            .retry_executor(step, policy)
            .with_cancellation(self.cancel.clone());

        let outcome = retry
            .execute(|| {
                let runner = &runner;
                let script = script.clone();
                let inputs = inputs.clone();
                let run_options = run_options.clone();
                let cancel = self.cancel.clone();
                async move {
                    let result = runner.run(&script, &inputs, &run_options, &cancel).await?;
                    Ok(normalize_script_output(result.output))
                }
            })
            .await;

        DispatchResult {
            output: outcome.value,
            error: outcome.error,
            attempts: outcome.attempts,
            fatal: false,
        }
    }

    async fn dispatch_llm(&self, step: &Step, rctx: &ExecutionContext) -> DispatchResult {
        let model = step.model.clone().unwrap_or_default();
        let template = step.prompt_template.as_deref().unwrap_or_default();

        let resolution = resolver::resolve_string(template, rctx);
        if !resolution.is_ok() {
            return DispatchResult {
                output: None,
                error: Some(resolution.errors.join("; ")),
                attempts: 1,
                fatal: false,
            };
        }
        let prompt = match resolution.value {
            Value::String(s) => s,
            other => other.to_string(),
        };

        let policy = step.retry_policy.clone().unwrap_or_default();
        let retry = self
            .retry_executor(step, policy)
            .with_cancellation(self.cancel.clone());

        let outcome = retry
            .execute(|| {
                let providers = Arc::clone(&self.providers);
                let model = model.clone();
                let prompt = prompt.clone();
                let cancel = self.cancel.clone();
                async move {
                    let response = tokio::select! {
                        response = providers.complete(&model, prompt) => {
                            response.map_err(|e| ForgeError::Provider(e.to_string()))?
                        }
                        _ = cancel.cancelled() => return Err(ForgeError::Cancelled),
                    };
                    Ok(json!({ "response": response.text, "model": response.model }))
                }
            })
            .await;

        DispatchResult {
            output: outcome.value,
            error: outcome.error,
            attempts: outcome.attempts,
            fatal: false,
        }
    }

    fn retry_executor(&self, step: &Step, policy: RetryPolicy) -> RetryExecutor {
        let resource_id = policy
            .circuit_breaker
            .as_ref()
            .and_then(|cb| cb.resource_id.clone())
            .unwrap_or_else(|| step.id.clone());
        let executor = RetryExecutor::new(policy);
        executor.with_breaker(Arc::clone(&self.breakers), resource_id)
    }
}

/// Scripts usually print a JSON object; any other JSON value is wrapped so
/// step outputs stay addressable by name
fn normalize_script_output(value: Value) -> Value {
    match value {
        Value::Object(_) => value,
        other => json!({ "result": other }),
    }
}
