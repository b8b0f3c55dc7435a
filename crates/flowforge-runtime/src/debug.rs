// Flowforge Runtime - Debug controller
//
// Process-wide breakpoint and stepping controller. The executor consults
// `check_breakpoint` before each step; when the controller decides to pause
// it parks the calling task on a Notify until resumed, stepped, reset, or
// the debug timeout elapses. While paused, the captured context can be
// inspected and mutated by path.

use flowforge_core::{ExecutionContext, ForgeError, ForgeResult};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

const DEFAULT_DEBUG_TIMEOUT: Duration = Duration::from_secs(300);

/// Debugger activation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugMode {
    Off,
    On,
}

/// Execution state as seen by the debugger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugState {
    Running,
    Paused,
    Completed,
}

/// Stepping behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    /// Pause before every step
    None,
    /// Pause before the next step, then revert to None
    StepOver,
    /// Only pause at enabled breakpoints
    Continue,
}

/// Context captured at a pause point
#[derive(Debug, Clone)]
pub struct DebugContext {
    pub step_id: String,
    pub workflow_inputs: HashMap<String, Value>,
    pub step_outputs: HashMap<String, Value>,
}

struct Inner {
    mode: DebugMode,
    state: DebugState,
    step_mode: StepMode,
    breakpoints: HashMap<String, bool>,
    context: Option<DebugContext>,
    timeout: Duration,
}

/// Breakpoint and stepping controller
pub struct DebugController {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl DebugController {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                mode: DebugMode::Off,
                state: DebugState::Running,
                step_mode: StepMode::None,
                breakpoints: HashMap::new(),
                context: None,
                timeout: DEFAULT_DEBUG_TIMEOUT,
            }),
            notify: Notify::new(),
        }
    }

    /// Process-wide controller
    pub fn global() -> Arc<DebugController> {
        static GLOBAL: OnceLock<Arc<DebugController>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(DebugController::new())))
    }

    /// Enable or disable debugging. Turning the mode off clears breakpoints
    /// and releases any pause.
    pub fn set_mode(&self, on: bool) {
        {
            let mut inner = self.inner.lock();
            inner.mode = if on { DebugMode::On } else { DebugMode::Off };
            if !on {
                inner.breakpoints.clear();
                inner.state = DebugState::Running;
                inner.step_mode = StepMode::None;
                inner.context = None;
            }
        }
        self.notify.notify_waiters();
    }

    pub fn mode(&self) -> DebugMode {
        self.inner.lock().mode
    }

    pub fn state(&self) -> DebugState {
        self.inner.lock().state
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.inner.lock().timeout = timeout;
    }

    /// Add (or re-enable) a breakpoint for a step
    pub fn add_breakpoint(&self, step_id: impl Into<String>) {
        self.inner.lock().breakpoints.insert(step_id.into(), true);
    }

    pub fn remove_breakpoint(&self, step_id: &str) {
        self.inner.lock().breakpoints.remove(step_id);
    }

    pub fn set_breakpoint_enabled(&self, step_id: &str, enabled: bool) {
        if let Some(entry) = self.inner.lock().breakpoints.get_mut(step_id) {
            *entry = enabled;
        }
    }

    pub fn breakpoints(&self) -> Vec<(String, bool)> {
        self.inner
            .lock()
            .breakpoints
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Release the current pause without changing the step mode
    pub fn resume(&self) {
        {
            let mut inner = self.inner.lock();
            inner.state = DebugState::Running;
        }
        self.notify.notify_waiters();
    }

    /// Release the current pause and pause again before the next step
    pub fn step_over(&self) {
        {
            let mut inner = self.inner.lock();
            inner.state = DebugState::Running;
            inner.step_mode = StepMode::StepOver;
        }
        self.notify.notify_waiters();
    }

    /// Release the current pause and only stop at enabled breakpoints
    pub fn continue_run(&self) {
        {
            let mut inner = self.inner.lock();
            inner.state = DebugState::Running;
            inner.step_mode = StepMode::Continue;
        }
        self.notify.notify_waiters();
    }

    /// Clear all debug state and release any pause
    pub fn reset(&self) {
        {
            let mut inner = self.inner.lock();
            inner.state = DebugState::Running;
            inner.step_mode = StepMode::None;
            inner.breakpoints.clear();
            inner.context = None;
        }
        self.notify.notify_waiters();
    }

    /// Mark the debugged run finished
    pub fn mark_completed(&self) {
        self.inner.lock().state = DebugState::Completed;
        self.notify.notify_waiters();
    }

    /// The paused context, when paused
    pub fn current_context(&self) -> Option<DebugContext> {
        self.inner.lock().context.clone()
    }

    /// Mutate the paused context by path: `workflow_inputs.<name>` or
    /// `step_outputs.<step>.<field>...`
    pub fn set_variable(&self, path: &str, value: Value) -> ForgeResult<()> {
        let mut inner = self.inner.lock();
        let context = inner
            .context
            .as_mut()
            .ok_or_else(|| ForgeError::Config("no paused debug context".to_string()))?;

        let segments: Vec<&str> = path.split('.').collect();
        match segments.as_slice() {
            ["workflow_inputs" | "inputs", name, rest @ ..] => {
                set_path(&mut context.workflow_inputs, name, rest, value)
            }
            ["step_outputs" | "steps", name, rest @ ..] => {
                set_path(&mut context.step_outputs, name, rest, value)
            }
            _ => Err(ForgeError::Config(format!(
                "unsupported variable path '{}'",
                path
            ))),
        }
    }

    /// Called by the executor before each step. Blocks while paused; the
    /// context may be mutated in the meantime and is written back before
    /// returning.
    pub async fn check_breakpoint(&self, step_id: &str, ctx: &mut ExecutionContext) {
        let timeout = {
            let mut inner = self.inner.lock();
            if inner.mode == DebugMode::Off {
                return;
            }

            let at_breakpoint = inner.breakpoints.get(step_id).copied().unwrap_or(false);
            let stepping = inner.step_mode != StepMode::Continue;
            if !at_breakpoint && !stepping {
                return;
            }

            // StepOver pauses exactly once
            if inner.step_mode == StepMode::StepOver {
                inner.step_mode = StepMode::None;
            }

            inner.state = DebugState::Paused;
            inner.context = Some(DebugContext {
                step_id: step_id.to_string(),
                workflow_inputs: ctx.workflow_inputs.clone(),
                step_outputs: ctx.step_outputs.clone(),
            });
            inner.timeout
        };

        info!(step_id, "execution paused");
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Re-check before parking: a resume may have landed between the
            // pause and the first wait
            {
                let inner = self.inner.lock();
                if inner.state != DebugState::Paused || inner.mode == DebugMode::Off {
                    break;
                }
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(step_id, "debug pause timed out, auto-resuming");
                    self.inner.lock().state = DebugState::Running;
                    break;
                }
            }
        }

        // Write any mutations back into the live context
        let mut inner = self.inner.lock();
        if let Some(saved) = inner.context.take() {
            debug!(step_id, "resuming with debug context");
            ctx.workflow_inputs = saved.workflow_inputs;
            for (k, v) in saved.step_outputs {
                ctx.step_outputs.insert(k, v);
            }
        }
    }
}

impl Default for DebugController {
    fn default() -> Self {
        Self::new()
    }
}

fn set_path(
    map: &mut HashMap<String, Value>,
    head: &str,
    rest: &[&str],
    value: Value,
) -> ForgeResult<()> {
    if rest.is_empty() {
        map.insert(head.to_string(), value);
        return Ok(());
    }

    let mut current = map
        .entry(head.to_string())
        .or_insert_with(|| Value::Object(serde_json::Map::new()));

    for segment in &rest[..rest.len() - 1] {
        if !current.is_object() {
            *current = Value::Object(serde_json::Map::new());
        }
        current = current
            .as_object_mut()
            .expect("object just ensured")
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }

    if !current.is_object() {
        *current = Value::Object(serde_json::Map::new());
    }
    current
        .as_object_mut()
        .expect("object just ensured")
        .insert(rest[rest.len() - 1].to_string(), value);
    Ok(())
}
