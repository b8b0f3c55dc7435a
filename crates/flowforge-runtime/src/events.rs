// Flowforge Runtime - Lifecycle events and the event bus
//
// Step and workflow lifecycle transitions publish through the bus. Emission
// is serialized under a lock so observers see a consistent order; listener
// bodies must be non-blocking.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

/// Lifecycle events emitted during workflow execution
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    WorkflowStarted {
        workflow_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_steps: Option<usize>,
        start_time: DateTime<Utc>,
    },
    StepStarted {
        workflow_id: String,
        step_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        step_index: Option<usize>,
        timestamp: DateTime<Utc>,
    },
    StepCompleted {
        workflow_id: String,
        step_id: String,
        outputs: Value,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    StepFailed {
        workflow_id: String,
        step_id: String,
        error: String,
        duration_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        timestamp: DateTime<Utc>,
    },
    WorkflowCompleted {
        workflow_id: String,
        total_duration_ms: u64,
        results: Value,
        success_count: usize,
        failure_count: usize,
        timestamp: DateTime<Utc>,
    },
}

impl WorkflowEvent {
    /// Event name observers subscribe to
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::WorkflowStarted { .. } => "workflow_started",
            WorkflowEvent::StepStarted { .. } => "step_started",
            WorkflowEvent::StepCompleted { .. } => "step_completed",
            WorkflowEvent::StepFailed { .. } => "step_failed",
            WorkflowEvent::WorkflowCompleted { .. } => "workflow_completed",
        }
    }
}

/// Identifier returned by `on`/`once` for later removal
pub type ListenerId = Uuid;

type Callback = Arc<dyn Fn(&WorkflowEvent) + Send + Sync>;

struct Listener {
    id: ListenerId,
    callback: Callback,
    once: bool,
}

/// Fan-out of lifecycle events to registered observers
///
/// Observers subscribe by event name, or to `"*"` for everything.
pub struct EventBus {
    listeners: DashMap<String, Vec<Listener>>,
    emit_lock: Mutex<()>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: DashMap::new(),
            emit_lock: Mutex::new(()),
        }
    }

    /// Process-wide bus
    pub fn global() -> Arc<EventBus> {
        static GLOBAL: OnceLock<Arc<EventBus>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(EventBus::new())))
    }

    /// Register an observer for a named event
    pub fn on<F>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(&WorkflowEvent) + Send + Sync + 'static,
    {
        self.register(event, Arc::new(callback), false)
    }

    /// Register an observer that fires once and is then removed
    pub fn once<F>(&self, event: &str, callback: F) -> ListenerId
    where
        F: Fn(&WorkflowEvent) + Send + Sync + 'static,
    {
        self.register(event, Arc::new(callback), true)
    }

    fn register(&self, event: &str, callback: Callback, once: bool) -> ListenerId {
        let id = Uuid::new_v4();
        self.listeners
            .entry(event.to_string())
            .or_default()
            .push(Listener { id, callback, once });
        id
    }

    /// Remove a previously registered observer
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        if let Some(mut entry) = self.listeners.get_mut(event) {
            let before = entry.len();
            entry.retain(|l| l.id != id);
            return entry.len() != before;
        }
        false
    }

    /// Number of observers registered for an event name
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.get(event).map(|v| v.len()).unwrap_or(0)
    }

    /// Remove every observer
    pub fn clear(&self) {
        self.listeners.clear();
    }

    /// Publish an event to its listeners and any `"*"` listeners
    pub fn emit(&self, event: &WorkflowEvent) {
        let _serialized = self.emit_lock.lock();

        for key in [event.name(), "*"] {
            let callbacks: Vec<Callback> = {
                let Some(mut entry) = self.listeners.get_mut(key) else {
                    continue;
                };
                let callbacks = entry.iter().map(|l| Arc::clone(&l.callback)).collect();
                entry.retain(|l| !l.once);
                callbacks
            };
            for callback in callbacks {
                callback(event);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
