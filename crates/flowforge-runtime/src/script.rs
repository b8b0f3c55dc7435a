// Flowforge Runtime - Script runner
//
// Executes an external interpreter script under a JSON-over-stdio contract:
// the child reads one JSON object from stdin, writes one JSON value to
// stdout, and exits 0 on success. Before anything is spawned, the script
// path and every path-shaped input value must resolve inside the project
// root (real paths, so symlinks and `..` cannot escape). The child runs
// with a cleared environment plus an explicit allowlist, under a timeout
// with kill escalation. Script misbehavior never panics the host.

use crate::events::{EventBus, WorkflowEvent};
use chrono::Utc;
use flowforge_core::{ForgeError, ForgeResult};
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default per-invocation timeout
pub const DEFAULT_SCRIPT_TIMEOUT_MS: u64 = 30_000;

/// Grace period between the termination signal and the force kill
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Environment variables forwarded into the child by default
const DEFAULT_ENV_ALLOWLIST: &[&str] = &["PATH", "HOME", "LANG", "TMPDIR"];

/// Options for one script invocation
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Timeout budget in milliseconds; 0 means the default
    pub timeout_ms: u64,

    /// When both ids are set the runner emits step lifecycle events itself
    pub workflow_id: Option<String>,
    pub step_id: Option<String>,
}

/// Successful script invocation
#[derive(Debug, Clone)]
pub struct ScriptOutput {
    /// Parsed JSON the script wrote to stdout
    pub output: Value,

    /// Captured stderr (diagnostics are legal on success)
    pub stderr: String,

    pub duration_ms: u64,
}

/// External script executor rooted at a project directory
pub struct ScriptRunner {
    project_root: PathBuf,
    interpreter: String,
    env_allowlist: Vec<String>,
    bus: Option<Arc<EventBus>>,
}

impl ScriptRunner {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            interpreter: "python3".to_string(),
            env_allowlist: DEFAULT_ENV_ALLOWLIST.iter().map(|s| s.to_string()).collect(),
            bus: None,
        }
    }

    /// Use a different interpreter binary (tests drive the same contract
    /// through /bin/sh)
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn with_env_allowlist(mut self, vars: Vec<String>) -> Self {
        self.env_allowlist = vars;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Run a script with the given inputs
    pub async fn run(
        &self,
        script: &str,
        inputs: &Value,
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> ForgeResult<ScriptOutput> {
        let started = Instant::now();
        let timeout_ms = if options.timeout_ms == 0 {
            DEFAULT_SCRIPT_TIMEOUT_MS
        } else {
            options.timeout_ms
        };

        let result = self
            .run_inner(script, inputs, timeout_ms, cancel, options)
            .await;

        match &result {
            Ok(output) => self.emit(options, |workflow_id, step_id| {
                WorkflowEvent::StepCompleted {
                    workflow_id,
                    step_id,
                    outputs: output.output.clone(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    timestamp: Utc::now(),
                }
            }),
            Err(err) => {
                let exit_code = match err {
                    ForgeError::Script(msg) => extract_exit_code(msg),
                    _ => None,
                };
                let message = err.to_string();
                self.emit(options, |workflow_id, step_id| WorkflowEvent::StepFailed {
                    workflow_id,
                    step_id,
                    error: message.clone(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    exit_code,
                    timestamp: Utc::now(),
                });
            }
        }

        result
    }

    async fn run_inner(
        &self,
        script: &str,
        inputs: &Value,
        timeout_ms: u64,
        cancel: &CancellationToken,
        options: &RunOptions,
    ) -> ForgeResult<ScriptOutput> {
        self.emit(options, |workflow_id, step_id| WorkflowEvent::StepStarted {
            workflow_id,
            step_id,
            step_index: None,
            timestamp: Utc::now(),
        });

        let root_real = self.project_root.canonicalize().map_err(|e| {
            ForgeError::Config(format!(
                "project root {} is not accessible: {}",
                self.project_root.display(),
                e
            ))
        })?;

        let script_real = resolve_script_path(&root_real, Path::new(script))?;
        check_path_shaped_inputs(&root_real, inputs)?;

        let started = Instant::now();
        let mut command = Command::new(&self.interpreter);
        command
            .arg(&script_real)
            .current_dir(&root_real)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for key in &self.env_allowlist {
            if let Ok(value) = std::env::var(key) {
                command.env(key, value);
            }
        }

        debug!(script = %script_real.display(), interpreter = %self.interpreter, "spawning script");
        let mut child = command.spawn().map_err(|e| {
            ForgeError::Script(format!("failed to spawn '{}': {}", self.interpreter, e))
        })?;

        // Feed inputs and close stdin so the child sees EOF
        if let Some(mut stdin) = child.stdin.take() {
            let payload = serde_json::to_vec(inputs)
                .map_err(|e| ForgeError::Script(format!("inputs not serializable: {}", e)))?;
            if let Err(e) = stdin.write_all(&payload).await {
                warn!("failed writing script stdin: {}", e);
            }
            drop(stdin);
        }

        let mut stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| ForgeError::Script("child stdout not captured".to_string()))?;
        let mut stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| ForgeError::Script("child stderr not captured".to_string()))?;
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stdout_pipe.read_to_end(&mut buf).await;
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr_pipe.read_to_end(&mut buf).await;
            buf
        });

        let status = tokio::select! {
            status = child.wait() => {
                status.map_err(|e| ForgeError::Script(format!("wait failed: {}", e)))?
            }
            _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
                let _ = child.start_kill();
                if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
                    let _ = child.kill().await;
                }
                return Err(ForgeError::ScriptTimeout(started.elapsed().as_millis() as u64));
            }
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(ForgeError::Cancelled);
            }
        };

        let stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).into_owned();
        let duration_ms = started.elapsed().as_millis() as u64;

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            let mut message = format!("script exited with code {}", code);
            if !stderr.trim().is_empty() {
                message.push_str(&format!(": {}", stderr.trim()));
            }
            return Err(ForgeError::Script(message));
        }

        let output: Value = serde_json::from_str(stdout.trim())
            .map_err(|_| ForgeError::Script("Invalid JSON output".to_string()))?;

        Ok(ScriptOutput {
            output,
            stderr,
            duration_ms,
        })
    }

    fn emit<F>(&self, options: &RunOptions, build: F)
    where
        F: FnOnce(String, String) -> WorkflowEvent,
    {
        if let (Some(bus), Some(workflow_id), Some(step_id)) =
            (&self.bus, &options.workflow_id, &options.step_id)
        {
            bus.emit(&build(workflow_id.clone(), step_id.clone()));
        }
    }
}

/// Resolve the script path and require it to live under the project root
fn resolve_script_path(root_real: &Path, script: &Path) -> ForgeResult<PathBuf> {
    let candidate = if script.is_absolute() {
        script.to_path_buf()
    } else {
        root_real.join(script)
    };

    match candidate.canonicalize() {
        Ok(real) => {
            if real.starts_with(root_real) {
                Ok(real)
            } else {
                Err(ForgeError::Sandbox(format!(
                    "script '{}' resolves outside project root",
                    script.display()
                )))
            }
        }
        Err(_) => {
            // Path does not exist; decide between escape and not-found
            if lexically_escapes(root_real, &candidate) {
                Err(ForgeError::Sandbox(format!(
                    "script '{}' resolves outside project root",
                    script.display()
                )))
            } else {
                Err(ForgeError::Script(format!(
                    "script not found: {}",
                    script.display()
                )))
            }
        }
    }
}

/// Apply the containment check to every path-shaped string in the inputs
fn check_path_shaped_inputs(root_real: &Path, value: &Value) -> ForgeResult<()> {
    match value {
        Value::String(s) => {
            if looks_like_path(s) {
                check_contained(root_real, s)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                check_path_shaped_inputs(root_real, item)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            for item in map.values() {
                check_path_shaped_inputs(root_real, item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Strings that plausibly name filesystem locations: absolute paths or
/// anything carrying a separator
fn looks_like_path(s: &str) -> bool {
    s.starts_with('/') || s.starts_with("..") || s.contains(std::path::MAIN_SEPARATOR)
}

fn check_contained(root_real: &Path, raw: &str) -> ForgeResult<()> {
    let path = Path::new(raw);
    let candidate = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root_real.join(path)
    };

    let escapes = match candidate.canonicalize() {
        Ok(real) => !real.starts_with(root_real),
        Err(_) => lexically_escapes(root_real, &candidate),
    };

    if escapes {
        Err(ForgeError::Sandbox(format!(
            "input path '{}' resolves outside project root",
            raw
        )))
    } else {
        Ok(())
    }
}

/// Without touching the filesystem, does the normalized path leave the root?
fn lexically_escapes(root_real: &Path, candidate: &Path) -> bool {
    let mut normalized = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return true;
                }
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }
    !normalized.starts_with(root_real)
}

fn extract_exit_code(message: &str) -> Option<i32> {
    let marker = "exited with code ";
    let idx = message.find(marker)? + marker.len();
    message[idx..]
        .split(|c: char| !c.is_ascii_digit() && c != '-')
        .next()?
        .parse()
        .ok()
}
