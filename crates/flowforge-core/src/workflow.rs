// Flowforge Core - Workflow document types
//
// A workflow is a YAML document describing a DAG of heterogeneous steps:
// external script invocations, LLM calls, conditional branches, loops, and
// passive outputs. Parsing is deliberately lenient about per-step required
// fields so the semantic validator can report every problem with a field
// locator instead of failing on the first missing key.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Workflow document - the root of a parsed YAML workflow
///
/// Example:
/// ```yaml
/// workflow:
///   name: nightly-report
///   version: 1.0.0
///   description: "Summarize overnight metrics"
/// inputs:
///   - id: region
///     type: string
///     label: Region
///     required: true
/// steps:
///   - id: fetch
///     type: python
///     script: scripts/fetch.py
///     inputs:
///       region: ${workflow.inputs.region}
///   - id: report
///     type: output
///     depends_on: [fetch]
///     message: "rows: ${steps.fetch.outputs.rows}"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workflow {
    /// Workflow metadata block
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowMeta>,

    /// Declared workflow inputs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<InputDecl>,

    /// Workflow steps
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Step>,

    /// Editor layout metadata (optional, validated when present)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui_metadata: Option<UiMetadata>,
}

/// Workflow metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowMeta {
    /// Workflow name
    #[serde(default)]
    pub name: String,

    /// Semantic version, `major.minor.patch`
    #[serde(default)]
    pub version: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for categorization
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Declared workflow input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDecl {
    /// Unique input identifier
    #[serde(default)]
    pub id: String,

    /// Input data type
    #[serde(rename = "type", default)]
    pub input_type: InputType,

    /// Display label
    #[serde(default)]
    pub label: String,

    /// Whether the input must be supplied at execution time
    #[serde(default)]
    pub required: bool,

    /// Default value when not supplied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,

    /// Choices for `select` inputs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

/// Input data types
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    #[default]
    String,
    Number,
    Boolean,
    File,
    Select,
}

/// A single workflow step
///
/// Type-specific fields are optional at parse time; `validate::validate`
/// enforces the per-type required fields with field locators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Step {
    /// Unique step identifier
    #[serde(default)]
    pub id: String,

    /// Step type tag
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub step_type: Option<StepType>,

    /// Display label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Step IDs that must complete before this step starts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Error propagation override for this step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_propagation: Option<ErrorPropagation>,

    /// Sibling step to run when this step fails (fallback strategy)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_step: Option<String>,

    /// Retry policy for this step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,

    // Script step
    /// Script path, relative to the project root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,

    /// Named arguments; values may contain `${...}` references
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub inputs: HashMap<String, serde_json::Value>,

    // LLM step
    /// Model identifier (e.g. "anthropic:claude-sonnet-4-20250514")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Prompt template; may contain `${...}` references
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,

    // Output step
    /// Message template; may contain `${...}` references
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    // Conditional step
    /// Boolean condition expression
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Step IDs executed when the condition is true
    #[serde(skip_serializing_if = "Option::is_none")]
    pub then_steps: Option<Vec<String>>,

    /// Step IDs executed when the condition is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub else_steps: Option<Vec<String>>,

    // Loop step
    /// Iterable: reference string, literal array/object, or "range(a, b)"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<serde_json::Value>,

    /// Step IDs executed once per iteration, in declaration order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_steps: Option<Vec<String>>,

    /// Iteration cap; refusing oversize iterables before the first iteration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,
}

/// Step types - a closed sum; dispatch is a tagged switch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    /// External script invocation (wire tag "python"; "script" accepted)
    #[serde(alias = "script")]
    Python,
    /// LLM call
    Llm,
    /// Passive output message
    Output,
    /// Conditional branch
    Conditional,
    /// Loop over an iterable
    Loop,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Python => "python",
            StepType::Llm => "llm",
            StepType::Output => "output",
            StepType::Conditional => "conditional",
            StepType::Loop => "loop",
        }
    }
}

/// Error propagation strategies
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPropagation {
    /// Cancel remaining work and fail the workflow
    FailFast,
    /// Record a sentinel output and continue
    FailSilent,
    /// Run the designated fallback step instead
    Fallback,
}

/// Retry policy for a step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first (>= 1)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Multiplier applied per attempt for exponential strategies (>= 1)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Ceiling for computed delays
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Delay strategy
    #[serde(default)]
    pub delay_strategy: DelayStrategy,

    /// Retry only when the error message contains one of these substrings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_on_errors: Vec<String>,

    /// Never retry when the error message contains one of these substrings;
    /// takes precedence over `retry_on_errors`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dont_retry_on_errors: Vec<String>,

    /// Circuit breaker configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            delay_strategy: DelayStrategy::default(),
            retry_on_errors: Vec::new(),
            dont_retry_on_errors: Vec::new(),
            circuit_breaker: None,
        }
    }
}

fn default_max_attempts() -> u32 {
    1
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

/// Delay strategies for retries
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DelayStrategy {
    /// Constant delay between attempts
    Fixed,
    /// Exponentially increasing delay, capped at `max_delay_ms`
    #[default]
    Exponential,
    /// Exponential delay scaled by a uniform random factor in [0.8, 1.2]
    Jittered,
}

/// Circuit breaker configuration, keyed by a caller-chosen resource id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Whether the breaker participates at all
    #[serde(default)]
    pub enabled: bool,

    /// Consecutive failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long the circuit stays open before a half-open probe
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Resource id the breaker state is keyed by; defaults to the step id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
            resource_id: None,
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_ms() -> u64 {
    60_000
}

/// Editor layout metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UiMetadata {
    /// Node layout entries; each must reference a declared step
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<UiNode>,

    /// Viewport state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Viewport>,
}

/// Layout entry for a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiNode {
    /// Step id this node positions
    #[serde(default)]
    pub id: String,

    /// Canvas position
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

/// Canvas coordinates
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Viewport state
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Viewport {
    pub zoom: f64,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

impl Workflow {
    /// Workflow name, empty when the metadata block is missing
    pub fn name(&self) -> &str {
        self.workflow.as_ref().map(|m| m.name.as_str()).unwrap_or("")
    }

    /// Find a step by id
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Index of a step by id
    pub fn step_index(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    /// Find a declared input by id
    pub fn input(&self, id: &str) -> Option<&InputDecl> {
        self.inputs.iter().find(|i| i.id == id)
    }
}

// ============================================================================
// Execution results
// ============================================================================

/// Step execution status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Step is waiting for its level
    Pending,
    /// Step is currently executing
    Running,
    /// Step completed successfully
    Succeeded,
    /// Step failed
    Failed,
    /// Step was skipped (inactive conditional branch)
    Skipped,
}

/// Per-step execution record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step id
    pub step_id: String,

    /// Terminal status
    pub status: StepStatus,

    /// Output value recorded under the step id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,

    /// Error message when failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Attempts consumed by the retry policy
    pub attempts: u32,

    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

/// Result of one `execute` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the workflow as a whole succeeded
    pub success: bool,

    /// Outputs keyed by step id; skipped steps produce no entry
    pub outputs: HashMap<String, serde_json::Value>,

    /// Number of steps that reached SUCCEEDED
    pub success_count: usize,

    /// Number of steps that reached FAILED (fallback-recovered primaries
    /// do not count)
    pub failure_count: usize,

    /// Step that triggered a fail-fast abort
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step_id: Option<String>,

    /// Workflow-level error message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Total wall-clock duration in milliseconds
    pub total_duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_workflow() {
        let yaml = r#"
workflow:
  name: nightly-report
  version: 1.0.0
  description: "Summarize overnight metrics"
inputs:
  - id: region
    type: string
    label: Region
    required: true
steps:
  - id: fetch
    type: python
    script: scripts/fetch.py
    inputs:
      region: ${workflow.inputs.region}
  - id: report
    type: output
    depends_on: [fetch]
    message: "rows: ${steps.fetch.outputs.rows}"
"#;

        let wf: Workflow = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(wf.name(), "nightly-report");
        assert_eq!(wf.steps.len(), 2);
        assert_eq!(wf.steps[0].step_type, Some(StepType::Python));
        assert_eq!(wf.steps[1].depends_on, vec!["fetch"]);
    }

    #[test]
    fn test_script_alias() {
        let yaml = r#"
steps:
  - id: legacy
    type: script
    script: run.py
"#;
        let wf: Workflow = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(wf.steps[0].step_type, Some(StepType::Python));
    }

    #[test]
    fn test_retry_policy_defaults() {
        let yaml = "max_attempts: 3";
        let policy: RetryPolicy = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay_ms, 1000);
        assert_eq!(policy.backoff_multiplier, 2.0);
        assert_eq!(policy.max_delay_ms, 30_000);
        assert_eq!(policy.delay_strategy, DelayStrategy::Exponential);
    }

    #[test]
    fn test_step_type_missing_is_lenient() {
        let yaml = r#"
steps:
  - id: mystery
"#;
        let wf: Workflow = serde_yaml::from_str(yaml).unwrap();
        assert!(wf.steps[0].step_type.is_none());
    }

    #[test]
    fn test_conditional_step_fields() {
        let yaml = r#"
steps:
  - id: check
    type: conditional
    condition: "${workflow.inputs.value} > 50"
    then_steps: [approve]
    else_steps: [deny]
"#;
        let wf: Workflow = serde_yaml::from_str(yaml).unwrap();
        let step = &wf.steps[0];
        assert_eq!(step.step_type, Some(StepType::Conditional));
        assert_eq!(step.then_steps.as_deref(), Some(&["approve".to_string()][..]));
    }

    #[test]
    fn test_loop_step_literal_items() {
        let yaml = r#"
steps:
  - id: each
    type: loop
    items: [a, b, c]
    loop_steps: [emit]
    max_iterations: 10
"#;
        let wf: Workflow = serde_yaml::from_str(yaml).unwrap();
        let step = &wf.steps[0];
        assert!(step.items.as_ref().unwrap().is_array());
        assert_eq!(step.max_iterations, Some(10));
    }

    #[test]
    fn test_ui_metadata() {
        let yaml = r#"
steps:
  - id: a
    type: output
    message: hi
ui_metadata:
  nodes:
    - id: a
      position: { x: 10.0, y: 20.5 }
  viewport:
    zoom: 1.25
    x: 0
    y: 0
"#;
        let wf: Workflow = serde_yaml::from_str(yaml).unwrap();
        let ui = wf.ui_metadata.unwrap();
        assert_eq!(ui.nodes.len(), 1);
        assert!((ui.viewport.unwrap().zoom - 1.25).abs() < f64::EPSILON);
    }
}
