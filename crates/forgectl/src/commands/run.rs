use anyhow::Context;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use flowforge_core::{parse_workflow_file, ErrorPropagation, ExecutionResult};
use flowforge_llm::{AnthropicProvider, MockProvider, OpenAiProvider, ProviderRegistry};
use flowforge_runtime::{EventBus, ExecutorOptions, WorkflowExecutor, WorkflowEvent};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub struct RunArgs {
    pub file: String,
    pub inputs: Vec<String>,
    pub parallel: bool,
    pub max_concurrency: usize,
    pub interpreter: String,
    pub script_timeout_ms: u64,
    pub output: String,
    pub project_root: String,
}

/// Execute a workflow file and render the result
pub async fn execute(args: RunArgs) -> anyhow::Result<()> {
    let workflow = parse_workflow_file(&args.file)
        .with_context(|| format!("failed to load {}", args.file))?;
    let inputs = parse_inputs(&args.inputs)?;

    let options = ExecutorOptions {
        enable_parallel_execution: args.parallel,
        max_concurrency: args.max_concurrency,
        error_propagation_strategy: ErrorPropagation::FailFast,
        project_root: PathBuf::from(&args.project_root),
        interpreter: args.interpreter,
        script_timeout_ms: args.script_timeout_ms,
    };

    let bus = EventBus::global();
    let listener = bus.on("*", |event| log_event(event));

    let executor = WorkflowExecutor::new(workflow, options)
        .context("workflow is invalid")?
        .with_providers(build_providers());

    let result = executor.execute(inputs).await;
    bus.off("*", listener);
    let result = result.context("workflow execution failed")?;

    match args.output.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        "yaml" => println!("{}", serde_yaml::to_string(&result)?),
        _ => render_text(&result),
    }

    if !result.success {
        anyhow::bail!(
            "workflow failed at step '{}'",
            result.failed_step_id.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}

/// Parse `key=value` pairs; values parse as JSON when possible and fall
/// back to plain strings
fn parse_inputs(pairs: &[String]) -> anyhow::Result<HashMap<String, Value>> {
    let mut inputs = HashMap::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .with_context(|| format!("input '{}' is not key=value", pair))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        inputs.insert(key.to_string(), value);
    }
    Ok(inputs)
}

/// Register every provider whose credentials are present, plus the mock
fn build_providers() -> Arc<ProviderRegistry> {
    let registry = ProviderRegistry::new();
    if let Ok(provider) = AnthropicProvider::from_env() {
        registry.register(Arc::new(provider));
    }
    if let Ok(provider) = OpenAiProvider::from_env() {
        registry.register(Arc::new(provider));
    }
    registry.register(Arc::new(MockProvider::new()));
    Arc::new(registry)
}

fn log_event(event: &WorkflowEvent) {
    match event {
        WorkflowEvent::WorkflowStarted { workflow_id, .. } => {
            info!(run_id = %workflow_id, "workflow started")
        }
        WorkflowEvent::StepStarted { step_id, .. } => info!(step = %step_id, "step started"),
        WorkflowEvent::StepCompleted {
            step_id,
            duration_ms,
            ..
        } => info!(step = %step_id, duration_ms, "step completed"),
        WorkflowEvent::StepFailed {
            step_id, error, ..
        } => info!(step = %step_id, error = %error, "step failed"),
        WorkflowEvent::WorkflowCompleted {
            success_count,
            failure_count,
            total_duration_ms,
            ..
        } => info!(success_count, failure_count, total_duration_ms, "workflow completed"),
    }
}

fn render_text(result: &ExecutionResult) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["step", "output"]);

    let mut ids: Vec<&String> = result.outputs.keys().collect();
    ids.sort();
    for id in ids {
        let rendered = serde_json::to_string(&result.outputs[id]).unwrap_or_default();
        table.add_row(vec![Cell::new(id), Cell::new(rendered)]);
    }
    println!("{table}");

    let verdict = if result.success {
        "succeeded".green().bold()
    } else {
        "failed".red().bold()
    };
    println!(
        "workflow {} in {} ms ({} succeeded, {} failed)",
        verdict, result.total_duration_ms, result.success_count, result.failure_count
    );
    if let Some(error) = &result.error {
        println!("{} {}", "error:".red().bold(), error);
    }
}
