// Flowforge Core - Semantic validation
//
// Pure function from a parsed workflow to a list of findings. The workflow
// is valid iff no finding has Error severity; warnings are advisory.
// Checks run in a fixed order so reports are deterministic: metadata,
// inputs, step identity, per-type required fields, dependency references,
// cycle detection, variable references, UI metadata.

use crate::resolver::find_references;
use crate::workflow::{ErrorPropagation, InputType, Step, StepType, Workflow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Finding severity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single validation finding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    pub severity: Severity,
    /// Locator of the offending field, e.g. "steps[2].script"
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(severity: Severity, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, field, message)
    }

    pub fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, field, message)
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Whether a report contains no errors (warnings permitted)
pub fn is_valid(report: &[ValidationError]) -> bool {
    !report.iter().any(ValidationError::is_error)
}

/// Validate a workflow, returning every finding
pub fn validate(workflow: &Workflow) -> Vec<ValidationError> {
    let mut report = Vec::new();

    check_metadata(workflow, &mut report);
    check_inputs(workflow, &mut report);
    check_step_identity(workflow, &mut report);
    check_step_fields(workflow, &mut report);
    check_dependencies(workflow, &mut report);
    check_cycles(workflow, &mut report);
    check_references(workflow, &mut report);
    check_ui_metadata(workflow, &mut report);

    report
}

fn check_metadata(workflow: &Workflow, report: &mut Vec<ValidationError>) {
    let meta = match &workflow.workflow {
        Some(meta) => meta,
        None => {
            report.push(ValidationError::error(
                "workflow",
                "missing 'workflow' metadata block",
            ));
            return;
        }
    };

    if meta.name.trim().is_empty() {
        report.push(ValidationError::error("workflow.name", "name is required"));
    }

    let semver = regex::Regex::new(r"^\d+\.\d+\.\d+$").expect("static pattern");
    if !semver.is_match(&meta.version) {
        report.push(ValidationError::error(
            "workflow.version",
            format!(
                "version '{}' must match major.minor.patch (e.g. 1.0.0)",
                meta.version
            ),
        ));
    }

    if meta.description.trim().is_empty() {
        report.push(ValidationError::error(
            "workflow.description",
            "description is required",
        ));
    }
}

fn check_inputs(workflow: &Workflow, report: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();

    for (i, input) in workflow.inputs.iter().enumerate() {
        let field = format!("inputs[{}]", i);

        if input.id.trim().is_empty() {
            report.push(ValidationError::error(
                format!("{}.id", field),
                "input id is required",
            ));
        } else if !seen.insert(input.id.clone()) {
            report.push(ValidationError::error(
                format!("{}.id", field),
                format!("duplicate input id '{}'", input.id),
            ));
        }

        if input.input_type == InputType::Select {
            let has_options = input
                .options
                .as_ref()
                .map(|o| !o.is_empty())
                .unwrap_or(false);
            if !has_options {
                report.push(ValidationError::error(
                    format!("{}.options", field),
                    format!("select input '{}' requires non-empty options", input.id),
                ));
            }
        }
    }
}

fn check_step_identity(workflow: &Workflow, report: &mut Vec<ValidationError>) {
    if workflow.steps.is_empty() {
        report.push(ValidationError::error(
            "steps",
            "at least one step is required",
        ));
        return;
    }

    let mut seen = HashSet::new();
    for (i, step) in workflow.steps.iter().enumerate() {
        let field = format!("steps[{}]", i);

        if step.id.trim().is_empty() {
            report.push(ValidationError::error(
                format!("{}.id", field),
                "step id is required",
            ));
        } else if !seen.insert(step.id.clone()) {
            report.push(ValidationError::error(
                format!("{}.id", field),
                format!("duplicate step id '{}'", step.id),
            ));
        }

        if step.step_type.is_none() {
            report.push(ValidationError::error(
                format!("{}.type", field),
                format!("step '{}' is missing its type", step.id),
            ));
        }
    }
}

fn check_step_fields(workflow: &Workflow, report: &mut Vec<ValidationError>) {
    let step_ids: HashSet<&str> = workflow.steps.iter().map(|s| s.id.as_str()).collect();

    for (i, step) in workflow.steps.iter().enumerate() {
        let field = format!("steps[{}]", i);

        match step.step_type {
            Some(StepType::Python) => {
                if step.script.as_deref().map(str::trim).unwrap_or("").is_empty() {
                    report.push(ValidationError::error(
                        format!("{}.script", field),
                        format!("python step '{}' requires 'script'", step.id),
                    ));
                }
            }
            Some(StepType::Llm) => {
                if step.model.as_deref().map(str::trim).unwrap_or("").is_empty() {
                    report.push(ValidationError::error(
                        format!("{}.model", field),
                        format!("llm step '{}' requires 'model'", step.id),
                    ));
                }
                if step.prompt_template.is_none() {
                    report.push(ValidationError::error(
                        format!("{}.prompt_template", field),
                        format!("llm step '{}' requires 'prompt_template'", step.id),
                    ));
                }
            }
            Some(StepType::Output) => {
                if step.message.is_none() {
                    report.push(ValidationError::error(
                        format!("{}.message", field),
                        format!("output step '{}' requires 'message'", step.id),
                    ));
                }
            }
            Some(StepType::Conditional) => {
                if step.condition.as_deref().map(str::trim).unwrap_or("").is_empty() {
                    report.push(ValidationError::error(
                        format!("{}.condition", field),
                        format!("conditional step '{}' requires 'condition'", step.id),
                    ));
                }
                match &step.then_steps {
                    None => report.push(ValidationError::error(
                        format!("{}.then_steps", field),
                        format!("conditional step '{}' requires 'then_steps'", step.id),
                    )),
                    Some(ids) => check_branch_refs(&field, "then_steps", ids, &step_ids, report),
                }
                if let Some(ids) = &step.else_steps {
                    check_branch_refs(&field, "else_steps", ids, &step_ids, report);
                }
            }
            Some(StepType::Loop) => {
                if step.items.is_none() {
                    report.push(ValidationError::error(
                        format!("{}.items", field),
                        format!("loop step '{}' requires 'items'", step.id),
                    ));
                }
                match &step.loop_steps {
                    None => report.push(ValidationError::error(
                        format!("{}.loop_steps", field),
                        format!("loop step '{}' requires 'loop_steps'", step.id),
                    )),
                    Some(ids) => check_branch_refs(&field, "loop_steps", ids, &step_ids, report),
                }
            }
            None => {}
        }

        if step.error_propagation == Some(ErrorPropagation::Fallback) {
            match &step.fallback_step {
                None => report.push(ValidationError::error(
                    format!("{}.fallback_step", field),
                    format!(
                        "step '{}' uses fallback propagation but names no fallback_step",
                        step.id
                    ),
                )),
                Some(target) if !step_ids.contains(target.as_str()) => {
                    report.push(ValidationError::error(
                        format!("{}.fallback_step", field),
                        format!("fallback step '{}' does not exist", target),
                    ))
                }
                _ => {}
            }
        }
    }
}

fn check_branch_refs(
    field: &str,
    list_name: &str,
    ids: &[String],
    step_ids: &HashSet<&str>,
    report: &mut Vec<ValidationError>,
) {
    for (j, id) in ids.iter().enumerate() {
        if !step_ids.contains(id.as_str()) {
            report.push(ValidationError::error(
                format!("{}.{}[{}]", field, list_name, j),
                format!("references unknown step '{}'", id),
            ));
        }
    }
}

fn check_dependencies(workflow: &Workflow, report: &mut Vec<ValidationError>) {
    let step_ids: HashSet<&str> = workflow.steps.iter().map(|s| s.id.as_str()).collect();

    for (i, step) in workflow.steps.iter().enumerate() {
        for (j, dep) in step.depends_on.iter().enumerate() {
            let field = format!("steps[{}].depends_on[{}]", i, j);
            if dep == &step.id {
                report.push(ValidationError::error(
                    field,
                    format!("step '{}' cannot depend on itself", step.id),
                ));
            } else if !step_ids.contains(dep.as_str()) {
                report.push(ValidationError::error(
                    field,
                    format!("step '{}' depends on unknown step '{}'", step.id, dep),
                ));
            }
        }
    }
}

/// Cycle detection by depth-first search with three-color marking
fn check_cycles(workflow: &Workflow, report: &mut Vec<ValidationError>) {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let index_of: HashMap<&str, usize> = workflow
        .steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    let mut colors = vec![Color::White; workflow.steps.len()];

    fn visit(
        idx: usize,
        steps: &[Step],
        index_of: &HashMap<&str, usize>,
        colors: &mut [Color],
    ) -> Option<String> {
        colors[idx] = Color::Gray;
        for dep in &steps[idx].depends_on {
            if let Some(&dep_idx) = index_of.get(dep.as_str()) {
                if dep_idx == idx {
                    continue;
                }
                match colors[dep_idx] {
                    Color::Gray => return Some(steps[dep_idx].id.clone()),
                    Color::White => {
                        if let Some(found) = visit(dep_idx, steps, index_of, colors) {
                            return Some(found);
                        }
                    }
                    Color::Black => {}
                }
            }
        }
        colors[idx] = Color::Black;
        None
    }

    for idx in 0..workflow.steps.len() {
        if colors[idx] == Color::White {
            if let Some(offender) = visit(idx, &workflow.steps, &index_of, &mut colors) {
                report.push(ValidationError::error(
                    "steps",
                    format!("Circular dependency involving step '{}'", offender),
                ));
                return;
            }
        }
    }
}

fn check_references(workflow: &Workflow, report: &mut Vec<ValidationError>) {
    let input_ids: HashSet<&str> = workflow.inputs.iter().map(|i| i.id.as_str()).collect();
    let index_of: HashMap<&str, usize> = workflow
        .steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    let containers_of = container_map(workflow);

    // Steps allowed to use loop.* references: the transitive closure of
    // every loop body. A conditional nested in a loop body carries its
    // branch steps into the loop scope too.
    let mut loop_members: HashSet<&str> = HashSet::new();
    let mut worklist: Vec<&str> = Vec::new();
    for step in &workflow.steps {
        if step.step_type == Some(StepType::Loop) {
            if let Some(ids) = &step.loop_steps {
                worklist.extend(ids.iter().map(String::as_str));
            }
        }
    }
    while let Some(id) = worklist.pop() {
        if !loop_members.insert(id) {
            continue;
        }
        if let Some(&idx) = index_of.get(id) {
            let member = &workflow.steps[idx];
            for list in [&member.then_steps, &member.else_steps, &member.loop_steps] {
                if let Some(ids) = list {
                    worklist.extend(ids.iter().map(String::as_str));
                }
            }
        }
    }

    for (i, step) in workflow.steps.iter().enumerate() {
        let ancestors = ancestor_ids(workflow, i, &index_of, &containers_of);
        let in_loop_body = loop_members.contains(step.id.as_str());

        let mut texts: Vec<(String, String)> = Vec::new();
        for (name, value) in &step.inputs {
            collect_strings(value, &format!("steps[{}].inputs.{}", i, name), &mut texts);
        }
        if let Some(t) = &step.prompt_template {
            texts.push((format!("steps[{}].prompt_template", i), t.clone()));
        }
        if let Some(t) = &step.message {
            texts.push((format!("steps[{}].message", i), t.clone()));
        }
        if let Some(t) = &step.condition {
            texts.push((format!("steps[{}].condition", i), t.clone()));
        }
        if let Some(items) = &step.items {
            collect_strings(items, &format!("steps[{}].items", i), &mut texts);
        }

        for (field, text) in texts {
            for span in find_references(&text) {
                check_one_reference(
                    &span.expr,
                    &field,
                    step,
                    &input_ids,
                    &index_of,
                    &ancestors,
                    in_loop_body,
                    report,
                );
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn check_one_reference(
    expr: &str,
    field: &str,
    step: &Step,
    input_ids: &HashSet<&str>,
    index_of: &HashMap<&str, usize>,
    ancestors: &HashSet<String>,
    in_loop_body: bool,
    report: &mut Vec<ValidationError>,
) {
    let segments: Vec<&str> = expr.split('.').collect();
    match segments.first().copied() {
        Some("workflow") => {
            if segments.len() < 3 || segments[1] != "inputs" {
                report.push(ValidationError::error(
                    field,
                    format!("malformed reference '${{{}}}'", expr),
                ));
            } else if !input_ids.contains(segments[2]) {
                report.push(ValidationError::error(
                    field,
                    format!("'${{{}}}' names undeclared input '{}'", expr, segments[2]),
                ));
            }
        }
        Some("steps") => {
            if segments.len() < 4 || segments[2] != "outputs" {
                report.push(ValidationError::error(
                    field,
                    format!("malformed reference '${{{}}}'", expr),
                ));
                return;
            }
            let target = segments[1];
            if !index_of.contains_key(target) {
                report.push(ValidationError::error(
                    field,
                    format!("'${{{}}}' references unknown step '{}'", expr, target),
                ));
            } else if !ancestors.contains(target) && target != step.id {
                report.push(ValidationError::error(
                    field,
                    format!(
                        "'${{{}}}' references step '{}' which is not a predecessor of '{}'",
                        expr, target, step.id
                    ),
                ));
            }
        }
        Some("env") => {
            if segments.len() != 2 {
                report.push(ValidationError::error(
                    field,
                    format!("malformed reference '${{{}}}'", expr),
                ));
            } else if std::env::var(segments[1]).is_err() {
                report.push(ValidationError::warning(
                    field,
                    format!("environment variable '{}' is not set", segments[1]),
                ));
            }
        }
        Some("loop") => {
            if !in_loop_body {
                report.push(ValidationError::error(
                    field,
                    format!(
                        "'${{{}}}' used in step '{}' which is not part of any loop body",
                        expr, step.id
                    ),
                ));
            } else if !matches!(segments.get(1).copied(), Some("item" | "index" | "key" | "value")) {
                report.push(ValidationError::error(
                    field,
                    format!("unknown loop field in '${{{}}}'", expr),
                ));
            }
        }
        _ => {
            report.push(ValidationError::error(
                field,
                format!("unknown reference scope in '${{{}}}'", expr),
            ));
        }
    }
}

/// Map from a step id to the container steps whose branch or loop body
/// lists it
fn container_map(workflow: &Workflow) -> HashMap<&str, Vec<usize>> {
    let mut containers: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, step) in workflow.steps.iter().enumerate() {
        for list in [&step.then_steps, &step.else_steps, &step.loop_steps] {
            if let Some(ids) = list {
                for id in ids {
                    containers.entry(id.as_str()).or_default().push(i);
                }
            }
        }
    }
    containers
}

/// Transitive predecessors of a step via depends_on. A branch or loop body
/// member has no depends_on of its own; it inherits its container's
/// schedule, so each container and the container's own ancestors count as
/// predecessors too, transitively.
fn ancestor_ids(
    workflow: &Workflow,
    start: usize,
    index_of: &HashMap<&str, usize>,
    containers_of: &HashMap<&str, Vec<usize>>,
) -> HashSet<String> {
    let mut out = HashSet::new();
    let mut stack: Vec<usize> = vec![start];
    let mut seen = HashSet::new();
    seen.insert(start);

    while let Some(idx) = stack.pop() {
        let step = &workflow.steps[idx];
        for dep in &step.depends_on {
            if let Some(&dep_idx) = index_of.get(dep.as_str()) {
                out.insert(dep.clone());
                if seen.insert(dep_idx) {
                    stack.push(dep_idx);
                }
            }
        }
        if let Some(containers) = containers_of.get(step.id.as_str()) {
            for &container_idx in containers {
                out.insert(workflow.steps[container_idx].id.clone());
                if seen.insert(container_idx) {
                    stack.push(container_idx);
                }
            }
        }
    }

    out
}

/// Collect every string inside a value, tagged with its field locator
fn collect_strings(value: &Value, field: &str, out: &mut Vec<(String, String)>) {
    match value {
        Value::String(s) => out.push((field.to_string(), s.clone())),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                collect_strings(item, &format!("{}[{}]", field, i), out);
            }
        }
        Value::Object(map) => {
            for (k, v) in map {
                collect_strings(v, &format!("{}.{}", field, k), out);
            }
        }
        _ => {}
    }
}

fn check_ui_metadata(workflow: &Workflow, report: &mut Vec<ValidationError>) {
    let ui = match &workflow.ui_metadata {
        Some(ui) => ui,
        None => return,
    };
    let step_ids: HashSet<&str> = workflow.steps.iter().map(|s| s.id.as_str()).collect();

    for (i, node) in ui.nodes.iter().enumerate() {
        let field = format!("ui_metadata.nodes[{}]", i);
        if !step_ids.contains(node.id.as_str()) {
            report.push(ValidationError::error(
                format!("{}.id", field),
                format!("ui node references unknown step '{}'", node.id),
            ));
        }
        if node.position.is_none() {
            report.push(ValidationError::error(
                format!("{}.position", field),
                "ui node requires a position {x, y}",
            ));
        }
    }

    if let Some(viewport) = &ui.viewport {
        if viewport.zoom <= 0.0 {
            report.push(ValidationError::error(
                "ui_metadata.viewport.zoom",
                "viewport zoom must be positive",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_workflow;

    fn report_for(yaml: &str) -> Vec<ValidationError> {
        validate(&parse_workflow(yaml).unwrap())
    }

    fn has_error(report: &[ValidationError], fragment: &str) -> bool {
        report
            .iter()
            .any(|e| e.is_error() && e.message.contains(fragment))
    }

    const VALID: &str = r#"
workflow:
  name: demo
  version: 1.0.0
  description: a demo
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

    #[test]
    fn test_valid_workflow_passes() {
        let report = report_for(VALID);
        assert!(is_valid(&report), "unexpected findings: {:?}", report);
    }

    #[test]
    fn test_missing_metadata_block() {
        let report = report_for("steps:\n  - id: a\n    type: output\n    message: hi\n");
        assert!(has_error(&report, "metadata block"));
    }

    #[test]
    fn test_bad_version() {
        let report = report_for(
            r#"
workflow:
  name: demo
  version: not-semver
  description: x
steps:
  - id: a
    type: output
    message: hi
"#,
        );
        assert!(has_error(&report, "major.minor.patch"));
    }

    #[test]
    fn test_duplicate_step_ids() {
        let report = report_for(
            r#"
workflow:
  name: demo
  version: 1.0.0
  description: x
steps:
  - id: twin
    type: output
    message: one
  - id: twin
    type: output
    message: two
"#,
        );
        assert!(has_error(&report, "duplicate step id"));
    }

    #[test]
    fn test_select_requires_options() {
        let report = report_for(
            r#"
workflow:
  name: demo
  version: 1.0.0
  description: x
inputs:
  - id: env
    type: select
    label: Environment
    required: true
steps:
  - id: a
    type: output
    message: hi
"#,
        );
        assert!(has_error(&report, "non-empty options"));
    }

    #[test]
    fn test_per_type_required_fields() {
        let report = report_for(
            r#"
workflow:
  name: demo
  version: 1.0.0
  description: x
steps:
  - id: s
    type: python
  - id: l
    type: llm
  - id: c
    type: conditional
  - id: lp
    type: loop
  - id: o
    type: output
"#,
        );
        assert!(has_error(&report, "requires 'script'"));
        assert!(has_error(&report, "requires 'model'"));
        assert!(has_error(&report, "requires 'prompt_template'"));
        assert!(has_error(&report, "requires 'condition'"));
        assert!(has_error(&report, "requires 'then_steps'"));
        assert!(has_error(&report, "requires 'items'"));
        assert!(has_error(&report, "requires 'loop_steps'"));
        assert!(has_error(&report, "requires 'message'"));
    }

    #[test]
    fn test_fallback_requires_target() {
        let report = report_for(
            r#"
workflow:
  name: demo
  version: 1.0.0
  description: x
steps:
  - id: a
    type: output
    message: hi
    error_propagation: fallback
"#,
        );
        assert!(has_error(&report, "names no fallback_step"));
    }

    #[test]
    fn test_self_dependency() {
        let report = report_for(
            r#"
workflow:
  name: demo
  version: 1.0.0
  description: x
steps:
  - id: a
    type: output
    message: hi
    depends_on: [a]
"#,
        );
        assert!(has_error(&report, "cannot depend on itself"));
    }

    #[test]
    fn test_cycle_reported() {
        let report = report_for(
            r#"
workflow:
  name: demo
  version: 1.0.0
  description: x
steps:
  - id: a
    type: output
    message: a
    depends_on: [c]
  - id: b
    type: output
    message: b
    depends_on: [a]
  - id: c
    type: output
    message: c
    depends_on: [b]
"#,
        );
        assert!(has_error(&report, "Circular dependency"));
    }

    #[test]
    fn test_acyclic_graph_has_no_cycle_error() {
        let report = report_for(VALID);
        assert!(!report.iter().any(|e| e.message.contains("Circular")));
    }

    #[test]
    fn test_undeclared_input_reference() {
        let report = report_for(
            r#"
workflow:
  name: demo
  version: 1.0.0
  description: x
steps:
  - id: a
    type: output
    message: ${workflow.inputs.ghost}
"#,
        );
        assert!(has_error(&report, "undeclared input 'ghost'"));
    }

    #[test]
    fn test_step_reference_must_be_predecessor() {
        let report = report_for(
            r#"
workflow:
  name: demo
  version: 1.0.0
  description: x
steps:
  - id: a
    type: output
    message: ${steps.b.outputs.x}
  - id: b
    type: output
    message: hi
"#,
        );
        assert!(has_error(&report, "not a predecessor"));
    }

    #[test]
    fn test_missing_env_is_warning() {
        let report = report_for(
            r#"
workflow:
  name: demo
  version: 1.0.0
  description: x
steps:
  - id: a
    type: output
    message: ${env.FLOWFORGE_SURELY_UNSET_VAR}
"#,
        );
        assert!(is_valid(&report));
        assert!(report
            .iter()
            .any(|e| e.severity == Severity::Warning && e.message.contains("not set")));
    }

    #[test]
    fn test_loop_reference_outside_loop() {
        let report = report_for(
            r#"
workflow:
  name: demo
  version: 1.0.0
  description: x
steps:
  - id: stray
    type: output
    message: ${loop.item}
"#,
        );
        assert!(has_error(&report, "not part of any loop body"));
    }

    #[test]
    fn test_loop_reference_inside_loop_is_ok() {
        let report = report_for(
            r#"
workflow:
  name: demo
  version: 1.0.0
  description: x
steps:
  - id: each
    type: loop
    items: [a, b]
    loop_steps: [emit]
  - id: emit
    type: output
    message: "${loop.item}@${loop.index}"
"#,
        );
        assert!(is_valid(&report), "unexpected findings: {:?}", report);
    }

    #[test]
    fn test_loop_reference_through_nested_conditional_is_ok() {
        let report = report_for(
            r#"
workflow:
  name: demo
  version: 1.0.0
  description: x
steps:
  - id: each
    type: loop
    items: [a, b]
    loop_steps: [gate]
  - id: gate
    type: conditional
    condition: "${loop.index} > 0"
    then_steps: [emit]
    else_steps: [note]
  - id: emit
    type: output
    message: "${loop.item}"
  - id: note
    type: output
    message: "first pass"
"#,
        );
        assert!(is_valid(&report), "unexpected findings: {:?}", report);
    }

    #[test]
    fn test_body_step_sees_container_predecessors() {
        let report = report_for(
            r#"
workflow:
  name: demo
  version: 1.0.0
  description: x
steps:
  - id: fetch
    type: output
    message: "ready"
  - id: each
    type: loop
    depends_on: [fetch]
    items: [a, b]
    loop_steps: [emit]
  - id: emit
    type: output
    message: "${steps.fetch.outputs.message} for ${loop.item}"
"#,
        );
        assert!(is_valid(&report), "unexpected findings: {:?}", report);
    }

    #[test]
    fn test_branch_step_sees_container_predecessors_transitively() {
        let report = report_for(
            r#"
workflow:
  name: demo
  version: 1.0.0
  description: x
steps:
  - id: fetch
    type: output
    message: "ready"
  - id: gate
    type: conditional
    depends_on: [fetch]
    condition: "${steps.fetch.outputs.message} == 'ready'"
    then_steps: [inner]
  - id: inner
    type: conditional
    condition: "1 == 1"
    then_steps: [emit]
  - id: emit
    type: output
    message: "${steps.fetch.outputs.message}"
"#,
        );
        assert!(is_valid(&report), "unexpected findings: {:?}", report);
    }

    #[test]
    fn test_ui_metadata_checks() {
        let report = report_for(
            r#"
workflow:
  name: demo
  version: 1.0.0
  description: x
steps:
  - id: a
    type: output
    message: hi
ui_metadata:
  nodes:
    - id: ghost
      position: { x: 0, y: 0 }
    - id: a
  viewport:
    zoom: -1
"#,
        );
        assert!(has_error(&report, "unknown step 'ghost'"));
        assert!(has_error(&report, "requires a position"));
        assert!(has_error(&report, "zoom must be positive"));
    }
}
