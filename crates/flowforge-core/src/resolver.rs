// Flowforge Core - Variable resolver
//
// Substitutes `${scope.path}` references inside arbitrary JSON values.
// Spans are found with a balanced-brace scan rather than a regex so nested
// braces inside an expression cannot desynchronize the scanner. Errors are
// aggregated and returned alongside a best-effort resolved value; the
// caller decides whether a non-empty error list is fatal.
//
// Reference grammar:
//   ref   := scope '.' path
//   scope := 'workflow' | 'steps' | 'loop' | 'env'
//
// When the entire input string is exactly one reference the resolved value
// keeps its original type; interpolated references are stringified.

use crate::context::ExecutionContext;
use serde_json::Value;

/// Outcome of resolving a value: best-effort result plus accumulated errors
#[derive(Debug, Clone)]
pub struct Resolution {
    pub value: Value,
    pub errors: Vec<String>,
}

impl Resolution {
    pub fn ok(value: Value) -> Self {
        Self {
            value,
            errors: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A `${...}` span inside a string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSpan {
    /// Reference text without the `${` / `}` delimiters
    pub expr: String,
    /// Byte offset of `$`
    pub start: usize,
    /// Byte offset one past the closing `}`
    pub end: usize,
}

/// Find all balanced `${...}` spans in a string
pub fn find_references(input: &str) -> Vec<ReferenceSpan> {
    let bytes = input.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;

    while i + 1 < bytes.len() {
        if bytes[i] == b'$' && bytes[i + 1] == b'{' {
            let mut depth = 1usize;
            let mut j = i + 2;
            while j < bytes.len() && depth > 0 {
                match bytes[j] {
                    b'{' => depth += 1,
                    b'}' => depth -= 1,
                    _ => {}
                }
                j += 1;
            }
            if depth == 0 {
                spans.push(ReferenceSpan {
                    expr: input[i + 2..j - 1].trim().to_string(),
                    start: i,
                    end: j,
                });
                i = j;
                continue;
            }
            // Unbalanced: leave the tail untouched
            break;
        }
        i += 1;
    }

    spans
}

/// Resolve references inside an arbitrary value, recursing into maps and
/// lists
pub fn resolve_value(value: &Value, ctx: &ExecutionContext) -> Resolution {
    match value {
        Value::String(s) => resolve_string(s, ctx),
        Value::Array(items) => {
            let mut errors = Vec::new();
            let resolved: Vec<Value> = items
                .iter()
                .map(|item| {
                    let mut r = resolve_value(item, ctx);
                    errors.append(&mut r.errors);
                    r.value
                })
                .collect();
            Resolution {
                value: Value::Array(resolved),
                errors,
            }
        }
        Value::Object(map) => {
            let mut errors = Vec::new();
            let resolved: serde_json::Map<String, Value> = map
                .iter()
                .map(|(k, v)| {
                    let mut r = resolve_value(v, ctx);
                    errors.append(&mut r.errors);
                    (k.clone(), r.value)
                })
                .collect();
            Resolution {
                value: Value::Object(resolved),
                errors,
            }
        }
        other => Resolution::ok(other.clone()),
    }
}

/// Resolve references inside a string
///
/// Type preservation: a string that is exactly one reference resolves to
/// the referenced value unchanged; anything else produces a string with
/// every reference stringified (non-primitives JSON-serialized, null as
/// the empty string).
pub fn resolve_string(input: &str, ctx: &ExecutionContext) -> Resolution {
    let spans = find_references(input);
    if spans.is_empty() {
        return Resolution::ok(Value::String(input.to_string()));
    }

    // Whole-string single reference keeps the original type
    if spans.len() == 1 && spans[0].start == 0 && spans[0].end == input.len() {
        return match lookup(&spans[0].expr, ctx) {
            Ok(value) => Resolution::ok(value),
            Err(e) => Resolution {
                value: Value::String(input.to_string()),
                errors: vec![e],
            },
        };
    }

    let mut errors = Vec::new();
    let mut out = String::with_capacity(input.len());
    let mut cursor = 0;

    for span in &spans {
        out.push_str(&input[cursor..span.start]);
        match lookup(&span.expr, ctx) {
            Ok(value) => out.push_str(&stringify(&value)),
            Err(e) => {
                // Leave the unresolved reference visible in the output
                out.push_str(&input[span.start..span.end]);
                errors.push(e);
            }
        }
        cursor = span.end;
    }
    out.push_str(&input[cursor..]);

    Resolution {
        value: Value::String(out),
        errors,
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Resolve a single dotted reference against the context
pub fn lookup(expr: &str, ctx: &ExecutionContext) -> Result<Value, String> {
    let segments: Vec<&str> = expr.split('.').collect();
    if segments.len() < 2 {
        return Err(format!("invalid reference '${{{}}}'", expr));
    }

    match segments[0] {
        "workflow" => {
            if segments[1] != "inputs" || segments.len() < 3 {
                return Err(format!(
                    "invalid workflow reference '${{{}}}': expected workflow.inputs.<name>",
                    expr
                ));
            }
            let name = segments[2];
            let root = ctx
                .workflow_inputs
                .get(name)
                .cloned()
                .ok_or_else(|| format!("undefined workflow input '{}'", name))?;
            traverse(root, &segments[3..], expr)
        }
        "steps" => {
            if segments.len() < 4 || segments[2] != "outputs" {
                return Err(format!(
                    "invalid step reference '${{{}}}': expected steps.<id>.outputs.<name>",
                    expr
                ));
            }
            let step_id = segments[1];
            let root = ctx
                .step_outputs
                .get(step_id)
                .cloned()
                .ok_or_else(|| format!("no outputs recorded for step '{}'", step_id))?;
            traverse(root, &segments[3..], expr)
        }
        "loop" => {
            let scope = ctx
                .loop_context
                .as_ref()
                .ok_or_else(|| format!("'${{{}}}' used outside a loop", expr))?;
            let root = match segments[1] {
                "item" => scope.item.clone(),
                "index" => Value::from(scope.index),
                "key" => scope
                    .key
                    .as_ref()
                    .map(|k| Value::String(k.clone()))
                    .ok_or_else(|| "loop.key is only available when iterating an object".to_string())?,
                "value" => scope
                    .value
                    .clone()
                    .ok_or_else(|| "loop.value is only available when iterating an object".to_string())?,
                other => return Err(format!("unknown loop field '{}'", other)),
            };
            traverse(root, &segments[2..], expr)
        }
        "env" => {
            if segments.len() != 2 {
                return Err(format!(
                    "invalid env reference '${{{}}}': env takes a single name",
                    expr
                ));
            }
            let name = segments[1];
            ctx.env
                .get(name)
                .map(|v| Value::String(v.clone()))
                .ok_or_else(|| format!("environment variable '{}' is not set", name))
        }
        other => Err(format!("unknown reference scope '{}'", other)),
    }
}

/// Walk the remaining path segments into a value
fn traverse(mut current: Value, segments: &[&str], expr: &str) -> Result<Value, String> {
    for segment in segments {
        current = match &current {
            Value::Object(map) => map
                .get(*segment)
                .cloned()
                .ok_or_else(|| format!("'{}' has no field '{}'", expr, segment))?,
            Value::Array(items) => {
                let idx: usize = segment
                    .parse()
                    .map_err(|_| format!("'{}' is an array; '{}' is not an index", expr, segment))?;
                items
                    .get(idx)
                    .cloned()
                    .ok_or_else(|| format!("'{}' index {} out of bounds", expr, idx))?
            }
            _ => {
                return Err(format!(
                    "'{}' cannot descend into '{}': not a container",
                    expr, segment
                ))
            }
        };
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::LoopContext;
    use serde_json::json;
    use std::collections::HashMap;

    fn ctx() -> ExecutionContext {
        let mut workflow_inputs = HashMap::new();
        workflow_inputs.insert("name".to_string(), json!("ada"));
        workflow_inputs.insert("count".to_string(), json!(3));
        workflow_inputs.insert("flags".to_string(), json!({"dry_run": true}));

        let mut step_outputs = HashMap::new();
        step_outputs.insert("fetch".to_string(), json!({"rows": 42, "items": ["a", "b"]}));

        let mut env = HashMap::new();
        env.insert("HOME_REGION".to_string(), "eu-west-1".to_string());

        ExecutionContext {
            workflow_inputs,
            step_outputs,
            loop_context: None,
            env,
        }
    }

    #[test]
    fn test_find_references_balanced() {
        let spans = find_references("a ${x.y} b ${p.q} c");
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].expr, "x.y");
        assert_eq!(spans[1].expr, "p.q");
    }

    #[test]
    fn test_find_references_nested_braces() {
        let spans = find_references("${steps.a.outputs.m{x}} tail");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].expr, "steps.a.outputs.m{x}");
    }

    #[test]
    fn test_unbalanced_is_left_alone() {
        assert!(find_references("${never closed").is_empty());
    }

    #[test]
    fn test_type_preservation_whole_reference() {
        let r = resolve_string("${workflow.inputs.count}", &ctx());
        assert!(r.is_ok());
        assert_eq!(r.value, json!(3));

        let r = resolve_string("${workflow.inputs.flags}", &ctx());
        assert_eq!(r.value, json!({"dry_run": true}));
    }

    #[test]
    fn test_interpolation_stringifies() {
        let r = resolve_string("count=${workflow.inputs.count}!", &ctx());
        assert!(r.is_ok());
        assert_eq!(r.value, json!("count=3!"));

        let r = resolve_string("flags=${workflow.inputs.flags}", &ctx());
        assert_eq!(r.value, json!("flags={\"dry_run\":true}"));
    }

    #[test]
    fn test_step_output_path() {
        let r = resolve_string("${steps.fetch.outputs.rows}", &ctx());
        assert_eq!(r.value, json!(42));

        let r = resolve_string("${steps.fetch.outputs.items.1}", &ctx());
        assert_eq!(r.value, json!("b"));
    }

    #[test]
    fn test_undefined_references_aggregate_errors() {
        let r = resolve_string("${workflow.inputs.nope} and ${steps.ghost.outputs.x}", &ctx());
        assert_eq!(r.errors.len(), 2);
        assert!(r.errors[0].contains("nope"));
        assert!(r.errors[1].contains("ghost"));
    }

    #[test]
    fn test_loop_scope() {
        let base = ctx();
        let looped = base.for_iteration(LoopContext {
            item: json!("alpha"),
            index: 2,
            key: None,
            value: None,
        });

        assert_eq!(resolve_string("${loop.item}", &looped).value, json!("alpha"));
        assert_eq!(resolve_string("${loop.index}", &looped).value, json!(2));

        let outside = resolve_string("${loop.item}", &base);
        assert_eq!(outside.errors.len(), 1);
        assert!(outside.errors[0].contains("outside a loop"));
    }

    #[test]
    fn test_env_scope() {
        let r = resolve_string("${env.HOME_REGION}", &ctx());
        assert_eq!(r.value, json!("eu-west-1"));

        let r = resolve_string("${env.MISSING_VAR_XYZ}", &ctx());
        assert_eq!(r.errors.len(), 1);

        let r = resolve_string("${env.A.B}", &ctx());
        assert!(r.errors[0].contains("single name"));
    }

    #[test]
    fn test_resolve_value_recurses() {
        let input = json!({
            "region": "${env.HOME_REGION}",
            "nested": ["${workflow.inputs.name}", {"n": "${workflow.inputs.count}"}]
        });
        let r = resolve_value(&input, &ctx());
        assert!(r.is_ok());
        assert_eq!(
            r.value,
            json!({"region": "eu-west-1", "nested": ["ada", {"n": 3}]})
        );
    }

    #[test]
    fn test_idempotent_without_references() {
        let input = json!({"plain": [1, 2, {"x": "no refs"}]});
        let once = resolve_value(&input, &ctx());
        let twice = resolve_value(&once.value, &ctx());
        assert_eq!(once.value, input);
        assert_eq!(twice.value, input);
    }

    #[test]
    fn test_null_stringifies_empty() {
        let mut c = ctx();
        c.workflow_inputs.insert("nothing".to_string(), Value::Null);
        let r = resolve_string("x=${workflow.inputs.nothing}.", &c);
        assert_eq!(r.value, json!("x=."));
    }
}
