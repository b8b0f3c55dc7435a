// Flowforge Core - YAML document parsing
//
// Safe deserialization of workflow documents. Documents above the size cap
// are refused before parsing, and constructor tags that would deserialize
// into language-native callables (`!!python/object`, `!!js/function`, ...)
// are rejected by a pre-scan. Parse errors carry the offending field path
// via serde_path_to_error plus line/column when the YAML library provides
// them.

use crate::error::{ForgeError, ForgeResult};
use crate::workflow::Workflow;
use std::path::Path;
use tracing::debug;

/// Default maximum document size: 1 MiB
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 1024 * 1024;

/// Plain data tags that are always acceptable
const ALLOWED_TAGS: &[&str] = &[
    "!!str", "!!int", "!!float", "!!bool", "!!null", "!!seq", "!!map", "!!set", "!!binary",
    "!!timestamp", "!!omap", "!!pairs",
];

/// Parse a workflow document with the default size cap
pub fn parse_workflow(content: &str) -> ForgeResult<Workflow> {
    parse_workflow_with_limit(content, DEFAULT_MAX_DOCUMENT_BYTES)
}

/// Parse a workflow document, refusing documents above `max_bytes`
pub fn parse_workflow_with_limit(content: &str, max_bytes: usize) -> ForgeResult<Workflow> {
    if content.len() > max_bytes {
        return Err(ForgeError::Parse(format!(
            "document size {} bytes exceeds the {} byte limit",
            content.len(),
            max_bytes
        )));
    }

    reject_dangerous_tags(content)?;

    let deserializer = serde_yaml::Deserializer::from_str(content);
    let result: Result<Workflow, _> = serde_path_to_error::deserialize(deserializer);

    match result {
        Ok(workflow) => {
            debug!(
                workflow = workflow.name(),
                steps = workflow.steps.len(),
                "parsed workflow document"
            );
            Ok(workflow)
        }
        Err(e) => {
            let path = e.path().to_string();
            let inner = e.inner();

            let mut msg = inner.to_string();
            if !path.is_empty() && path != "." {
                msg = format!("{} (field: {})", msg, path);
            }
            if let Some(location) = inner.location() {
                msg = format!("{} at line {}, column {}", msg, location.line(), location.column());
            }
            Err(ForgeError::Parse(msg))
        }
    }
}

/// Load and parse a workflow file
pub fn parse_workflow_file(path: impl AsRef<Path>) -> ForgeResult<Workflow> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        ForgeError::Parse(format!("failed to read {}: {}", path.display(), e))
    })?;
    parse_workflow(&content)
}

/// Serialize a workflow back to YAML
///
/// Round-trip law: `parse(serialize(parse(y)))` is deep-equal to `parse(y)`.
/// Comments are not preserved.
pub fn serialize_workflow(workflow: &Workflow) -> ForgeResult<String> {
    serde_yaml::to_string(workflow)
        .map_err(|e| ForgeError::Parse(format!("serialization failed: {}", e)))
}

/// Refuse constructor tags of the form `!!<lang>/<construct>`
///
/// serde_yaml never constructs host objects, but a document carrying such
/// tags is hostile by intent and is refused outright rather than silently
/// degraded.
fn reject_dangerous_tags(content: &str) -> ForgeResult<()> {
    for (line_no, line) in content.lines().enumerate() {
        let mut rest = line;
        while let Some(pos) = rest.find("!!") {
            let tag_body = &rest[pos..];
            let tag: String = tag_body
                .chars()
                .take_while(|c| !c.is_whitespace())
                .collect();
            // Constructor tags carry a "<lang>/<construct>" suffix; plain
            // data tags do not
            if tag.contains('/') && !ALLOWED_TAGS.contains(&tag.as_str()) {
                return Err(ForgeError::Parse(format!(
                    "dangerous constructor tag '{}' at line {}",
                    tag,
                    line_no + 1
                )));
            }
            rest = &rest[pos + 2..];
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
workflow:
  name: demo
  version: 0.1.0
  description: demo flow
steps:
  - id: hello
    type: output
    message: "hi"
"#;

    #[test]
    fn test_parse_valid_document() {
        let wf = parse_workflow(VALID).unwrap();
        assert_eq!(wf.name(), "demo");
        assert_eq!(wf.steps.len(), 1);
    }

    #[test]
    fn test_size_limit() {
        let padding = " ".repeat(64);
        let err = parse_workflow_with_limit(&padding, 16).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn test_dangerous_tag_rejected() {
        let yaml = r#"
workflow:
  name: !!python/object:os.system demo
  version: 0.1.0
  description: demo
steps: []
"#;
        let err = parse_workflow(yaml).unwrap_err();
        assert!(err.to_string().contains("dangerous constructor tag"));
    }

    #[test]
    fn test_plain_tags_allowed() {
        let yaml = r#"
workflow:
  name: !!str demo
  version: 0.1.0
  description: demo
steps:
  - id: a
    type: output
    message: hi
"#;
        assert!(parse_workflow(yaml).is_ok());
    }

    #[test]
    fn test_parse_error_reports_field() {
        let yaml = r#"
workflow:
  name: demo
  version: 0.1.0
  description: demo
steps:
  - id: broken
    type: nonsense
"#;
        let err = parse_workflow(yaml).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("steps"), "missing field path in: {}", msg);
    }

    #[test]
    fn test_round_trip_is_semantically_stable() {
        let first = parse_workflow(VALID).unwrap();
        let serialized = serialize_workflow(&first).unwrap();
        let second = parse_workflow(&serialized).unwrap();

        let a = serde_json::to_value(&first).unwrap();
        let b = serde_json::to_value(&second).unwrap();
        assert_eq!(a, b);
    }
}
