use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const VALID: &str = r#"
workflow:
  name: demo
  version: 1.0.0
  description: demo flow
steps:
  - id: hello
    type: output
    message: "hello"
  - id: after
    type: output
    depends_on: [hello]
    message: "after ${steps.hello.outputs.message}"
"#;

const INVALID: &str = r#"
workflow:
  name: demo
  version: not-semver
  description: demo flow
steps:
  - id: s
    type: python
"#;

fn write_flow(dir: &TempDir, contents: &str) -> String {
    let path = dir.path().join("flow.yaml");
    fs::write(&path, contents).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn validate_accepts_valid_workflow() {
    let dir = TempDir::new().unwrap();
    let file = write_flow(&dir, VALID);

    Command::cargo_bin("forgectl")
        .unwrap()
        .args(["validate", "-f", &file])
        .assert()
        .success()
        .stdout(predicate::str::contains("valid"));
}

#[test]
fn validate_rejects_invalid_workflow() {
    let dir = TempDir::new().unwrap();
    let file = write_flow(&dir, INVALID);

    Command::cargo_bin("forgectl")
        .unwrap()
        .args(["validate", "-f", &file])
        .assert()
        .failure()
        .stdout(predicate::str::contains("major.minor.patch"))
        .stdout(predicate::str::contains("requires 'script'"));
}

#[test]
fn graph_prints_levels() {
    let dir = TempDir::new().unwrap();
    let file = write_flow(&dir, VALID);

    Command::cargo_bin("forgectl")
        .unwrap()
        .args(["graph", "-f", &file])
        .assert()
        .success()
        .stdout(predicate::str::contains("level 0: hello"))
        .stdout(predicate::str::contains("level 1: after"));
}

#[test]
fn run_executes_output_workflow() {
    let dir = TempDir::new().unwrap();
    let file = write_flow(&dir, VALID);

    Command::cargo_bin("forgectl")
        .unwrap()
        .args(["run", "-f", &file, "--output", "json"])
        .current_dir(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"success\": true"))
        .stdout(predicate::str::contains("after hello"));
}

#[test]
fn run_reports_missing_required_input() {
    let dir = TempDir::new().unwrap();
    let file = write_flow(
        &dir,
        r#"
workflow:
  name: strict
  version: 1.0.0
  description: requires a region
inputs:
  - id: region
    type: string
    label: Region
    required: true
steps:
  - id: say
    type: output
    message: "${workflow.inputs.region}"
"#,
    );

    Command::cargo_bin("forgectl")
        .unwrap()
        .args(["run", "-f", &file])
        .current_dir(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("required input 'region'"));
}

#[test]
fn version_prints_crate_versions() {
    Command::cargo_bin("forgectl")
        .unwrap()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("forgectl"))
        .stdout(predicate::str::contains("flowforge-core"));
}
