use anyhow::Context;
use colored::Colorize;
use flowforge_core::{parse_workflow_file, validate, Severity};

/// Validate a workflow file and print every finding with its field locator
pub async fn execute(file: &str) -> anyhow::Result<()> {
    let workflow =
        parse_workflow_file(file).with_context(|| format!("failed to load {}", file))?;

    let report = validate(&workflow);
    let errors = report.iter().filter(|e| e.is_error()).count();
    let warnings = report.len() - errors;

    for finding in &report {
        let tag = match finding.severity {
            Severity::Error => "error".red().bold(),
            Severity::Warning => "warning".yellow().bold(),
        };
        println!("{}: {}: {}", tag, finding.field.bold(), finding.message);
    }

    if errors > 0 {
        println!(
            "\n{} {} error(s), {} warning(s)",
            "invalid:".red().bold(),
            errors,
            warnings
        );
        anyhow::bail!("workflow '{}' is invalid", workflow.name());
    }

    println!(
        "{} {} ({} warning(s))",
        "valid:".green().bold(),
        workflow.name(),
        warnings
    );
    Ok(())
}
