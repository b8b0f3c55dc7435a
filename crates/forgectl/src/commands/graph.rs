use anyhow::Context;
use colored::Colorize;
use flowforge_core::{analyze, parse_workflow_file};

/// Print execution levels and the parallelism summary for a workflow
pub async fn execute(file: &str) -> anyhow::Result<()> {
    let workflow =
        parse_workflow_file(file).with_context(|| format!("failed to load {}", file))?;
    let plan = analyze(&workflow.steps).context("dependency analysis failed")?;

    println!("{} {}", "workflow:".bold(), workflow.name());
    for (level_no, level) in plan.levels.iter().enumerate() {
        let ids: Vec<&str> = level
            .iter()
            .map(|&idx| workflow.steps[idx].id.as_str())
            .collect();
        println!("  level {}: {}", level_no, ids.join(", "));
    }
    println!(
        "{} max parallelism {}, parallelizable: {}",
        "summary:".bold(),
        plan.max_parallelism,
        if plan.can_parallelize() { "yes" } else { "no" }
    );
    Ok(())
}
