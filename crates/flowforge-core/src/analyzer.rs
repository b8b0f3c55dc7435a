// Flowforge Core - Dependency analysis
//
// Turns the step list into an ordered list of execution levels. The DAG is
// an arena: steps stay in their vector, the graph is adjacency over
// indices. Levels are peeled by repeated zero-in-degree extraction; any
// step left unemitted means a cycle.

use crate::error::{ForgeError, ForgeResult};
use crate::workflow::Step;
use std::collections::HashMap;

/// Level ordering for one workflow
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Step indices grouped by level; every dependency of a step lies in an
    /// earlier level
    pub levels: Vec<Vec<usize>>,

    /// Size of the widest level
    pub max_parallelism: usize,
}

impl ExecutionPlan {
    /// Whether any level holds more than one step
    pub fn can_parallelize(&self) -> bool {
        self.max_parallelism > 1
    }

    /// Level number a step index was assigned to
    pub fn level_of(&self, step_index: usize) -> Option<usize> {
        self.levels
            .iter()
            .position(|level| level.contains(&step_index))
    }
}

/// Compute execution levels for the given steps
///
/// Dependencies on unknown step ids are a configuration error; cycles are
/// reported as `ForgeError::Cycle`.
pub fn analyze(steps: &[Step]) -> ForgeResult<ExecutionPlan> {
    let index_of: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; steps.len()];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];

    for (i, step) in steps.iter().enumerate() {
        for dep in &step.depends_on {
            let dep_idx = *index_of.get(dep.as_str()).ok_or_else(|| {
                ForgeError::Config(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.id, dep
                ))
            })?;
            successors[dep_idx].push(i);
            in_degree[i] += 1;
        }
    }

    let mut levels = Vec::new();
    let mut emitted = 0usize;
    let mut current: Vec<usize> = (0..steps.len()).filter(|&i| in_degree[i] == 0).collect();

    while !current.is_empty() {
        emitted += current.len();
        let mut next = Vec::new();
        for &idx in &current {
            for &succ in &successors[idx] {
                in_degree[succ] -= 1;
                if in_degree[succ] == 0 {
                    next.push(succ);
                }
            }
        }
        levels.push(std::mem::replace(&mut current, next));
    }

    if emitted != steps.len() {
        let stuck: Vec<&str> = (0..steps.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| steps[i].id.as_str())
            .collect();
        return Err(ForgeError::Cycle(format!(
            "steps {} form a dependency cycle",
            stuck.join(", ")
        )));
    }

    let max_parallelism = levels.iter().map(Vec::len).max().unwrap_or(0);

    Ok(ExecutionPlan {
        levels,
        max_parallelism,
    })
}

/// Indices of steps with no dependencies
pub fn independent_steps(steps: &[Step]) -> Vec<usize> {
    steps
        .iter()
        .enumerate()
        .filter(|(_, s)| s.depends_on.is_empty())
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_workflow;

    fn steps_from(yaml: &str) -> Vec<Step> {
        parse_workflow(yaml).unwrap().steps
    }

    #[test]
    fn test_diamond_levels() {
        let steps = steps_from(
            r#"
steps:
  - id: start
    type: output
    message: s
  - id: a
    type: output
    message: a
    depends_on: [start]
  - id: b
    type: output
    message: b
    depends_on: [start]
  - id: merge
    type: output
    message: m
    depends_on: [a, b]
"#,
        );

        let plan = analyze(&steps).unwrap();
        assert_eq!(plan.levels.len(), 3);
        assert_eq!(plan.max_parallelism, 2);
        assert!(plan.can_parallelize());
        assert_eq!(plan.levels[0], vec![0]);
        assert_eq!(plan.levels[1], vec![1, 2]);
        assert_eq!(plan.levels[2], vec![3]);
    }

    #[test]
    fn test_level_soundness() {
        let steps = steps_from(
            r#"
steps:
  - id: c
    type: output
    message: c
    depends_on: [b]
  - id: a
    type: output
    message: a
  - id: b
    type: output
    message: b
    depends_on: [a]
"#,
        );

        let plan = analyze(&steps).unwrap();
        for (i, step) in steps.iter().enumerate() {
            for dep in &step.depends_on {
                let dep_idx = steps.iter().position(|s| &s.id == dep).unwrap();
                assert!(plan.level_of(dep_idx).unwrap() < plan.level_of(i).unwrap());
            }
        }
    }

    #[test]
    fn test_cycle_detected() {
        let steps = steps_from(
            r#"
steps:
  - id: a
    type: output
    message: a
    depends_on: [b]
  - id: b
    type: output
    message: b
    depends_on: [a]
"#,
        );

        let err = analyze(&steps).unwrap_err();
        assert!(matches!(err, ForgeError::Cycle(_)));
        assert!(err.to_string().contains("a"));
    }

    #[test]
    fn test_unknown_dependency() {
        let steps = steps_from(
            r#"
steps:
  - id: a
    type: output
    message: a
    depends_on: [ghost]
"#,
        );

        assert!(matches!(analyze(&steps), Err(ForgeError::Config(_))));
    }

    #[test]
    fn test_independent_steps() {
        let steps = steps_from(
            r#"
steps:
  - id: a
    type: output
    message: a
  - id: b
    type: output
    message: b
  - id: c
    type: output
    message: c
    depends_on: [a]
"#,
        );

        assert_eq!(independent_steps(&steps), vec![0, 1]);
    }

    #[test]
    fn test_sequential_chain_has_no_parallelism() {
        let steps = steps_from(
            r#"
steps:
  - id: a
    type: output
    message: a
  - id: b
    type: output
    message: b
    depends_on: [a]
"#,
        );

        let plan = analyze(&steps).unwrap();
        assert!(!plan.can_parallelize());
        assert_eq!(plan.max_parallelism, 1);
    }
}
