//! Execution order: transitive closure of the goals, dependencies first.

use std::collections::{BTreeSet, HashMap};

use crate::error::EngineError;
use crate::target::Target;

/// DFS colouring: absent = unvisited, `Gray` = on the stack, `Black` = done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Gray,
    Black,
}

/// Resolve `goals` (indices into `targets`) into an execution order.
///
/// # Algorithm
/// 1. Three-colour DFS over every declared target, in insertion order, so a
///    cycle or unknown dependency anywhere rejects the whole configuration
///    (the cycle error names the full path).
/// 2. DFS from every goal to collect the transitive closure.
/// 3. Kahn's algorithm over the closure. The ready set is ordered by
///    insertion index, so independent targets run in declaration order and
///    the same goals always produce the same order.
///
/// # Errors
/// Returns an error for an unknown dependency name or a dependency cycle.
pub(crate) fn resolve_order(
    targets: &[Target],
    index: &HashMap<String, usize>,
    goals: &[usize],
) -> Result<Vec<usize>, EngineError> {
    let mut color: HashMap<usize, Color> = HashMap::new();
    let mut stack: Vec<usize> = Vec::new();
    for node in 0..targets.len() {
        dfs(node, targets, index, &mut color, &mut stack)?;
    }

    color.clear();
    for &goal in goals {
        dfs(goal, targets, index, &mut color, &mut stack)?;
    }

    // Edges restricted to the closure: in-degree per node, dependents per node.
    let mut in_degree: HashMap<usize, usize> = HashMap::new();
    let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
    for &node in color.keys() {
        let deps = dependency_indices(node, targets, index)?;
        in_degree.insert(node, deps.len());
        for dep in deps {
            dependents.entry(dep).or_default().push(node);
        }
    }

    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(node, _)| *node)
        .collect();
    let mut order = Vec::with_capacity(in_degree.len());

    while let Some(node) = ready.pop_first() {
        order.push(node);
        for dependent in dependents.get(&node).map_or(&[][..], Vec::as_slice) {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    Ok(order)
}

fn dfs(
    node: usize,
    targets: &[Target],
    index: &HashMap<String, usize>,
    color: &mut HashMap<usize, Color>,
    stack: &mut Vec<usize>,
) -> Result<(), EngineError> {
    match color.get(&node) {
        Some(Color::Black) => return Ok(()),
        Some(Color::Gray) => {
            let start = stack.iter().position(|n| *n == node).unwrap_or(0);
            let cycle = stack
                .get(start..)
                .unwrap_or(stack.as_slice())
                .iter()
                .chain(std::iter::once(&node))
                .map(|n| target_name(targets, *n))
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(EngineError::DependencyCycle { cycle });
        }
        None => {}
    }

    color.insert(node, Color::Gray);
    stack.push(node);

    for dep in dependency_indices(node, targets, index)? {
        dfs(dep, targets, index, color, stack)?;
    }

    color.insert(node, Color::Black);
    stack.pop();
    Ok(())
}

fn dependency_indices(
    node: usize,
    targets: &[Target],
    index: &HashMap<String, usize>,
) -> Result<Vec<usize>, EngineError> {
    let Some(target) = targets.get(node) else {
        return Ok(Vec::new());
    };
    target
        .dependencies()
        .iter()
        .map(|dep| {
            index
                .get(dep)
                .copied()
                .ok_or_else(|| EngineError::UnknownDependency {
                    target: target.name().to_owned(),
                    dependency: dep.clone(),
                })
        })
        .collect()
}

fn target_name(targets: &[Target], node: usize) -> &str {
    targets.get(node).map_or("?", Target::name)
}
