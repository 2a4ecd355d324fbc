use crate::substitute::parameter_references;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};
use taskmesh_core::{SubtaskSpec, TaskmeshError, TaskmeshResult};
use tracing::debug;

/// A validated dependency graph over a project's subtasks.
///
/// Node `i` is the `i`-th subtask of the decomposition. Every edge
/// `(producer, consumer)` has `producer < consumer`.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    nodes: Vec<SubtaskSpec>,
    edges: BTreeSet<(usize, usize)>,
    order: Vec<usize>,
}

impl TaskGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> Option<&SubtaskSpec> {
        self.nodes.get(index)
    }

    pub fn nodes(&self) -> &[SubtaskSpec] {
        &self.nodes
    }

    /// All `(producer, consumer)` edges in ascending order.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.edges.iter().copied()
    }

    /// Producers whose results `index` consumes.
    pub fn dependencies_of(&self, index: usize) -> Vec<usize> {
        self.edges
            .iter()
            .filter(|(_, c)| *c == index)
            .map(|(p, _)| *p)
            .collect()
    }

    /// Consumers of `index`'s result.
    pub fn dependents_of(&self, index: usize) -> Vec<usize> {
        self.edges
            .range((index, 0)..=(index, usize::MAX))
            .map(|(_, c)| *c)
            .collect()
    }

    /// Topological order; independent nodes in ascending index order.
    pub fn execution_order(&self) -> &[usize] {
        &self.order
    }
}

/// Builds a [`TaskGraph`] from an ordered subtask list.
pub struct TaskGraphBuilder;

impl TaskGraphBuilder {
    /// Derive edges from `<output_of_task_N>` markers and validate them.
    ///
    /// Fails on the first reference to a task that is not strictly earlier.
    pub fn build(subtasks: Vec<SubtaskSpec>) -> TaskmeshResult<TaskGraph> {
        let mut edges = BTreeSet::new();
        for (index, subtask) in subtasks.iter().enumerate() {
            for producer in parameter_references(&subtask.task_parameters) {
                if producer >= index {
                    return Err(TaskmeshError::InvalidDependency {
                        task: index,
                        references: producer,
                    });
                }
                edges.insert((producer, index));
            }
        }

        let order = topological_order(subtasks.len(), &edges)?;
        debug!(
            nodes = subtasks.len(),
            edges = edges.len(),
            "Task graph validated"
        );

        Ok(TaskGraph {
            nodes: subtasks,
            edges,
            order,
        })
    }
}

/// Kahn's algorithm with a min-heap so ready nodes come out by ascending index.
fn topological_order(
    node_count: usize,
    edges: &BTreeSet<(usize, usize)>,
) -> TaskmeshResult<Vec<usize>> {
    let mut in_degree = vec![0usize; node_count];
    let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); node_count];
    for &(producer, consumer) in edges {
        if producer >= node_count || consumer >= node_count {
            continue;
        }
        in_degree[consumer] += 1;
        outgoing[producer].push(consumer);
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(node_count);
    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for &next in &outgoing[node] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() < node_count {
        let remaining = (0..node_count).filter(|i| in_degree[*i] > 0).collect();
        return Err(TaskmeshError::CircularDependency { remaining });
    }
    Ok(order)
}
