// src/dag/graph.rs

use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::dag::task_info::Task;
use crate::errors::{Result, WorkdagError};
use crate::types::TaskId;

/// Dependency graph keyed by task id.
///
/// Edge direction is `dependency -> dependent`: for a task `B` that depends
/// on `A` there is an edge `A -> B`. The graph only answers eligibility
/// questions; ordering among eligible tasks is the scheduler's business.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<TaskId, ()>,
    index: HashMap<TaskId, NodeIndex>,
}

impl DependencyGraph {
    /// Build a graph from task records.
    ///
    /// Rejects unknown and self dependencies. Cycles are *not* rejected here;
    /// call [`DependencyGraph::detect_cycle`] before scheduling.
    pub fn from_tasks<'a, I>(tasks: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a Task>,
    {
        let tasks: Vec<&Task> = tasks.into_iter().collect();
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for task in &tasks {
            if index.contains_key(&task.id) {
                return Err(WorkdagError::ConfigError(format!(
                    "duplicate task id '{}'",
                    task.id
                )));
            }
            let node = graph.add_node(task.id.clone());
            index.insert(task.id.clone(), node);
        }

        for task in &tasks {
            let to = index[&task.id];
            for dep in &task.dependencies {
                if dep == &task.id {
                    return Err(WorkdagError::ConfigError(format!(
                        "task '{}' cannot depend on itself",
                        task.id
                    )));
                }
                let from = index.get(dep).copied().ok_or_else(|| {
                    WorkdagError::ConfigError(format!(
                        "task '{}' has unknown dependency '{}'",
                        task.id, dep
                    ))
                })?;
                graph.add_edge(from, to, ());
            }
        }

        Ok(Self { graph, index })
    }

    /// All task ids, sorted.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        let mut ids: Vec<&str> = self.index.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids.into_iter()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Direct dependencies of a task, sorted.
    pub fn dependencies_of(&self, id: &str) -> Vec<TaskId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Direct dependents of a task, sorted.
    pub fn dependents_of(&self, id: &str) -> Vec<TaskId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Tasks whose dependencies are all in `completed` and which are in
    /// neither `completed` nor `blocked`.
    pub fn ready_set(
        &self,
        completed: &BTreeSet<TaskId>,
        blocked: &BTreeSet<TaskId>,
    ) -> BTreeSet<TaskId> {
        self.index
            .iter()
            .filter(|(id, _)| !completed.contains(*id) && !blocked.contains(*id))
            .filter(|(_, node)| {
                self.graph
                    .neighbors_directed(**node, Direction::Incoming)
                    .all(|dep| completed.contains(&self.graph[dep]))
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Every task that depends on `id`, directly or transitively.
    pub fn transitive_dependents(&self, id: &str) -> BTreeSet<TaskId> {
        let mut out = BTreeSet::new();
        let Some(&start) = self.index.get(id) else {
            return out;
        };

        let mut stack = vec![start];
        let mut visited = HashSet::new();
        while let Some(node) = stack.pop() {
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if visited.insert(next) {
                    out.insert(self.graph[next].clone());
                    stack.push(next);
                }
            }
        }
        out
    }

    /// Find a dependency cycle, if any.
    ///
    /// Depth-first search with an explicit recursion stack; when an edge
    /// reaches a node already on the stack, the stack suffix starting at that
    /// node is the cycle. Roots are visited in sorted id order so the reported
    /// path is deterministic.
    pub fn detect_cycle(&self) -> Option<Vec<TaskId>> {
        let mut roots: Vec<NodeIndex> = self.index.values().copied().collect();
        roots.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));

        let mut done: HashSet<NodeIndex> = HashSet::new();

        for root in roots {
            if done.contains(&root) {
                continue;
            }

            // (node, sorted successors, next successor position)
            let mut frames: Vec<(NodeIndex, Vec<NodeIndex>, usize)> =
                vec![(root, self.successors_sorted(root), 0)];
            let mut path: Vec<NodeIndex> = vec![root];
            let mut on_path: HashSet<NodeIndex> = HashSet::from([root]);

            while let Some(frame) = frames.last_mut() {
                let (node, successors, pos) = frame;
                if *pos < successors.len() {
                    let next = successors[*pos];
                    *pos += 1;

                    if on_path.contains(&next) {
                        let start = path.iter().position(|n| *n == next).unwrap_or(0);
                        return Some(
                            path[start..]
                                .iter()
                                .map(|n| self.graph[*n].clone())
                                .collect(),
                        );
                    }
                    if !done.contains(&next) {
                        path.push(next);
                        on_path.insert(next);
                        frames.push((next, self.successors_sorted(next), 0));
                    }
                } else {
                    let finished = *node;
                    frames.pop();
                    path.pop();
                    on_path.remove(&finished);
                    done.insert(finished);
                }
            }
        }

        None
    }

    /// Topological order (dependencies first), or `None` for a cyclic graph.
    pub fn topological_order(&self) -> Option<Vec<TaskId>> {
        toposort(&self.graph, None)
            .ok()
            .map(|order| order.into_iter().map(|n| self.graph[n].clone()).collect())
    }

    fn successors_sorted(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut next: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .collect();
        next.sort_by(|a, b| self.graph[*a].cmp(&self.graph[*b]));
        next.dedup();
        next
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<TaskId> {
        let Some(&node) = self.index.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<TaskId> = self
            .graph
            .neighbors_directed(node, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }
}
