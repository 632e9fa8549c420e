//! Agent dependency graph.
//!
//! Stores agent-to-agent dependency edges, produces a topological
//! execution order, detects cycles, and assigns each agent a level so
//! that same-level agents can run concurrently. The graph never executes
//! anything; it only answers ordering and reachability questions.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use glob::Pattern;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::PlanGroup;

/// Agent name → glob patterns over changed input paths.
///
/// Supplied by the embedding application at graph construction; this is
/// how changed inputs translate into affected agents.
pub type WatchTable = HashMap<String, Vec<String>>;

/// Structural errors from ordering the graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("circular dependency detected involving agent '{agent}'")]
    CircularDependency { agent: String },
}

/// One node in the dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyNode {
    /// Agent name
    pub name: String,

    /// Names this node requires
    pub dependencies: BTreeSet<String>,

    /// Reverse edges, maintained alongside `dependencies`
    pub dependents: BTreeSet<String>,

    /// 1 for roots, else 1 + max level of dependencies
    pub level: u32,
}

impl DependencyNode {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: BTreeSet::new(),
            dependents: BTreeSet::new(),
            level: 1,
        }
    }
}

/// Dependency edges and level assignments for all known agents.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, DependencyNode>,
    watch: WatchTable,
}

impl DependencyGraph {
    /// Create an empty graph with no watch table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a graph with an affected-agent mapping table.
    pub fn with_watch_table(watch: WatchTable) -> Self {
        Self {
            nodes: BTreeMap::new(),
            watch,
        }
    }

    /// Create or update the node for `name`, replacing its dependency
    /// list. Referenced dependencies that do not exist yet are created as
    /// placeholder nodes with no dependencies of their own.
    pub fn add_agent<S: AsRef<str>>(&mut self, name: &str, dependencies: &[S]) {
        let new_deps: BTreeSet<String> = dependencies
            .iter()
            .map(|d| d.as_ref().to_string())
            .collect();

        // Drop reverse edges for dependencies no longer declared.
        let old_deps = self
            .nodes
            .get(name)
            .map(|n| n.dependencies.clone())
            .unwrap_or_default();
        for removed in old_deps.difference(&new_deps) {
            if let Some(dep) = self.nodes.get_mut(removed) {
                dep.dependents.remove(name);
            }
        }

        for dep_name in &new_deps {
            let dep = self
                .nodes
                .entry(dep_name.clone())
                .or_insert_with(|| DependencyNode::new(dep_name.clone()));
            dep.dependents.insert(name.to_string());
        }

        let node = self
            .nodes
            .entry(name.to_string())
            .or_insert_with(|| DependencyNode::new(name));
        node.dependencies = new_deps;

        debug!(agent = name, "Dependency edges updated");
    }

    /// Number of known nodes, placeholders included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All known agent names, sorted.
    pub fn agent_names(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    /// Look up a node.
    pub fn node(&self, name: &str) -> Option<&DependencyNode> {
        self.nodes.get(name)
    }

    /// Direct dependencies; empty for unknown names.
    pub fn dependencies(&self, name: &str) -> Vec<String> {
        self.nodes
            .get(name)
            .map(|n| n.dependencies.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Direct dependents; empty for unknown names.
    pub fn dependents(&self, name: &str) -> Vec<String> {
        self.nodes
            .get(name)
            .map(|n| n.dependents.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Depth-first topological sort over all nodes.
    ///
    /// Every agent appears after all of its dependencies. A cycle fails
    /// immediately, naming the agent found on the DFS stack. On success,
    /// level assignments are recomputed on the nodes as a side effect.
    pub fn build_execution_order(&mut self) -> Result<Vec<String>, GraphError> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut visited = HashSet::new();
        let mut visiting = HashSet::new();

        let names: Vec<String> = self.nodes.keys().cloned().collect();
        for name in &names {
            self.visit(name, &mut visited, &mut visiting, &mut order)?;
        }

        self.relax_levels();
        Ok(order)
    }

    fn visit(
        &self,
        name: &str,
        visited: &mut HashSet<String>,
        visiting: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) -> Result<(), GraphError> {
        if visited.contains(name) {
            return Ok(());
        }
        if visiting.contains(name) {
            return Err(GraphError::CircularDependency {
                agent: name.to_string(),
            });
        }

        visiting.insert(name.to_string());

        if let Some(node) = self.nodes.get(name) {
            let deps: Vec<String> = node.dependencies.iter().cloned().collect();
            for dep in deps {
                self.visit(&dep, visited, visiting, order)?;
            }
        }

        visiting.remove(name);
        visited.insert(name.to_string());
        order.push(name.to_string());
        Ok(())
    }

    /// Iterative relaxation to the level fixpoint.
    ///
    /// Edges may be added incrementally and out of order, so levels are
    /// re-derived until stable rather than computed once. The pass count
    /// is bounded by the node count to guarantee termination.
    fn relax_levels(&mut self) {
        let names: Vec<String> = self.nodes.keys().cloned().collect();

        for _ in 0..self.nodes.len().max(1) {
            let mut changed = false;

            for name in &names {
                let computed = {
                    let node = &self.nodes[name];
                    node.dependencies
                        .iter()
                        .filter_map(|d| self.nodes.get(d))
                        .map(|d| d.level)
                        .max()
                        .map_or(1, |max| max + 1)
                };

                let node = self
                    .nodes
                    .get_mut(name)
                    .filter(|n| n.level != computed);
                if let Some(node) = node {
                    node.level = computed;
                    changed = true;
                }
            }

            if !changed {
                break;
            }
        }
    }

    /// All nodes grouped by level, ascending.
    ///
    /// Agents within one group have no path between them in either
    /// direction; agents in group k+1 may depend on agents in any group
    /// at or below k.
    pub fn parallel_groups(&mut self) -> Result<Vec<PlanGroup>, GraphError> {
        self.build_execution_order()?;

        let mut by_level: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        for node in self.nodes.values() {
            by_level.entry(node.level).or_default().push(node.name.clone());
        }

        Ok(by_level
            .into_iter()
            .map(|(level, agents)| PlanGroup { level, agents })
            .collect())
    }

    /// Whether ordering the graph would fail on a cycle.
    ///
    /// A predicate, not a command: the cycle error is swallowed.
    pub fn has_circular_dependencies(&mut self) -> bool {
        self.build_execution_order().is_err()
    }

    /// Map changed input paths to the set of affected agents.
    ///
    /// An agent whose watch patterns match at least one changed input is
    /// affected, and affected status propagates transitively to all of
    /// its dependents. Returns the de-duplicated union, sorted.
    pub fn affected_agents<S: AsRef<str>>(&self, changed_inputs: &[S]) -> Vec<String> {
        let mut affected = BTreeSet::new();
        let mut queue = VecDeque::new();

        for (agent, patterns) in &self.watch {
            if self.matches_any(patterns, changed_inputs) {
                queue.push_back(agent.clone());
            }
        }

        while let Some(name) = queue.pop_front() {
            if !affected.insert(name.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(&name) {
                for dependent in &node.dependents {
                    queue.push_back(dependent.clone());
                }
            }
        }

        affected.into_iter().collect()
    }

    fn matches_any<S: AsRef<str>>(&self, patterns: &[String], inputs: &[S]) -> bool {
        for pattern_str in patterns {
            let Ok(pattern) = Pattern::new(pattern_str) else {
                warn!(pattern = %pattern_str, "Skipping unparsable watch pattern");
                continue;
            };
            if inputs.iter().any(|i| pattern.matches(i.as_ref())) {
                return true;
            }
        }
        false
    }
}
