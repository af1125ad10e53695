use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::{debug, warn};

use agentflow_core::config::DagSpec;
use agentflow_core::error::GraphValidationError;

use super::condition;
use super::node::Node;

/// A validated, immutable dependency graph of workflow nodes.
///
/// Only `build` (and `from_spec`, which delegates to it) can produce one, so
/// holding a `WorkflowGraph` means every check below has passed:
///
/// 1. every referenced id exists, and mapping or condition sources are
///    declared dependencies;
/// 2. the dependency relation is acyclic;
/// 3. the entry point has no dependencies;
/// 4. the final node can be reached from the entry point, and no root other
///    than the entry point lies upstream of it.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    nodes: BTreeMap<String, Node>,
    entry_point: String,
    final_node: String,
    /// Kahn order, ties broken by id.
    order: Vec<String>,
    /// producer -> consumers, each list sorted.
    dependents: BTreeMap<String, Vec<String>>,
    /// Nodes that can activate in some run.
    runnable: BTreeSet<String>,
}

impl WorkflowGraph {
    pub fn build(
        nodes: Vec<Node>,
        entry_point: impl Into<String>,
        final_node: impl Into<String>,
    ) -> Result<Self, GraphValidationError> {
        let entry_point = entry_point.into();
        let final_node = final_node.into();

        if nodes.is_empty() {
            return Err(GraphValidationError::EmptyGraph);
        }
        let mut map = BTreeMap::new();
        for node in nodes {
            if map.contains_key(&node.id) {
                return Err(GraphValidationError::DuplicateNode(node.id));
            }
            map.insert(node.id.clone(), node);
        }

        check_references(&mut map, &entry_point, &final_node)?;
        let (order, dependents) = topological_sort(&map)?;

        let entry = &map[&entry_point];
        if !entry.dependencies.is_empty() {
            return Err(GraphValidationError::InvalidEntryPoint {
                entry_point,
                dependencies: entry.dependencies.clone(),
            });
        }

        // A node can activate only once all its producers can, so walk the
        // topological order from the entry point.
        let mut runnable = BTreeSet::new();
        for id in &order {
            let node = &map[id];
            let ok = if *id == entry_point {
                true
            } else {
                !node.dependencies.is_empty()
                    && node.dependencies.iter().all(|d| runnable.contains(d))
            };
            if ok {
                runnable.insert(id.clone());
            }
        }
        if !runnable.contains(&final_node) {
            let ancestors = ancestors(&map, &final_node);
            if !ancestors.contains(entry_point.as_str()) {
                return Err(GraphValidationError::UnreachableFinalNode {
                    entry_point,
                    final_node,
                });
            }
            // Only the entry point starts ready, so any other root upstream
            // keeps the final node from ever activating.
            let roots = ancestors
                .into_iter()
                .filter(|id| *id != entry_point && map[*id].dependencies.is_empty())
                .map(str::to_string)
                .collect();
            return Err(GraphValidationError::FinalNodeBlockedByRoot { final_node, roots });
        }
        for id in map.keys().filter(|id| !runnable.contains(*id)) {
            warn!(node_id = %id, "Node is not reachable from the entry point and will never run");
        }

        debug!(
            nodes = map.len(),
            entry_point = %entry_point,
            final_node = %final_node,
            "Workflow graph validated"
        );

        Ok(Self {
            nodes: map,
            entry_point,
            final_node,
            order,
            dependents,
            runnable,
        })
    }

    /// Build from the `[workflow]` table of a config file.
    pub fn from_spec(spec: &DagSpec) -> Result<Self, GraphValidationError> {
        let nodes = spec
            .nodes
            .iter()
            .map(|(id, node)| Node::from_spec(id, node))
            .collect();
        Self::build(nodes, spec.entry_point.clone(), spec.final_node.clone())
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// All nodes, ordered by id.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn final_node(&self) -> &str {
        &self.final_node
    }

    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    /// Nodes that directly depend on `id`.
    pub fn dependents(&self, id: &str) -> &[String] {
        self.dependents.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn is_runnable(&self, id: &str) -> bool {
        self.runnable.contains(id)
    }

    /// Runnable nodes grouped by depth: every node in level `n` depends only
    /// on nodes in earlier levels, so a level can run concurrently.
    pub fn parallel_levels(&self) -> Vec<Vec<String>> {
        let mut depth: BTreeMap<&str, usize> = BTreeMap::new();
        let mut levels: Vec<Vec<String>> = Vec::new();
        for id in self.order.iter().filter(|id| self.runnable.contains(*id)) {
            let level = self.nodes[id]
                .dependencies
                .iter()
                .filter_map(|d| depth.get(d.as_str()))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(id.as_str(), level);
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(id.clone());
        }
        levels
    }
}

/// Reference checks. Resolves `node.field` mapping sources in place.
fn check_references(
    nodes: &mut BTreeMap<String, Node>,
    entry_point: &str,
    final_node: &str,
) -> Result<(), GraphValidationError> {
    for (referrer, target) in [("entry_point", entry_point), ("final_node", final_node)] {
        if !nodes.contains_key(target) {
            return Err(GraphValidationError::UnknownNodeReference {
                referrer: referrer.to_string(),
                target: target.to_string(),
            });
        }
    }

    let ids: BTreeSet<String> = nodes.keys().cloned().collect();
    let unknown = |referrer: &str, target: &str| GraphValidationError::UnknownNodeReference {
        referrer: referrer.to_string(),
        target: target.to_string(),
    };

    for node in nodes.values_mut() {
        if let Some(dep) = node.dependencies.iter().find(|d| !ids.contains(*d)) {
            return Err(unknown(&node.id, dep));
        }
        for source in node.input_mapping.values_mut() {
            if !source.resolve(|id| ids.contains(id)) {
                return Err(unknown(&node.id, &source.raw));
            }
        }
        if let Some(condition) = &node.condition {
            if let Some(source) = &condition.source {
                if !ids.contains(source) {
                    return Err(unknown(&node.id, source));
                }
            }
        }
    }

    for node in nodes.values() {
        let mapped = node.input_mapping.values().map(|s| s.node.as_str());
        let conditioned = node
            .condition
            .as_ref()
            .and_then(|c| c.source.as_deref());
        for source in mapped.chain(conditioned) {
            if !node.dependencies.iter().any(|d| d == source) {
                return Err(GraphValidationError::UndeclaredDependency {
                    node: node.id.clone(),
                    source_node: source.to_string(),
                });
            }
        }
        if let Some(condition) = &node.condition {
            if node.dependencies.is_empty() {
                return Err(GraphValidationError::InvalidCondition {
                    node: node.id.clone(),
                    message: "condition needs a dependency to read from".into(),
                });
            }
            condition::validate(&condition.predicate).map_err(|message| {
                GraphValidationError::InvalidCondition {
                    node: node.id.clone(),
                    message,
                }
            })?;
        }
    }
    Ok(())
}

type Dependents = BTreeMap<String, Vec<String>>;

/// Kahn's algorithm. Nodes left over once the queue drains lie on or behind a
/// cycle.
/// Every node `id` transitively depends on, excluding `id` itself.
fn ancestors<'a>(nodes: &'a BTreeMap<String, Node>, id: &str) -> BTreeSet<&'a str> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<&'a str> = nodes
        .get(id)
        .map(|n| n.dependencies.iter().map(String::as_str).collect())
        .unwrap_or_default();
    while let Some(current) = stack.pop() {
        if !seen.insert(current) {
            continue;
        }
        if let Some(node) = nodes.get(current) {
            stack.extend(node.dependencies.iter().map(String::as_str));
        }
    }
    seen
}

fn topological_sort(
    nodes: &BTreeMap<String, Node>,
) -> Result<(Vec<String>, Dependents), GraphValidationError> {
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: Dependents = BTreeMap::new();
    for node in nodes.values() {
        in_degree.insert(node.id.as_str(), node.dependencies.len());
        for dep in &node.dependencies {
            dependents
                .entry(dep.clone())
                .or_default()
                .push(node.id.clone());
        }
    }
    for consumers in dependents.values_mut() {
        consumers.sort();
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(id) = queue.pop_front() {
        order.push(id.to_string());
        let Some(consumers) = dependents.get(id) else {
            continue;
        };
        for consumer in consumers {
            if let Some(d) = in_degree.get_mut(consumer.as_str()) {
                *d -= 1;
                if *d == 0 {
                    queue.push_back(consumer.as_str());
                }
            }
        }
    }

    if order.len() < nodes.len() {
        let placed: BTreeSet<&str> = order.iter().map(|s| s.as_str()).collect();
        let remaining = nodes
            .keys()
            .filter(|id| !placed.contains(id.as_str()))
            .cloned()
            .collect();
        return Err(GraphValidationError::CyclicDependency { nodes: remaining });
    }
    Ok((order, dependents))
}
