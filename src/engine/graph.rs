//! # Dependency Graph
//!
//! Static DAG of systems plus a set of unordered incompatibility pairs.
//!
//! Built once after all systems are registered:
//!
//! 1. Every explicit "A runs before B" declaration adds the edge `A → B`.
//! 2. Every unordered pair of non-exclusive systems whose declared claims
//!    conflict is inserted into the incompatibility set, together with the
//!    explicitly declared pairs.
//! 3. [`finalize`](DependencyGraph::finalize) computes each node's
//!    `distance_to_sink` — the length of the longest path to a node with no
//!    outgoing edge — used by the tracer to prefer systems on the critical
//!    path. A backward pass that cannot consume every node means the edges
//!    form a cycle, which is an error.

use std::collections::HashSet;

use crate::engine::error::GraphError;

fn push_unique(values: &mut Vec<usize>, value: usize) {
    if !values.contains(&value) {
        values.push(value);
    }
}

#[derive(Default)]
pub(crate) struct Node {
    /// Systems that must finish before this one starts.
    pub(crate) before: Vec<usize>,
    /// Systems waiting on this one.
    pub(crate) after: Vec<usize>,
    /// Length of the longest path from this node to a sink.
    pub(crate) distance_to_sink: usize,
}

/// Static scheduling constraints over the registered systems.
#[derive(Default)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    first_nodes: Vec<usize>,
    incompatibilities: HashSet<(usize, usize)>,
    exclusive: Vec<bool>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizes the graph for `count` systems.
    pub fn init_nodes(&mut self, count: usize) {
        self.nodes = (0..count).map(|_| Node::default()).collect();
        self.exclusive = vec![false; count];
        self.first_nodes.clear();
        self.incompatibilities.clear();
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Adds the ordering edge `before → after`.
    pub fn add_dependency(&mut self, before: usize, after: usize) {
        push_unique(&mut self.nodes[after].before, before);
        push_unique(&mut self.nodes[before].after, after);
    }

    /// Marks the unordered pair as unable to run concurrently.
    pub fn add_incompatibility(&mut self, first: usize, second: usize) {
        let pair = if first < second { (first, second) } else { (second, first) };
        self.incompatibilities.insert(pair);
    }

    /// Marks a node as exclusive-global.
    pub fn set_exclusive(&mut self, node: usize) {
        self.exclusive[node] = true;
    }

    /// Returns `true` if the node was declared exclusive-global.
    #[inline]
    pub fn is_exclusive(&self, node: usize) -> bool {
        self.exclusive[node]
    }

    /// Returns `true` if the two systems may overlap in time.
    pub fn are_compatible(&self, first: usize, second: usize) -> bool {
        let pair = if first < second { (first, second) } else { (second, first) };
        !self.incompatibilities.contains(&pair)
    }

    /// Nodes without predecessors; the tracer's initial eligible set.
    pub fn first_nodes(&self) -> &[usize] {
        &self.first_nodes
    }

    pub(crate) fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    /// Computes `distance_to_sink` for every node and collects the initial
    /// eligible set.
    ///
    /// Runs a backward topological pass in `O(V + E)`; if the pass cannot
    /// consume every node, the declared edges contain a cycle.
    pub fn finalize(&mut self) -> Result<(), GraphError> {
        let count = self.nodes.len();
        let mut remaining_out: Vec<usize> = self.nodes.iter().map(|node| node.after.len()).collect();
        let mut ready: Vec<usize> = (0..count).filter(|&node| remaining_out[node] == 0).collect();

        for &sink in &ready {
            self.nodes[sink].distance_to_sink = 1;
        }

        let mut processed = 0;
        while let Some(node) = ready.pop() {
            processed += 1;
            let distance = self.nodes[node].distance_to_sink;
            let before = self.nodes[node].before.clone();
            for predecessor in before {
                let entry = &mut self.nodes[predecessor];
                entry.distance_to_sink = entry.distance_to_sink.max(distance + 1);
                remaining_out[predecessor] -= 1;
                if remaining_out[predecessor] == 0 {
                    ready.push(predecessor);
                }
            }
        }

        if processed != count {
            return Err(GraphError::CyclicDependency);
        }

        self.first_nodes = (0..count).filter(|&node| self.nodes[node].before.is_empty()).collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_to_sink_is_longest_path() {
        // 0 → 1 → 3, 0 → 2 → 3, plus the isolated 4.
        let mut graph = DependencyGraph::new();
        graph.init_nodes(5);
        graph.add_dependency(0, 1);
        graph.add_dependency(1, 3);
        graph.add_dependency(0, 2);
        graph.add_dependency(2, 3);
        graph.finalize().expect("acyclic");

        assert_eq!(graph.node(3).distance_to_sink, 1);
        assert_eq!(graph.node(1).distance_to_sink, 2);
        assert_eq!(graph.node(2).distance_to_sink, 2);
        assert_eq!(graph.node(0).distance_to_sink, 3);
        assert_eq!(graph.node(4).distance_to_sink, 1);
        assert_eq!(graph.first_nodes(), &[0, 4]);
    }

    #[test]
    fn cycles_are_rejected() {
        let mut graph = DependencyGraph::new();
        graph.init_nodes(3);
        graph.add_dependency(0, 1);
        graph.add_dependency(1, 2);
        graph.add_dependency(2, 0);
        assert_eq!(graph.finalize(), Err(GraphError::CyclicDependency));
    }

    #[test]
    fn incompatibility_pairs_are_unordered() {
        let mut graph = DependencyGraph::new();
        graph.init_nodes(3);
        graph.add_incompatibility(2, 0);
        assert!(!graph.are_compatible(0, 2));
        assert!(!graph.are_compatible(2, 0));
        assert!(graph.are_compatible(1, 2));
    }

    #[test]
    fn duplicate_edges_collapse() {
        let mut graph = DependencyGraph::new();
        graph.init_nodes(2);
        graph.add_dependency(0, 1);
        graph.add_dependency(0, 1);
        assert_eq!(graph.node(1).before.len(), 1);
        assert_eq!(graph.node(0).after.len(), 1);
    }
}
