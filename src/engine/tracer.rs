//! # Dependency Tracer
//!
//! Per-tick scratch state over the dependency graph: which systems have
//! finished, which are running, and which are eligible to start next.
//!
//! The tracer itself holds no reference to the graph; every operation takes
//! it as a parameter so the scratch state can live inside the scheduler's
//! tick mutex.

use crate::engine::graph::DependencyGraph;

fn push_unique(values: &mut Vec<usize>, value: usize) {
    if !values.contains(&value) {
        values.push(value);
    }
}

/// Scratch bookkeeping for one tick.
pub struct DependencyTracer {
    resolved: Vec<bool>,
    running: Vec<usize>,
    eligible: Vec<usize>,
}

impl DependencyTracer {
    /// Creates a fresh tracer; the initial eligible set is the graph's
    /// predecessor-free nodes.
    pub fn new(graph: &DependencyGraph) -> Self {
        Self {
            resolved: vec![false; graph.node_count()],
            running: Vec::new(),
            eligible: graph.first_nodes().to_vec(),
        }
    }

    /// Marks `system` finished: removes it from the running set, resolves
    /// it, and makes each successor eligible (uniquely).
    pub fn finish(&mut self, graph: &DependencyGraph, system: usize) {
        self.running.retain(|&running| running != system);
        self.resolved[system] = true;

        for &successor in &graph.node(system).after {
            if !self.resolved[successor] {
                push_unique(&mut self.eligible, successor);
            }
        }
    }

    /// Moves `system` from the eligible set to the running set.
    pub fn start(&mut self, system: usize) {
        self.eligible.retain(|&eligible| eligible != system);
        self.running.push(system);
    }

    /// Returns `true` while any system has not finished.
    pub fn has_unfinished(&self) -> bool {
        self.resolved.iter().any(|resolved| !resolved)
    }

    /// Returns `true` if no system is currently running.
    pub fn nothing_running(&self) -> bool {
        self.running.is_empty()
    }

    /// Number of currently running systems.
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Resets the scratch state after an aborted tick; the tracer reports
    /// no unfinished work afterwards.
    pub fn clear(&mut self) {
        self.resolved.iter_mut().for_each(|resolved| *resolved = true);
        self.running.clear();
        self.eligible.clear();
    }

    /// Computes the set of systems that may start now.
    ///
    /// A candidate qualifies when all of its predecessors are resolved and
    /// it is compatible with everything running (an exclusive-global
    /// candidate additionally requires an empty running set; while an
    /// exclusive-global system runs, nothing qualifies). Mutually
    /// incompatible candidates are then thinned out, preferring to keep
    /// those with the larger distance to sink — the longer remaining
    /// critical path.
    pub fn runnable(&self, graph: &DependencyGraph) -> Vec<usize> {
        if self.running.iter().any(|&running| graph.is_exclusive(running)) {
            return Vec::new();
        }

        let mut candidates: Vec<usize> = self
            .eligible
            .iter()
            .copied()
            .filter(|&candidate| self.can_run(graph, candidate))
            .collect();

        self.filter_incompatible(graph, &mut candidates);
        candidates
    }

    fn can_run(&self, graph: &DependencyGraph, candidate: usize) -> bool {
        if graph.node(candidate).before.iter().any(|&before| !self.resolved[before]) {
            return false;
        }

        if graph.is_exclusive(candidate) {
            return self.running.is_empty();
        }

        self.running.iter().all(|&running| graph.are_compatible(candidate, running))
    }

    /// Drops mutually conflicting candidates; on a conflict the candidate
    /// with the smaller distance to sink loses, ties keep the earlier one.
    fn filter_incompatible(&self, graph: &DependencyGraph, candidates: &mut Vec<usize>) {
        let conflict = |a: usize, b: usize| {
            !graph.are_compatible(a, b) || graph.is_exclusive(a) || graph.is_exclusive(b)
        };

        let mut kept: Vec<usize> = Vec::with_capacity(candidates.len());
        for &candidate in candidates.iter() {
            let mut survives = true;
            kept.retain(|&winner| {
                if !conflict(winner, candidate) {
                    return true;
                }
                if graph.node(candidate).distance_to_sink > graph.node(winner).distance_to_sink {
                    // The candidate owns the longer critical path.
                    false
                } else {
                    survives = false;
                    true
                }
            });
            if survives {
                kept.push(candidate);
            }
        }
        *candidates = kept;
    }
}
