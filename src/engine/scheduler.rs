//! # Systems Manager
//!
//! Owns the system instances, the dependency graph, the per-tick tracer
//! and the thread pool, and drives one update.
//!
//! ## Tick protocol
//!
//! Each tick gets a fresh [`DependencyTracer`] and its own thread-pool
//! group. The scheduler thread loops:
//!
//! 1. With the tick state locked, apply deferred operation bags whenever
//!    nothing is running (structural mutation under quiescence), then ask
//!    the tracer for the runnable batch.
//! 2. Submit every batch member but the first to the pool; run the first
//!    **inline** on the scheduler thread. Inlining one task keeps this
//!    thread doing useful work instead of blocking, which trims tail
//!    latency on the critical path.
//! 3. With nothing runnable, drain one pool finalizer: finalizers run on
//!    this thread, push the finished system's deferred bag, mark it
//!    finished in the tracer and wake the loop again. The pool's progress
//!    signal plays the role of the tick condition variable.
//!
//! A system panic aborts the tick: the remaining eligible systems never
//! start, already-running systems finalize, the tracer scratch state is
//! cleared and `update` returns the failure.
//!
//! ## Deferred application order
//!
//! Bags apply in completion order; within one bag: entity spawns, entity
//! removals, component additions, component removals, transfers. After all
//! bags, every registered manager's own schedule queues are flushed.

use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::access::{AccessClaims, InnerDataAccessor, TokenSet};
use crate::engine::error::{report, EcsResult, ExecutionError, GraphError};
use crate::engine::graph::DependencyGraph;
use crate::engine::manager::AsyncEntityManager;
use crate::engine::operations::ScheduledOperations;
use crate::engine::systems::{AsyncSystem, SystemDependencies};
use crate::engine::thread_pool::{GroupId, Task, TaskResult, ThreadPool};
use crate::engine::tracer::DependencyTracer;

/// Bound alias for the host's entity-manager key type.
pub trait ManagerKey: Eq + Hash + Clone + Send + Sync + 'static {}
impl<K: Eq + Hash + Clone + Send + Sync + 'static> ManagerKey for K {}

struct SystemCell<K>(UnsafeCell<Box<dyn AsyncSystem<K>>>);

// The tracer hands out each system to at most one thread at a time; cells
// are only touched by the system's current runner.
unsafe impl<K> Sync for SystemCell<K> {}
unsafe impl<K> Send for SystemCell<K> {}

/// What one system run produced; `Err` means the system panicked.
type RunOutcome<K> = Result<Option<ScheduledOperations<K>>, ()>;

struct TickState<K> {
    tracer: DependencyTracer,
    deferred: Vec<ScheduledOperations<K>>,
    failed: Option<usize>,
}

struct SchedulerCore<K> {
    systems: Vec<SystemCell<K>>,
    system_ids: Vec<&'static str>,
    graph: DependencyGraph,
    managers: HashMap<K, Arc<AsyncEntityManager>>,
    tick: Mutex<Option<TickState<K>>>,
    max_concurrent: i32,
}

struct Registration<K> {
    id: &'static str,
    system: Box<dyn AsyncSystem<K>>,
    claims: AccessClaims,
    dependencies: SystemDependencies,
}

/// Ingests system registrations, builds the dependency graph and drives
/// ticks over the worker pool.
pub struct AsyncSystemsManager<K: ManagerKey> {
    registrations: Vec<Registration<K>>,
    managers: HashMap<K, Arc<AsyncEntityManager>>,
    core: Option<Arc<SchedulerCore<K>>>,
    pool: ThreadPool,
    next_group: GroupId,
}

impl<K: ManagerKey> AsyncSystemsManager<K> {
    /// Creates a manager dispatching onto `worker_count` pool threads.
    pub fn new(worker_count: usize) -> Self {
        Self {
            registrations: Vec::new(),
            managers: HashMap::new(),
            core: None,
            pool: ThreadPool::new(worker_count),
            next_group: 1,
        }
    }

    /// Registers a system.
    ///
    /// `T` is the tuple of access tokens the system declares; the tokens
    /// are minted here — the only place able to — and passed to `ctor`.
    /// Duplicate ids and post-init registrations are reported and ignored.
    pub fn register_system<S, T>(
        &mut self,
        dependencies: SystemDependencies,
        ctor: impl FnOnce(T) -> S,
    ) where
        S: AsyncSystem<K> + 'static,
        T: TokenSet,
    {
        if self.core.is_some() {
            report(ExecutionError::RegistrationAfterInit.into());
            return;
        }

        let id = S::system_id();
        if self.registrations.iter().any(|registration| registration.id == id) {
            report(GraphError::DuplicateSystem { system_id: id.to_string() }.into());
            return;
        }

        let mut claims = AccessClaims::default();
        let tokens = T::mint_all(&mut claims);
        let system = Box::new(ctor(tokens));

        self.registrations.push(Registration { id, system, claims, dependencies });
    }

    /// Registers an entity manager under `key`, the handle deferred
    /// operation bags use to address it.
    pub fn register_entity_manager(&mut self, key: K, manager: Arc<AsyncEntityManager>) {
        if self.core.is_some() {
            report(ExecutionError::RegistrationAfterInit.into());
            return;
        }
        self.managers.insert(key, manager);
    }

    /// The id of every registered system, in registration order.
    pub fn system_ids(&self) -> Vec<&'static str> {
        match &self.core {
            Some(core) => core.system_ids.clone(),
            None => self.registrations.iter().map(|registration| registration.id).collect(),
        }
    }

    /// Finalizes the dependency graph. Call once, after all registrations
    /// and before the first update.
    pub fn init(&mut self) -> EcsResult<()> {
        self.init_with(|_| {})
    }

    /// Like [`init`](Self::init), additionally invoking `init_fn` with an
    /// [`InnerDataAccessor`] so the host can populate world data before
    /// the first tick.
    pub fn init_with(&mut self, init_fn: impl FnOnce(&InnerDataAccessor)) -> EcsResult<()> {
        let registrations = std::mem::take(&mut self.registrations);
        let count = registrations.len();

        let index_by_id: HashMap<&'static str, usize> = registrations
            .iter()
            .enumerate()
            .map(|(index, registration)| (registration.id, index))
            .collect();

        let mut graph = DependencyGraph::new();
        graph.init_nodes(count);

        let resolve = |system_id: &'static str| -> EcsResult<usize> {
            index_by_id.get(system_id).copied().ok_or_else(|| {
                GraphError::UnknownSystem { system_id: system_id.to_string() }.into()
            })
        };

        for (index, registration) in registrations.iter().enumerate() {
            if registration.claims.exclusive_global {
                graph.set_exclusive(index);
            }
            for &system_id in &registration.dependencies.systems_before {
                match resolve(system_id) {
                    Ok(before) => graph.add_dependency(before, index),
                    Err(error) => {
                        report(error.clone());
                        return Err(error);
                    }
                }
            }
            for &system_id in &registration.dependencies.systems_after {
                match resolve(system_id) {
                    Ok(after) => graph.add_dependency(index, after),
                    Err(error) => {
                        report(error.clone());
                        return Err(error);
                    }
                }
            }
            for &system_id in &registration.dependencies.incompatible_with {
                match resolve(system_id) {
                    Ok(other) => graph.add_incompatibility(index, other),
                    Err(error) => {
                        report(error.clone());
                        return Err(error);
                    }
                }
            }
        }

        // Claim-derived incompatibilities, pairwise across systems.
        for first in 0..count {
            for second in first + 1..count {
                if graph.is_exclusive(first) || graph.is_exclusive(second) {
                    continue;
                }
                if registrations[first].claims.conflicts_with(&registrations[second].claims) {
                    graph.add_incompatibility(first, second);
                }
            }
        }

        if let Err(error) = graph.finalize() {
            let error: crate::engine::error::EcsError = error.into();
            report(error.clone());
            return Err(error);
        }

        let max_concurrent = registrations
            .iter()
            .map(|registration| registration.dependencies.max_concurrent)
            .filter(|&cap| cap >= 0)
            .min()
            .unwrap_or(-1);

        let mut system_ids = Vec::with_capacity(count);
        let mut systems = Vec::with_capacity(count);
        for registration in registrations {
            system_ids.push(registration.id);
            systems.push(SystemCell(UnsafeCell::new(registration.system)));
        }

        tracing::debug!(systems = count, max_concurrent, "systems manager initialized");

        self.core = Some(Arc::new(SchedulerCore {
            systems,
            system_ids,
            graph,
            managers: std::mem::take(&mut self.managers),
            tick: Mutex::new(None),
            max_concurrent,
        }));

        init_fn(&InnerDataAccessor::new_internal());
        Ok(())
    }

    /// Invokes every system's resource-initialization hook.
    pub fn init_resources(&mut self) {
        if let Some(core) = &self.core {
            for cell in &core.systems {
                // SAFETY: no tick is in flight; this thread is the only
                // accessor.
                unsafe { (*cell.0.get()).init_resources() };
            }
        }
    }

    /// Invokes every system's shutdown hook and drops the systems.
    pub fn shutdown(&mut self) {
        if let Some(core) = &self.core {
            for cell in &core.systems {
                // SAFETY: no tick is in flight; this thread is the only
                // accessor.
                unsafe { (*cell.0.get()).shutdown() };
            }
        }
        self.core = None;
    }

    /// Runs one tick: every system exactly once, honoring ordering edges,
    /// incompatibilities and the quiescent-state rule for deferred
    /// operations.
    pub fn update(&mut self) -> EcsResult<()> {
        let Some(core) = self.core.clone() else {
            let error: crate::engine::error::EcsError = ExecutionError::NotInitialized.into();
            report(error.clone());
            return Err(error);
        };

        let group = self.next_group;
        self.next_group += 1;
        tracing::debug!(group, "tick started");

        *core.tick.lock() = Some(TickState {
            tracer: DependencyTracer::new(&core.graph),
            deferred: Vec::new(),
            failed: None,
        });

        loop {
            let mut tick_guard = core.tick.lock();
            let tick = tick_guard.as_mut().expect("tick state installed above");

            if let Some(failed) = tick.failed {
                if !tick.tracer.nothing_running() {
                    drop(tick_guard);
                    self.pool.drain_one(group);
                    continue;
                }
                tick.tracer.clear();
                tick.deferred.clear();
                drop(tick_guard);
                self.pool.drain(group);

                let error: crate::engine::error::EcsError = ExecutionError::SystemFailed {
                    system_id: core.system_ids[failed].to_string(),
                }
                .into();
                report(error.clone());
                tracing::debug!(group, "tick aborted");
                return Err(error);
            }

            if !tick.tracer.has_unfinished() {
                if !tick.deferred.is_empty() {
                    let bags = std::mem::take(&mut tick.deferred);
                    apply_deferred(&core, bags);
                }
                drop(tick_guard);
                self.pool.drain(group);
                tracing::debug!(group, "tick finished");
                return Ok(());
            }

            if tick.tracer.nothing_running() && !tick.deferred.is_empty() {
                let bags = std::mem::take(&mut tick.deferred);
                apply_deferred(&core, bags);
            }

            let mut batch = tick.tracer.runnable(&core.graph);
            if core.max_concurrent >= 0 {
                let running = tick.tracer.running_count();
                let mut allowed = (core.max_concurrent as usize).saturating_sub(running);
                if allowed == 0 && running == 0 {
                    allowed = 1;
                }
                batch.truncate(allowed);
            }

            if batch.is_empty() {
                drop(tick_guard);
                self.pool.drain_one(group);
                continue;
            }

            for &system in &batch[1..] {
                tick.tracer.start(system);
                self.pool.submit(make_task(core.clone(), system, group));
            }

            let inline = batch[0];
            tick.tracer.start(inline);
            drop(tick_guard);

            tracing::trace!(system = core.system_ids[inline], "running inline");
            let outcome = run_system(&core, inline);

            let mut tick_guard = core.tick.lock();
            let tick = tick_guard.as_mut().expect("tick state installed above");
            record_outcome(tick, inline, outcome);
            tick.tracer.finish(&core.graph, inline);
        }
    }
}

fn record_outcome<K>(tick: &mut TickState<K>, system: usize, outcome: RunOutcome<K>) {
    match outcome {
        Ok(Some(operations)) => tick.deferred.push(operations),
        Ok(None) => {}
        Err(()) => tick.failed = Some(system),
    }
}

fn run_system<K>(core: &SchedulerCore<K>, system: usize) -> RunOutcome<K> {
    let cell = &core.systems[system];
    // SAFETY: the tracer started this system on exactly one thread.
    let update = AssertUnwindSafe(|| unsafe { (*cell.0.get()).update_and_schedule() });
    catch_unwind(update).map_err(|_| ())
}

fn make_task<K: ManagerKey>(core: Arc<SchedulerCore<K>>, system: usize, group: GroupId) -> Task {
    let run_core = core.clone();
    let run = move || -> TaskResult {
        tracing::trace!(system = run_core.system_ids[system], "running on worker");
        Box::new(run_system(&run_core, system))
    };
    let finalize = move |result: TaskResult| {
        let outcome = *result
            .downcast::<RunOutcome<K>>()
            .expect("worker tasks return their run outcome");
        let mut tick_guard = core.tick.lock();
        if let Some(tick) = tick_guard.as_mut() {
            record_outcome(tick, system, outcome);
            tick.tracer.finish(&core.graph, system);
        }
    };
    Task::with_finalizer(group, run, finalize)
}

/// Applies deferred bags and flushes every manager's schedule queues.
///
/// Caller must hold the tick lock with nothing running.
fn apply_deferred<K: ManagerKey>(core: &SchedulerCore<K>, bags: Vec<ScheduledOperations<K>>) {
    tracing::debug!(bags = bags.len(), "applying deferred operations");

    let manager_for = |key: &K| -> Option<&Arc<AsyncEntityManager>> {
        let manager = core.managers.get(key);
        if manager.is_none() {
            report(ExecutionError::UnknownManagerKey.into());
        }
        manager
    };

    for bag in bags {
        for (key, count) in &bag.entities_to_add {
            if let Some(manager) = manager_for(key) {
                // SAFETY: quiescent point; nothing else touches storage.
                let manager = unsafe { manager.manager() };
                for _ in 0..*count {
                    manager.add_entity();
                }
            }
        }
        for (key, entities) in &bag.entities_to_remove {
            if let Some(manager) = manager_for(key) {
                // SAFETY: quiescent point.
                let manager = unsafe { manager.manager() };
                for &entity in entities {
                    manager.remove_entity(entity);
                }
            }
        }
        for (key, additions) in bag.components_to_add {
            if let Some(manager) = manager_for(&key) {
                // SAFETY: quiescent point.
                let manager = unsafe { manager.manager() };
                for addition in additions {
                    manager.add_component_raw(addition.entity, addition.component, addition.type_id);
                }
            }
        }
        for (key, removals) in &bag.components_to_remove {
            if let Some(manager) = manager_for(key) {
                // SAFETY: quiescent point.
                let manager = unsafe { manager.manager() };
                for removal in removals {
                    manager.remove_component_by_type(removal.entity, removal.type_id);
                }
            }
        }
        for transfer in &bag.entities_to_transfer {
            let (Some(source), Some(target)) =
                (manager_for(&transfer.source), manager_for(&transfer.target))
            else {
                continue;
            };
            if Arc::ptr_eq(source, target) {
                report(
                    crate::engine::error::EntityError::SelfTransfer {
                        raw_id: transfer.entity.raw_id(),
                    }
                    .into(),
                );
                continue;
            }
            // SAFETY: quiescent point; the managers are distinct objects.
            unsafe { source.manager().transfer_entity_to(target.manager(), transfer.entity) };
        }
    }

    for manager in core.managers.values() {
        // SAFETY: quiescent point.
        unsafe { manager.manager() }.execute_scheduled_actions();
    }
}
