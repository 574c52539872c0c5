//! # Thread Pool
//!
//! Multi-producer work queue with per-group finalization.
//!
//! ## Model
//! A task is `{group, run, finalize?}`. Worker threads dequeue, execute
//! `run` (which may produce a result), and hand `(finalize, result)` to the
//! task's group finalizer queue. Finalizers never run on workers: a caller
//! thread drains them via [`drain`](ThreadPool::drain) or
//! [`drain_one`](ThreadPool::drain_one), which is how results are committed
//! back on the driving thread.
//!
//! Per group the pool maintains two counters:
//!
//! - `tasks_not_started` — submitted but not yet dequeued,
//! - `tasks_not_finalized` — submitted but not yet finalized (or, for
//!   finalizer-less tasks, not yet completed).
//!
//! ## Stealing
//! While draining a group with no finalizer pending, the caller steals a
//! queued task of that group and runs it (plus its finalizer) inline. This
//! keeps a drain from deadlocking when the pool is smaller than the longest
//! dependency chain.
//!
//! ## Ordering guarantees
//! A finalizer observes its task's result only after `run` returned, and
//! runs strictly after its own task. Finalizers of different groups are
//! unordered relative to each other.
//!
//! ## Shutdown
//! Cooperative: dropping the pool sets a flag, broadcasts a wake-up and
//! joins every worker. Shutdown is only legal between ticks.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

/// Identifies a drain domain; the scheduler uses one group per tick.
pub type GroupId = u64;

/// Boxed result passed from a task to its finalizer.
pub type TaskResult = Box<dyn Any + Send>;

type RunFn = Box<dyn FnOnce() -> TaskResult + Send>;
type FinalizeFn = Box<dyn FnOnce(TaskResult) + Send>;

/// A unit of work submitted to the pool.
pub struct Task {
    group: GroupId,
    run: RunFn,
    finalize: Option<FinalizeFn>,
}

impl Task {
    /// A task whose completion needs no finalization.
    pub fn new(group: GroupId, run: impl FnOnce() -> TaskResult + Send + 'static) -> Self {
        Self { group, run: Box::new(run), finalize: None }
    }

    /// A task whose result is committed by `finalize` on the draining
    /// thread.
    pub fn with_finalizer(
        group: GroupId,
        run: impl FnOnce() -> TaskResult + Send + 'static,
        finalize: impl FnOnce(TaskResult) + Send + 'static,
    ) -> Self {
        Self { group, run: Box::new(run), finalize: Some(Box::new(finalize)) }
    }
}

#[derive(Default)]
struct GroupState {
    tasks_not_started: usize,
    tasks_not_finalized: usize,
    finalizers: VecDeque<(FinalizeFn, TaskResult)>,
}

struct PoolState {
    queue: VecDeque<Task>,
    groups: HashMap<GroupId, GroupState>,
    shutdown: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    /// Wakes workers on submission and shutdown.
    work_available: Condvar,
    /// Wakes draining callers on task completion.
    progress: Condvar,
}

/// Fixed-size pool of worker threads with grouped finalization.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Creates a pool with `worker_count` OS threads.
    ///
    /// Zero workers is allowed: every task is then executed by the
    /// stealing drain of the caller thread.
    pub fn new(worker_count: usize) -> Self {
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                groups: HashMap::new(),
                shutdown: false,
            }),
            work_available: Condvar::new(),
            progress: Condvar::new(),
        });

        let workers = (0..worker_count)
            .map(|index| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("ecs-worker-{index}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self { shared, workers }
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Enqueues one task.
    pub fn submit(&self, task: Task) {
        let mut state = self.shared.state.lock();
        let group = state.groups.entry(task.group).or_default();
        group.tasks_not_started += 1;
        group.tasks_not_finalized += 1;
        state.queue.push_back(task);
        drop(state);
        self.shared.work_available.notify_one();
    }

    /// Enqueues several tasks, waking every worker once.
    pub fn submit_bulk(&self, tasks: impl IntoIterator<Item = Task>) {
        let mut state = self.shared.state.lock();
        let mut submitted = 0usize;
        for task in tasks {
            let group = state.groups.entry(task.group).or_default();
            group.tasks_not_started += 1;
            group.tasks_not_finalized += 1;
            state.queue.push_back(task);
            submitted += 1;
        }
        drop(state);
        if submitted > 0 {
            self.shared.work_available.notify_all();
        }
    }

    /// Submitted-but-not-dequeued count for `group`.
    pub fn tasks_not_started(&self, group: GroupId) -> usize {
        self.shared
            .state
            .lock()
            .groups
            .get(&group)
            .map_or(0, |state| state.tasks_not_started)
    }

    /// Submitted-but-not-finalized count for `group`.
    pub fn tasks_not_finalized(&self, group: GroupId) -> usize {
        self.shared
            .state
            .lock()
            .groups
            .get(&group)
            .map_or(0, |state| state.tasks_not_finalized)
    }

    /// Runs one pending finalizer of `group` on the calling thread — or,
    /// with none pending, steals one queued task of the group and runs it
    /// (and its finalizer) inline; blocks until either is possible.
    ///
    /// Returns `false` once the group has nothing left to finalize.
    pub fn drain_one(&self, group: GroupId) -> bool {
        let mut state = self.shared.state.lock();
        loop {
            match state.groups.get_mut(&group) {
                None => return false,
                Some(group_state) if group_state.tasks_not_finalized == 0 => {
                    if group_state.tasks_not_started == 0 {
                        state.groups.remove(&group);
                    }
                    return false;
                }
                Some(group_state) => {
                    if let Some((finalize, result)) = group_state.finalizers.pop_front() {
                        drop(state);
                        finalize(result);
                        let mut state = self.shared.state.lock();
                        if let Some(group_state) = state.groups.get_mut(&group) {
                            group_state.tasks_not_finalized -= 1;
                        }
                        self.shared.progress.notify_all();
                        return true;
                    }

                    if let Some(position) =
                        state.queue.iter().position(|task| task.group == group)
                    {
                        let task = state.queue.remove(position).expect("position is in range");
                        if let Some(group_state) = state.groups.get_mut(&group) {
                            group_state.tasks_not_started -= 1;
                        }
                        drop(state);

                        let result = (task.run)();
                        if let Some(finalize) = task.finalize {
                            finalize(result);
                        }

                        let mut state = self.shared.state.lock();
                        if let Some(group_state) = state.groups.get_mut(&group) {
                            group_state.tasks_not_finalized -= 1;
                        }
                        self.shared.progress.notify_all();
                        return true;
                    }

                    self.shared.progress.wait(&mut state);
                }
            }
        }
    }

    /// Drains `group` to completion: runs finalizers (stealing queued
    /// tasks when necessary) until `tasks_not_finalized` reaches zero.
    pub fn drain(&self, group: GroupId) {
        while self.drain_one(group) {}
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
        }
        self.shared.work_available.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        tracing::debug!("thread pool shut down");
    }
}

fn worker_loop(shared: &PoolShared) {
    tracing::debug!("worker started");
    loop {
        let task = {
            let mut state = shared.state.lock();
            loop {
                if state.shutdown {
                    return;
                }
                if let Some(task) = state.queue.pop_front() {
                    if let Some(group_state) = state.groups.get_mut(&task.group) {
                        group_state.tasks_not_started -= 1;
                    }
                    break task;
                }
                shared.work_available.wait(&mut state);
            }
        };

        let group = task.group;
        let result = (task.run)();

        let mut state = shared.state.lock();
        match task.finalize {
            Some(finalize) => {
                if let Some(group_state) = state.groups.get_mut(&group) {
                    group_state.finalizers.push_back((finalize, result));
                }
            }
            None => {
                if let Some(group_state) = state.groups.get_mut(&group) {
                    group_state.tasks_not_finalized -= 1;
                }
            }
        }
        drop(state);
        shared.progress.notify_all();
    }
}
