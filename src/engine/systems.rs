//! ECS System Abstractions
//!
//! A **system** is a unit of logic scheduled by the systems manager.
//! Systems:
//! - receive their access tokens at registration (the tokens *are* the
//!   declared access set),
//! - are ordered and parallelized from those declarations plus the
//!   explicit [`SystemDependencies`] configuration,
//! - run as opaque synchronous units on one thread per tick.
//!
//! ## Update shapes
//!
//! A system implements exactly one of the two update shapes:
//!
//! - [`update`](AsyncSystem::update) — plain update with no deferred
//!   effects; the default `update_and_schedule` forwards to it.
//! - [`update_and_schedule`](AsyncSystem::update_and_schedule) — returns an
//!   optional [`ScheduledOperations`] bag that the systems manager applies
//!   at the next quiescent point. Systems whose tokens mark them post-sync
//!   use this shape.
//!
//! All systems must be `Send` so they can execute on worker threads.

use crate::engine::operations::ScheduledOperations;

/// A unit of executable logic driven by the systems manager.
///
/// `K` is the host's entity-manager key type, threaded through the
/// deferred-operations bag.
pub trait AsyncSystem<K>: Send {
    /// Stable identifier used by ordering and incompatibility
    /// declarations.
    fn system_id() -> &'static str
    where
        Self: Sized;

    /// Plain update without deferred effects.
    fn update(&mut self) {}

    /// Update producing deferred operations.
    ///
    /// The default forwards to [`update`](Self::update) and schedules
    /// nothing; override exactly one of the two.
    fn update_and_schedule(&mut self) -> Option<ScheduledOperations<K>> {
        self.update();
        None
    }

    /// One-time resource setup, invoked before the first tick.
    fn init_resources(&mut self) {}

    /// Teardown hook, invoked when the systems manager shuts down.
    fn shutdown(&mut self) {}
}

/// Registration-time scheduling configuration of one system.
///
/// Built fluently, in registration order semantics:
///
/// ```ignore
/// manager.register_system::<MovementSystem, _>(
///     SystemDependencies::new()
///         .goes_after(InputSystem::system_id())
///         .goes_before(RenderCollectSystem::system_id()),
///     |tokens| MovementSystem::new(tokens),
/// );
/// ```
#[derive(Default, Clone, Debug)]
pub struct SystemDependencies {
    /// Ids of systems that must finish before this one starts.
    pub systems_before: Vec<&'static str>,
    /// Ids of systems that may only start after this one finishes.
    pub systems_after: Vec<&'static str>,
    /// Ids of systems this one may never overlap with.
    pub incompatible_with: Vec<&'static str>,
    /// Global cap on concurrently running systems; `-1` = unlimited.
    pub max_concurrent: i32,
    /// Tiebreaker hint reserved for the scheduler; unused by the conflict
    /// logic.
    pub custom_order: i32,
}

impl SystemDependencies {
    /// Creates a configuration with no constraints.
    pub fn new() -> Self {
        Self { max_concurrent: -1, custom_order: -1, ..Self::default() }
    }

    /// Declares that `system_id` must run before this system.
    pub fn goes_after(mut self, system_id: &'static str) -> Self {
        self.systems_before.push(system_id);
        self
    }

    /// Declares that this system must run before `system_id`.
    pub fn goes_before(mut self, system_id: &'static str) -> Self {
        self.systems_after.push(system_id);
        self
    }

    /// Declares mutual exclusion with `system_id`.
    pub fn can_not_be_run_together_with(mut self, system_id: &'static str) -> Self {
        self.incompatible_with.push(system_id);
        self
    }

    /// Caps how many systems may run concurrently while this registration
    /// is in effect (the smallest cap among all systems wins).
    pub fn limit_concurrently_run_systems_to(mut self, count: i32) -> Self {
        self.max_concurrent = count;
        self
    }

    /// Sets the reserved ordering hint.
    pub fn with_custom_order(mut self, order: i32) -> Self {
        self.custom_order = order;
        self
    }
}
