//! Deferred mutation bag returned by post-sync systems.
//!
//! Systems whose access declaration marks them post-sync cannot mutate
//! storage structure while other systems run. Instead their update returns a
//! [`ScheduledOperations`] bag; the systems manager collects the bags and
//! applies them at the next quiescent point of the tick, when no system is
//! running.
//!
//! Operations are keyed by the host-chosen entity-manager key `K`, so one
//! bag can address several managers (e.g. a world manager and a staging
//! manager).

use std::collections::HashMap;
use std::hash::Hash;

use crate::engine::types::{ComponentTypeId, Entity};

/// Deferred component installation: the bag owns `component` until applied.
pub struct ComponentAddOp {
    /// Target entity.
    pub entity: Entity,
    /// Component type installed.
    pub type_id: ComponentTypeId,
    /// Address of the already-constructed instance.
    pub component: *mut u8,
}

/// Deferred component removal.
pub struct ComponentRemoveOp {
    /// Target entity.
    pub entity: Entity,
    /// Component type removed.
    pub type_id: ComponentTypeId,
}

/// Deferred entity transfer between two managers.
pub struct EntityTransferOp<K> {
    /// Key of the manager currently owning the entity.
    pub source: K,
    /// Key of the manager receiving the entity.
    pub target: K,
    /// Entity to move.
    pub entity: Entity,
}

/// Per-tick bag of deferred mutations.
///
/// Application order within one bag is fixed: entity spawns, entity
/// removals, component additions, component removals, transfers.
pub struct ScheduledOperations<K> {
    pub(crate) entities_to_add: HashMap<K, u32>,
    pub(crate) entities_to_remove: HashMap<K, Vec<Entity>>,
    pub(crate) components_to_add: HashMap<K, Vec<ComponentAddOp>>,
    pub(crate) components_to_remove: HashMap<K, Vec<ComponentRemoveOp>>,
    pub(crate) entities_to_transfer: Vec<EntityTransferOp<K>>,
}

// The bag owns the component instances behind the raw addresses in
// `components_to_add`; ownership moves with the bag between the producing
// system's thread and the scheduler thread.
unsafe impl<K: Send> Send for ScheduledOperations<K> {}

impl<K> Default for ScheduledOperations<K> {
    fn default() -> Self {
        Self {
            entities_to_add: HashMap::new(),
            entities_to_remove: HashMap::new(),
            components_to_add: HashMap::new(),
            components_to_remove: HashMap::new(),
            entities_to_transfer: Vec::new(),
        }
    }
}

impl<K: Eq + Hash> ScheduledOperations<K> {
    /// Creates an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the bag holds no operations.
    pub fn is_empty(&self) -> bool {
        self.entities_to_add.is_empty()
            && self.entities_to_remove.is_empty()
            && self.components_to_add.is_empty()
            && self.components_to_remove.is_empty()
            && self.entities_to_transfer.is_empty()
    }

    /// Schedules the creation of one blank entity in manager `key`.
    ///
    /// The entity becomes observable to queries after the next quiescent
    /// point; its handle is not available to the scheduling system.
    pub fn schedule_add_entity(&mut self, key: K) {
        *self.entities_to_add.entry(key).or_insert(0) += 1;
    }

    /// Schedules removal of `entity` from manager `key`.
    pub fn schedule_remove_entity(&mut self, key: K, entity: Entity) {
        self.entities_to_remove.entry(key).or_default().push(entity);
    }

    /// Schedules installation of an already-constructed component.
    ///
    /// The bag takes ownership of `component`; the instance stays usable by
    /// the enqueuing thread but is invisible to queries until applied.
    pub fn schedule_add_component(
        &mut self,
        key: K,
        entity: Entity,
        type_id: ComponentTypeId,
        component: *mut u8,
    ) {
        self.components_to_add
            .entry(key)
            .or_default()
            .push(ComponentAddOp { entity, type_id, component });
    }

    /// Schedules removal of the `type_id` component from `entity`.
    pub fn schedule_remove_component(&mut self, key: K, entity: Entity, type_id: ComponentTypeId) {
        self.components_to_remove
            .entry(key)
            .or_default()
            .push(ComponentRemoveOp { entity, type_id });
    }

    /// Schedules moving `entity` from manager `source` to manager `target`.
    pub fn schedule_transfer_entity(&mut self, source: K, target: K, entity: Entity) {
        self.entities_to_transfer.push(EntityTransferOp { source, target, entity });
    }

    /// Folds `other` into this bag, preserving per-key operation order.
    pub fn merge(&mut self, other: Self) {
        for (key, count) in other.entities_to_add {
            *self.entities_to_add.entry(key).or_insert(0) += count;
        }
        for (key, mut entities) in other.entities_to_remove {
            self.entities_to_remove.entry(key).or_default().append(&mut entities);
        }
        for (key, mut additions) in other.components_to_add {
            self.components_to_add.entry(key).or_default().append(&mut additions);
        }
        for (key, mut removals) in other.components_to_remove {
            self.components_to_remove.entry(key).or_default().append(&mut removals);
        }
        self.entities_to_transfer.extend(other.entities_to_transfer);
    }
}
