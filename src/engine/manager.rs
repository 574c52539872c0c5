//! # Entity Manager
//!
//! The storage engine: owns entity identity, the component columns and the
//! index engine, and exposes every structural operation of the runtime.
//!
//! ## Entity model
//! Entity slots are dense. Three parallel structures track identity:
//!
//! - `entity_versions[raw_id]` — current generation of the slot,
//! - `entity_alive[raw_id]` — liveness flag,
//! - `free_ids` — retired raw ids available for reuse.
//!
//! Removing an entity bumps its version; a slot whose version wraps to zero
//! is retired instead of reused, so stale handles can never match again.
//!
//! ## Component ownership
//! Component instances live in the factory's pools; columns hold raw
//! addresses. Every slot mutation pairs with the matching factory
//! construct/destroy call, and every mutation notifies the index engine so
//! queries stay coherent.
//!
//! ## Concurrency
//! `EntityManager` itself is single-threaded. During a tick, systems reach
//! it through [`AsyncEntityManager`] under the scheduler's conflict rule;
//! structural mutations happen only at quiescent points.

use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::engine::delegates::MulticastDelegate;
use crate::engine::error::{report, ComponentError, EntityError};
use crate::engine::factory::ComponentFactory;
use crate::engine::index::ComponentIndexes;
use crate::engine::map::ComponentMap;
use crate::engine::query::ComponentQuery;
use crate::engine::types::{Component, ComponentTypeId, Entity, EntityVersion, RawEntityId};

struct ComponentToAdd {
    entity: Entity,
    component: *mut u8,
    type_id: ComponentTypeId,
}

struct ComponentToRemove {
    entity: Entity,
    type_id: ComponentTypeId,
}

/// Storage engine for one set of entities and their components.
pub struct EntityManager {
    components: ComponentMap,
    indexes: ComponentIndexes,
    entity_alive: Vec<bool>,
    entity_versions: Vec<EntityVersion>,
    free_ids: Vec<RawEntityId>,
    scheduled_additions: Vec<ComponentToAdd>,
    scheduled_removals: Vec<ComponentToRemove>,
    factory: Arc<ComponentFactory>,
    /// Broadcast after every successful entity addition.
    pub on_entity_added: MulticastDelegate,
    /// Broadcast after every successful entity removal.
    pub on_entity_removed: MulticastDelegate,
}

// Component instances are Send+Sync by the `Component` bound; the raw
// addresses in columns, indexes and schedule queues all point at them.
unsafe impl Send for EntityManager {}

impl EntityManager {
    /// Creates an empty manager backed by `factory`.
    ///
    /// Managers that exchange entities via transfer must share one factory.
    pub fn new(factory: Arc<ComponentFactory>) -> Self {
        Self {
            components: ComponentMap::new(),
            indexes: ComponentIndexes::new(),
            entity_alive: Vec::new(),
            entity_versions: Vec::new(),
            free_ids: Vec::new(),
            scheduled_additions: Vec::new(),
            scheduled_removals: Vec::new(),
            factory,
            on_entity_added: MulticastDelegate::new(),
            on_entity_removed: MulticastDelegate::new(),
        }
    }

    /// The component factory backing this manager.
    #[inline]
    pub fn factory(&self) -> &Arc<ComponentFactory> {
        &self.factory
    }

    /// Creates a new entity and returns its handle.
    ///
    /// Reuses a retired raw id if one is available, otherwise extends the
    /// entity vectors. Broadcasts `on_entity_added`.
    pub fn add_entity(&mut self) -> Entity {
        let raw_id = match self.free_ids.pop() {
            Some(raw_id) => {
                self.entity_alive[raw_id as usize] = true;
                raw_id
            }
            None => {
                debug_assert_eq!(
                    self.entity_versions.len(),
                    self.entity_alive.len(),
                    "inconsistent entity vectors"
                );
                self.entity_versions.push(0);
                self.entity_alive.push(true);
                (self.entity_versions.len() - 1) as RawEntityId
            }
        };

        self.on_entity_added.broadcast();
        Entity::new(raw_id, self.entity_versions[raw_id as usize])
    }

    /// Removes `entity`, destroying all of its components.
    ///
    /// The slot's version is bumped; the raw id returns to the free list
    /// unless the version wrapped, in which case the id is retired (and the
    /// exhaustion is reported). Stale or missing handles are reported and
    /// the call is a no-op.
    pub fn remove_entity(&mut self, entity: Entity) {
        let raw_id = entity.raw_id() as usize;
        if !self.check_entity(entity) {
            return;
        }

        let factory = self.factory.clone();
        for (type_id, column) in self.components.iter_mut() {
            let component = column.take(raw_id);
            if !component.is_null() {
                factory.destroy_component(type_id, component);
            }
        }

        self.indexes.on_entity_removed(raw_id);
        self.on_entity_removed.broadcast();

        self.entity_alive[raw_id] = false;
        self.retire_or_free(entity.raw_id());
    }

    /// Returns `true` if `entity` is alive in this manager (version
    /// checked).
    pub fn has_entity(&self, entity: Entity) -> bool {
        let raw_id = entity.raw_id() as usize;
        raw_id < self.entity_versions.len()
            && self.entity_versions[raw_id] == entity.version()
            && self.entity_alive[raw_id]
    }

    /// Returns `true` if this manager holds at least one live entity.
    pub fn has_any_entity(&self) -> bool {
        self.entity_versions.len() != self.free_ids.len()
    }

    /// Collects every live entity, in raw-id order.
    pub fn collect_all_entities(&self) -> Vec<Entity> {
        let mut entities = Vec::with_capacity(self.entity_alive.len());
        for (raw_id, alive) in self.entity_alive.iter().enumerate() {
            if *alive {
                entities.push(Entity::new(raw_id as RawEntityId, self.entity_versions[raw_id]));
            }
        }
        entities
    }

    /// Collects the typed addresses of every component `entity` owns.
    pub fn get_all_entity_components(&self, entity: Entity) -> Vec<(ComponentTypeId, *mut u8)> {
        let raw_id = entity.raw_id() as usize;
        let mut components = Vec::new();
        if raw_id < self.entity_alive.len() && self.entity_alive[raw_id] {
            for (type_id, column) in self.components.iter() {
                let component = column.get(raw_id);
                if !component.is_null() {
                    components.push((type_id, component));
                }
            }
        }
        components
    }

    /// Returns `true` if `entity` owns a component of `type_id`.
    ///
    /// Reports through the error surface if the entity does not exist.
    pub fn does_entity_have_component(&self, entity: Entity, type_id: ComponentTypeId) -> bool {
        let raw_id = entity.raw_id() as usize;
        if raw_id < self.entity_alive.len() && self.entity_alive[raw_id] {
            return self.components.column(type_id).has(raw_id);
        }

        report(EntityError::NotFound { raw_id: entity.raw_id() }.into());
        false
    }

    /// Typed form of [`does_entity_have_component`].
    ///
    /// [`does_entity_have_component`]: Self::does_entity_have_component
    pub fn has_component<C: Component>(&self, entity: Entity) -> bool {
        self.does_entity_have_component(entity, ComponentTypeId::of::<C>())
    }

    /// Factory-constructs a `C` and installs it on `entity`.
    ///
    /// Returns the stable address of the new instance, or `None` if `C` was
    /// never registered. The entity must not already hold a `C`; a
    /// violation is reported and leaks the new instance.
    pub fn add_component<C: Component>(&mut self, entity: Entity) -> Option<NonNull<C>> {
        let component = self.add_component_by_type(entity, ComponentTypeId::of::<C>());
        NonNull::new(component.cast::<C>())
    }

    /// Factory-constructs a component of `type_id` and installs it.
    ///
    /// Returns the instance address even when installation failed (the
    /// instance then leaks, as reported).
    pub fn add_component_by_type(&mut self, entity: Entity, type_id: ComponentTypeId) -> *mut u8 {
        let component = match self.factory.clone().creation_fn(type_id) {
            Some(create) => create(),
            None => return std::ptr::null_mut(),
        };
        self.add_component_raw(entity, component, type_id);
        component
    }

    /// Installs the already-constructed `component` on `entity`, taking
    /// ownership of the address.
    ///
    /// Reports and leaks `component` if the entity does not exist or
    /// already holds this type.
    pub fn add_component_raw(
        &mut self,
        entity: Entity,
        component: *mut u8,
        type_id: ComponentTypeId,
    ) {
        if !self.check_entity(entity) {
            return;
        }

        self.install_component(entity.raw_id() as usize, component, type_id);
    }

    /// Removes and destroys the `type_id` component of `entity`.
    ///
    /// Missing entities are reported; a missing component is a no-op.
    pub fn remove_component_by_type(&mut self, entity: Entity, type_id: ComponentTypeId) {
        if !self.check_entity(entity) {
            return;
        }

        let raw_id = entity.raw_id() as usize;
        if let Some(column) = self.components.column_mut(type_id) {
            let component = column.take(raw_id);
            if !component.is_null() {
                self.factory.clone().destroy_component(type_id, component);
            }
        }

        self.indexes.on_component_removed(type_id, raw_id);
    }

    /// Typed form of [`remove_component_by_type`].
    ///
    /// [`remove_component_by_type`]: Self::remove_component_by_type
    pub fn remove_component<C: Component>(&mut self, entity: Entity) {
        self.remove_component_by_type(entity, ComponentTypeId::of::<C>());
    }

    /// Factory-constructs a `C` and schedules its installation on `entity`.
    ///
    /// The instance is usable by the caller immediately, but invisible to
    /// queries until [`execute_scheduled_actions`] runs. The entity must
    /// not hold a `C` by that time.
    ///
    /// [`execute_scheduled_actions`]: Self::execute_scheduled_actions
    pub fn schedule_add_component<C: Component>(&mut self, entity: Entity) -> Option<NonNull<C>> {
        let type_id = ComponentTypeId::of::<C>();
        let component = match self.factory.clone().creation_fn(type_id) {
            Some(create) => create(),
            None => return None,
        };
        self.schedule_add_component_raw(entity, component, type_id);
        NonNull::new(component.cast::<C>())
    }

    /// Schedules installation of an already-constructed component.
    pub fn schedule_add_component_raw(
        &mut self,
        entity: Entity,
        component: *mut u8,
        type_id: ComponentTypeId,
    ) {
        self.scheduled_additions.push(ComponentToAdd { entity, component, type_id });
    }

    /// Schedules removal of the `type_id` component from `entity`.
    pub fn schedule_remove_component_by_type(&mut self, entity: Entity, type_id: ComponentTypeId) {
        self.scheduled_removals.push(ComponentToRemove { entity, type_id });
    }

    /// Typed form of [`schedule_remove_component_by_type`].
    ///
    /// [`schedule_remove_component_by_type`]: Self::schedule_remove_component_by_type
    pub fn schedule_remove_component<C: Component>(&mut self, entity: Entity) {
        self.schedule_remove_component_by_type(entity, ComponentTypeId::of::<C>());
    }

    /// Applies scheduled additions in queue order, then scheduled removals
    /// in queue order.
    pub fn execute_scheduled_actions(&mut self) {
        let additions = std::mem::take(&mut self.scheduled_additions);
        for addition in additions {
            self.add_component_raw(addition.entity, addition.component, addition.type_id);
        }

        let removals = std::mem::take(&mut self.scheduled_removals);
        for removal in removals {
            self.remove_component_by_type(removal.entity, removal.type_id);
        }
    }

    /// Returns the component references of `entity` for query `Q`; absent
    /// components yield `None` in their slot.
    pub fn get_entity_components<Q: ComponentQuery>(&mut self, entity: Entity) -> Q::OptItem<'_> {
        let raw_id = entity.raw_id() as usize;
        let ptrs = if raw_id < self.entity_alive.len() && self.entity_alive[raw_id] {
            Q::row_or_null(&self.components, raw_id)
        } else {
            Q::null_row()
        };
        // SAFETY: non-null addresses point at live instances owned by this
        // manager's columns; the `&mut self` receiver serializes access.
        unsafe { Q::opt_item(ptrs) }
    }

    /// Appends the cached pointer rows of every entity matching `Q`.
    ///
    /// Order is the index insertion order and stays stable across calls as
    /// long as no structural mutation happens in between.
    pub fn get_components<Q: ComponentQuery>(&mut self, out: &mut Vec<Q::Ptrs>) {
        let rows = self.indexes.get_components::<Q>(&self.components);
        out.extend_from_slice(rows);
    }

    /// Appends `(entity, pointer row)` pairs for every entity matching `Q`.
    pub fn get_components_with_entities<Q: ComponentQuery>(
        &mut self,
        out: &mut Vec<(Entity, Q::Ptrs)>,
    ) {
        let Self { indexes, components, entity_versions, .. } = self;
        let (dense, rows) = indexes.get_index_with_components::<Q>(components);

        if out.len() + dense.len() > out.capacity() {
            out.reserve((out.len() + dense.len()).max(out.len() * 2) - out.len());
        }

        for (row, &raw_id) in dense.iter().enumerate() {
            let entity = Entity::new(raw_id, entity_versions[raw_id as usize]);
            out.push((entity, rows[row]));
        }
    }

    /// Applies `processor` to the component set of every entity matching
    /// `Q`, in index insertion order.
    pub fn for_each_component_set<Q: ComponentQuery>(
        &mut self,
        mut processor: impl FnMut(Q::Item<'_>),
    ) {
        let rows = self.indexes.get_components::<Q>(&self.components);
        for &ptrs in rows {
            // SAFETY: cached rows hold live addresses; the scheduler's
            // conflict rule guarantees exclusive access for writes.
            processor(unsafe { Q::item(ptrs) });
        }
    }

    /// Like [`for_each_component_set`], passing the entity as well.
    ///
    /// [`for_each_component_set`]: Self::for_each_component_set
    pub fn for_each_component_set_with_entity<Q: ComponentQuery>(
        &mut self,
        mut processor: impl FnMut(Entity, Q::Item<'_>),
    ) {
        let Self { indexes, components, entity_versions, .. } = self;
        let (dense, rows) = indexes.get_index_with_components::<Q>(components);
        for (row, &raw_id) in dense.iter().enumerate() {
            let entity = Entity::new(raw_id, entity_versions[raw_id as usize]);
            // SAFETY: as in `for_each_component_set`.
            processor(entity, unsafe { Q::item(rows[row]) });
        }
    }

    /// Unindexed scan: appends every entity holding all of `type_ids`.
    ///
    /// Used for dynamic queries whose signature is only known at runtime;
    /// no index is created.
    pub fn get_entities_having_components(
        &self,
        type_ids: &[ComponentTypeId],
        out: &mut Vec<Entity>,
    ) {
        if type_ids.is_empty() {
            return;
        }

        let mut columns = Vec::with_capacity(type_ids.len());
        let mut end = usize::MAX;
        for type_id in type_ids {
            let column = self.components.column(*type_id);
            end = end.min(column.len());
            columns.push(column);
        }

        for raw_id in 0..end {
            if columns.iter().all(|column| column.has(raw_id)) {
                out.push(Entity::new(
                    raw_id as RawEntityId,
                    self.entity_versions[raw_id],
                ));
            }
        }
    }

    /// Number of entities currently matching `Q`.
    ///
    /// Creates the index if it did not exist yet.
    pub fn get_matching_entities_count<Q: ComponentQuery>(&mut self) -> usize {
        self.indexes.get_index_size::<Q>(&self.components)
    }

    /// Moves `entity` with all its components into `other`.
    ///
    /// Component instances are **not** copied or moved in memory: only the
    /// column slots change hands, so addresses observed before the transfer
    /// stay valid in the destination. Both managers must share one factory.
    ///
    /// Returns the entity's handle in `other`, or the passed handle
    /// unchanged after reporting on self-transfer, foreign factories or
    /// stale entities.
    pub fn transfer_entity_to(&mut self, other: &mut EntityManager, entity: Entity) -> Entity {
        if std::ptr::eq(self, other) {
            report(EntityError::SelfTransfer { raw_id: entity.raw_id() }.into());
            return entity;
        }
        if !Arc::ptr_eq(&self.factory, &other.factory) {
            report(EntityError::ForeignFactory.into());
            return entity;
        }
        if !self.check_entity(entity) {
            return entity;
        }

        let raw_id = entity.raw_id() as usize;
        let new_entity = other.add_entity();

        for (type_id, column) in self.components.iter_mut() {
            let component = column.take(raw_id);
            if !component.is_null() {
                other.add_component_raw(new_entity, component, type_id);
            }
        }

        self.indexes.on_entity_removed(raw_id);
        self.entity_alive[raw_id] = false;
        self.retire_or_free(entity.raw_id());

        new_entity
    }

    /// Forces construction of the index for query `Q`.
    ///
    /// Indexes are created automatically on first query; calling this in
    /// advance just moves the full scan out of the first frame.
    pub fn init_index<Q: ComponentQuery>(&mut self) {
        self.indexes.init_index::<Q>(&self.components);
    }

    /// Fully repopulates every index from the component columns.
    ///
    /// Routine mutations keep indexes coherent incrementally; a rebuild is
    /// only needed after bulk storage reordering.
    pub fn rebuild_indexes(&mut self) {
        self.indexes.rebuild(&self.components);
    }

    /// Destroys all components, releases all entities and drops all
    /// indexes.
    pub fn clear(&mut self) {
        let factory = self.factory.clone();
        for (type_id, column) in self.components.iter_mut() {
            for (_, component) in column.iter_present() {
                factory.destroy_component(type_id, component);
            }
            column.clear();
        }
        self.components.clean_empty_vectors();

        for addition in self.scheduled_additions.drain(..) {
            factory.destroy_component(addition.type_id, addition.component);
        }
        self.scheduled_removals.clear();

        self.entity_alive.clear();
        self.entity_versions.clear();
        self.free_ids.clear();
        self.indexes.clear();
    }

    /// Trims trailing null slots of every column and removes columns left
    /// without slots.
    pub fn clear_caches(&mut self) {
        for (_, column) in self.components.iter_mut() {
            column.trim_trailing_nulls();
        }
        self.components.clean_empty_vectors();
    }

    /// Rewrites this manager with a deep copy of `other`'s entities.
    ///
    /// Every component type involved must have been registered with clone
    /// support; missing cloners are reported and leave null slots.
    pub fn copy_entities_from(&mut self, other: &EntityManager) {
        self.clear();

        self.entity_alive = other.entity_alive.clone();
        self.entity_versions = other.entity_versions.clone();
        self.free_ids = other.free_ids.clone();

        let factory = self.factory.clone();
        for (type_id, source_column) in other.components.iter() {
            let column = self.components.get_or_create_column(type_id);
            for (raw_id, component) in source_column.iter_present() {
                column.put(raw_id, factory.clone_component(type_id, component));
            }
        }
    }

    /// Read-only view of the component columns, e.g. for serialization.
    pub fn components_data(&self) -> &ComponentMap {
        &self.components
    }

    /// Validates existence and version of `entity`, reporting violations.
    fn check_entity(&self, entity: Entity) -> bool {
        let raw_id = entity.raw_id() as usize;
        if raw_id >= self.entity_alive.len() || !self.entity_alive[raw_id] {
            report(EntityError::NotFound { raw_id: entity.raw_id() }.into());
            return false;
        }
        if self.entity_versions[raw_id] != entity.version() {
            report(
                EntityError::Stale {
                    raw_id: entity.raw_id(),
                    recorded_version: self.entity_versions[raw_id],
                    supplied_version: entity.version(),
                }
                .into(),
            );
            return false;
        }
        true
    }

    /// Bumps the slot version and requeues the id, retiring it on wrap.
    fn retire_or_free(&mut self, raw_id: RawEntityId) {
        let slot = raw_id as usize;
        self.entity_versions[slot] = self.entity_versions[slot].wrapping_add(1);
        if self.entity_versions[slot] != 0 {
            self.free_ids.push(raw_id);
        } else {
            report(EntityError::VersionExhausted { raw_id }.into());
        }
    }

    fn install_component(&mut self, raw_id: usize, component: *mut u8, type_id: ComponentTypeId) {
        let column = self.components.get_or_create_column(type_id);
        if column.get(raw_id).is_null() {
            column.put(raw_id, component);
        } else {
            report(
                ComponentError::AlreadyPresent { raw_id: raw_id as RawEntityId, type_id }.into(),
            );
        }
        self.indexes.on_component_added(type_id, raw_id, &self.components);
    }
}

impl Drop for EntityManager {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Shared handle through which systems reach an [`EntityManager`] during a
/// tick.
///
/// The wrapped manager is only ever accessed through access tokens minted
/// at system registration; the scheduler's conflict rule and quiescent-state
/// protocol make the interior mutability sound.
pub struct AsyncEntityManager {
    inner: UnsafeCell<EntityManager>,
}

// Access goes through tokens whose claims the scheduler serializes.
unsafe impl Send for AsyncEntityManager {}
unsafe impl Sync for AsyncEntityManager {}

impl AsyncEntityManager {
    /// Wraps a manager for shared use by scheduled systems.
    pub fn new(manager: EntityManager) -> Self {
        Self { inner: UnsafeCell::new(manager) }
    }

    /// Unwraps the inner manager.
    pub fn into_inner(self) -> EntityManager {
        self.inner.into_inner()
    }

    /// Grants mutable access to the wrapped manager.
    ///
    /// # Safety
    /// The caller must hold an access token whose claims cover the intended
    /// operations, and the scheduler must currently permit them (conflict
    /// rule for component access, quiescence for structural mutation).
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn manager(&self) -> &mut EntityManager {
        // SAFETY: forwarded caller contract.
        unsafe { &mut *self.inner.get() }
    }
}
