//! # Access Tokens
//!
//! Compile-time capability objects gating what a system may do.
//!
//! ## Purpose
//! A system never touches an [`AsyncEntityManager`] directly: every
//! operation goes through a token the system received at registration. The
//! systems manager is the only call site able to mint tokens (minting
//! requires the crate-private [`MintKey`]), so a system's token set is
//! exactly its declared access set, and the scheduler can derive conflicts
//! and synchronization requirements from the declarations alone.
//!
//! ## Token kinds
//! - [`ComponentFilter<Q>`] — read access for `Read` elements, write access
//!   for `Write` elements of the query tuple.
//! - [`ComponentAdder<C>`] — write claim on `C`; marks the system
//!   post-sync.
//! - [`ComponentRemover<C>`] — post-sync; no component data claim.
//! - [`EntitySelector<C>`] — presence checks; no claim.
//! - [`EntityAdder`], [`EntityRemover`], [`EntityTransferer`] — entity
//!   lifecycle; post-sync.
//! - [`ScheduledActionsExecutor`] — exclusive-global.
//! - [`InnerDataAccessor`] — exclusive-global full access; also handed to
//!   the host's init callback.
//!
//! All tokens are zero-sized; at runtime they only select code paths.

use std::hash::Hash;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::engine::manager::{AsyncEntityManager, EntityManager};
use crate::engine::operations::ScheduledOperations;
use crate::engine::query::ComponentQuery;
use crate::engine::types::{Component, ComponentTypeId, Entity};

/// Capability required to mint tokens; constructible only inside the crate.
pub struct MintKey {
    _private: (),
}

impl MintKey {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }
}

/// The access set a system declared through its tokens.
#[derive(Default, Clone, Debug)]
pub struct AccessClaims {
    /// Component types read.
    pub reads: Vec<ComponentTypeId>,
    /// Component types written.
    pub writes: Vec<ComponentTypeId>,
    /// The system's effects must be applied at a quiescent point.
    pub needs_post_sync: bool,
    /// The system may not run concurrently with anything.
    pub exclusive_global: bool,
}

impl AccessClaims {
    /// Pairwise conflict rule: two systems conflict iff one's write set
    /// intersects the other's read or write set. Exclusive-global systems
    /// are handled separately by the tracer's running-set rule.
    pub fn conflicts_with(&self, other: &AccessClaims) -> bool {
        let touches = |claims: &AccessClaims, type_id: &ComponentTypeId| {
            claims.reads.contains(type_id) || claims.writes.contains(type_id)
        };
        self.writes.iter().any(|type_id| touches(other, type_id))
            || other.writes.iter().any(|type_id| touches(self, type_id))
    }
}

/// A capability object mintable only by system registration.
pub trait AccessToken: Sized + Send + Sync + 'static {
    /// Creates the token and records its access claim.
    fn mint(key: MintKey, claims: &mut AccessClaims) -> Self;
}

/// Read/write access to the component sets matching query `Q`.
pub struct ComponentFilter<Q: ComponentQuery> {
    _marker: PhantomData<fn() -> Q>,
}

impl<Q: ComponentQuery> AccessToken for ComponentFilter<Q> {
    fn mint(_key: MintKey, claims: &mut AccessClaims) -> Self {
        claims.reads.extend(Q::read_type_ids());
        claims.writes.extend(Q::write_type_ids());
        Self { _marker: PhantomData }
    }
}

impl<Q: ComponentQuery> ComponentFilter<Q> {
    /// Appends the cached pointer rows of every matching entity.
    pub fn get_components(&self, manager: &AsyncEntityManager, out: &mut Vec<Q::Ptrs>) {
        // SAFETY: the token's claims cover this access.
        unsafe { manager.manager() }.get_components::<Q>(out);
    }

    /// Appends `(entity, pointer row)` pairs for every matching entity.
    pub fn get_components_with_entities(
        &self,
        manager: &AsyncEntityManager,
        out: &mut Vec<(Entity, Q::Ptrs)>,
    ) {
        // SAFETY: the token's claims cover this access.
        unsafe { manager.manager() }.get_components_with_entities::<Q>(out);
    }

    /// Applies `processor` to every matching component set.
    pub fn for_each_component_set(
        &self,
        manager: &AsyncEntityManager,
        processor: impl FnMut(Q::Item<'_>),
    ) {
        // SAFETY: the token's claims cover this access.
        unsafe { manager.manager() }.for_each_component_set::<Q>(processor);
    }

    /// Applies `processor` to every matching entity and component set.
    pub fn for_each_component_set_with_entity(
        &self,
        manager: &AsyncEntityManager,
        processor: impl FnMut(Entity, Q::Item<'_>),
    ) {
        // SAFETY: the token's claims cover this access.
        unsafe { manager.manager() }.for_each_component_set_with_entity::<Q>(processor);
    }

    /// Returns `entity`'s components for `Q`; absent ones yield `None`.
    pub fn get_entity_components<'m>(
        &self,
        manager: &'m AsyncEntityManager,
        entity: Entity,
    ) -> Q::OptItem<'m> {
        // SAFETY: the token's claims cover this access.
        unsafe { manager.manager() }.get_entity_components::<Q>(entity)
    }
}

/// Permission to add components of type `C`.
pub struct ComponentAdder<C: Component> {
    _marker: PhantomData<fn() -> C>,
}

impl<C: Component> AccessToken for ComponentAdder<C> {
    fn mint(_key: MintKey, claims: &mut AccessClaims) -> Self {
        claims.writes.push(ComponentTypeId::of::<C>());
        claims.needs_post_sync = true;
        Self { _marker: PhantomData }
    }
}

impl<C: Component> ComponentAdder<C> {
    /// Immediately installs a factory-constructed `C` on `entity`.
    pub fn add_component(
        &self,
        manager: &AsyncEntityManager,
        entity: Entity,
    ) -> Option<NonNull<C>> {
        // SAFETY: the token claims a write on C.
        unsafe { manager.manager() }.add_component::<C>(entity)
    }

    /// Enqueues installation on the manager's own schedule queue.
    ///
    /// The instance is usable immediately but invisible to queries until
    /// the manager's scheduled actions execute.
    pub fn schedule_add_component(
        &self,
        manager: &AsyncEntityManager,
        entity: Entity,
    ) -> Option<NonNull<C>> {
        // SAFETY: the schedule queue is append-only for the running system.
        unsafe { manager.manager() }.schedule_add_component::<C>(entity)
    }

    /// Constructs a `C` from `manager`'s factory and records its
    /// installation in the deferred bag under `key`.
    pub fn schedule_add_component_to<K: Eq + Hash>(
        &self,
        manager: &AsyncEntityManager,
        operations: &mut ScheduledOperations<K>,
        key: K,
        entity: Entity,
    ) -> Option<NonNull<C>> {
        let type_id = ComponentTypeId::of::<C>();
        // SAFETY: only the factory is touched, and it is read-only.
        let factory = unsafe { manager.manager() }.factory().clone();
        let component = factory.creation_fn(type_id)?();
        operations.schedule_add_component(key, entity, type_id, component);
        NonNull::new(component.cast::<C>())
    }
}

/// Permission to remove components of type `C`.
pub struct ComponentRemover<C: Component> {
    _marker: PhantomData<fn() -> C>,
}

impl<C: Component> AccessToken for ComponentRemover<C> {
    fn mint(_key: MintKey, claims: &mut AccessClaims) -> Self {
        claims.needs_post_sync = true;
        Self { _marker: PhantomData }
    }
}

impl<C: Component> ComponentRemover<C> {
    /// Enqueues removal on the manager's own schedule queue.
    pub fn schedule_remove_component(&self, manager: &AsyncEntityManager, entity: Entity) {
        // SAFETY: the schedule queue is append-only for the running system.
        unsafe { manager.manager() }.schedule_remove_component::<C>(entity);
    }

    /// Records removal in the deferred bag under `key`.
    pub fn schedule_remove_component_in<K: Eq + Hash>(
        &self,
        operations: &mut ScheduledOperations<K>,
        key: K,
        entity: Entity,
    ) {
        operations.schedule_remove_component(key, entity, ComponentTypeId::of::<C>());
    }
}

/// Permission to check presence of component type `C`.
pub struct EntitySelector<C: Component> {
    _marker: PhantomData<fn() -> C>,
}

impl<C: Component> AccessToken for EntitySelector<C> {
    fn mint(_key: MintKey, _claims: &mut AccessClaims) -> Self {
        Self { _marker: PhantomData }
    }
}

impl<C: Component> EntitySelector<C> {
    /// Returns `true` if `entity` owns a `C`.
    pub fn does_entity_have_component(&self, manager: &AsyncEntityManager, entity: Entity) -> bool {
        // SAFETY: presence checks read column metadata only.
        unsafe { manager.manager() }.has_component::<C>(entity)
    }
}

/// Permission to create entities.
pub struct EntityAdder {
    _marker: PhantomData<()>,
}

impl AccessToken for EntityAdder {
    fn mint(_key: MintKey, claims: &mut AccessClaims) -> Self {
        claims.needs_post_sync = true;
        Self { _marker: PhantomData }
    }
}

impl EntityAdder {
    /// Immediately creates an entity in `manager`.
    pub fn add_entity(&self, manager: &AsyncEntityManager) -> Entity {
        // SAFETY: the token marks the system post-sync.
        unsafe { manager.manager() }.add_entity()
    }

    /// Records a blank entity spawn in the deferred bag under `key`.
    pub fn schedule_add_entity<K: Eq + Hash>(&self, operations: &mut ScheduledOperations<K>, key: K) {
        operations.schedule_add_entity(key);
    }
}

/// Permission to remove entities.
pub struct EntityRemover {
    _marker: PhantomData<()>,
}

impl AccessToken for EntityRemover {
    fn mint(_key: MintKey, claims: &mut AccessClaims) -> Self {
        claims.needs_post_sync = true;
        Self { _marker: PhantomData }
    }
}

impl EntityRemover {
    /// Immediately removes `entity` from `manager`.
    pub fn remove_entity(&self, manager: &AsyncEntityManager, entity: Entity) {
        // SAFETY: the token marks the system post-sync.
        unsafe { manager.manager() }.remove_entity(entity);
    }

    /// Records removal in the deferred bag under `key`.
    pub fn schedule_remove_entity<K: Eq + Hash>(
        &self,
        operations: &mut ScheduledOperations<K>,
        key: K,
        entity: Entity,
    ) {
        operations.schedule_remove_entity(key, entity);
    }
}

/// Permission to move entities between managers.
pub struct EntityTransferer {
    _marker: PhantomData<()>,
}

impl AccessToken for EntityTransferer {
    fn mint(_key: MintKey, claims: &mut AccessClaims) -> Self {
        claims.needs_post_sync = true;
        Self { _marker: PhantomData }
    }
}

impl EntityTransferer {
    /// Immediately transfers `entity` from `source` to `target`.
    pub fn transfer_entity(
        &self,
        source: &AsyncEntityManager,
        target: &AsyncEntityManager,
        entity: Entity,
    ) -> Entity {
        if std::ptr::eq(source, target) {
            crate::engine::error::report(
                crate::engine::error::EntityError::SelfTransfer { raw_id: entity.raw_id() }.into(),
            );
            return entity;
        }
        // SAFETY: the token marks the system post-sync, and the managers
        // are distinct objects.
        unsafe { source.manager().transfer_entity_to(target.manager(), entity) }
    }

    /// Records a transfer in the deferred bag.
    pub fn schedule_transfer_entity<K: Eq + Hash>(
        &self,
        operations: &mut ScheduledOperations<K>,
        source: K,
        target: K,
        entity: Entity,
    ) {
        operations.schedule_transfer_entity(source, target, entity);
    }
}

/// Permission to flush a manager's schedule queues.
pub struct ScheduledActionsExecutor {
    _marker: PhantomData<()>,
}

impl AccessToken for ScheduledActionsExecutor {
    fn mint(_key: MintKey, claims: &mut AccessClaims) -> Self {
        claims.exclusive_global = true;
        Self { _marker: PhantomData }
    }
}

impl ScheduledActionsExecutor {
    /// Applies the manager's scheduled component additions and removals.
    pub fn execute_scheduled_actions(&self, manager: &AsyncEntityManager) {
        // SAFETY: the token is exclusive-global; nothing else runs.
        unsafe { manager.manager() }.execute_scheduled_actions();
    }
}

/// Unrestricted access to the wrapped manager.
///
/// Handed to the host's init callback and available to systems that
/// declared it; such systems run with nothing else concurrent.
pub struct InnerDataAccessor {
    _marker: PhantomData<()>,
}

impl AccessToken for InnerDataAccessor {
    fn mint(_key: MintKey, claims: &mut AccessClaims) -> Self {
        claims.exclusive_global = true;
        claims.needs_post_sync = true;
        Self { _marker: PhantomData }
    }
}

impl InnerDataAccessor {
    pub(crate) fn new_internal() -> Self {
        Self { _marker: PhantomData }
    }

    /// Runs `action` with mutable access to the wrapped manager.
    pub fn with_manager<R>(
        &self,
        manager: &AsyncEntityManager,
        action: impl FnOnce(&mut EntityManager) -> R,
    ) -> R {
        // SAFETY: the token is exclusive-global; nothing else runs.
        action(unsafe { manager.manager() })
    }
}

/// A tuple of tokens minted together at registration.
pub trait TokenSet: Sized {
    /// Mints every token in the set, merging all claims.
    fn mint_all(claims: &mut AccessClaims) -> Self;
}

impl TokenSet for () {
    fn mint_all(_claims: &mut AccessClaims) -> Self {}
}

macro_rules! impl_token_set {
    ($($token:ident),+) => {
        impl<$($token: AccessToken),+> TokenSet for ($($token,)+) {
            fn mint_all(claims: &mut AccessClaims) -> Self {
                ($($token::mint(MintKey::new(), claims),)+)
            }
        }
    };
}

impl_token_set!(A);
impl_token_set!(A, B);
impl_token_set!(A, B, C);
impl_token_set!(A, B, C, D);
impl_token_set!(A, B, C, D, E);
impl_token_set!(A, B, C, D, E, F);
impl_token_set!(A, B, C, D, E, F, G);
impl_token_set!(A, B, C, D, E, F, G, H);
