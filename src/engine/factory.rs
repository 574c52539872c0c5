//! # Component Factory
//!
//! Registry mapping component types to their lifecycle callables.
//!
//! ## Purpose
//! The factory decouples component type identity from storage: for every
//! registered type it stores a construct callable, a destroy callable, and
//! (for copyable registrations) a clone callable, all operating on raw
//! addresses. The per-type [`ComponentPool`]s live behind these callables,
//! so every other subsystem handles components purely as addresses.
//!
//! ## Steady state
//! The factory is read-only after setup: all registrations happen during
//! initialization, before any entity manager starts serving systems.
//! Registering during steady state is not supported.
//!
//! ## Empty component types
//! A component type with no data stores no instances: construct returns a
//! shared sentinel address, destroy is a no-op and clone returns its input.
//! Columns and indexes treat the sentinel like any other present address.
//!
//! ## Failure
//! Lookup misses (unknown type id) are reported through the error surface
//! and yield no-op callables or null results, per the engine's fail-fast
//! reporting policy.

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::error::{report, FactoryError};
use crate::engine::pool::{default_chunk_capacity, ComponentPool, GrowthStrategy};
use crate::engine::types::{Component, ComponentTypeId};

/// Constructs a default-initialized instance, returning its raw address.
pub type CreationFn = Box<dyn Fn() -> *mut u8 + Send + Sync>;
/// Destroys the instance at the given address and reclaims its slot.
pub type DeletionFn = Box<dyn Fn(*mut u8) + Send + Sync>;
/// Clones the instance at the given address into a fresh slot.
pub type CloneFn = Box<dyn Fn(*mut u8) -> *mut u8 + Send + Sync>;

/// Registry of component lifecycle callables, keyed by [`ComponentTypeId`].
#[derive(Default)]
pub struct ComponentFactory {
    creators: HashMap<ComponentTypeId, CreationFn>,
    deleters: HashMap<ComponentTypeId, DeletionFn>,
    cloners: HashMap<ComponentTypeId, CloneFn>,
}

impl ComponentFactory {
    /// Creates an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers component type `C` with the default pool parameters.
    pub fn register_component<C: Component + Default>(&mut self) {
        self.register_component_with::<C>(default_chunk_capacity::<C>(), false, None);
    }

    /// Registers component type `C` with explicit pool parameters.
    ///
    /// ## Parameters
    /// - `chunk_capacity`: slot count of the pool's first chunk.
    /// - `preallocate`: allocate the first chunk during registration.
    /// - `grow`: growth strategy; `None` doubles chunk capacity.
    pub fn register_component_with<C: Component + Default>(
        &mut self,
        chunk_capacity: usize,
        preallocate: bool,
        grow: Option<GrowthStrategy>,
    ) {
        let _ = self.install_pool::<C>(chunk_capacity, preallocate, grow);
    }

    /// Registers component type `C` with clone support.
    ///
    /// Identical to [`register_component`](Self::register_component), plus a
    /// clone callable used by [`clone_component`](Self::clone_component) and
    /// manager copying. Clones are acquired from the same pool as regular
    /// instances, so release goes through the shared deleter.
    pub fn register_copyable_component<C: Component + Default + Clone>(&mut self) {
        let type_id = ComponentTypeId::of::<C>();
        let Some(pool) = self.install_pool::<C>(default_chunk_capacity::<C>(), false, None) else {
            // Empty type: install_pool already mapped clone to identity.
            return;
        };

        self.cloners.insert(
            type_id,
            Box::new(move |component| {
                if component.is_null() {
                    return std::ptr::null_mut();
                }
                // SAFETY: the source address points at a live instance of C
                // owned by some column slot.
                let source = unsafe { &*component.cast::<C>() };
                pool.lock().acquire_with(source.clone()).as_ptr().cast::<u8>()
            }),
        );
    }

    /// Installs creator and deleter for `C`; returns the pool, or `None`
    /// for empty types (which bypass pooling entirely).
    fn install_pool<C: Component + Default>(
        &mut self,
        chunk_capacity: usize,
        preallocate: bool,
        grow: Option<GrowthStrategy>,
    ) -> Option<Arc<Mutex<ComponentPool<C>>>> {
        let type_id = ComponentTypeId::of::<C>();

        if std::mem::size_of::<C>() == 0 {
            // The component has no data; every instance maps to the shared
            // sentinel address and nothing is ever allocated or destroyed.
            self.creators.insert(
                type_id,
                Box::new(|| NonNull::<C>::dangling().as_ptr().cast::<u8>()),
            );
            self.deleters.insert(type_id, Box::new(|_| {}));
            self.cloners.insert(type_id, Box::new(|component| component));
            return None;
        }

        let pool = Arc::new(Mutex::new(ComponentPool::<C>::with_chunk_capacity(
            chunk_capacity,
            preallocate,
            grow,
        )));

        let creation_pool = pool.clone();
        self.creators.insert(
            type_id,
            Box::new(move || creation_pool.lock().acquire().as_ptr().cast::<u8>()),
        );

        let deletion_pool = pool.clone();
        self.deleters.insert(
            type_id,
            Box::new(move |component| {
                if let Some(component) = NonNull::new(component.cast::<C>()) {
                    // SAFETY: addresses handed to the deleter originate from
                    // this pool's acquire and are released exactly once; the
                    // storage engine nulls the owning slot before calling.
                    unsafe { deletion_pool.lock().release(component) };
                }
            }),
        );

        Some(pool)
    }

    /// Returns the construct callable for `type_id`.
    ///
    /// Reports a lookup miss through the error surface if the type was
    /// never registered.
    pub fn creation_fn(&self, type_id: ComponentTypeId) -> Option<&CreationFn> {
        let callable = self.creators.get(&type_id);
        if callable.is_none() {
            report(FactoryError::UnknownType { type_id }.into());
        }
        callable
    }

    /// Returns the destroy callable for `type_id`.
    ///
    /// Reports a lookup miss through the error surface if the type was
    /// never registered.
    pub fn deletion_fn(&self, type_id: ComponentTypeId) -> Option<&DeletionFn> {
        let callable = self.deleters.get(&type_id);
        if callable.is_none() {
            report(FactoryError::UnknownType { type_id }.into());
        }
        callable
    }

    /// Returns the clone callable for `type_id`.
    ///
    /// Reports through the error surface if the type was never registered
    /// or was registered without clone support.
    pub fn clone_fn(&self, type_id: ComponentTypeId) -> Option<&CloneFn> {
        let callable = self.cloners.get(&type_id);
        if callable.is_none() {
            if self.creators.contains_key(&type_id) {
                report(FactoryError::CloneUnsupported { type_id }.into());
            } else {
                report(FactoryError::UnknownType { type_id }.into());
            }
        }
        callable
    }

    /// Constructs an instance of `type_id`, returning its address.
    ///
    /// Returns null (without reporting) for unregistered ids, mirroring the
    /// tolerant dynamic-creation path used by host tooling.
    pub fn create_by_id(&self, type_id: ComponentTypeId) -> *mut u8 {
        match self.creators.get(&type_id) {
            Some(create) => create(),
            None => std::ptr::null_mut(),
        }
    }

    /// Destroys the instance at `component`, ignoring null addresses.
    pub fn destroy_component(&self, type_id: ComponentTypeId, component: *mut u8) {
        if component.is_null() {
            return;
        }
        if let Some(destroy) = self.deletion_fn(type_id) {
            destroy(component);
        }
    }

    /// Clones the instance at `component` into a fresh address.
    pub fn clone_component(&self, type_id: ComponentTypeId, component: *mut u8) -> *mut u8 {
        match self.clone_fn(type_id) {
            Some(clone) => clone(component),
            None => std::ptr::null_mut(),
        }
    }

    /// Returns `true` if `type_id` was registered.
    #[inline]
    pub fn is_registered(&self, type_id: ComponentTypeId) -> bool {
        self.creators.contains_key(&type_id)
    }

    /// Invokes `visitor` for every registered component type.
    ///
    /// Iteration order is unspecified.
    pub fn for_each_component_type(&self, mut visitor: impl FnMut(ComponentTypeId)) {
        for type_id in self.creators.keys() {
            visitor(*type_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Clone, PartialEq, Debug)]
    struct Health {
        points: u32,
    }

    #[derive(Default, Clone, Copy)]
    struct Tag;

    #[test]
    fn construct_and_destroy_roundtrip() {
        let mut factory = ComponentFactory::new();
        factory.register_component::<Health>();

        let type_id = ComponentTypeId::of::<Health>();
        let component = factory.create_by_id(type_id);
        assert!(!component.is_null());
        unsafe {
            assert_eq!(*component.cast::<Health>(), Health::default());
        }
        factory.destroy_component(type_id, component);
    }

    #[test]
    fn empty_components_share_one_sentinel() {
        let mut factory = ComponentFactory::new();
        factory.register_component::<Tag>();

        let type_id = ComponentTypeId::of::<Tag>();
        let first = factory.create_by_id(type_id);
        let second = factory.create_by_id(type_id);
        assert!(!first.is_null());
        assert_eq!(first, second);
        factory.destroy_component(type_id, first);
        factory.destroy_component(type_id, second);
    }

    #[test]
    fn create_by_id_tolerates_unknown_types() {
        let factory = ComponentFactory::new();
        let ptr = factory.create_by_id(ComponentTypeId::of::<Health>());
        assert!(ptr.is_null());
    }

    #[test]
    fn iteration_visits_every_registered_type() {
        let mut factory = ComponentFactory::new();
        factory.register_component::<Health>();
        factory.register_component::<Tag>();

        let mut seen = Vec::new();
        factory.for_each_component_type(|type_id| seen.push(type_id));
        seen.sort();

        let mut expected = vec![ComponentTypeId::of::<Health>(), ComponentTypeId::of::<Tag>()];
        expected.sort();
        assert_eq!(seen, expected);
    }
}
