//! Query element and component-set tuple traits.
//!
//! A query names an ordered set of component types together with the access
//! mode for each: [`Read<C>`] claims shared access, [`Write<C>`] claims
//! exclusive access. Tuples of elements implement [`ComponentQuery`], which
//! the index engine and the entity manager use to:
//!
//! - derive the query's signature (the component type ids, in declaration
//!   order and sorted),
//! - split the declared access into read and write sets for scheduling,
//! - resolve cached pointer tuples from the component map,
//! - materialize per-row reference tuples for iteration.
//!
//! The access mode is a type-level distinction only; both modes resolve to
//! the same raw pointer, and the scheduler's conflict rule is what makes
//! handing out `&mut` through [`Write<C>`] sound.

use std::marker::PhantomData;

use crate::engine::map::ComponentMap;
use crate::engine::types::{Component, ComponentTypeId};

/// Marker claiming shared (read) access to component type `C`.
pub struct Read<C: Component>(PhantomData<C>);

/// Marker claiming exclusive (write) access to component type `C`.
pub struct Write<C: Component>(PhantomData<C>);

/// One element of a query tuple: a component type plus an access mode.
pub trait QueryElement: 'static {
    /// The component type accessed.
    type Target: Component;
    /// Reference form handed to iteration closures.
    type Item<'w>;
    /// Optional reference form for per-entity lookups with absent slots.
    type OptItem<'w>;
    /// Whether this element claims exclusive access.
    const MUTABLE: bool;

    /// The component type id of [`Self::Target`].
    #[inline]
    fn type_id() -> ComponentTypeId {
        ComponentTypeId::of::<Self::Target>()
    }

    /// Turns a non-null component address into the reference form.
    ///
    /// # Safety
    /// `component` must point at a live `Target` instance, and the
    /// scheduler's conflict rule must guarantee the produced reference does
    /// not alias a concurrent write.
    unsafe fn item<'w>(component: *mut Self::Target) -> Self::Item<'w>;

    /// Like [`item`](Self::item), but tolerates null addresses.
    ///
    /// # Safety
    /// Same contract as [`item`](Self::item) for non-null addresses.
    unsafe fn opt_item<'w>(component: *mut Self::Target) -> Self::OptItem<'w>;
}

impl<C: Component> QueryElement for Read<C> {
    type Target = C;
    type Item<'w> = &'w C;
    type OptItem<'w> = Option<&'w C>;
    const MUTABLE: bool = false;

    #[inline]
    unsafe fn item<'w>(component: *mut C) -> &'w C {
        // SAFETY: forwarded caller contract.
        unsafe { &*component }
    }

    #[inline]
    unsafe fn opt_item<'w>(component: *mut C) -> Option<&'w C> {
        if component.is_null() {
            None
        } else {
            // SAFETY: forwarded caller contract.
            Some(unsafe { &*component })
        }
    }
}

impl<C: Component> QueryElement for Write<C> {
    type Target = C;
    type Item<'w> = &'w mut C;
    type OptItem<'w> = Option<&'w mut C>;
    const MUTABLE: bool = true;

    #[inline]
    unsafe fn item<'w>(component: *mut C) -> &'w mut C {
        // SAFETY: forwarded caller contract.
        unsafe { &mut *component }
    }

    #[inline]
    unsafe fn opt_item<'w>(component: *mut C) -> Option<&'w mut C> {
        if component.is_null() {
            None
        } else {
            // SAFETY: forwarded caller contract.
            Some(unsafe { &mut *component })
        }
    }
}

/// An ordered set of query elements, implemented for tuples up to eight.
pub trait ComponentQuery: 'static {
    /// Cached pointer tuple, one raw pointer per element in declaration
    /// order.
    type Ptrs: Copy + 'static;
    /// Reference tuple handed to iteration closures.
    type Item<'w>;
    /// Optional-reference tuple for per-entity lookups.
    type OptItem<'w>;

    /// Component type ids in declaration order.
    fn type_ids() -> Vec<ComponentTypeId>;

    /// Component type ids, sorted; the signature identity of this query.
    fn sorted_type_ids() -> Vec<ComponentTypeId> {
        let mut ids = Self::type_ids();
        ids.sort_unstable();
        ids
    }

    /// Type ids claimed for shared access.
    fn read_type_ids() -> Vec<ComponentTypeId>;

    /// Type ids claimed for exclusive access.
    fn write_type_ids() -> Vec<ComponentTypeId>;

    /// Resolves the pointer tuple for `raw_id`, or `None` if any component
    /// is absent.
    fn row_from_map(map: &ComponentMap, raw_id: usize) -> Option<Self::Ptrs>;

    /// Resolves the pointer tuple for `raw_id`, leaving null pointers in
    /// the slots of absent components.
    fn row_or_null(map: &ComponentMap, raw_id: usize) -> Self::Ptrs;

    /// An all-null pointer tuple, used for lookups on dead entities.
    fn null_row() -> Self::Ptrs;

    /// Materializes the reference tuple for a fully resolved row.
    ///
    /// # Safety
    /// Every pointer in `ptrs` must be live, and the scheduler's conflict
    /// rule must guarantee exclusive access for `Write` elements.
    unsafe fn item<'w>(ptrs: Self::Ptrs) -> Self::Item<'w>;

    /// Materializes the optional-reference tuple for a row that may contain
    /// nulls.
    ///
    /// # Safety
    /// Same contract as [`item`](Self::item) for the non-null pointers.
    unsafe fn opt_item<'w>(ptrs: Self::Ptrs) -> Self::OptItem<'w>;
}

macro_rules! impl_component_query {
    ($(($element:ident, $idx:tt)),+) => {
        impl<$($element: QueryElement),+> ComponentQuery for ($($element,)+) {
            type Ptrs = ($(*mut $element::Target,)+);
            type Item<'w> = ($($element::Item<'w>,)+);
            type OptItem<'w> = ($($element::OptItem<'w>,)+);

            fn type_ids() -> Vec<ComponentTypeId> {
                vec![$($element::type_id()),+]
            }

            fn read_type_ids() -> Vec<ComponentTypeId> {
                let mut ids = Vec::new();
                $(if !$element::MUTABLE { ids.push($element::type_id()); })+
                ids
            }

            fn write_type_ids() -> Vec<ComponentTypeId> {
                let mut ids = Vec::new();
                $(if $element::MUTABLE { ids.push($element::type_id()); })+
                ids
            }

            fn row_from_map(map: &ComponentMap, raw_id: usize) -> Option<Self::Ptrs> {
                Some(($({
                    let component = map.column($element::type_id()).get(raw_id);
                    if component.is_null() {
                        return None;
                    }
                    component.cast::<$element::Target>()
                },)+))
            }

            fn row_or_null(map: &ComponentMap, raw_id: usize) -> Self::Ptrs {
                ($(
                    map.column($element::type_id()).get(raw_id).cast::<$element::Target>(),
                )+)
            }

            fn null_row() -> Self::Ptrs {
                ($(
                    std::ptr::null_mut::<$element::Target>(),
                )+)
            }

            unsafe fn item<'w>(ptrs: Self::Ptrs) -> Self::Item<'w> {
                // SAFETY: forwarded caller contract.
                ($(unsafe { $element::item(ptrs.$idx) },)+)
            }

            unsafe fn opt_item<'w>(ptrs: Self::Ptrs) -> Self::OptItem<'w> {
                // SAFETY: forwarded caller contract.
                ($(unsafe { $element::opt_item(ptrs.$idx) },)+)
            }
        }
    };
}

impl_component_query!((A, 0));
impl_component_query!((A, 0), (B, 1));
impl_component_query!((A, 0), (B, 1), (C, 2));
impl_component_query!((A, 0), (B, 1), (C, 2), (D, 3));
impl_component_query!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4));
impl_component_query!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5));
impl_component_query!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5), (G, 6));
impl_component_query!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5), (G, 6), (H, 7));
