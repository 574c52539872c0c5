//! # Component Pool
//!
//! Chunked slab allocator for instances of a single component type.
//!
//! ## Purpose
//! Component instances must keep a **stable address** from the moment they
//! are acquired until they are released: columns, indexes and entity
//! transfer all hold raw addresses into the pool. The pool therefore never
//! moves or reuses a slot while it is acquired.
//!
//! ## Design
//! - Slots are allocated in chunks; a chunk is an array of a
//!   `union { component, next-free pointer }`-shaped slot, so the free list
//!   threads through unused slots without per-slot bookkeeping and a slot's
//!   address is identical to its component's address.
//! - The first chunk's capacity and all subsequent growth are
//!   parameterised; the default growth strategy doubles the previous
//!   chunk's capacity.
//! - Chunks are never freed while the pool lives, preserving address
//!   stability even across growth.
//!
//! ## Invariants
//! - An acquired address does not move and is not reused until released.
//! - Every free slot is reachable from the free-list head exactly once.
//!
//! ## Concurrency
//! The pool is **not** internally synchronized. The component factory wraps
//! each pool in a mutex; storage mutation is serialized by the scheduler.

use std::mem::ManuallyDrop;
use std::ptr::{self, NonNull};

/// Growth strategy: maps the previous chunk capacity to the next one.
pub type GrowthStrategy = Box<dyn Fn(usize) -> usize + Send>;

/// Default chunk capacity for a component type: as many instances as fit a
/// 4 KiB page, at least one.
pub const fn default_chunk_capacity<T>() -> usize {
    let size = std::mem::size_of::<T>();
    if size == 0 || size >= 4096 {
        1
    } else {
        4096 / size
    }
}

#[repr(C)]
union Slot<T> {
    component: ManuallyDrop<T>,
    next_free: *mut Slot<T>,
}

/// Chunked free-list slab for component type `T`.
///
/// See the module documentation for the allocation scheme.
pub struct ComponentPool<T> {
    chunks: Vec<Box<[Slot<T>]>>,
    next_free: *mut Slot<T>,
    next_chunk_capacity: usize,
    grow: Option<GrowthStrategy>,
    free_slots: usize,
    live_instances: usize,
}

// Slots hold either T values or pointers into the pool's own chunks; moving
// the pool between threads is sound whenever T itself is Send.
unsafe impl<T: Send> Send for ComponentPool<T> {}

impl<T> ComponentPool<T> {
    /// Creates a pool with the default first-chunk capacity and doubling
    /// growth. No chunk is allocated until the first acquire.
    pub fn new() -> Self {
        Self::with_chunk_capacity(default_chunk_capacity::<T>(), false, None)
    }

    /// Creates a pool with an explicit first-chunk capacity.
    ///
    /// ## Parameters
    /// - `first_chunk_capacity`: slot count of the first chunk (at least 1).
    /// - `preallocate`: allocate the first chunk eagerly.
    /// - `grow`: optional growth strategy; `None` doubles the previous
    ///   chunk's capacity.
    pub fn with_chunk_capacity(
        first_chunk_capacity: usize,
        preallocate: bool,
        grow: Option<GrowthStrategy>,
    ) -> Self {
        debug_assert!(std::mem::size_of::<T>() != 0, "empty component types bypass the pool");
        let mut pool = Self {
            chunks: Vec::new(),
            next_free: ptr::null_mut(),
            next_chunk_capacity: first_chunk_capacity.max(1),
            grow,
            free_slots: 0,
            live_instances: 0,
        };
        if preallocate {
            pool.allocate_chunk();
        }
        pool
    }

    /// Number of chunks currently allocated.
    #[inline]
    pub fn allocated_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Number of slots currently on the free list.
    #[inline]
    pub fn free_slots(&self) -> usize {
        self.free_slots
    }

    /// Number of live instances handed out and not yet released.
    #[inline]
    pub fn live_instances(&self) -> usize {
        self.live_instances
    }

    /// Acquires a slot and constructs `value` in it.
    ///
    /// The returned address is stable until [`release`](Self::release).
    pub fn acquire_with(&mut self, value: T) -> NonNull<T> {
        if self.next_free.is_null() {
            self.allocate_chunk();
        }

        let slot = self.next_free;
        // SAFETY: `slot` came off the free list, so it is a valid, unused
        // slot inside one of our chunks and its union holds `next_free`.
        unsafe {
            self.next_free = (*slot).next_free;
            ptr::write(ptr::addr_of_mut!((*slot).component), ManuallyDrop::new(value));
        }
        self.free_slots -= 1;
        self.live_instances += 1;

        // A repr(C) union places every field at offset zero, so the slot
        // address is the component address.
        // SAFETY: chunk slots are never null.
        unsafe { NonNull::new_unchecked(slot.cast::<T>()) }
    }

    /// Acquires a slot and default-constructs an instance in it.
    #[inline]
    pub fn acquire(&mut self) -> NonNull<T>
    where
        T: Default,
    {
        self.acquire_with(T::default())
    }

    /// Destroys the instance at `component` and reclaims its slot.
    ///
    /// ## Safety
    /// `component` must have been returned by this pool's acquire and not
    /// yet released.
    pub unsafe fn release(&mut self, component: NonNull<T>) {
        let slot = component.as_ptr().cast::<Slot<T>>();
        // SAFETY: per the caller contract the slot holds a live component.
        unsafe {
            ManuallyDrop::drop(&mut (*slot).component);
            (*slot).next_free = self.next_free;
        }
        self.next_free = slot;
        self.free_slots += 1;
        self.live_instances -= 1;
    }

    fn allocate_chunk(&mut self) {
        let capacity = self.next_chunk_capacity;
        self.next_chunk_capacity = match &self.grow {
            Some(strategy) => strategy(capacity).max(1),
            None => capacity.saturating_mul(2),
        };

        let mut chunk: Box<[Slot<T>]> = (0..capacity)
            .map(|_| Slot { next_free: ptr::null_mut() })
            .collect();

        // Thread the free list through the new chunk, ending at the old head.
        for i in 0..capacity - 1 {
            let next = ptr::addr_of_mut!(chunk[i + 1]);
            chunk[i].next_free = next;
        }
        chunk[capacity - 1].next_free = self.next_free;
        self.next_free = ptr::addr_of_mut!(chunk[0]);

        self.free_slots += capacity;
        self.chunks.push(chunk);
    }
}

impl<T> Default for ComponentPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for ComponentPool<T> {
    fn drop(&mut self) {
        // Instances are destroyed through the factory before the pool goes
        // away; a non-zero live count here is a leak in the host.
        debug_assert_eq!(
            self.live_instances, 0,
            "component pool dropped with {} live instances",
            self.live_instances
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, PartialEq, Debug)]
    struct Probe {
        value: u64,
    }

    #[test]
    fn acquired_addresses_are_stable_across_growth() {
        let mut pool: ComponentPool<Probe> = ComponentPool::with_chunk_capacity(2, false, None);

        let first = pool.acquire_with(Probe { value: 1 });
        let second = pool.acquire_with(Probe { value: 2 });
        // Force a second chunk.
        let third = pool.acquire_with(Probe { value: 3 });
        assert_eq!(pool.allocated_chunks(), 2);

        unsafe {
            assert_eq!(first.as_ref().value, 1);
            assert_eq!(second.as_ref().value, 2);
            assert_eq!(third.as_ref().value, 3);
        }

        unsafe {
            pool.release(first);
            pool.release(second);
            pool.release(third);
        }
    }

    #[test]
    fn released_slot_is_reused_first() {
        let mut pool: ComponentPool<Probe> = ComponentPool::with_chunk_capacity(4, true, None);

        let first = pool.acquire_with(Probe { value: 7 });
        unsafe { pool.release(first) };

        let second = pool.acquire_with(Probe { value: 8 });
        assert_eq!(first.as_ptr(), second.as_ptr());
        unsafe { pool.release(second) };
    }

    #[test]
    fn growth_strategy_controls_chunk_sizes() {
        let mut pool: ComponentPool<Probe> =
            ComponentPool::with_chunk_capacity(1, false, Some(Box::new(|previous| previous + 3)));

        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(pool.allocated_chunks(), 2);
        // First chunk held one slot; the second holds 1 + 3.
        assert_eq!(pool.free_slots(), 3);

        unsafe {
            pool.release(a);
            pool.release(b);
        }
    }

    #[test]
    fn instances_are_dropped_on_release() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        struct Tracked;
        impl Drop for Tracked {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::SeqCst);
            }
        }

        let mut pool: ComponentPool<Tracked> = ComponentPool::with_chunk_capacity(2, false, None);
        let instance = pool.acquire_with(Tracked);
        assert_eq!(DROPS.load(Ordering::SeqCst), 0);
        unsafe { pool.release(instance) };
        assert_eq!(DROPS.load(Ordering::SeqCst), 1);
    }
}
