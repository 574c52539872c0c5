//! Multicast delegate used for entity lifecycle broadcasts.
//!
//! The entity manager announces entity additions and removals through
//! [`MulticastDelegate`] values. Hosts bind listeners during setup and
//! unbind them with the handle returned at bind time.

/// Identifies one bound listener inside a [`MulticastDelegate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DelegateHandle(i32);

impl DelegateHandle {
    const INVALID: DelegateHandle = DelegateHandle(-1);
}

impl Default for DelegateHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

/// An ordered collection of listeners invoked together.
///
/// ## Invariants
/// - Handles are unique for the lifetime of the delegate.
/// - Broadcast invokes listeners in bind order.
///
/// ## Concurrency
/// Not internally synchronized; the owning manager serializes access.
#[derive(Default)]
pub struct MulticastDelegate {
    listeners: Vec<(DelegateHandle, Box<dyn Fn() + Send + Sync>)>,
    next_id: i32,
}

impl MulticastDelegate {
    /// Creates an empty delegate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a listener and returns a handle for later unbinding.
    pub fn bind(&mut self, listener: impl Fn() + Send + Sync + 'static) -> DelegateHandle {
        debug_assert!(self.next_id < 10_000, "too many bindings to one delegate");
        let handle = DelegateHandle(self.next_id);
        self.next_id += 1;
        self.listeners.push((handle, Box::new(listener)));
        handle
    }

    /// Removes the listener bound under `handle`, if it is still bound.
    pub fn unbind(&mut self, handle: DelegateHandle) {
        self.listeners.retain(|(bound, _)| *bound != handle);
    }

    /// Invokes every bound listener in bind order.
    #[inline]
    pub fn broadcast(&self) {
        for (_, listener) in &self.listeners {
            listener();
        }
    }

    /// Removes all listeners.
    pub fn clear(&mut self) {
        self.listeners.clear();
    }
}
