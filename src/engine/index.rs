//! # Index Engine
//!
//! Signature-keyed sparse-set indexes over the component map.
//!
//! ## Purpose
//! Queries repeatedly ask "which entities hold all of these component
//! types". Each distinct signature gets a **sparse-set index**:
//!
//! - `sparse[raw_id] → dense position`, or invalid,
//! - `dense` — the matching raw ids in insertion order,
//! - `cached` — pre-resolved component pointer tuples parallel to `dense`.
//!
//! Indexes are created lazily by a full scan on the first query of their
//! signature and afterwards kept coherent **incrementally** through three
//! storage events: component added, component removed, entity removed.
//!
//! ## Signature identity
//! Two signatures are the same iff their multisets of component type ids
//! are equal; the key sorts the ids and hashes the sorted sequence. The
//! cached rows, however, are typed by the *declaration order* of the query
//! that created the index. A later query with the same multiset but a
//! different element order cannot soundly reinterpret those rows; it is
//! reported through the error surface and yields an empty result.
//!
//! ## Invariants
//! - For every `raw_id` with a valid sparse entry, the entity holds every
//!   component in the signature, `dense[sparse[raw_id]] == raw_id`, and
//!   `cached[sparse[raw_id]]` holds the live component addresses.
//! - Indexes are reconstructable from the component map ([`rebuild`]).
//!
//! [`rebuild`]: ComponentIndexes::rebuild

use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::engine::error::{report, ComponentError};
use crate::engine::map::ComponentMap;
use crate::engine::query::ComponentQuery;
use crate::engine::types::{ComponentTypeId, RawEntityId};

const INVALID_DENSE: usize = usize::MAX;

/// Type-erased storage of cached pointer rows.
trait CachedRows: 'static {
    fn as_any(&self) -> &dyn Any;
    fn push(&mut self, map: &ComponentMap, raw_id: usize);
    fn swap_remove(&mut self, dense_pos: usize);
    fn clear(&mut self);
}

/// Cached rows for one concrete pointer-tuple type.
struct TypedRows<P: Copy + 'static> {
    rows: Vec<P>,
    resolve: fn(&ComponentMap, usize) -> Option<P>,
}

impl<P: Copy + 'static> CachedRows for TypedRows<P> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn push(&mut self, map: &ComponentMap, raw_id: usize) {
        match (self.resolve)(map, raw_id) {
            Some(ptrs) => self.rows.push(ptrs),
            None => debug_assert!(false, "cached row pushed without a full signature"),
        }
    }

    fn swap_remove(&mut self, dense_pos: usize) {
        self.rows.swap_remove(dense_pos);
    }

    fn clear(&mut self) {
        self.rows.clear();
    }
}

/// One sparse-set index over a signature.
struct IndexEntry {
    /// Component types in the declaration order of the creating query.
    types: Vec<ComponentTypeId>,
    sparse: Vec<usize>,
    dense: Vec<RawEntityId>,
    cached: Box<dyn CachedRows>,
}

impl IndexEntry {
    fn has_all_components(&self, map: &ComponentMap, raw_id: usize) -> bool {
        self.types.iter().all(|type_id| map.column(*type_id).has(raw_id))
    }

    /// Re-checks the full signature for `raw_id` and inserts it if
    /// satisfied and not yet present.
    fn try_add(&mut self, raw_id: usize, map: &ComponentMap) {
        if !self.has_all_components(map, raw_id) {
            return;
        }
        if self.sparse.get(raw_id).is_some_and(|&pos| pos != INVALID_DENSE) {
            return;
        }

        if self.sparse.len() <= raw_id {
            if self.sparse.capacity() < raw_id + 1 {
                self.sparse.reserve(16usize.max((raw_id + 1) * 2) - self.sparse.len());
            }
            self.sparse.resize(raw_id + 1, INVALID_DENSE);
        }

        self.sparse[raw_id] = self.dense.len();
        self.dense.push(raw_id as RawEntityId);
        self.cached.push(map, raw_id);
    }

    /// Removes `raw_id` using the sparse-set swap-remove rules; no-op if
    /// the entity is not in the index.
    fn try_remove(&mut self, raw_id: usize) {
        let Some(&dense_pos) = self.sparse.get(raw_id) else { return };
        if dense_pos == INVALID_DENSE {
            return;
        }

        let last = self.dense.len() - 1;
        if dense_pos != last {
            let moved = self.dense[last];
            self.dense[dense_pos] = moved;
            self.sparse[moved as usize] = dense_pos;
        }
        self.dense.pop();
        self.cached.swap_remove(dense_pos);
        self.sparse[raw_id] = INVALID_DENSE;
    }

    /// Full scan of the component map.
    fn populate(&mut self, map: &ComponentMap) {
        let mut shortest = usize::MAX;
        for type_id in &self.types {
            shortest = shortest.min(map.column(*type_id).len());
        }
        if shortest == usize::MAX || shortest == 0 {
            return;
        }

        self.sparse.resize(shortest, INVALID_DENSE);
        for raw_id in 0..shortest {
            if self.has_all_components(map, raw_id) {
                self.sparse[raw_id] = self.dense.len();
                self.dense.push(raw_id as RawEntityId);
                self.cached.push(map, raw_id);
            }
        }
    }

    fn clear_data(&mut self) {
        self.sparse.clear();
        self.dense.clear();
        self.cached.clear();
    }

    fn repopulate(&mut self, map: &ComponentMap) {
        self.clear_data();
        self.populate(map);
    }
}

/// Signature identity: the sorted type ids plus their combined hash.
#[derive(Clone)]
struct SignatureKey {
    hash: u64,
    sorted_types: Vec<ComponentTypeId>,
}

impl SignatureKey {
    fn new(sorted_types: Vec<ComponentTypeId>) -> Self {
        let mut hash = 0u64;
        for type_id in &sorted_types {
            let mut hasher = DefaultHasher::new();
            type_id.hash(&mut hasher);
            hash ^= hasher.finish();
            hash = hash.rotate_left(5);
        }
        Self { hash, sorted_types }
    }
}

impl PartialEq for SignatureKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.sorted_types == other.sorted_types
    }
}

impl Eq for SignatureKey {}

impl Hash for SignatureKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

/// All indexes of one entity manager, kept coherent with its component map.
#[derive(Default)]
pub struct ComponentIndexes {
    entries: Vec<IndexEntry>,
    by_signature: HashMap<SignatureKey, usize>,
    by_type: HashMap<ComponentTypeId, Vec<usize>>,
}

impl ComponentIndexes {
    /// Creates an index collection with no indexes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage event: a component of `type_id` was installed for `raw_id`.
    pub fn on_component_added(
        &mut self,
        type_id: ComponentTypeId,
        raw_id: usize,
        map: &ComponentMap,
    ) {
        let Self { entries, by_type, .. } = self;
        if let Some(affected) = by_type.get(&type_id) {
            for &entry in affected {
                entries[entry].try_add(raw_id, map);
            }
        }
    }

    /// Storage event: the component of `type_id` was removed from `raw_id`.
    pub fn on_component_removed(&mut self, type_id: ComponentTypeId, raw_id: usize) {
        let Self { entries, by_type, .. } = self;
        if let Some(affected) = by_type.get(&type_id) {
            for &entry in affected {
                entries[entry].try_remove(raw_id);
            }
        }
    }

    /// Storage event: the entity at `raw_id` was removed.
    pub fn on_entity_removed(&mut self, raw_id: usize) {
        for entry in &mut self.entries {
            entry.try_remove(raw_id);
        }
    }

    /// Forces construction of the index for query `Q`.
    pub fn init_index<Q: ComponentQuery>(&mut self, map: &ComponentMap) {
        let _ = self.get_or_create::<Q>(map);
    }

    /// Returns the dense raw-id list of the index for `Q`, creating the
    /// index by full scan on first call.
    pub fn get_index<Q: ComponentQuery>(&mut self, map: &ComponentMap) -> &[RawEntityId] {
        let entry = self.get_or_create::<Q>(map);
        &self.entries[entry].dense
    }

    /// Returns the cached pointer rows of the index for `Q`.
    ///
    /// Reports a signature-order mismatch and returns an empty slice when
    /// the index was created by a query with a different element order.
    pub fn get_components<Q: ComponentQuery>(&mut self, map: &ComponentMap) -> &[Q::Ptrs] {
        let entry = self.get_or_create::<Q>(map);
        match self.entries[entry].cached.as_any().downcast_ref::<TypedRows<Q::Ptrs>>() {
            Some(rows) => &rows.rows,
            None => {
                let type_id = Q::type_ids()[0];
                report(ComponentError::SignatureOrderMismatch { type_id }.into());
                &[]
            }
        }
    }

    /// Returns the dense raw-id list and the cached rows of one index in a
    /// single borrow, for iteration that pairs entities with components.
    ///
    /// Reports a signature-order mismatch and returns empty slices when the
    /// index was created by a query with a different element order.
    pub fn get_index_with_components<Q: ComponentQuery>(
        &mut self,
        map: &ComponentMap,
    ) -> (&[RawEntityId], &[Q::Ptrs]) {
        let entry = self.get_or_create::<Q>(map);
        let entry = &self.entries[entry];
        match entry.cached.as_any().downcast_ref::<TypedRows<Q::Ptrs>>() {
            Some(rows) => (&entry.dense, &rows.rows),
            None => {
                let type_id = Q::type_ids()[0];
                report(ComponentError::SignatureOrderMismatch { type_id }.into());
                (&[], &[])
            }
        }
    }

    /// Number of entities currently matching query `Q`.
    pub fn get_index_size<Q: ComponentQuery>(&mut self, map: &ComponentMap) -> usize {
        let entry = self.get_or_create::<Q>(map);
        self.entries[entry].dense.len()
    }

    /// Fully repopulates every index from the component map; used after
    /// bulk storage reordering.
    pub fn rebuild(&mut self, map: &ComponentMap) {
        tracing::debug!(indexes = self.entries.len(), "rebuilding component indexes");
        for entry in &mut self.entries {
            entry.repopulate(map);
        }
    }

    /// Drops every index.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_signature.clear();
        self.by_type.clear();
    }

    fn get_or_create<Q: ComponentQuery>(&mut self, map: &ComponentMap) -> usize {
        let key = SignatureKey::new(Q::sorted_type_ids());
        if let Some(&entry) = self.by_signature.get(&key) {
            return entry;
        }

        tracing::trace!(signature = ?key.sorted_types, "building component index");
        let mut entry = IndexEntry {
            types: Q::type_ids(),
            sparse: Vec::new(),
            dense: Vec::new(),
            cached: Box::new(TypedRows::<Q::Ptrs> {
                rows: Vec::new(),
                resolve: Q::row_from_map,
            }),
        };
        entry.populate(map);

        let index = self.entries.len();
        for type_id in &key.sorted_types {
            let affected = self.by_type.entry(*type_id).or_default();
            if !affected.contains(&index) {
                affected.push(index);
            }
        }
        self.entries.push(entry);
        self.by_signature.insert(key, index);
        index
    }
}
