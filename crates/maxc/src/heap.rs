//! The reference-counted heap arena.
//!
//! Heap objects live in a slot vector and are addressed by [`HeapId`]. Each
//! slot holds a refcount and the object payload; freed slots go on a free
//! list and are reused by later allocations. `dec_ref` releases children
//! recursively when a count reaches zero, so dropping a list releases its
//! elements.
//!
//! Reference counting alone cannot reclaim cycles. The language has no way
//! to close a cycle today (lists and structs are only built from existing
//! values), but a host native that inserted a list into itself would leak;
//! this is accepted and documented rather than worked around with a tracing
//! sweep.

use std::collections::BTreeMap;

use crate::value::Value;

/// Index of a heap slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(usize);

impl HeapId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Heap object payloads.
///
/// Per-variant behavior (`repr`, child traversal, size estimate) is
/// dispatched by matching on the variant; a sum type in place of per-type
/// function tables.
#[derive(Debug)]
pub enum HeapData {
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    /// Fields in declaration order; the static type knows the names.
    Struct(Vec<Value>),
    /// A runtime error value, produced by `error("...")` or a failing opcode.
    Err(String),
    /// Cursor over a list, created by the first `IterNext` of a `for` loop.
    ListIter {
        list: HeapId,
        index: usize,
    },
}

impl HeapData {
    #[must_use]
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "Str",
            Self::List(_) => "List",
            Self::Tuple(_) => "Tuple",
            Self::Struct(_) => "Struct",
            Self::Err(_) => "Err",
            Self::ListIter { .. } => "ListIter",
        }
    }

    /// Rough payload size in bytes, for heap telemetry.
    #[must_use]
    pub fn estimate_size(&self) -> usize {
        let inline = size_of::<Self>();
        match self {
            Self::Str(s) | Self::Err(s) => inline + s.len(),
            Self::List(items) | Self::Tuple(items) | Self::Struct(items) => {
                inline + items.len() * size_of::<Value>()
            }
            Self::ListIter { .. } => inline,
        }
    }

    /// Collects the heap ids this object owns a reference to.
    fn child_ids(&self, out: &mut Vec<HeapId>) {
        match self {
            Self::Str(_) | Self::Err(_) => {}
            Self::List(items) | Self::Tuple(items) | Self::Struct(items) => {
                for v in items {
                    if let Value::Ref(id) = v {
                        out.push(*id);
                    }
                }
            }
            Self::ListIter { list, .. } => out.push(*list),
        }
    }
}

#[derive(Debug)]
struct HeapEntry {
    refcount: usize,
    data: HeapData,
}

/// Snapshot of heap occupancy, for telemetry and leak assertions in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    pub live_objects: usize,
    pub free_slots: usize,
    pub total_slots: usize,
    /// Live object counts keyed by variant name; `BTreeMap` keeps the
    /// iteration order deterministic for display.
    pub objects_by_type: BTreeMap<&'static str, usize>,
    /// Estimated bytes held by live objects.
    pub estimated_bytes: usize,
}

/// The heap arena.
#[derive(Debug, Default)]
pub struct Heap {
    entries: Vec<Option<HeapEntry>>,
    free_list: Vec<HeapId>,
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a heap entry with refcount 1, reusing a freed slot if one
    /// is available.
    pub fn allocate(&mut self, data: HeapData) -> HeapId {
        let entry = HeapEntry { refcount: 1, data };
        if let Some(id) = self.free_list.pop() {
            self.entries[id.index()] = Some(entry);
            id
        } else {
            let id = HeapId(self.entries.len());
            self.entries.push(Some(entry));
            id
        }
    }

    /// Increments the reference count of a live entry.
    ///
    /// # Panics
    /// Panics if the id is stale or was already freed; that is a refcount
    /// bug, not a user error.
    pub fn inc_ref(&mut self, id: HeapId) {
        let entry = self
            .entries
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .expect("Heap::inc_ref: object already freed");
        entry.refcount += 1;
    }

    /// Decrements the reference count, freeing the entry and releasing its
    /// children once the count reaches zero.
    pub fn dec_ref(&mut self, id: HeapId) {
        let slot = self
            .entries
            .get_mut(id.index())
            .expect("Heap::dec_ref: slot missing");
        let entry = slot.as_mut().expect("Heap::dec_ref: object already freed");
        if entry.refcount > 1 {
            entry.refcount -= 1;
            return;
        }
        let entry = slot.take().expect("Heap::dec_ref: object already freed");
        self.free_list.push(id);

        let mut children = Vec::new();
        entry.data.child_ids(&mut children);
        drop(entry);
        for child in children {
            self.dec_ref(child);
        }
    }

    /// Returns the payload at `id`.
    ///
    /// # Panics
    /// Panics on a stale or freed id.
    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        self.entries
            .get(id.index())
            .and_then(Option::as_ref)
            .map(|e| &e.data)
            .expect("Heap::get: object already freed")
    }

    /// Mutable access to the payload at `id`.
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        self.entries
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .map(|e| &mut e.data)
            .expect("Heap::get_mut: object already freed")
    }

    /// Current refcount of a live entry, or 0 when freed. Test helper.
    #[must_use]
    pub fn refcount(&self, id: HeapId) -> usize {
        self.entries
            .get(id.index())
            .and_then(Option::as_ref)
            .map_or(0, |e| e.refcount)
    }

    #[must_use]
    pub fn is_live(&self, id: HeapId) -> bool {
        self.entries.get(id.index()).is_some_and(Option::is_some)
    }

    /// Number of live objects.
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    /// Occupancy snapshot.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut objects_by_type = BTreeMap::new();
        let mut estimated_bytes = 0;
        let mut live = 0;
        for entry in self.entries.iter().flatten() {
            live += 1;
            *objects_by_type.entry(entry.data.variant_name()).or_insert(0) += 1;
            estimated_bytes += entry.data.estimate_size();
        }
        HeapStats {
            live_objects: live,
            free_slots: self.free_list.len(),
            total_slots: self.entries.len(),
            objects_by_type,
            estimated_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_release() {
        let mut heap = Heap::new();
        let id = heap.allocate(HeapData::Str("hi".to_owned()));
        assert_eq!(heap.refcount(id), 1);
        heap.inc_ref(id);
        assert_eq!(heap.refcount(id), 2);
        heap.dec_ref(id);
        assert!(heap.is_live(id));
        heap.dec_ref(id);
        assert!(!heap.is_live(id));
        assert_eq!(heap.live_objects(), 0);
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut heap = Heap::new();
        let a = heap.allocate(HeapData::Str("a".to_owned()));
        heap.dec_ref(a);
        let b = heap.allocate(HeapData::Str("b".to_owned()));
        assert_eq!(a.index(), b.index());
        assert_eq!(heap.stats().total_slots, 1);
    }

    #[test]
    fn releasing_a_list_releases_its_elements() {
        let mut heap = Heap::new();
        let s = heap.allocate(HeapData::Str("elem".to_owned()));
        let list = heap.allocate(HeapData::List(vec![Value::Ref(s), Value::Int(1)]));
        // the list owns the only reference to the string
        heap.dec_ref(list);
        assert!(!heap.is_live(s));
        assert_eq!(heap.live_objects(), 0);
    }

    #[test]
    fn stats_track_types() {
        let mut heap = Heap::new();
        let _a = heap.allocate(HeapData::Str("x".to_owned()));
        let _b = heap.allocate(HeapData::List(Vec::new()));
        let stats = heap.stats();
        assert_eq!(stats.live_objects, 2);
        assert_eq!(stats.objects_by_type["Str"], 1);
        assert_eq!(stats.objects_by_type["List"], 1);
    }
}
