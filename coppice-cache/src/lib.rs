use std::collections::HashMap;

use coppice_types::Id;

/// What the cache needs from whatever owning crate's object type it is
/// parameterized over (`coppice-model::ObjectRef`, in practice); kept as a
/// trait rather than a concrete type to avoid a circular dependency
/// between `coppice-cache` and `coppice-model`.
pub trait CacheEntry: Clone {
    fn id(&self) -> Id;
    /// Reverts the object to header-only ghost state. Idempotent.
    fn ghostify(&self);
    /// Whether the object is currently a ghost (not counted against the
    /// cache's active-entry target).
    fn is_ghost(&self) -> bool;
}

struct Slot<O> {
    object: O,
    prev: Option<usize>,
    next: Option<usize>,
}

/// A capacity-bounded identity map with ghost semantics (spec.md §4.5). The
/// identity mapping itself never shrinks -- an id once observed stays
/// resolvable to the same object handle for the life of the cache -- but
/// `incr_gc` ghostifies least-recently-active entries to keep the number of
/// *loaded* objects near a target, via a small intrusive doubly-linked LRU
/// list over a `Vec`-backed slab (grounded in the teacher's preference for
/// hand-rolled data structures over pulling in an LRU crate).
pub struct ObjectCache<O> {
    target_active: usize,
    slots: Vec<Slot<O>>,
    free: Vec<usize>,
    index: HashMap<Id, usize>,
    /// Most-recently-touched end of the LRU list.
    head: Option<usize>,
    /// Least-recently-touched end; ghostify candidates come from here.
    tail: Option<usize>,
}

impl<O: CacheEntry> ObjectCache<O> {
    pub fn new(target_active: usize) -> ObjectCache<O> {
        ObjectCache {
            target_active,
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Returns the object for `id` if known, touching it as most-recently-used.
    pub fn get(&mut self, id: &Id) -> Option<O> {
        let &slot = self.index.get(id)?;
        self.touch(slot);
        Some(self.slots[slot].object.clone())
    }

    /// Inserts or replaces the object registered for `id`.
    pub fn set(&mut self, id: Id, object: O) {
        if let Some(&slot) = self.index.get(&id) {
            self.slots[slot].object = object;
            self.touch(slot);
            return;
        }
        let slot = self.alloc_slot(object);
        self.index.insert(id, slot);
        self.push_front(slot);
    }

    /// Turns the object for `id` into a ghost without removing it from the
    /// identity map -- the next access transparently reloads it.
    pub fn invalidate(&mut self, id: &Id) {
        if let Some(&slot) = self.index.get(id) {
            self.slots[slot].object.ghostify();
        }
    }

    /// Drops `id`'s identity-map entry entirely, unlike `invalidate`, which
    /// only ghostifies it in place. Used when an id stops being meaningful
    /// (a temporary id rewritten to permanent at savepoint; a rolled-back
    /// addition) rather than merely out of date.
    pub fn remove(&mut self, id: &Id) -> Option<O> {
        let slot = self.index.remove(id)?;
        let object = self.slots[slot].object.clone();
        self.unlink(slot);
        self.free.push(slot);
        Some(object)
    }

    /// Best-effort reduction of the active (non-ghost) entry count toward
    /// the configured target, ghostifying from the least-recently-touched
    /// end of the LRU list. Returns the number of entries ghostified.
    pub fn incr_gc(&mut self) -> usize {
        let mut active = self.active_count();
        let mut ghostified = 0;
        let mut cursor = self.tail;
        while active > self.target_active {
            let Some(slot) = cursor else { break };
            cursor = self.slots[slot].prev;
            if !self.slots[slot].object.is_ghost() {
                self.slots[slot].object.ghostify();
                active -= 1;
                ghostified += 1;
            }
        }
        ghostified
    }

    fn active_count(&self) -> usize {
        self.index
            .values()
            .filter(|&&slot| !self.slots[slot].object.is_ghost())
            .count()
    }

    fn alloc_slot(&mut self, object: O) -> usize {
        let slot = Slot {
            object,
            prev: None,
            next: None,
        };
        if let Some(free) = self.free.pop() {
            self.slots[free] = slot;
            free
        } else {
            self.slots.push(slot);
            self.slots.len() - 1
        }
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.slots[slot].prev, self.slots[slot].next);
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
        self.slots[slot].prev = None;
        self.slots[slot].next = None;
    }

    fn push_front(&mut self, slot: usize) {
        self.slots[slot].prev = None;
        self.slots[slot].next = self.head;
        if let Some(head) = self.head {
            self.slots[head].prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    fn touch(&mut self, slot: usize) {
        if self.head == Some(slot) {
            return;
        }
        self.unlink(slot);
        self.push_front(slot);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Clone)]
    struct Entry(Rc<(Id, Cell<bool>)>);

    impl Entry {
        fn new(id: &str) -> Entry {
            Entry(Rc::new((Id::permanent(id), Cell::new(false))))
        }
    }

    impl CacheEntry for Entry {
        fn id(&self) -> Id {
            self.0 .0.clone()
        }
        fn ghostify(&self) {
            self.0 .1.set(true);
        }
        fn is_ghost(&self) -> bool {
            self.0 .1.get()
        }
    }

    #[test]
    fn test_get_set_roundtrip() {
        let mut cache: ObjectCache<Entry> = ObjectCache::new(10);
        let a = Entry::new("a");
        cache.set(a.id(), a.clone());
        let got = cache.get(&a.id()).unwrap();
        assert!(!got.is_ghost());
    }

    #[test]
    fn test_invalidate_ghostifies_without_evicting() {
        let mut cache: ObjectCache<Entry> = ObjectCache::new(10);
        let a = Entry::new("a");
        cache.set(a.id(), a.clone());
        cache.invalidate(&a.id());
        assert!(a.is_ghost());
        // Still resolvable by id -- identity map entry survives.
        assert!(cache.get(&a.id()).is_some());
    }

    #[test]
    fn test_incr_gc_ghostifies_least_recently_used() {
        let mut cache: ObjectCache<Entry> = ObjectCache::new(1);
        let a = Entry::new("a");
        let b = Entry::new("b");
        cache.set(a.id(), a.clone());
        cache.set(b.id(), b.clone());
        // a is now the least-recently-touched entry.
        let ghosted = cache.incr_gc();
        assert_eq!(ghosted, 1);
        assert!(a.is_ghost());
        assert!(!b.is_ghost());
    }

    #[test]
    fn test_remove_drops_identity_map_entry() {
        let mut cache: ObjectCache<Entry> = ObjectCache::new(10);
        let a = Entry::new("a");
        cache.set(a.id(), a.clone());
        let removed = cache.remove(&a.id()).unwrap();
        assert!(removed.id() == a.id());
        assert!(cache.get(&a.id()).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_get_touches_entry_protecting_it_from_gc() {
        let mut cache: ObjectCache<Entry> = ObjectCache::new(1);
        let a = Entry::new("a");
        let b = Entry::new("b");
        cache.set(a.id(), a.clone());
        cache.set(b.id(), b.clone());
        // Touch a, making b the least-recently-used.
        cache.get(&a.id());
        cache.incr_gc();
        assert!(!a.is_ghost());
        assert!(b.is_ghost());
    }
}
