//! Arena-and-index LRU.
//!
//! Recency order is a doubly-linked list of indices into a dense slot
//! vector, plus a hash map from key to slot index. No per-node allocation
//! and no pointer graph; links are plain `usize` indices and vacated slots
//! are recycled through a free list.

use std::collections::HashMap;
use std::hash::Hash;

const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Slot<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

#[derive(Debug)]
pub struct LruArena<K, V> {
    slots: Vec<Option<Slot<K, V>>>,
    map: HashMap<K, usize>,
    free: Vec<usize>,
    /// Most recently used
    head: usize,
    /// Least recently used
    tail: usize,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V> LruArena<K, V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            map: HashMap::with_capacity(capacity),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lookup that touches: the entry becomes most recently used.
    pub fn get(
        &mut self,
        key: &K,
    ) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.unlink(idx);
        self.link_front(idx);
        self.slots[idx].as_ref().map(|s| &s.value)
    }

    /// Lookup without touching recency
    pub fn peek(
        &self,
        key: &K,
    ) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.slots[idx].as_ref().map(|s| &s.value)
    }

    /// Inserts or replaces. When the arena is full and `key` is new, the
    /// least-recently-used entry is evicted and returned.
    pub fn insert(
        &mut self,
        key: K,
        value: V,
    ) -> Option<(K, V)> {
        if let Some(&idx) = self.map.get(&key) {
            if let Some(slot) = self.slots[idx].as_mut() {
                slot.value = value;
            }
            self.unlink(idx);
            self.link_front(idx);
            return None;
        }

        let evicted = if self.map.len() >= self.capacity {
            self.evict_lru()
        } else {
            None
        };

        let slot = Slot {
            key: key.clone(),
            value,
            prev: NIL,
            next: NIL,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.map.insert(key, idx);
        self.link_front(idx);

        evicted
    }

    pub fn remove(
        &mut self,
        key: &K,
    ) -> Option<V> {
        let idx = self.map.remove(key)?;
        self.unlink(idx);
        self.free.push(idx);
        self.slots[idx].take().map(|s| s.value)
    }

    /// Removes every entry whose key matches the predicate
    pub fn remove_where<F>(
        &mut self,
        mut pred: F,
    ) -> usize
    where
        F: FnMut(&K) -> bool,
    {
        let keys: Vec<K> = self.map.keys().filter(|k| pred(k)).cloned().collect();
        let count = keys.len();
        for key in keys {
            self.remove(&key);
        }
        count
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.map.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
    }

    /// Key of the least-recently-used entry, if any
    pub fn lru_key(&self) -> Option<&K> {
        if self.tail == NIL {
            None
        } else {
            self.slots[self.tail].as_ref().map(|s| &s.key)
        }
    }

    fn evict_lru(&mut self) -> Option<(K, V)> {
        if self.tail == NIL {
            return None;
        }
        let idx = self.tail;
        self.unlink(idx);
        self.free.push(idx);
        let slot = self.slots[idx].take()?;
        self.map.remove(&slot.key);
        Some((slot.key, slot.value))
    }

    fn link_front(
        &mut self,
        idx: usize,
    ) {
        if let Some(slot) = self.slots[idx].as_mut() {
            slot.prev = NIL;
            slot.next = self.head;
        }
        if self.head != NIL {
            if let Some(old_head) = self.slots[self.head].as_mut() {
                old_head.prev = idx;
            }
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn unlink(
        &mut self,
        idx: usize,
    ) {
        let (prev, next) = match self.slots[idx].as_ref() {
            Some(slot) => (slot.prev, slot.next),
            None => return,
        };
        if prev != NIL {
            if let Some(p) = self.slots[prev].as_mut() {
                p.next = next;
            }
        } else if self.head == idx {
            self.head = next;
        }
        if next != NIL {
            if let Some(n) = self.slots[next].as_mut() {
                n.prev = prev;
            }
        } else if self.tail == idx {
            self.tail = prev;
        }
        if let Some(slot) = self.slots[idx].as_mut() {
            slot.prev = NIL;
            slot.next = NIL;
        }
    }
}
