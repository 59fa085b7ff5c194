//! Bounded least-recently-used cache of resolved addresses.
//!
//! Entries live in a slot arena linked into a recency list by index, with a
//! key → slot map on the side, so get/set/evict are O(1) and eviction reuses
//! the victim's slot instead of allocating.

use hashbrown::HashMap;
use std::hash::Hash;
use std::mem;

use crate::models::Address;

/// Resolved addresses keyed by [`crate::models::Coordinate::cache_key`]
pub type AddressCache = LruCache<String, Address>;

/// Cache entry plus its position in the recency list
struct Slot<K, V> {
    key: K,
    value: V,
    /// Towards the most recently used end
    prev: Option<usize>,
    /// Towards the least recently used end
    next: Option<usize>,
}

pub struct LruCache<K, V> {
    capacity: usize,
    slots: Vec<Slot<K, V>>,
    index: HashMap<K, usize>,
    /// Most recently used
    head: Option<usize>,
    /// Least recently used
    tail: Option<usize>,
}

impl<K: Hash + Eq + Clone, V: Clone> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            head: None,
            tail: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Membership test that does not touch recency
    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Look up `key`, marking it most recently used
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        self.detach(slot);
        self.push_front(slot);
        Some(&self.slots[slot].value)
    }

    /// Insert or overwrite `key` as most recently used.
    ///
    /// Returns the entry evicted to make room, if any.
    pub fn set(&mut self, key: K, value: V) -> Option<(K, V)> {
        if self.capacity == 0 {
            return None;
        }

        if let Some(&slot) = self.index.get(&key) {
            self.slots[slot].value = value;
            self.detach(slot);
            self.push_front(slot);
            return None;
        }

        if self.index.len() >= self.capacity {
            if let Some(victim) = self.tail {
                self.detach(victim);
                let old_key = mem::replace(&mut self.slots[victim].key, key.clone());
                let old_value = mem::replace(&mut self.slots[victim].value, value);
                self.index.remove(&old_key);
                self.index.insert(key, victim);
                self.push_front(victim);
                return Some((old_key, old_value));
            }
        }

        let slot = self.slots.len();
        self.slots.push(Slot {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        });
        self.index.insert(key, slot);
        self.push_front(slot);
        None
    }

    /// Every entry, least recently used first
    pub fn all_values(&self) -> Vec<(K, V)> {
        let mut entries = Vec::with_capacity(self.len());
        let mut cursor = self.tail;
        while let Some(slot) = cursor {
            let entry = &self.slots[slot];
            entries.push((entry.key.clone(), entry.value.clone()));
            cursor = entry.prev;
        }
        entries
    }

    /// Replace the contents. Later entries count as more recently used.
    pub fn set_values(&mut self, entries: impl IntoIterator<Item = (K, V)>) {
        self.clear();
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
    }

    fn detach(&mut self, slot: usize) {
        let (prev, next) = {
            let entry = &self.slots[slot];
            (entry.prev, entry.next)
        };

        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }

        let entry = &mut self.slots[slot];
        entry.prev = None;
        entry.next = None;
    }

    fn push_front(&mut self, slot: usize) {
        self.slots[slot].next = self.head;
        self.slots[slot].prev = None;
        if let Some(head) = self.head {
            self.slots[head].prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }
}
