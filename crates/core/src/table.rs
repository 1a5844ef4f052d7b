//! Open-addressed, linear-probing hash table keyed by interned string
//! pointers, per spec §4.D. Deletion uses tombstones (`key = None, occupied =
//! true`) so probe sequences over deleted slots keep working; `count`
//! deliberately includes tombstones for load-factor purposes, and resizing
//! compacts them away.

use crate::object::{Obj, ObjData};

const LOAD_FACTOR_MAX: f64 = 0.75;
const MIN_CAPACITY: usize = 8;

#[derive(Clone, Copy)]
enum Slot<V> {
    Empty,
    Tombstone,
    Occupied(*mut Obj, V),
}

pub struct Table<V> {
    entries: Vec<Slot<V>>,
    count: usize,
}

impl<V: Copy> Table<V> {
    pub fn new() -> Self {
        Table {
            entries: Vec::new(),
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn get(&self, key: *mut Obj) -> Option<V> {
        if self.entries.is_empty() {
            return None;
        }
        let idx = self.find_slot(key)?;
        match self.entries[idx] {
            Slot::Occupied(_, v) => Some(v),
            _ => None,
        }
    }

    /// Returns `true` if this inserted a brand-new key (mirrors `tableSet`'s
    /// return value: false when overwriting an existing entry).
    pub fn set(&mut self, key: *mut Obj, value: V) -> bool {
        if self.entries.is_empty() || (self.count + 1) as f64 > self.capacity() as f64 * LOAD_FACTOR_MAX
        {
            self.grow();
        }
        let idx = self.probe(key);
        let is_new = !matches!(self.entries[idx], Slot::Occupied(..));
        // Only bump count for brand-new slots, not when reusing a tombstone.
        if is_new && !matches!(self.entries[idx], Slot::Tombstone) {
            self.count += 1;
        }
        self.entries[idx] = Slot::Occupied(key, value);
        is_new
    }

    pub fn delete(&mut self, key: *mut Obj) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        match self.find_slot(key) {
            Some(idx) => {
                self.entries[idx] = Slot::Tombstone;
                true
            }
            None => false,
        }
    }

    pub fn add_all(&mut self, from: &Table<V>) {
        for slot in &from.entries {
            if let Slot::Occupied(key, value) = *slot {
                self.set(key, value);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (*mut Obj, V)> + '_ {
        self.entries.iter().filter_map(|s| match *s {
            Slot::Occupied(k, v) => Some((k, v)),
            _ => None,
        })
    }

    /// Gateway used by the interner: find an already-interned string by
    /// content rather than by pointer identity (§4.D `find-string`).
    pub fn find_string(&self, chars: &str, hash: u32) -> Option<*mut Obj> {
        if self.entries.is_empty() {
            return None;
        }
        let capacity = self.capacity();
        let mut idx = (hash as usize) % capacity;
        loop {
            match self.entries[idx] {
                Slot::Empty => return None,
                Slot::Tombstone => {}
                Slot::Occupied(key, _) => {
                    let s = match unsafe { &(*key).data } {
                        ObjData::String(s) => s,
                        _ => unreachable!("Table<V> string keys are always ObjString"),
                    };
                    if s.hash == hash && s.as_str() == chars {
                        return Some(key);
                    }
                }
            }
            idx = (idx + 1) % capacity;
        }
    }

    /// Remove entries whose key is unmarked. Used by GC sweep on the string
    /// table (§4.H phase 3): those objects are about to be freed.
    pub fn remove_unmarked(&mut self) {
        for slot in &mut self.entries {
            if let Slot::Occupied(key, _) = *slot
                && unsafe { !(*key).is_marked.get() } {
                    *slot = Slot::Tombstone;
                }
        }
    }

    pub fn mark_keys_and_values(&self) -> impl Iterator<Item = (*mut Obj, V)> + '_ {
        self.iter()
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn find_slot(&self, key: *mut Obj) -> Option<usize> {
        let capacity = self.capacity();
        let hash = unsafe {
            match &(*key).data {
                ObjData::String(s) => s.hash,
                _ => unreachable!("Table<V> keys are always ObjString"),
            }
        };
        let mut idx = (hash as usize) % capacity;
        loop {
            match self.entries[idx] {
                Slot::Empty => return None,
                Slot::Tombstone => {}
                Slot::Occupied(k, _) => {
                    if std::ptr::eq(k, key) {
                        return Some(idx);
                    }
                }
            }
            idx = (idx + 1) % capacity;
        }
    }

    /// Probe for insertion: returns the first tombstone seen (reused) or the
    /// eventual empty/matching slot.
    fn probe(&self, key: *mut Obj) -> usize {
        let capacity = self.capacity();
        let hash = unsafe {
            match &(*key).data {
                ObjData::String(s) => s.hash,
                _ => unreachable!("Table<V> keys are always ObjString"),
            }
        };
        let mut idx = (hash as usize) % capacity;
        let mut tombstone: Option<usize> = None;
        loop {
            match self.entries[idx] {
                Slot::Empty => return tombstone.unwrap_or(idx),
                Slot::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(idx);
                    }
                }
                Slot::Occupied(k, _) => {
                    if std::ptr::eq(k, key) {
                        return idx;
                    }
                }
            }
            idx = (idx + 1) % capacity;
        }
    }

    fn grow(&mut self) {
        let new_capacity = (self.capacity() * 2).max(MIN_CAPACITY);
        let old_entries = std::mem::replace(
            &mut self.entries,
            (0..new_capacity).map(|_| Slot::Empty).collect(),
        );
        self.count = 0;
        for slot in old_entries {
            if let Slot::Occupied(key, value) = slot {
                let idx = self.probe(key);
                self.entries[idx] = Slot::Occupied(key, value);
                self.count += 1;
            }
        }
    }
}

impl<V: Copy> Default for Table<V> {
    fn default() -> Self {
        Self::new()
    }
}
