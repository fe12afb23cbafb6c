//! Single-writer int-keyed map with lock-free readers.
//!
//! Two variants share one interface: a dense array for small contiguous
//! key spaces, and an open-addressed quadratic-probed hash table for the
//! general case. Writes (`put`, `remove`, `update_content`, `clear`) must
//! be serialized externally, typically under the owning store's mutex.
//! Reads take no lock and may run concurrently with the single writer.
//!
//! Hash slots hold the user key `k` encoded as `k + 1`; stored key `0`
//! means the slot was never occupied and `-1` is a tombstone. A writer
//! publishes the value slot before the key slot, and readers load the key
//! before the value, so a reader that observes a live key also observes
//! the value write that preceded it. That pairing is the whole
//! concurrency argument for the map.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};

use crate::types::error::StoreError;


const EMPTY_KEY: i32 = 0;
const TOMBSTONE_KEY: i32 = -1;
const LOAD_FACTOR: f32 = 0.7;
const INITIAL_CAPACITY: usize = 4;

/// Int-keyed map over shared values, single writer / many readers.
pub enum StaticIntMap<V> {
    /// Dense array variant, directly indexed by key.
    Array(ArrayIntMap<V>),
    /// Open-addressed hash variant.
    Hash(HashIntMap<V>),
}

impl<V: Send + Sync> StaticIntMap<V> {
    /// New empty array-variant map.
    pub fn array() -> Self {
        StaticIntMap::Array(ArrayIntMap::new())
    }

    /// New empty hash-variant map.
    pub fn hash() -> Self {
        StaticIntMap::Hash(HashIntMap::new())
    }

    /// Lock-free lookup.
    pub fn get(&self, key: u32) -> Option<Arc<V>> {
        match self {
            StaticIntMap::Array(map) => map.get(key),
            StaticIntMap::Hash(map) => map.get(key),
        }
    }

    /// Insert or replace. Requires external write serialization.
    pub fn put(&self, key: u32, value: Arc<V>) {
        match self {
            StaticIntMap::Array(map) => map.put(key, value),
            StaticIntMap::Hash(map) => map.put(key, value),
        }
    }

    /// Remove a key if present. Requires external write serialization.
    pub fn remove(&self, key: u32) {
        match self {
            StaticIntMap::Array(map) => map.remove(key),
            StaticIntMap::Hash(map) => map.remove(key),
        }
    }

    /// Visit every live value. Lock-free; tolerates a concurrent writer.
    pub fn for_values(&self, f: impl FnMut(&Arc<V>)) {
        match self {
            StaticIntMap::Array(map) => map.for_values(f),
            StaticIntMap::Hash(map) => map.for_values(f),
        }
    }

    /// Snapshot into a fresh map of the same variant. Lock-free; a
    /// concurrent writer may leave a live key whose value slot is empty,
    /// never a value without its key.
    pub fn copy(&self) -> StaticIntMap<V> {
        match self {
            StaticIntMap::Array(map) => StaticIntMap::Array(map.copy()),
            StaticIntMap::Hash(map) => StaticIntMap::Hash(map.copy()),
        }
    }

    /// Replace this map's contents with a snapshot of `content`, which
    /// must be of the same variant. Requires external write serialization.
    pub fn update_content(&self, content: &StaticIntMap<V>) -> Result<(), StoreError> {
        match (self, content) {
            (StaticIntMap::Array(map), StaticIntMap::Array(other)) => {
                map.update_content(other);
                Ok(())
            }
            (StaticIntMap::Hash(map), StaticIntMap::Hash(other)) => {
                map.update_content(other);
                Ok(())
            }
            _ => Err(StoreError::MapContentMismatch),
        }
    }

    /// Drop every entry. Requires external write serialization.
    pub fn clear(&self) {
        match self {
            StaticIntMap::Array(map) => map.clear(),
            StaticIntMap::Hash(map) => map.clear(),
        }
    }
}

// ---------------------------------------------------------------------------
// Hash variant
// ---------------------------------------------------------------------------

struct Slot<V> {
    key: AtomicI32,
    value: ArcSwapOption<V>,
}

impl<V> Slot<V> {
    fn vacant() -> Self {
        Slot {
            key: AtomicI32::new(EMPTY_KEY),
            value: ArcSwapOption::empty(),
        }
    }
}

struct Table<V> {
    slots: Box<[Slot<V>]>,
}

impl<V> Table<V> {
    fn with_len(len: usize) -> Self {
        debug_assert!(len == 0 || len.is_power_of_two());
        let slots = (0..len).map(|_| Slot::vacant()).collect::<Vec<_>>();
        Table {
            slots: slots.into_boxed_slice(),
        }
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}

#[inline]
fn encode_key(key: u32) -> i32 {
    debug_assert!(key < i32::MAX as u32, "key out of range");
    (key as i32) + 1
}

/// Quadratic probe step: visits every slot of a power-of-two table.
#[inline]
fn probe_index(start: usize, i: usize, mask: usize) -> usize {
    (((start << 1) + i + i * i) >> 1) & mask
}

/// Probe for an existing key. `None` on the first never-occupied slot;
/// tombstones are skipped.
fn probe_key<V>(encoded: i32, table: &Table<V>) -> Option<usize> {
    let mask = table.len() - 1;
    let start = (encoded as u32 as usize) & mask;

    for i in 0..table.len() {
        let index = probe_index(start, i, mask);
        let sample = table.slots[index].key.load(Ordering::Acquire);

        if sample == encoded {
            return Some(index);
        }
        if sample == EMPTY_KEY {
            return None;
        }
    }

    None
}

/// Probe for the first never-occupied slot, ignoring tombstones. Used when
/// rehashing into a table known to have headroom.
fn probe_empty<V>(encoded: i32, table: &Table<V>) -> Option<usize> {
    let mask = table.len() - 1;
    let start = (encoded as u32 as usize) & mask;

    for i in 0..table.len() {
        let index = probe_index(start, i, mask);
        if table.slots[index].key.load(Ordering::Relaxed) == EMPTY_KEY {
            return Some(index);
        }
    }

    None
}

/// Probe for a put target: an existing match, else the first tombstone,
/// else the first empty slot, in that priority.
fn probe_put<V>(encoded: i32, table: &Table<V>) -> Option<usize> {
    let mask = table.len() - 1;
    let start = (encoded as u32 as usize) & mask;

    let mut tombstone = None;
    for i in 0..table.len() {
        let index = probe_index(start, i, mask);
        let sample = table.slots[index].key.load(Ordering::Relaxed);

        if sample == TOMBSTONE_KEY {
            if tombstone.is_none() {
                tombstone = Some(index);
            }
        } else if sample == encoded {
            return Some(index);
        } else if sample == EMPTY_KEY {
            return tombstone.or(Some(index));
        }
    }

    tombstone
}

/// Open-addressed hash variant.
///
/// The table pointer is republished only on rehash; `put` and `remove`
/// mutate slots of the current table in place.
pub struct HashIntMap<V> {
    table: ArcSwap<Table<V>>,
    /// Number of live entries. Only the single writer touches this, so it
    /// needs no stronger ordering than relaxed.
    size: AtomicUsize,
}

impl<V: Send + Sync> HashIntMap<V> {
    /// New empty map.
    pub fn new() -> Self {
        HashIntMap {
            table: ArcSwap::from_pointee(Table::with_len(0)),
            size: AtomicUsize::new(0),
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// True when the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lock-free lookup.
    pub fn get(&self, key: u32) -> Option<Arc<V>> {
        let table = self.table.load();
        if table.len() == 0 {
            return None;
        }
        let index = probe_key(encode_key(key), &table)?;
        table.slots[index].value.load_full()
    }

    /// Insert or replace. Requires external write serialization.
    pub fn put(&self, key: u32, value: Arc<V>) {
        let encoded = encode_key(key);
        let table = self.table.load();

        if table.len() == 0 {
            let fresh = Table::with_len(INITIAL_CAPACITY);
            let index = (encoded as usize) & (INITIAL_CAPACITY - 1);
            fresh.slots[index].value.store(Some(value));
            fresh.slots[index].key.store(encoded, Ordering::Release);
            self.table.store(Arc::new(fresh));
            self.size.store(1, Ordering::Relaxed);
            return;
        }

        // Always reachable: the load factor keeps free slots in every table.
        let Some(index) = probe_put(encoded, &table) else {
            panic!("int map has no free slot despite load factor headroom");
        };

        let slot = &table.slots[index];
        // Value first, then key: a reader that sees the key sees the value.
        slot.value.store(Some(value));
        let old_key = slot.key.load(Ordering::Relaxed);
        if old_key != encoded {
            slot.key.store(encoded, Ordering::Release);
            self.size.fetch_add(1, Ordering::Relaxed);
        }

        let size = self.size.load(Ordering::Relaxed);
        if size + 1 >= (table.len() as f32 * LOAD_FACTOR) as usize {
            self.rehash(table.len() << 1);
        }
    }

    /// Remove a key if present. Requires external write serialization.
    pub fn remove(&self, key: u32) {
        let table = self.table.load();
        if table.len() == 0 {
            return;
        }
        let Some(index) = probe_key(encode_key(key), &table) else {
            return;
        };

        let slot = &table.slots[index];
        // Tombstone first, then clear the value: a reader observing the
        // old live key may still find the value, never a dangling value.
        slot.key.store(TOMBSTONE_KEY, Ordering::Release);
        slot.value.store(None);

        let size = self.size.load(Ordering::Relaxed) - 1;
        self.size.store(size, Ordering::Relaxed);

        if size == 0 {
            self.table.store(Arc::new(Table::with_len(0)));
        } else if size + 1 <= ((1.0 - LOAD_FACTOR) * table.len() as f32) as usize {
            self.rehash(table.len() >> 1);
        }
    }

    /// Rebuild into a table of `new_len`, dropping tombstones, and publish
    /// the result. Writer-only.
    fn rehash(&self, new_len: usize) {
        let table = self.table.load();
        let fresh = Table::with_len(new_len);

        for slot in table.slots.iter() {
            let key = slot.key.load(Ordering::Relaxed);
            if key <= EMPTY_KEY {
                continue;
            }
            let value = slot.value.load_full();
            let Some(index) = probe_empty(key, &fresh) else {
                panic!("rehash target cannot fit live entries");
            };
            fresh.slots[index].key.store(key, Ordering::Relaxed);
            fresh.slots[index].value.store(value);
        }

        tracing::trace!(new_len, "rehashing int map");
        self.table.store(Arc::new(fresh));
    }

    /// Visit every live value.
    pub fn for_values(&self, mut f: impl FnMut(&Arc<V>)) {
        let table = self.table.load();
        for slot in table.slots.iter() {
            let key = slot.key.load(Ordering::Acquire);
            if key <= EMPTY_KEY {
                continue;
            }
            if let Some(value) = slot.value.load_full() {
                f(&value);
            }
        }
    }

    /// Snapshot into a fresh map. Tombstone keys are preserved without
    /// values; live keys copy their value slots.
    pub fn copy(&self) -> HashIntMap<V> {
        let table = self.table.load();
        let fresh = Table::with_len(table.len());
        let mut size = 0;

        for (i, slot) in table.slots.iter().enumerate() {
            let key = slot.key.load(Ordering::Acquire);
            if key == EMPTY_KEY {
                continue;
            }
            if key > EMPTY_KEY {
                fresh.slots[i].value.store(slot.value.load_full());
                size += 1;
            }
            fresh.slots[i].key.store(key, Ordering::Relaxed);
        }

        HashIntMap {
            table: ArcSwap::from_pointee(fresh),
            size: AtomicUsize::new(size),
        }
    }

    /// Replace contents with a snapshot of `content`.
    pub fn update_content(&self, content: &HashIntMap<V>) {
        let snapshot = content.copy();
        self.size.store(snapshot.size.load(Ordering::Relaxed), Ordering::Relaxed);
        self.table.store(snapshot.table.load_full());
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.table.store(Arc::new(Table::with_len(0)));
        self.size.store(0, Ordering::Relaxed);
    }
}

impl<V: Send + Sync> Default for HashIntMap<V> {
    fn default() -> Self {
        HashIntMap::new()
    }
}

// ---------------------------------------------------------------------------
// Array variant
// ---------------------------------------------------------------------------

struct ArrayTable<V> {
    slots: Box<[ArcSwapOption<V>]>,
}

impl<V> ArrayTable<V> {
    fn with_len(len: usize) -> Self {
        let slots = (0..len).map(|_| ArcSwapOption::empty()).collect::<Vec<_>>();
        ArrayTable {
            slots: slots.into_boxed_slice(),
        }
    }
}

/// Dense array variant, suitable only for small contiguous key spaces.
pub struct ArrayIntMap<V> {
    table: ArcSwap<ArrayTable<V>>,
}

impl<V: Send + Sync> ArrayIntMap<V> {
    /// New empty map.
    pub fn new() -> Self {
        ArrayIntMap {
            table: ArcSwap::from_pointee(ArrayTable::with_len(0)),
        }
    }

    /// Lock-free lookup.
    pub fn get(&self, key: u32) -> Option<Arc<V>> {
        let table = self.table.load();
        table.slots.get(key as usize).and_then(|slot| slot.load_full())
    }

    /// Insert or replace, growing the backing array as needed. Requires
    /// external write serialization.
    pub fn put(&self, key: u32, value: Arc<V>) {
        let key = key as usize;
        let table = self.table.load();
        if key < table.slots.len() {
            table.slots[key].store(Some(value));
            return;
        }

        let fresh = ArrayTable::with_len(key * 2 + 1);
        for (i, slot) in table.slots.iter().enumerate() {
            fresh.slots[i].store(slot.load_full());
        }
        fresh.slots[key].store(Some(value));
        self.table.store(Arc::new(fresh));
    }

    /// Remove a key if present.
    pub fn remove(&self, key: u32) {
        let table = self.table.load();
        if let Some(slot) = table.slots.get(key as usize) {
            slot.store(None);
        }
    }

    /// Visit every live value.
    pub fn for_values(&self, mut f: impl FnMut(&Arc<V>)) {
        let table = self.table.load();
        for slot in table.slots.iter() {
            if let Some(value) = slot.load_full() {
                f(&value);
            }
        }
    }

    /// Snapshot into a fresh map.
    pub fn copy(&self) -> ArrayIntMap<V> {
        let table = self.table.load();
        let fresh = ArrayTable::with_len(table.slots.len());
        for (i, slot) in table.slots.iter().enumerate() {
            fresh.slots[i].store(slot.load_full());
        }
        ArrayIntMap {
            table: ArcSwap::from_pointee(fresh),
        }
    }

    /// Replace contents with a snapshot of `content`.
    pub fn update_content(&self, content: &ArrayIntMap<V>) {
        let snapshot = content.copy();
        self.table.store(snapshot.table.load_full());
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.table.store(Arc::new(ArrayTable::with_len(0)));
    }
}

impl<V: Send + Sync> Default for ArrayIntMap<V> {
    fn default() -> Self {
        ArrayIntMap::new()
    }
}
