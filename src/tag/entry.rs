//! Map entries and the deferred-publication cache for serialized forms.

use std::sync::Arc;

use arc_swap::ArcSwap;

use super::node::Node;
use super::separator;
use super::tag::{ErasedValue, TagInfo};
use crate::types::nbt::BinaryTag;

/// Three-state slot for a lazily serialized form: stale, updating, or a
/// concrete value. The stale and updating states are per-instance `Arc`
/// sentinels compared by identity.
///
/// This is a short-duration deferred-publication protocol, not a lock:
/// a publisher that loses the race simply does not publish, and a reader
/// finding the slot stale recomputes locally.
pub(crate) struct SlotCache<T> {
    state: ArcSwap<CacheState<T>>,
    stale: Arc<CacheState<T>>,
    updating: Arc<CacheState<T>>,
}

enum CacheState<T> {
    Stale,
    Updating,
    Ready(T),
}

/// Outcome of claiming a stale slot.
pub(crate) enum CacheClaim<T> {
    /// The caller owns the recomputation and must publish or abandon.
    Won,
    /// Another thread is computing; spin or compute ad hoc.
    Busy,
    /// The slot already holds a value.
    Ready(T),
}

impl<T: Clone + Send + Sync + 'static> SlotCache<T> {
    pub(crate) fn new() -> Self {
        let stale: Arc<CacheState<T>> = Arc::new(CacheState::Stale);
        SlotCache {
            state: ArcSwap::new(Arc::clone(&stale)),
            stale,
            updating: Arc::new(CacheState::Updating),
        }
    }

    fn exchange(&self, current: &Arc<CacheState<T>>, new: Arc<CacheState<T>>) -> Arc<CacheState<T>> {
        let prior = self.state.compare_and_swap(current, new);
        Arc::clone(&prior)
    }

    /// Drop any cached value; the next reader recomputes.
    pub(crate) fn mark_stale(&self) {
        self.state.store(Arc::clone(&self.stale));
    }

    /// Seed a value directly. Only for slots not yet shared or whose owner
    /// holds the write lock.
    pub(crate) fn seed(&self, value: T) {
        self.state.store(Arc::new(CacheState::Ready(value)));
    }

    /// Try to claim the recomputation of a stale slot.
    pub(crate) fn claim(&self) -> CacheClaim<T> {
        let prior = self.exchange(&self.stale, Arc::clone(&self.updating));
        if Arc::ptr_eq(&prior, &self.stale) {
            return CacheClaim::Won;
        }
        if Arc::ptr_eq(&prior, &self.updating) {
            return CacheClaim::Busy;
        }
        match &*prior {
            CacheState::Ready(value) => CacheClaim::Ready(value.clone()),
            _ => unreachable!("cache sentinels are identity-compared"),
        }
    }

    /// Publish a claimed recomputation. Loses silently when an
    /// invalidation already reset the slot mid-compute.
    pub(crate) fn publish(&self, value: T) {
        let _ = self.exchange(&self.updating, Arc::new(CacheState::Ready(value)));
    }

    /// Back out of a claim without publishing.
    pub(crate) fn abandon(&self) {
        let _ = self.exchange(&self.updating, Arc::clone(&self.stale));
    }

    /// Wait out a concurrent updater. Resolves to its published value, or
    /// to `fallback()` when the updater lost against an invalidation.
    pub(crate) fn spin_resolve(&self, fallback: impl FnOnce() -> T) -> T {
        loop {
            let state = self.state.load_full();
            if Arc::ptr_eq(&state, &self.updating) {
                std::hint::spin_loop();
                continue;
            }
            if Arc::ptr_eq(&state, &self.stale) {
                return fallback();
            }
            match &*state {
                CacheState::Ready(value) => return value.clone(),
                _ => unreachable!("cache sentinels are identity-compared"),
            }
        }
    }
}

/// Restores a claimed cache slot to stale when the serializer unwinds, so
/// spinning readers are not stranded on the updating sentinel.
pub(crate) struct ClaimGuard<'a, T: Clone + Send + Sync + 'static> {
    cache: &'a SlotCache<T>,
    published: bool,
}

impl<'a, T: Clone + Send + Sync + 'static> ClaimGuard<'a, T> {
    pub(crate) fn new(cache: &'a SlotCache<T>) -> Self {
        ClaimGuard { cache, published: false }
    }

    pub(crate) fn publish(mut self, value: T) {
        self.cache.publish(value);
        self.published = true;
    }
}

impl<T: Clone + Send + Sync + 'static> Drop for ClaimGuard<'_, T> {
    fn drop(&mut self) {
        if !self.published {
            self.cache.abandon();
        }
    }
}

/// Value held by one map slot: a typed user value, or a child node for
/// path entries. Never both.
pub(crate) enum EntryValue {
    /// Typed user value, erased.
    Leaf(Box<ErasedValue>),
    /// Child subtree.
    Node(Arc<Node>),
}

/// One map slot: the originating tag identity, the value, and the cached
/// serialized form.
pub(crate) struct TagEntry {
    info: Arc<TagInfo>,
    value: ArcSwap<EntryValue>,
    nbt: SlotCache<BinaryTag>,
}

impl TagEntry {
    pub(crate) fn leaf(info: Arc<TagInfo>, value: Box<ErasedValue>) -> TagEntry {
        debug_assert!(!info.is_path);
        TagEntry {
            info,
            value: ArcSwap::from_pointee(EntryValue::Leaf(value)),
            nbt: SlotCache::new(),
        }
    }

    pub(crate) fn path(info: Arc<TagInfo>, node: Arc<Node>) -> TagEntry {
        debug_assert!(info.is_path);
        TagEntry {
            info,
            value: ArcSwap::from_pointee(EntryValue::Node(node)),
            nbt: SlotCache::new(),
        }
    }

    pub(crate) fn info(&self) -> &Arc<TagInfo> {
        &self.info
    }

    pub(crate) fn key(&self) -> &str {
        &self.info.key
    }

    pub(crate) fn index(&self) -> u32 {
        self.info.index
    }

    pub(crate) fn is_path(&self) -> bool {
        self.info.is_path
    }

    /// True when a tag of `tag_index` can reuse this entry's value slot
    /// in place.
    pub(crate) fn share_value(&self, tag_index: u32) -> bool {
        !self.info.is_path && self.info.index == tag_index
    }

    pub(crate) fn value(&self) -> Arc<EntryValue> {
        self.value.load_full()
    }

    /// Lock-free in-place value swap, the hot write path. The value is
    /// published before the serialized form is dropped, so a reader that
    /// sees the stale cache also sees the new value.
    pub(crate) fn update_value(&self, value: Box<ErasedValue>) {
        debug_assert!(!self.info.is_path);
        self.value.store(Arc::new(EntryValue::Leaf(value)));
        self.nbt.mark_stale();
    }

    /// Current serialized form, computing and caching it when stale.
    pub(crate) fn updated_nbt(&self) -> BinaryTag {
        if self.info.is_path {
            match &*self.value() {
                EntryValue::Node(node) => return BinaryTag::Compound(node.compound()),
                EntryValue::Leaf(_) => unreachable!("path entry without child node"),
            }
        }

        match self.nbt.claim() {
            CacheClaim::Won => {
                let guard = ClaimGuard::new(&self.nbt);
                let nbt = self.serialize_value();
                // Out of the threads calling updated_nbt, only the one that
                // saw the slot stale may publish; a concurrent update_value
                // resets the slot and wins.
                guard.publish(nbt.clone());
                nbt
            }
            CacheClaim::Busy => self.nbt.spin_resolve(|| self.serialize_value()),
            CacheClaim::Ready(nbt) => nbt,
        }
    }

    fn serialize_value(&self) -> BinaryTag {
        let write = self.info.write.as_ref().expect("leaf entry serializer");
        match &*self.value() {
            EntryValue::Leaf(any) => (**write)(any.as_ref()),
            EntryValue::Node(_) => unreachable!("leaf entry holding a node"),
        }
    }

    /// Resolve this entry to a node for path traversal: path entries yield
    /// their child, and a leaf whose serialized form is a compound converts
    /// into a transient subtree. Anything else is not path-able.
    pub(crate) fn to_node(&self) -> Option<Arc<Node>> {
        if let EntryValue::Node(node) = &*self.value() {
            return Some(Arc::clone(node));
        }
        match self.updated_nbt() {
            BinaryTag::Compound(compound) => Some(separator::node_from_compound(&compound)),
            _ => None,
        }
    }
}
