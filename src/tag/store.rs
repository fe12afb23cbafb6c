//! The tag store: public surface over the node tree.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwapOption;

use crate::types::nbt::{BinaryTag, Compound};

use super::entry::{EntryValue, TagEntry};
use super::node::{path_entry_info, read_entry, Node};
use super::separator;
use super::tag::{ErasedValue, PathSegment, Tag, TagInfo, TagValue};

/// Read-only access to tagged values.
pub trait TagReadable {
    /// Look up a tag's value; a miss yields the tag's default.
    fn get_tag<T: TagValue>(&self, tag: &Tag<T>) -> Option<T>;
}

/// Hierarchical, index-addressed attribute store.
///
/// Reads never lock and may run concurrently with writes; all writes
/// serialize on one internal mutex. The serialized form of every subtree
/// is cached and invalidated incrementally.
pub struct TagStore {
    root: Arc<Node>,
    /// Cached deep snapshot handed out by `readable_copy`, dropped by the
    /// next write.
    snapshot: ArcSwapOption<Node>,
    write_lock: Mutex<()>,
}

impl TagStore {
    /// New empty store.
    pub fn new() -> TagStore {
        TagStore {
            root: Node::root(),
            snapshot: ArcSwapOption::empty(),
            write_lock: Mutex::new(()),
        }
    }

    /// Rebuild a store from a serialized compound.
    pub fn from_compound(compound: &Compound) -> TagStore {
        let store = TagStore::new();
        separator::separate(compound, &store);
        store.root.cache.seed(compound.clone());
        store
    }

    pub(crate) fn root(&self) -> &Arc<Node> {
        &self.root
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        // A panicking user closure must not wedge later writes.
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn invalidate_from(&self, node: &Arc<Node>) {
        node.invalidate();
        self.snapshot.store(None);
    }

    /// Set a tag's value. The hot path, an existing entry written by a
    /// value-sharing tag, swaps the value in place without locking.
    pub fn set_tag<T: TagValue>(&self, tag: &Tag<T>, value: T) {
        let value = tag.copy_value(&value);

        if tag.is_view {
            let guard = self.lock();
            let node = self
                .traverse_write_locked(tag.path(), true, &guard)
                .expect("present write traversal yields a node");
            let compound = serialize_view(tag, &value);
            Node::update_content(&node, &compound);
            drop(guard);
            self.invalidate_from(&node);
            return;
        }

        if let Some(node) = Node::traverse_existing(&self.root, tag.path()) {
            if let Some(entry) = node.entries.get(tag.index()) {
                if entry.share_value(tag.index()) {
                    entry.update_value(Box::new(value));
                    self.invalidate_from(&node);
                    return;
                }
            }
        }

        let guard = self.lock();
        let node = self
            .traverse_write_locked(tag.path(), true, &guard)
            .expect("present write traversal yields a node");
        let entry = value_to_entry(&node, &tag.info, Box::new(value));
        node.entries.put(tag.index(), entry);
        drop(guard);
        self.invalidate_from(&node);
    }

    /// Remove a tag. Missing path segments are left unallocated.
    pub fn remove_tag<T: TagValue>(&self, tag: &Tag<T>) {
        let guard = self.lock();
        let Some(node) = self.traverse_write_locked(tag.path(), false, &guard) else {
            return; // absent tag, nothing to do
        };
        if tag.is_view {
            Node::update_content(&node, &Compound::empty());
        } else {
            node.entries.remove(tag.index());
        }
        drop(guard);
        self.invalidate_from(&node);
    }

    /// Read-modify-write under the store mutex.
    ///
    /// The operator runs while the mutex is held: it must not call back
    /// into this store, or the call deadlocks.
    pub fn update_tag<T: TagValue>(&self, tag: &Tag<T>, op: impl FnOnce(Option<T>) -> Option<T>) {
        let _ = self.update_tag0(tag, op);
    }

    /// [`TagStore::update_tag`] returning the value the operator replaced.
    pub fn get_and_update_tag<T: TagValue>(
        &self,
        tag: &Tag<T>,
        op: impl FnOnce(Option<T>) -> Option<T>,
    ) -> Option<T> {
        self.update_tag0(tag, op).0
    }

    /// [`TagStore::update_tag`] returning the value the operator produced.
    pub fn update_and_get_tag<T: TagValue>(
        &self,
        tag: &Tag<T>,
        op: impl FnOnce(Option<T>) -> Option<T>,
    ) -> Option<T> {
        self.update_tag0(tag, op).1
    }

    /// Atomically replace a tag's value, returning the previous one.
    pub fn get_and_set_tag<T: TagValue>(&self, tag: &Tag<T>, value: T) -> Option<T> {
        self.update_tag0(tag, move |_| Some(value)).0
    }

    fn update_tag0<T: TagValue>(
        &self,
        tag: &Tag<T>,
        op: impl FnOnce(Option<T>) -> Option<T>,
    ) -> (Option<T>, Option<T>) {
        let guard = self.lock();
        let node = self
            .traverse_write_locked(tag.path(), true, &guard)
            .expect("present write traversal yields a node");

        if tag.is_view {
            let previous = (*tag.read)(&BinaryTag::Compound(node.compound()));
            let next = op(previous.clone());
            match &next {
                Some(value) => Node::update_content(&node, &serialize_view(tag, value)),
                None => Node::update_content(&node, &Compound::empty()),
            }
            drop(guard);
            self.invalidate_from(&node);
            return (previous, next);
        }

        let previous = match node.entries.get(tag.index()) {
            Some(entry) => read_entry(tag, &entry),
            None => tag.create_default(),
        };
        let next = op(previous.clone());
        match &next {
            Some(value) => {
                let copied = tag.copy_value(value);
                let entry = value_to_entry(&node, &tag.info, Box::new(copied));
                node.entries.put(tag.index(), entry);
            }
            None => node.entries.remove(tag.index()),
        }
        drop(guard);
        self.invalidate_from(&node);
        (previous, next)
    }

    /// Serialized form of the whole store.
    pub fn as_compound(&self) -> Compound {
        self.root.compound()
    }

    /// Cheap read-only snapshot, cached until the next write.
    pub fn readable_copy(&self) -> ReadableView {
        if let Some(root) = self.snapshot.load_full() {
            return ReadableView { root };
        }
        let guard = self.lock();
        let root = self.root.copy(None).expect("root copy is never pruned");
        self.snapshot.store(Some(Arc::clone(&root)));
        drop(guard);
        ReadableView { root }
    }

    /// Wholesale replace the store's contents from a compound.
    pub fn update_content(&self, compound: &Compound) {
        let _guard = self.lock();
        tracing::debug!(entries = compound.size(), "replacing store content");
        Node::update_content(&self.root, compound);
        self.snapshot.store(None);
    }

    /// Drop every tag.
    pub fn clear_tags(&self) {
        let _guard = self.lock();
        self.root.entries.clear();
        self.root.invalidate();
        self.snapshot.store(None);
    }

    /// Walk a path under the store mutex, allocating missing steps when
    /// `present`. A non-path entry in the way is displaced by a child
    /// node, seeded from the entry's compound form if it has one.
    fn traverse_write_locked(
        &self,
        path: &[PathSegment],
        present: bool,
        _witness: &MutexGuard<'_, ()>,
    ) -> Option<Arc<Node>> {
        let mut local = Arc::clone(&self.root);
        for segment in path {
            let existing = local.entries.get(segment.index);
            if let Some(entry) = &existing {
                if entry.is_path() {
                    if let EntryValue::Node(child) = &*entry.value() {
                        local = Arc::clone(child);
                        continue;
                    }
                }
            }
            if !present {
                return None;
            }

            let child = Node::child(&local);
            if let Some(entry) = &existing {
                if let BinaryTag::Compound(compound) = entry.updated_nbt() {
                    Node::update_content(&child, &compound);
                }
            }
            local
                .entries
                .put(segment.index, Arc::new(TagEntry::path(path_entry_info(segment), Arc::clone(&child))));
            local = child;
        }
        Some(local)
    }
}

impl Default for TagStore {
    fn default() -> Self {
        TagStore::new()
    }
}

impl Clone for TagStore {
    /// Deep clone under the store mutex.
    fn clone(&self) -> TagStore {
        let _guard = self.lock();
        TagStore {
            root: self.root.copy(None).expect("root copy is never pruned"),
            snapshot: ArcSwapOption::empty(),
            write_lock: Mutex::new(()),
        }
    }
}

impl TagReadable for TagStore {
    fn get_tag<T: TagValue>(&self, tag: &Tag<T>) -> Option<T> {
        Node::get_tag(&self.root, tag)
    }
}

/// Immutable deep snapshot of a store, safe to hand to event handlers.
pub struct ReadableView {
    root: Arc<Node>,
}

impl TagReadable for ReadableView {
    fn get_tag<T: TagValue>(&self, tag: &Tag<T>) -> Option<T> {
        Node::get_tag(&self.root, tag)
    }
}

fn serialize_view<T: TagValue>(tag: &Tag<T>, value: &T) -> Compound {
    let write = tag.info.write.as_ref().expect("view serializer");
    let any: &ErasedValue = value;
    match (**write)(any) {
        BinaryTag::Compound(compound) => compound,
        _ => panic!("view serializer must produce a compound"),
    }
}

/// Wrap a value for storage. A raw compound installs a child subtree
/// instead of a leaf; everything else keeps the writing tag's identity.
pub(crate) fn value_to_entry(
    parent: &Arc<Node>,
    info: &Arc<TagInfo>,
    value: Box<ErasedValue>,
) -> Arc<TagEntry> {
    if let Some(BinaryTag::Compound(compound)) = value.downcast_ref::<BinaryTag>() {
        let child = Node::adopt_from_compound(parent, compound);
        return Arc::new(TagEntry::path(TagInfo::path_info(&info.key), child));
    }
    Arc::new(TagEntry::leaf(Arc::clone(info), value))
}
