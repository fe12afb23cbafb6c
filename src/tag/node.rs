//! Tree nodes: one entry map plus a cached serialized compound per
//! subtree.

use std::sync::{Arc, Weak};

use crate::core::config::flags;
use crate::structures::int_map::StaticIntMap;
use crate::types::nbt::{BinaryTag, Compound};

use super::entry::{CacheClaim, ClaimGuard, EntryValue, SlotCache, TagEntry};
use super::separator;
use super::tag::{PathSegment, Tag, TagInfo, TagValue};

/// One node of the tag tree.
///
/// The parent back-reference exists only for the upward invalidation walk
/// and is weak: ownership flows strictly downward through the entry map.
pub(crate) struct Node {
    pub(crate) parent: Weak<Node>,
    pub(crate) entries: StaticIntMap<TagEntry>,
    /// Serialized form of this subtree; stale after any write below it.
    pub(crate) cache: SlotCache<Compound>,
}

impl Node {
    pub(crate) fn root() -> Arc<Node> {
        Arc::new(Node {
            parent: Weak::new(),
            entries: StaticIntMap::hash(),
            cache: SlotCache::new(),
        })
    }

    pub(crate) fn child(parent: &Arc<Node>) -> Arc<Node> {
        Arc::new(Node {
            parent: Arc::downgrade(parent),
            entries: StaticIntMap::hash(),
            cache: SlotCache::new(),
        })
    }

    /// Walk a path without locking. `None` when any step is absent or not
    /// path-able. A compound-shaped leaf in the way converts to a
    /// transient subtree, so reads can see through structure values.
    pub(crate) fn traverse_read(start: &Arc<Node>, path: &[PathSegment]) -> Option<Arc<Node>> {
        let mut node = Arc::clone(start);
        for segment in path {
            let entry = node.entries.get(segment.index)?;
            node = entry.to_node()?;
        }
        Some(node)
    }

    /// Walk a path without locking, following only real path entries.
    /// Unlike [`Node::traverse_read`] this never materializes transient
    /// nodes, so the result is safe to mutate in place.
    pub(crate) fn traverse_existing(start: &Arc<Node>, path: &[PathSegment]) -> Option<Arc<Node>> {
        let mut node = Arc::clone(start);
        for segment in path {
            let entry = node.entries.get(segment.index)?;
            if !entry.is_path() {
                return None;
            }
            match &*entry.value() {
                EntryValue::Node(child) => node = Arc::clone(child),
                EntryValue::Leaf(_) => return None,
            }
        }
        Some(node)
    }

    /// Lock-free typed read rooted at `start`.
    pub(crate) fn get_tag<T: TagValue>(start: &Arc<Node>, tag: &Tag<T>) -> Option<T> {
        let Some(node) = Node::traverse_read(start, tag.path()) else {
            // Path-able but absent.
            return tag.create_default();
        };
        if tag.is_view {
            return (*tag.read)(&BinaryTag::Compound(node.compound()));
        }

        let Some(entry) = node.entries.get(tag.index()) else {
            return tag.create_default();
        };
        read_entry(tag, &entry)
    }

    /// Serialized form of this subtree, cached until invalidated.
    pub(crate) fn compound(&self) -> Compound {
        if !flags().cache_enabled {
            return self.compute_compound();
        }

        match self.cache.claim() {
            CacheClaim::Won => {
                let guard = ClaimGuard::new(&self.cache);
                let compound = self.compute_compound();
                guard.publish(compound.clone());
                compound
            }
            CacheClaim::Busy => self.cache.spin_resolve(|| self.compute_compound()),
            CacheClaim::Ready(compound) => compound,
        }
    }

    fn compute_compound(&self) -> Compound {
        let serialize_empty = flags().serialize_empty_compound;
        let mut builder = Compound::builder();
        self.entries.for_values(|entry| {
            let nbt = entry.updated_nbt();
            let include = !entry.is_path()
                || serialize_empty
                || nbt.as_compound().map_or(true, |c| !c.is_empty());
            if include {
                builder.insert(entry.key(), nbt);
            }
        });
        builder.build()
    }

    /// Drop the cached compound of this node and of every ancestor.
    pub(crate) fn invalidate(&self) {
        self.cache.mark_stale();
        let mut parent = self.parent.upgrade();
        while let Some(node) = parent {
            node.cache.mark_stale();
            parent = node.parent.upgrade();
        }
    }

    /// Wholesale replace a subtree's contents from a compound. The entry
    /// map is swapped atomically; callers hold the store mutex.
    pub(crate) fn update_content(node: &Arc<Node>, compound: &Compound) {
        let staging = separator::node_from_compound(compound);
        let adopted = StaticIntMap::hash();
        staging.entries.for_values(|entry| {
            adopted.put(entry.index(), Node::adopt_entry(entry, node));
        });
        node.entries
            .update_content(&adopted)
            .expect("tag nodes use the hash variant");
        node.cache.seed(compound.clone());
    }

    /// Re-attach an entry built in a staging tree under a new parent, so
    /// the invalidation walk from its subtree reaches this tree's root.
    fn adopt_entry(entry: &Arc<TagEntry>, parent: &Arc<Node>) -> Arc<TagEntry> {
        match &*entry.value() {
            EntryValue::Node(child) => {
                let rehomed = Node::rehome(child, parent);
                Arc::new(TagEntry::path(Arc::clone(entry.info()), rehomed))
            }
            EntryValue::Leaf(_) => Arc::clone(entry),
        }
    }

    fn rehome(node: &Arc<Node>, parent: &Arc<Node>) -> Arc<Node> {
        let adopted = Node::child(parent);
        node.entries.for_values(|entry| {
            adopted.entries.put(entry.index(), Node::adopt_entry(entry, &adopted));
        });
        adopted
    }

    /// Child subtree built from a compound, parented under `parent`.
    pub(crate) fn adopt_from_compound(parent: &Arc<Node>, compound: &Compound) -> Arc<Node> {
        Node::rehome(&separator::node_from_compound(compound), parent)
    }

    /// Deep clone. Cached compounds are produced along the way; an empty
    /// child is pruned (`None`) unless empty compounds are serialized.
    pub(crate) fn copy(&self, parent: Option<&Arc<Node>>) -> Option<Arc<Node>> {
        let result = match parent {
            Some(parent) => Node::child(parent),
            None => Node::root(),
        };
        let mut builder = Compound::builder();

        self.entries.for_values(|entry| {
            match &*entry.value() {
                EntryValue::Node(child) => {
                    let Some(copied) = child.copy(Some(&result)) else {
                        return; // empty child
                    };
                    builder.insert(entry.key(), BinaryTag::Compound(copied.compound()));
                    result
                        .entries
                        .put(entry.index(), Arc::new(TagEntry::path(Arc::clone(entry.info()), copied)));
                }
                EntryValue::Leaf(any) => {
                    builder.insert(entry.key(), entry.updated_nbt());
                    let copy = entry.info().copy.as_ref().expect("leaf entry copier");
                    result
                        .entries
                        .put(entry.index(), Arc::new(TagEntry::leaf(Arc::clone(entry.info()), (**copy)(any.as_ref()))));
                }
            }
        });

        let compound = builder.build();
        if !flags().serialize_empty_compound && compound.is_empty() && parent.is_some() {
            return None;
        }
        // Plain seed is fine: the copy has not been shared yet.
        result.cache.seed(compound);
        Some(result)
    }
}

/// Identity for entries displaced into a path node, and for path entries
/// written during traversal.
pub(crate) fn path_entry_info(segment: &PathSegment) -> Arc<TagInfo> {
    TagInfo::path_info(&segment.name)
}

/// Read an entry's value through a possibly different tag: a value-sharing
/// tag reads the slot directly, anything else goes through the serialized
/// form with a type check.
pub(crate) fn read_entry<T: TagValue>(tag: &Tag<T>, entry: &Arc<TagEntry>) -> Option<T> {
    if entry.share_value(tag.index()) {
        if let EntryValue::Leaf(any) = &*entry.value() {
            if let Some(value) = any.downcast_ref::<T>() {
                return Some(value.clone());
            }
        }
    }

    let nbt = entry.updated_nbt();
    match tag.info.tag_type {
        Some(expected) if expected != nbt.tag_type() => tag.create_default(),
        _ => (*tag.read)(&nbt).or_else(|| tag.create_default()),
    }
}
