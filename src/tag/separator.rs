//! Decomposition of compounds into tag writes.
//!
//! Rebuilding a tree from a serialized compound re-expresses every entry
//! as a typed tag write: scalars and strings become their typed tags,
//! lists and arrays ride through raw binary tags, and nested compounds
//! recurse as path steps. Because the registry assigns indices by
//! `(key, shape)`, a round-tripped store lands every value back in the
//! slot the original typed tag used.

use std::sync::Arc;

use crate::types::nbt::{BinaryTag, Compound};

use super::node::Node;
use super::store::TagStore;
use super::tag::{Tag, TagValue};

/// Replay `compound` into `store` as individual tag writes.
pub(crate) fn separate(compound: &Compound, store: &TagStore) {
    let mut path = Vec::new();
    separate_into(&mut path, compound, store);
}

fn separate_into(path: &mut Vec<String>, compound: &Compound, store: &TagStore) {
    for (key, nbt) in compound.iter() {
        match nbt {
            BinaryTag::Compound(child) => {
                path.push(key.clone());
                separate_into(path, child, store);
                path.pop();
            }
            BinaryTag::Byte(v) => apply(store, path, Tag::byte(key), *v),
            BinaryTag::Short(v) => apply(store, path, Tag::short(key), *v),
            BinaryTag::Int(v) => apply(store, path, Tag::int(key), *v),
            BinaryTag::Long(v) => apply(store, path, Tag::long(key), *v),
            BinaryTag::Float(v) => apply(store, path, Tag::float(key), *v),
            BinaryTag::Double(v) => apply(store, path, Tag::double(key), *v),
            BinaryTag::String(v) => apply(store, path, Tag::string(key), v.clone()),
            // Lists and arrays keep their raw form.
            other => apply(store, path, Tag::nbt(key), other.clone()),
        }
    }
}

fn apply<T: TagValue>(store: &TagStore, path: &[String], tag: Tag<T>, value: T) {
    let tag = if path.is_empty() {
        tag
    } else {
        let segments: Vec<&str> = path.iter().map(String::as_str).collect();
        tag.with_path(&segments)
    };
    store.set_tag(&tag, value);
}

/// Build a standalone tree from a compound, with the compound seeded as
/// the root's cached form.
pub(crate) fn node_from_compound(compound: &Compound) -> Arc<Node> {
    let store = TagStore::new();
    separate(compound, &store);
    let root = Arc::clone(store.root());
    root.cache.seed(compound.clone());
    root
}
