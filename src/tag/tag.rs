//! Typed tag handles and the process-wide index registry.
//!
//! A [`Tag`] names one attribute: a textual key, a path of intermediate
//! subtrees, and the serializer pair that moves the value in and out of
//! its binary form. Tags are cheap to clone and safe to share; identity
//! lives in the index, which the registry allocates per `(key, shape)`
//! pair. Two tags with the same key and shape always share an index and
//! therefore share the stored value.

use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::types::nbt::{BinaryTag, Compound, TagType};

/// Type-erased value stored in a leaf entry.
pub(crate) type ErasedValue = dyn Any + Send + Sync;

/// Values usable with typed tags.
pub trait TagValue: Clone + Send + Sync + 'static {}
impl<T: Clone + Send + Sync + 'static> TagValue for T {}

/// Shape half of the registry key. Tags of the same textual key but
/// different shapes address different slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TagShape {
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    /// Raw binary tags of any type.
    Nbt,
    /// Intermediate path nodes and compound views.
    Compound,
    /// Serializer-backed views.
    View,
    /// Caller-supplied serializers, keyed by their output type.
    Custom(TagType),
}

/// Allocates stable indices per `(key, shape)` pair, starting at 1.
///
/// Index 0 stays reserved for the map layer's empty-slot sentinel. The
/// assignment is dense and deterministic within a process, which keeps the
/// identity-hashed probe sequences of the map well distributed.
struct TagRegistry {
    indices: DashMap<(Arc<str>, TagShape), u32, ahash::RandomState>,
    next: AtomicU32,
}

static REGISTRY: Lazy<TagRegistry> = Lazy::new(|| TagRegistry {
    indices: DashMap::with_hasher(ahash::RandomState::new()),
    next: AtomicU32::new(1),
});

pub(crate) fn tag_index(key: &str, shape: TagShape) -> u32 {
    if let Some(existing) = REGISTRY.indices.get(&(Arc::from(key), shape)) {
        return *existing;
    }
    *REGISTRY
        .indices
        .entry((Arc::from(key), shape))
        .or_insert_with(|| REGISTRY.next.fetch_add(1, Ordering::Relaxed))
}

/// One step of a tag path: the name of the subtree and the slot index the
/// path entry occupies in its parent node.
#[derive(Debug, Clone)]
pub(crate) struct PathSegment {
    pub(crate) name: Arc<str>,
    pub(crate) index: u32,
}

impl PathSegment {
    pub(crate) fn new(name: &str) -> Self {
        PathSegment {
            name: Arc::from(name),
            index: tag_index(name, TagShape::Compound),
        }
    }
}

/// Type-erased tag identity shared between a tag handle and the entries it
/// has written. This is what a map entry keeps.
#[derive(Clone)]
pub(crate) struct TagInfo {
    pub(crate) key: Arc<str>,
    pub(crate) index: u32,
    /// Expected binary type on read; `None` accepts any (raw tags).
    pub(crate) tag_type: Option<TagType>,
    /// True for entries whose value is a child node.
    pub(crate) is_path: bool,
    /// Serialize the erased value. Absent for path entries, whose form is
    /// always the child's compound.
    pub(crate) write: Option<Arc<dyn Fn(&ErasedValue) -> BinaryTag + Send + Sync>>,
    /// Deep-copy the erased value. Absent for path entries.
    pub(crate) copy: Option<Arc<dyn Fn(&ErasedValue) -> Box<ErasedValue> + Send + Sync>>,
}

impl TagInfo {
    /// Identity for a path entry installed at `name`.
    pub(crate) fn path_info(name: &Arc<str>) -> Arc<TagInfo> {
        Arc::new(TagInfo {
            key: Arc::clone(name),
            index: tag_index(name, TagShape::Compound),
            tag_type: Some(TagType::Compound),
            is_path: true,
            write: None,
            copy: None,
        })
    }
}

/// Typed handle identifying one attribute of a tag store.
pub struct Tag<T> {
    pub(crate) info: Arc<TagInfo>,
    pub(crate) path: Arc<[PathSegment]>,
    pub(crate) is_view: bool,
    pub(crate) read: Arc<dyn Fn(&BinaryTag) -> Option<T> + Send + Sync>,
    pub(crate) default: Option<Arc<dyn Fn() -> T + Send + Sync>>,
    pub(crate) copy: Option<Arc<dyn Fn(&T) -> T + Send + Sync>>,
}

impl<T> Clone for Tag<T> {
    fn clone(&self) -> Self {
        Tag {
            info: Arc::clone(&self.info),
            path: Arc::clone(&self.path),
            is_view: self.is_view,
            read: Arc::clone(&self.read),
            default: self.default.clone(),
            copy: self.copy.clone(),
        }
    }
}

impl<T: TagValue> Tag<T> {
    fn typed(
        key: &str,
        shape: TagShape,
        tag_type: Option<TagType>,
        write: impl Fn(&T) -> BinaryTag + Send + Sync + 'static,
        read: impl Fn(&BinaryTag) -> Option<T> + Send + Sync + 'static,
    ) -> Tag<T> {
        let erased_write: Arc<dyn Fn(&ErasedValue) -> BinaryTag + Send + Sync> =
            Arc::new(move |any| {
                let value = any.downcast_ref::<T>().expect("tag value shape");
                write(value)
            });
        let erased_copy: Arc<dyn Fn(&ErasedValue) -> Box<ErasedValue> + Send + Sync> =
            Arc::new(|any| {
                let value = any.downcast_ref::<T>().expect("tag value shape");
                Box::new(value.clone())
            });

        Tag {
            info: Arc::new(TagInfo {
                key: Arc::from(key),
                index: tag_index(key, shape),
                tag_type,
                is_path: false,
                write: Some(erased_write),
                copy: Some(erased_copy),
            }),
            path: Arc::from(Vec::new()),
            is_view: false,
            read: Arc::new(read),
            default: None,
            copy: None,
        }
    }

    /// Tag backed by a caller-supplied serializer pair. Two tags with the
    /// same key and output type share the stored value.
    pub fn from_serializer(
        key: &str,
        tag_type: TagType,
        write: impl Fn(&T) -> BinaryTag + Send + Sync + 'static,
        read: impl Fn(&BinaryTag) -> Option<T> + Send + Sync + 'static,
    ) -> Tag<T> {
        Tag::typed(key, TagShape::Custom(tag_type), Some(tag_type), write, read)
    }

    /// Structure tag: a typed value serialized as a compound. It is stored
    /// as a plain leaf, shares its index with path entries of the same key,
    /// and is displaced into a real subtree by the first path write through
    /// that key, seeded from its serialized form.
    pub fn structure(
        key: &str,
        write: impl Fn(&T) -> Compound + Send + Sync + 'static,
        read: impl Fn(&Compound) -> Option<T> + Send + Sync + 'static,
    ) -> Tag<T> {
        Tag::typed(
            key,
            TagShape::Compound,
            Some(TagType::Compound),
            move |value| BinaryTag::Compound(write(value)),
            move |nbt| nbt.as_compound().and_then(&read),
        )
    }

    /// Serializer-backed view over the whole subtree named `key`: writes
    /// replace the subtree's content, reads see its full compound.
    pub fn view_with(
        key: &str,
        write: impl Fn(&T) -> Compound + Send + Sync + 'static,
        read: impl Fn(&Compound) -> Option<T> + Send + Sync + 'static,
    ) -> Tag<T> {
        let mut tag = Tag::typed(
            key,
            TagShape::View,
            Some(TagType::Compound),
            move |value| BinaryTag::Compound(write(value)),
            move |nbt| nbt.as_compound().and_then(&read),
        );
        tag.is_view = true;
        tag.path = Arc::from(vec![PathSegment::new(key)]);
        tag
    }

    /// Place the tag under the named subtrees, replacing any previous path.
    pub fn with_path(mut self, path: &[&str]) -> Self {
        let mut segments: Vec<PathSegment> = path.iter().map(|name| PathSegment::new(name)).collect();
        if self.is_view {
            // A view's own key stays the last path step.
            segments.extend(self.path.iter().cloned());
        }
        self.path = Arc::from(segments);
        self
    }

    /// Value returned when a read misses.
    pub fn default_value(mut self, default: impl Fn() -> T + Send + Sync + 'static) -> Self {
        self.default = Some(Arc::new(default));
        self
    }

    /// Deep-copy hook applied on write and on defaulted reads. Without one,
    /// `Clone` is the copy.
    pub fn copy_with(mut self, copy: impl Fn(&T) -> T + Send + Sync + 'static) -> Self {
        let copy = Arc::new(copy);
        let erased = {
            let copy = Arc::clone(&copy);
            move |any: &ErasedValue| -> Box<ErasedValue> {
                let value = any.downcast_ref::<T>().expect("tag value shape");
                Box::new((*copy)(value))
            }
        };
        let mut info = (*self.info).clone();
        info.copy = Some(Arc::new(erased));
        self.info = Arc::new(info);
        self.copy = Some(copy);
        self
    }

    /// Textual key of the tag.
    pub fn key(&self) -> &str {
        &self.info.key
    }

    pub(crate) fn index(&self) -> u32 {
        self.info.index
    }

    pub(crate) fn path(&self) -> &[PathSegment] {
        &self.path
    }

    pub(crate) fn create_default(&self) -> Option<T> {
        let default = self.default.as_ref()?;
        let value = (**default)();
        Some(match &self.copy {
            Some(copy) => (**copy)(&value),
            None => value,
        })
    }

    pub(crate) fn copy_value(&self, value: &T) -> T {
        match &self.copy {
            Some(copy) => (**copy)(value),
            None => value.clone(),
        }
    }
}

impl Tag<i8> {
    /// Byte-valued tag.
    pub fn byte(key: &str) -> Tag<i8> {
        Tag::typed(key, TagShape::Byte, Some(TagType::Byte), |v| BinaryTag::Byte(*v), |t| match t {
            BinaryTag::Byte(v) => Some(*v),
            _ => None,
        })
    }
}

impl Tag<i16> {
    /// Short-valued tag.
    pub fn short(key: &str) -> Tag<i16> {
        Tag::typed(key, TagShape::Short, Some(TagType::Short), |v| BinaryTag::Short(*v), |t| match t {
            BinaryTag::Short(v) => Some(*v),
            _ => None,
        })
    }
}

impl Tag<i32> {
    /// Int-valued tag.
    pub fn int(key: &str) -> Tag<i32> {
        Tag::typed(key, TagShape::Int, Some(TagType::Int), |v| BinaryTag::Int(*v), |t| match t {
            BinaryTag::Int(v) => Some(*v),
            _ => None,
        })
    }
}

impl Tag<i64> {
    /// Long-valued tag.
    pub fn long(key: &str) -> Tag<i64> {
        Tag::typed(key, TagShape::Long, Some(TagType::Long), |v| BinaryTag::Long(*v), |t| match t {
            BinaryTag::Long(v) => Some(*v),
            _ => None,
        })
    }
}

impl Tag<f32> {
    /// Float-valued tag.
    pub fn float(key: &str) -> Tag<f32> {
        Tag::typed(key, TagShape::Float, Some(TagType::Float), |v| BinaryTag::Float(*v), |t| match t {
            BinaryTag::Float(v) => Some(*v),
            _ => None,
        })
    }
}

impl Tag<f64> {
    /// Double-valued tag.
    pub fn double(key: &str) -> Tag<f64> {
        Tag::typed(key, TagShape::Double, Some(TagType::Double), |v| BinaryTag::Double(*v), |t| match t {
            BinaryTag::Double(v) => Some(*v),
            _ => None,
        })
    }
}

impl Tag<String> {
    /// String-valued tag.
    pub fn string(key: &str) -> Tag<String> {
        Tag::typed(key, TagShape::String, Some(TagType::String), |v: &String| BinaryTag::String(v.clone()), |t| match t {
            BinaryTag::String(v) => Some(v.clone()),
            _ => None,
        })
    }
}

impl Tag<BinaryTag> {
    /// Raw binary tag. Writing a compound through it installs a child
    /// subtree; any other value is stored as-is.
    pub fn nbt(key: &str) -> Tag<BinaryTag> {
        Tag::typed(key, TagShape::Nbt, None, |v: &BinaryTag| v.clone(), |t| Some(t.clone()))
    }
}

impl Tag<Compound> {
    /// View over the whole subtree named `key`.
    pub fn view(key: &str) -> Tag<Compound> {
        Tag::view_with(key, Clone::clone, |c| Some(c.clone()))
    }
}
