//! Hierarchical tag storage: typed tags over a tree of concurrent maps.

/// Typed tag handles and the index registry
pub mod tag;
/// Map entries and serialized-form caches
pub(crate) mod entry;
/// Tree nodes
pub(crate) mod node;
/// Compound decomposition
pub(crate) mod separator;
/// The store surface
pub mod store;

#[cfg(test)]
mod tests;

pub use store::{ReadableView, TagReadable, TagStore};
pub use tag::{Tag, TagValue};
