//! # tagstore
//!
//! Concurrent hierarchical tag storage for high-throughput game server
//! runtimes: a tree of single-writer maps with lock-free readers, cached
//! subtree serialization with incremental invalidation, and a memoizing
//! cell with coordinated waiter parking.

#![warn(missing_docs)]

/// Core configuration
pub mod core;

/// Type definitions and the binary tag model
pub mod types;

/// Reusable concurrent structures
pub mod structures;

/// The tag store
pub mod tag;

// Re-export commonly used items
pub use self::core::config::{load_config, StoreConfig};
pub use structures::{CachedValue, StaticIntMap};
pub use tag::{ReadableView, Tag, TagReadable, TagStore, TagValue};
pub use types::{BinaryTag, Compound, StoreError, TagType};
