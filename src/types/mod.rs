//! Type definitions for the tag store.

/// Error types
pub mod error;
/// Binary tag value model
pub mod nbt;

pub use error::{ConfigError, StoreError};
pub use nbt::{BinaryTag, Compound, CompoundBuilder, TagType};
