//! Core reusable concurrent structures.

/// Single-writer int map with lock-free readers
pub mod int_map;
/// Memoizing cell with concurrent recomputation
pub mod cached_value;

// Export the main types
pub use cached_value::CachedValue;
pub use int_map::StaticIntMap;
