//! Error types for the tag store.
//!
//! Contract violations inside the concurrent structures (probe exhaustion
//! despite load-factor headroom, waiter-counter overflow) are programming
//! errors and panic instead of surfacing here.

use thiserror::Error;

/// Errors surfaced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `update_content` was handed a map of a different variant.
    #[error("map content must come from the same variant (array vs hash)")]
    MapContentMismatch,
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The config file could not be parsed.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}
