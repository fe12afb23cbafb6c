//! Runtime configuration for the tag store.
//!
//! Two flags steer serialization behavior. Process-wide defaults are
//! resolved once from the environment; embedders that want file-driven
//! settings can load a [`StoreConfig`] from toml and install it before
//! any store is created.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::types::error::ConfigError;

/// Store-level runtime flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Cache serialized compounds per node. When false, every call to
    /// `as_compound` recomputes the full tree.
    pub cache_enabled: bool,

    /// Keep empty child compounds in serialized output and deep copies.
    /// When false, empty children are pruned.
    pub serialize_empty_compound: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            serialize_empty_compound: false,
        }
    }
}

impl StoreConfig {
    /// Resolve flags from the process environment, falling back to the
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        Self {
            cache_enabled: env_flag("TAGSTORE_CACHE_ENABLED", true),
            serialize_empty_compound: env_flag("TAGSTORE_SERIALIZE_EMPTY_COMPOUND", false),
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(value.as_str(), "1" | "true" | "TRUE" | "True"),
        Err(_) => default,
    }
}

/// Load configuration from a toml file.
pub fn load_config(path: &str) -> Result<StoreConfig, ConfigError> {
    let config_str = std::fs::read_to_string(path)?;
    let config: StoreConfig = toml::from_str(&config_str)?;
    tracing::info!(path, "loaded tag store config");
    Ok(config)
}

/// Process-wide flags, resolved once on first use.
pub(crate) static FLAGS: Lazy<StoreConfig> = Lazy::new(StoreConfig::from_env);

/// Flags consulted by the serialization paths.
pub(crate) fn flags() -> &'static StoreConfig {
    &FLAGS
}
