//! Core configuration and shared runtime state.

/// Runtime configuration
pub mod config;

pub use config::{load_config, StoreConfig};
