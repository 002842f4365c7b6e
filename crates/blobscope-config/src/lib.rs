//! Persistent configuration store for blobscope
//!
//! The active configuration lives in a single TOML file that is replaced
//! atomically on every write. A default snapshot taken at first bootstrap
//! backs `restore_default`.

mod legacy;
mod store;

pub use legacy::{config_from_legacy, parse_legacy_env};
pub use store::{ConfigError, ConfigStore};

// Re-export types used in our public API
pub use blobscope_types::{AppConfig, FetchRange};
