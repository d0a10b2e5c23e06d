//! Configuration module
//!
//! YAML configuration for the cache: the ordered candidate source list,
//! refresh tuning and the persistence path.

mod loader;
mod types;

pub use loader::{load_config, load_config_from_str};
pub use types::{Config, LoggingConfig, PersistenceConfig, RefreshConfig, SourceConfig};
