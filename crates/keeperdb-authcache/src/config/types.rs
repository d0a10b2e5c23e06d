//! Configuration types

use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration structure
///
/// # Example
///
/// ```yaml
/// sources:
///   - host: "mysql-primary.example.com"
///     port: 3306
///     username: "maxuser"
///     password: "${AUTHCACHE_SOURCE_PASSWORD}"
///   - host: "mysql-replica.example.com"
///     port: 3306
///     username: "maxuser"
///     password: "${AUTHCACHE_SOURCE_PASSWORD}"
///
/// refresh:
///   interval_secs: 300
///   users_from_all: false
///
/// persistence:
///   path: "/var/lib/keeperdb/authcache.db"
/// ```
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Ordered list of candidate catalog sources
    pub sources: Vec<SourceConfig>,

    /// Refresh tuning
    #[serde(default)]
    pub refresh: RefreshConfig,

    /// Durable store configuration
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.sources.is_empty() && self.persistence.path.is_none() {
            return Err(
                "At least one catalog source or a persistence path must be configured".to_string(),
            );
        }

        for (index, source) in self.sources.iter().enumerate() {
            if source.host.is_empty() {
                return Err(format!("Source {index} has an empty host"));
            }
            if source.port == 0 {
                return Err(format!("Source {index} has port 0"));
            }
            if source.username.is_empty() {
                return Err(format!("Source {index} has an empty username"));
            }
        }

        Ok(())
    }
}

/// One candidate upstream catalog source
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Server host
    pub host: String,
    /// Server port
    #[serde(default = "default_source_port")]
    pub port: u16,
    /// Account used to read the catalog tables
    pub username: String,
    /// Password for the catalog account
    pub password: String,
}

/// Refresh tuning
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    /// Seconds between periodic refreshes (driven by the hosting service)
    #[serde(default = "default_refresh_interval")]
    pub interval_secs: u64,
    /// Aggregate rows from all reachable sources instead of stopping at the
    /// first success
    #[serde(default)]
    pub users_from_all: bool,
    /// Load the root account too
    #[serde(default)]
    pub include_root: bool,
    /// Strip backslash escapes from database grant names
    #[serde(default = "default_true")]
    pub strip_db_escapes: bool,
    /// Whether loopback connections may satisfy wildcard-host grants;
    /// unset derives the policy from the presence of an anonymous account
    #[serde(default)]
    pub localhost_match_wildcard: Option<bool>,
    /// Connect timeout towards a catalog source, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Reverse-DNS lookup timeout, in seconds
    #[serde(default = "default_dns_timeout")]
    pub dns_timeout_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_refresh_interval(),
            users_from_all: false,
            include_root: false,
            strip_db_escapes: default_true(),
            localhost_match_wildcard: None,
            connect_timeout_secs: default_connect_timeout(),
            dns_timeout_secs: default_dns_timeout(),
        }
    }
}

/// Durable store configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersistenceConfig {
    /// Path of the SQLite cache file; unset disables persistence
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_source_port() -> u16 {
    3306
}

fn default_refresh_interval() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_dns_timeout() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}
