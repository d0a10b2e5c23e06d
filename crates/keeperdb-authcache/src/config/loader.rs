//! Configuration loader

use super::Config;
use crate::error::{AuthCacheError, Result};
use std::path::Path;

/// Load configuration from a YAML file
///
/// Also applies KEEPER_AUTHCACHE_* env var overrides after loading.
pub fn load_config(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)?;
    load_config_from_str(&contents)
}

/// Load configuration from a YAML string (useful for testing)
///
/// Also applies KEEPER_AUTHCACHE_* env var overrides after loading.
pub fn load_config_from_str(yaml: &str) -> Result<Config> {
    let mut config: Config = serde_yaml::from_str(yaml)?;
    resolve_config_env_vars(&mut config);
    apply_env_overrides(&mut config);
    config.validate().map_err(AuthCacheError::Config)?;
    Ok(config)
}

/// Apply KEEPER_AUTHCACHE_* environment variable overrides to a config.
///
/// Supported env vars:
/// - `KEEPER_AUTHCACHE_PERSIST_PATH` - Override the persistence path
/// - `KEEPER_AUTHCACHE_REFRESH_INTERVAL_SECS` - Override the refresh interval
/// - `KEEPER_AUTHCACHE_CONNECT_TIMEOUT_SECS` - Override the connect timeout
/// - `KEEPER_AUTHCACHE_LOG_LEVEL` - Override the log level
fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("KEEPER_AUTHCACHE_PERSIST_PATH") {
        debug!("Overriding persistence path from KEEPER_AUTHCACHE_PERSIST_PATH");
        config.persistence.path = Some(val.into());
    }
    if let Ok(val) = std::env::var("KEEPER_AUTHCACHE_REFRESH_INTERVAL_SECS") {
        if let Ok(secs) = val.parse::<u64>() {
            debug!("Overriding refresh interval from KEEPER_AUTHCACHE_REFRESH_INTERVAL_SECS");
            config.refresh.interval_secs = secs;
        }
    }
    if let Ok(val) = std::env::var("KEEPER_AUTHCACHE_CONNECT_TIMEOUT_SECS") {
        if let Ok(secs) = val.parse::<u64>() {
            debug!("Overriding connect timeout from KEEPER_AUTHCACHE_CONNECT_TIMEOUT_SECS");
            config.refresh.connect_timeout_secs = secs;
        }
    }
    if let Ok(val) = std::env::var("KEEPER_AUTHCACHE_LOG_LEVEL") {
        debug!("Overriding log level from KEEPER_AUTHCACHE_LOG_LEVEL");
        config.logging.level = val;
    }
}

/// Resolve environment variables in a string value
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - curly brace syntax
/// - `$VAR_NAME` - simple syntax (for single variable values)
///
/// If the environment variable is not set, the original value is preserved.
fn resolve_env_var(value: &str) -> String {
    if value.starts_with("${") && value.ends_with('}') {
        let var_name = &value[2..value.len() - 1];
        return match std::env::var(var_name) {
            Ok(env_value) => env_value,
            Err(_) => {
                debug!("Env var {} not set, keeping original value", var_name);
                value.to_string()
            }
        };
    }

    if value.starts_with('$') && !value.contains(' ') && value.len() > 1 {
        let var_name = &value[1..];
        return match std::env::var(var_name) {
            Ok(env_value) => env_value,
            Err(_) => {
                debug!("Env var {} not set, keeping original value", var_name);
                value.to_string()
            }
        };
    }

    value.to_string()
}

/// Resolve environment variables in the source credentials
fn resolve_config_env_vars(config: &mut Config) {
    for source in &mut config.sources {
        source.host = resolve_env_var(&source.host);
        source.username = resolve_env_var(&source.username);
        source.password = resolve_env_var(&source.password);
    }
}
