//! Logging macros that set target to "keeperdb_authcache" for all log calls.
//!
//! Rust log targets become upstream logger names when this crate runs inside
//! the Gateway. Without an explicit target, tracing uses the full module path
//! (e.g., "keeperdb_authcache::refresh::source"), creating overly verbose
//! logger names. These macros ensure all logs from this crate use a single
//! "keeperdb_authcache" target.

macro_rules! trace {
    ($($arg:tt)*) => { ::tracing::trace!(target: "keeperdb_authcache", $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { ::tracing::debug!(target: "keeperdb_authcache", $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { ::tracing::info!(target: "keeperdb_authcache", $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { ::tracing::warn!(target: "keeperdb_authcache", $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { ::tracing::error!(target: "keeperdb_authcache", $($arg)*) };
}
