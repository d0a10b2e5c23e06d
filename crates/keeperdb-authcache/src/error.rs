//! Error types for keeperdb-authcache

use thiserror::Error;

/// Main error type for the authentication cache
#[derive(Error, Debug)]
pub enum AuthCacheError {
    /// I/O error (network, file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Host pattern that cannot be compiled to a matchable form
    #[error("Unparseable host pattern: {0}")]
    HostPattern(String),

    /// Oversized or otherwise invalid externally sourced string
    #[error("Invalid {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },

    /// Error from the upstream catalog source
    #[error("Upstream error: {0}")]
    Upstream(#[from] sqlx::Error),

    /// Upstream denied access to a catalog table
    #[error("Access denied to {table}: {message}")]
    AccessDenied { table: String, message: String },

    /// All candidate catalog sources were unreachable
    #[error("Failed to connect to any of the catalog sources")]
    NoReachableSource,

    /// Error from the durable store
    #[error("Persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// Malformed legacy flat-format cache data
    #[error("Legacy cache format error: {0}")]
    LegacyFormat(String),
}

impl AuthCacheError {
    /// Whether this error is the upstream refusing access to a table, as
    /// opposed to the upstream being unreachable or broken. Callers degrade
    /// differently on the two.
    pub fn is_access_denied(&self) -> bool {
        matches!(self, AuthCacheError::AccessDenied { .. })
    }
}

/// Result type alias for AuthCacheError
pub type Result<T> = std::result::Result<T, AuthCacheError>;

impl From<serde_yaml::Error> for AuthCacheError {
    fn from(err: serde_yaml::Error) -> Self {
        AuthCacheError::Config(err.to_string())
    }
}
