//! Grant data model and matching.
//!
//! A grant binds a `user@host` principal to a database access scope and a
//! stored credential. Matching a connection against the grant set is a pure
//! function over these types, so the precedence rules are testable on their
//! own rather than buried inside a container comparator.

mod matcher;

pub use matcher::{grant_matches, wildcard_db_match};

use std::net::Ipv4Addr;

use crate::host::{HostKey, HostPattern};

/// Maximum accepted length for a user name.
pub const MAX_USER_LEN: usize = 128;

/// Maximum accepted length for a database name or database pattern.
pub const MAX_DATABASE_LEN: usize = 128;

/// Database access scope attached to a grant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DatabaseScope {
    /// No per-database grant at all: a connection naming a database is
    /// refused by this grant.
    Denied,
    /// Global access: any database satisfies the grant.
    Any,
    /// Access to exactly one database.
    Exact(String),
    /// A raw `%` pattern that could not be expanded against the database
    /// catalog at load time (catalog unavailable). Matched case-insensitively
    /// and unanchored at lookup time.
    Pattern(String),
}

/// One authorization record: a principal plus scope and credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRecord {
    /// Account name. The empty string is the anonymous account.
    pub user: String,
    /// Compiled host specification.
    pub host: HostPattern,
    /// The host string as it appeared upstream, kept for persistence and
    /// diagnostics.
    pub host_raw: String,
    /// Database access scope.
    pub scope: DatabaseScope,
    /// Hex-encoded double-SHA1 password digest, `None` for passwordless
    /// accounts.
    pub credential: Option<String>,
}

impl GrantRecord {
    /// Insert identity: records agreeing on all three collapse last-write-wins
    /// when loaded, while wildcard-expanded records (distinct scopes) coexist.
    pub fn identity(&self) -> (&str, &HostPattern, &DatabaseScope) {
        (&self.user, &self.host, &self.scope)
    }
}

/// The per-attempt lookup key derived from a connection.
#[derive(Debug, Clone)]
pub struct AccountQuery {
    /// Client-presented user name.
    pub user: String,
    /// Connecting host, either an exact address or a resolved name for the
    /// literal fallback path.
    pub host: HostKey,
    /// Requested database; empty when the client did not name one.
    pub database: String,
    /// Whether the client connected over loopback (see [`MatchPolicy`]).
    pub from_localhost: bool,
}

impl AccountQuery {
    /// Build a lookup key from the connecting IPv4 address.
    pub fn from_address(user: impl Into<String>, address: Ipv4Addr, database: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: HostKey::Address(address),
            database: database.into(),
            from_localhost: address.is_loopback(),
        }
    }

    /// Build a lookup key from a resolved host name (literal fallback).
    pub fn from_name(
        user: impl Into<String>,
        name: impl Into<String>,
        database: impl Into<String>,
        from_localhost: bool,
    ) -> Self {
        Self {
            user: user.into(),
            host: HostKey::Name(name.into()),
            database: database.into(),
            from_localhost,
        }
    }
}

/// Site policy consulted by the matcher.
#[derive(Debug, Clone, Copy)]
pub struct MatchPolicy {
    /// Whether loopback connections may satisfy wildcard-host grants. The
    /// default is derived at refresh time: presence of an anonymous account
    /// upstream turns it off.
    pub localhost_match_wildcard: bool,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            localhost_match_wildcard: true,
        }
    }
}
