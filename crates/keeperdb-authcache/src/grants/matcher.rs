//! The precedence matcher.
//!
//! Decides whether a connection key satisfies a stored grant: first the host
//! step (any-host, literal single-character wildcards, or network prefix
//! comparison), then the database step (denied / any / exact / pattern).

use super::{AccountQuery, DatabaseScope, GrantRecord, MatchPolicy, MAX_DATABASE_LEN};

/// Whether `query` satisfies `grant` under `policy`.
///
/// Any single matching grant authorizes the account; callers do not rank
/// multiple matches.
pub fn grant_matches(query: &AccountQuery, grant: &GrantRecord, policy: &MatchPolicy) -> bool {
    if query.user != grant.user {
        return false;
    }

    if query.from_localhost && !policy.localhost_match_wildcard && grant.host.is_wildcard() {
        return false;
    }

    if !grant.host.matches(&query.host) {
        return false;
    }

    database_step(&query.database, &grant.scope)
}

fn database_step(requested: &str, scope: &DatabaseScope) -> bool {
    // A connection that names no database is gated on host alone.
    if requested.is_empty() {
        return true;
    }

    match scope {
        DatabaseScope::Denied => false,
        DatabaseScope::Any => true,
        DatabaseScope::Exact(name) => requested == name,
        DatabaseScope::Pattern(pattern) => wildcard_db_match(pattern, requested),
    }
}

/// Match a database name against a `%` pattern.
///
/// `%` matches any character sequence; all other characters are literal.
/// The comparison is case-insensitive and unanchored, so `test%` also
/// matches `my_test_db`. Oversized inputs never match.
pub fn wildcard_db_match(pattern: &str, candidate: &str) -> bool {
    if pattern.len() > MAX_DATABASE_LEN || candidate.len() > MAX_DATABASE_LEN {
        return false;
    }

    let pattern = pattern.to_ascii_lowercase();
    let candidate = candidate.to_ascii_lowercase();

    // Every literal piece between wildcards must appear, in order.
    let mut position = 0;
    for piece in pattern.split('%') {
        if piece.is_empty() {
            continue;
        }
        match candidate[position..].find(piece) {
            Some(offset) => position += offset + piece.len(),
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostPattern;
    use std::net::Ipv4Addr;

    fn grant(user: &str, host: &str, scope: DatabaseScope) -> GrantRecord {
        GrantRecord {
            user: user.to_string(),
            host: HostPattern::parse(host).unwrap(),
            host_raw: host.to_string(),
            scope,
            credential: None,
        }
    }

    fn query(user: &str, addr: [u8; 4], db: &str) -> AccountQuery {
        AccountQuery::from_address(user, Ipv4Addr::from(addr), db)
    }

    #[test]
    fn test_denied_scope_never_matches_a_database() {
        let g = grant("alice", "%", DatabaseScope::Denied);
        let policy = MatchPolicy::default();
        assert!(!grant_matches(&query("alice", [10, 0, 0, 1], "reports"), &g, &policy));
        // But a connection naming no database is gated on host alone.
        assert!(grant_matches(&query("alice", [10, 0, 0, 1], ""), &g, &policy));
    }

    #[test]
    fn test_any_scope_matches_every_database() {
        let g = grant("alice", "%", DatabaseScope::Any);
        let policy = MatchPolicy::default();
        assert!(grant_matches(&query("alice", [10, 0, 0, 1], "reports"), &g, &policy));
        assert!(grant_matches(&query("alice", [10, 0, 0, 1], ""), &g, &policy));
    }

    #[test]
    fn test_exact_scope() {
        let g = grant("alice", "%", DatabaseScope::Exact("sales".to_string()));
        let policy = MatchPolicy::default();
        assert!(grant_matches(&query("alice", [1, 2, 3, 4], "sales"), &g, &policy));
        assert!(!grant_matches(&query("alice", [1, 2, 3, 4], "hr"), &g, &policy));
    }

    #[test]
    fn test_pattern_scope() {
        let g = grant("alice", "%", DatabaseScope::Pattern("test%".to_string()));
        let policy = MatchPolicy::default();
        assert!(grant_matches(&query("alice", [1, 2, 3, 4], "test_db"), &g, &policy));
        assert!(!grant_matches(&query("alice", [1, 2, 3, 4], "prod_db"), &g, &policy));
    }

    #[test]
    fn test_user_must_match() {
        let g = grant("alice", "%", DatabaseScope::Any);
        let policy = MatchPolicy::default();
        assert!(!grant_matches(&query("bob", [1, 2, 3, 4], ""), &g, &policy));
    }

    #[test]
    fn test_host_step_network_prefix() {
        let g = grant("alice", "10.0.%.%", DatabaseScope::Any);
        let policy = MatchPolicy::default();
        assert!(grant_matches(&query("alice", [10, 0, 5, 9], "x"), &g, &policy));
        assert!(!grant_matches(&query("alice", [10, 1, 5, 9], "x"), &g, &policy));
    }

    #[test]
    fn test_localhost_policy() {
        let g = grant("alice", "%", DatabaseScope::Any);
        let restrictive = MatchPolicy {
            localhost_match_wildcard: false,
        };
        let permissive = MatchPolicy::default();

        let local = query("alice", [127, 0, 0, 1], "x");
        assert!(!grant_matches(&local, &g, &restrictive));
        assert!(grant_matches(&local, &g, &permissive));

        // Exact-host grants are unaffected by the policy.
        let exact = grant("alice", "127.0.0.1", DatabaseScope::Any);
        assert!(grant_matches(&local, &exact, &restrictive));

        // Remote connections are unaffected either way.
        let remote = query("alice", [10, 0, 0, 1], "x");
        assert!(grant_matches(&remote, &g, &restrictive));
    }

    #[test]
    fn test_name_key_only_matches_literal_and_any() {
        let network = grant("alice", "10.0.%.%", DatabaseScope::Any);
        let literal = grant("alice", "10.0.0._", DatabaseScope::Any);
        let any = grant("alice", "%", DatabaseScope::Any);
        let policy = MatchPolicy::default();

        let q = AccountQuery::from_name("alice", "10.0.0.9", "", false);
        assert!(!grant_matches(&q, &network, &policy));
        assert!(grant_matches(&q, &literal, &policy));
        assert!(grant_matches(&q, &any, &policy));
    }

    #[test]
    fn test_wildcard_db_match() {
        assert!(wildcard_db_match("test%", "test_db"));
        assert!(wildcard_db_match("test%", "TEST_DB"));
        assert!(!wildcard_db_match("test%", "prod_db"));
        // Unanchored: literal pieces may match anywhere.
        assert!(wildcard_db_match("test%", "my_test_db"));
        assert!(wildcard_db_match("%", "anything"));
        assert!(wildcard_db_match("a%c", "abc"));
        assert!(!wildcard_db_match("a%c", "ab"));
        // Underscores in database patterns are literal characters.
        assert!(wildcard_db_match("sales_%", "sales_archive"));
        assert!(!wildcard_db_match("sales_%", "salesXarchive"));
        // Oversized inputs are rejected rather than scanned.
        assert!(!wildcard_db_match("x%", &"x".repeat(MAX_DATABASE_LEN + 1)));
    }
}
