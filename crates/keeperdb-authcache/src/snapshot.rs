//! Immutable grant snapshots and the store that swaps them.
//!
//! A [`Snapshot`] is built wholesale during a refresh and never mutated
//! afterwards; the [`SnapshotStore`] hands out reference-counted handles and
//! atomically replaces the current generation. A superseded generation is
//! freed when the last in-flight reader drops its handle, so lookups never
//! observe a half-rebuilt or half-freed grant set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::catalog::DatabaseCatalog;
use crate::error::{AuthCacheError, Result};
use crate::grants::{
    grant_matches, AccountQuery, DatabaseScope, GrantRecord, MatchPolicy, MAX_DATABASE_LEN,
    MAX_USER_LEN,
};
use crate::host::HostPattern;

/// A point-in-time view of all grants and known databases.
#[derive(Debug)]
pub struct Snapshot {
    /// Grants bucketed by user; the empty-string bucket is the anonymous
    /// account.
    grants: HashMap<String, Vec<GrantRecord>>,
    databases: DatabaseCatalog,
    policy: MatchPolicy,
    has_literal_hosts: bool,
    n_adds: u64,
    n_entries: usize,
}

impl Snapshot {
    /// A snapshot with no grants at all, used before the first seed.
    pub fn empty() -> Self {
        SnapshotBuilder::new().finish()
    }

    /// Number of distinct grant records.
    pub fn entry_count(&self) -> usize {
        self.n_entries
    }

    /// Number of insertion attempts that produced this snapshot.
    pub fn add_count(&self) -> u64 {
        self.n_adds
    }

    pub fn databases(&self) -> &DatabaseCatalog {
        &self.databases
    }

    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }

    /// True when at least one grant uses a literal host pattern, i.e. the
    /// reverse-DNS fallback could change a lookup's outcome.
    pub fn has_literal_host_grants(&self) -> bool {
        self.has_literal_hosts
    }

    /// All records, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &GrantRecord> {
        self.grants.values().flatten()
    }

    /// First grant satisfying the query, if any. Falls back to the anonymous
    /// account when the named user has no matching grant.
    pub fn find_grant(&self, query: &AccountQuery) -> Option<&GrantRecord> {
        if let Some(found) = self.find_for(&query.user, query) {
            return Some(found);
        }
        if query.user.is_empty() {
            return None;
        }
        let mut anonymous = query.clone();
        anonymous.user.clear();
        self.find_for("", &anonymous)
    }

    fn find_for(&self, user: &str, query: &AccountQuery) -> Option<&GrantRecord> {
        self.grants
            .get(user)?
            .iter()
            .find(|grant| grant_matches(query, grant, &self.policy))
    }
}

/// Accumulates rows pulled from a catalog source into a [`Snapshot`].
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    grants: HashMap<String, Vec<GrantRecord>>,
    databases: DatabaseCatalog,
    localhost_override: Option<bool>,
    anonymous_seen: bool,
    n_adds: u64,
    n_entries: usize,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the localhost wildcard policy instead of deriving it from
    /// the presence of an anonymous account.
    pub fn with_localhost_policy(mut self, localhost_match_wildcard: Option<bool>) -> Self {
        self.localhost_override = localhost_match_wildcard;
        self
    }

    /// Record a database name known to exist upstream. Must happen before
    /// the account rows it should expand against.
    pub fn add_database(&mut self, name: impl Into<String>) -> bool {
        self.databases.insert(name)
    }

    pub fn database_count(&self) -> usize {
        self.databases.len()
    }

    pub fn entry_count(&self) -> usize {
        self.n_entries
    }

    /// Ingest one upstream account row.
    ///
    /// `database` is the per-database (or per-table) grant column, `None`
    /// when the account has no database grant; `any_database` reflects the
    /// global select privilege. A `%` pattern in `database` expands into one
    /// record per currently-existing matching database, so grants never
    /// reference databases that do not exist at refresh time.
    ///
    /// Returns the number of records stored; an error means the row is
    /// unusable and must be skipped, not that the load failed.
    pub fn add_account_row(
        &mut self,
        user: &str,
        host: &str,
        database: Option<&str>,
        any_database: bool,
        credential: Option<&str>,
    ) -> Result<usize> {
        if user.len() > MAX_USER_LEN {
            return Err(AuthCacheError::InvalidField {
                field: "user",
                reason: format!("{} bytes exceeds the {} byte limit", user.len(), MAX_USER_LEN),
            });
        }
        if let Some(db) = database {
            if db.len() > MAX_DATABASE_LEN {
                return Err(AuthCacheError::InvalidField {
                    field: "database",
                    reason: format!(
                        "{} bytes exceeds the {} byte limit",
                        db.len(),
                        MAX_DATABASE_LEN
                    ),
                });
            }
        }

        let host_pattern = HostPattern::parse(host)?;

        if user.is_empty() {
            // Empty user name is the anonymous account; its presence flips
            // the default localhost wildcard policy.
            self.anonymous_seen = true;
        }

        let credential = credential
            .filter(|c| !c.is_empty())
            .map(|c| c.strip_prefix('*').unwrap_or(c).to_string());

        let scopes: Vec<DatabaseScope> = if any_database {
            vec![DatabaseScope::Any]
        } else {
            match database {
                None => vec![DatabaseScope::Denied],
                Some(db) if db.contains('%') => {
                    if self.databases.is_empty() {
                        // No catalog to expand against (degraded source or a
                        // seed of pre-expansion data); keep the raw pattern
                        // and match it at lookup time.
                        vec![DatabaseScope::Pattern(db.to_string())]
                    } else {
                        self.databases
                            .matching(db)
                            .into_iter()
                            .map(DatabaseScope::Exact)
                            .collect()
                    }
                }
                Some(db) => vec![DatabaseScope::Exact(db.to_string())],
            }
        };

        let stored = scopes.len();
        for scope in scopes {
            self.insert(GrantRecord {
                user: user.to_string(),
                host: host_pattern.clone(),
                host_raw: host.to_string(),
                scope,
                credential: credential.clone(),
            });
        }

        Ok(stored)
    }

    fn insert(&mut self, record: GrantRecord) {
        self.n_adds += 1;
        let bucket = self.grants.entry(record.user.clone()).or_default();
        match bucket
            .iter_mut()
            .find(|existing| existing.identity() == record.identity())
        {
            // Same (user, host pattern, scope): last write wins.
            Some(existing) => *existing = record,
            None => {
                bucket.push(record);
                self.n_entries += 1;
            }
        }
    }

    pub fn finish(self) -> Snapshot {
        let has_literal_hosts = self
            .grants
            .values()
            .flatten()
            .any(|grant| matches!(grant.host, HostPattern::Literal(_)));

        Snapshot {
            grants: self.grants,
            databases: self.databases,
            policy: MatchPolicy {
                localhost_match_wildcard: self.localhost_override.unwrap_or(!self.anonymous_seen),
            },
            has_literal_hosts,
            n_adds: self.n_adds,
            n_entries: self.n_entries,
        }
    }
}

/// Owns the current snapshot and swaps it atomically on refresh.
#[derive(Debug)]
pub struct SnapshotStore {
    snapshot: RwLock<Arc<Snapshot>>,
    installed: AtomicBool,
    n_fetches: AtomicU64,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot::empty())),
            installed: AtomicBool::new(false),
            n_fetches: AtomicU64::new(0),
        }
    }

    /// A handle to the current generation. The handle stays valid and
    /// internally consistent across any number of concurrent installs.
    pub fn current(&self) -> Arc<Snapshot> {
        self.snapshot.read().unwrap().clone()
    }

    /// Whether any snapshot (even an empty one) has been installed.
    pub fn is_seeded(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }

    /// Make `snapshot` the current generation.
    ///
    /// An empty snapshot only installs as the first-ever generation; after
    /// that the previous snapshot is retained so an upstream that abruptly
    /// reports no accounts cannot wipe a working cache. Returns the entry
    /// count of whatever snapshot is current after the call.
    pub fn install(&self, snapshot: Snapshot) -> usize {
        if snapshot.entry_count() == 0 && self.is_seeded() {
            let current = self.current();
            debug!(
                "Discarding empty snapshot; retaining {} entries",
                current.entry_count()
            );
            return current.entry_count();
        }

        let entries = snapshot.entry_count();
        let snapshot = Arc::new(snapshot);
        {
            let mut guard = self.snapshot.write().unwrap();
            *guard = snapshot;
            // The superseded Arc drops here; readers holding it keep their
            // generation alive until they release it.
        }
        self.installed.store(true, Ordering::SeqCst);
        entries
    }

    /// Entry count of the current snapshot.
    pub fn entry_count(&self) -> usize {
        self.current().entry_count()
    }

    /// Total lookups served since startup.
    pub fn fetch_count(&self) -> u64 {
        self.n_fetches.load(Ordering::Relaxed)
    }

    /// Find the stored credential for a connection key.
    ///
    /// `None` means no grant matched. `Some("")` is a matching passwordless
    /// account; the verifier treats the empty digest as "skip the check".
    pub fn lookup(&self, query: &AccountQuery) -> Option<String> {
        self.n_fetches.fetch_add(1, Ordering::Relaxed);
        trace!("Fetching credentials for '{}'", query.user);
        let snapshot = self.current();
        snapshot
            .find_grant(query)
            .map(|grant| grant.credential.clone().unwrap_or_default())
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn query(user: &str, addr: [u8; 4], db: &str) -> AccountQuery {
        AccountQuery::from_address(user, Ipv4Addr::from(addr), db)
    }

    #[test]
    fn test_wildcard_expansion_against_catalog() {
        let mut builder = SnapshotBuilder::new();
        for db in ["sales", "sales_archive", "hr"] {
            builder.add_database(db);
        }
        let stored = builder
            .add_account_row("alice", "%", Some("sales%"), false, Some("abc"))
            .unwrap();
        assert_eq!(stored, 2);

        let snapshot = builder.finish();
        assert_eq!(snapshot.entry_count(), 2);
        assert!(snapshot
            .find_grant(&query("alice", [1, 1, 1, 1], "sales"))
            .is_some());
        assert!(snapshot
            .find_grant(&query("alice", [1, 1, 1, 1], "sales_archive"))
            .is_some());
        assert!(snapshot
            .find_grant(&query("alice", [1, 1, 1, 1], "hr"))
            .is_none());
    }

    #[test]
    fn test_wildcard_with_no_matching_database_stores_nothing() {
        let mut builder = SnapshotBuilder::new();
        builder.add_database("hr");
        let stored = builder
            .add_account_row("alice", "%", Some("sales%"), false, None)
            .unwrap();
        assert_eq!(stored, 0);
        assert_eq!(builder.entry_count(), 0);
    }

    #[test]
    fn test_wildcard_without_catalog_keeps_pattern() {
        let mut builder = SnapshotBuilder::new();
        builder
            .add_account_row("alice", "%", Some("sales%"), false, None)
            .unwrap();
        let snapshot = builder.finish();
        assert!(snapshot
            .find_grant(&query("alice", [1, 1, 1, 1], "sales_archive"))
            .is_some());
    }

    #[test]
    fn test_duplicate_rows_collapse_last_write_wins() {
        let mut builder = SnapshotBuilder::new();
        builder
            .add_account_row("alice", "10.0.0.1", Some("sales"), false, Some("old"))
            .unwrap();
        builder
            .add_account_row("alice", "10.0.0.1", Some("sales"), false, Some("new"))
            .unwrap();
        let snapshot = builder.finish();
        assert_eq!(snapshot.entry_count(), 1);
        assert_eq!(snapshot.add_count(), 2);

        let grant = snapshot
            .find_grant(&query("alice", [10, 0, 0, 1], "sales"))
            .unwrap();
        assert_eq!(grant.credential.as_deref(), Some("new"));
    }

    #[test]
    fn test_unusable_host_is_an_error_not_a_record() {
        let mut builder = SnapshotBuilder::new();
        assert!(builder
            .add_account_row("alice", "not-a-host", None, true, None)
            .is_err());
        assert_eq!(builder.entry_count(), 0);
    }

    #[test]
    fn test_oversized_user_is_rejected() {
        let mut builder = SnapshotBuilder::new();
        let user = "u".repeat(MAX_USER_LEN + 1);
        assert!(builder.add_account_row(&user, "%", None, true, None).is_err());
    }

    #[test]
    fn test_anonymous_account_flips_localhost_policy() {
        let mut builder = SnapshotBuilder::new();
        builder.add_account_row("alice", "%", None, true, None).unwrap();
        assert!(builder.finish().policy().localhost_match_wildcard);

        let mut builder = SnapshotBuilder::new();
        builder.add_account_row("", "%", None, true, None).unwrap();
        builder.add_account_row("alice", "%", None, true, None).unwrap();
        assert!(!builder.finish().policy().localhost_match_wildcard);

        // Explicit configuration beats the derived default.
        let mut builder = SnapshotBuilder::new().with_localhost_policy(Some(true));
        builder.add_account_row("", "%", None, true, None).unwrap();
        assert!(builder.finish().policy().localhost_match_wildcard);
    }

    #[test]
    fn test_anonymous_fallback_lookup() {
        let mut builder = SnapshotBuilder::new();
        builder
            .add_account_row("", "10.0.0.%", None, true, Some("anon"))
            .unwrap();
        let snapshot = builder.finish();

        let grant = snapshot
            .find_grant(&query("ghost", [10, 0, 0, 7], ""))
            .unwrap();
        assert_eq!(grant.credential.as_deref(), Some("anon"));
        assert!(snapshot.find_grant(&query("ghost", [10, 0, 1, 7], "")).is_none());
    }

    #[test]
    fn test_credential_star_prefix_stripped_on_load() {
        let mut builder = SnapshotBuilder::new();
        builder
            .add_account_row("alice", "%", None, true, Some("*ABCDEF"))
            .unwrap();
        let snapshot = builder.finish();
        let grant = snapshot.find_grant(&query("alice", [1, 1, 1, 1], "")).unwrap();
        assert_eq!(grant.credential.as_deref(), Some("ABCDEF"));
    }

    #[test]
    fn test_empty_install_only_seeds_once() {
        let store = SnapshotStore::new();
        assert!(!store.is_seeded());

        // First-ever snapshot may be empty (seed behavior).
        assert_eq!(store.install(Snapshot::empty()), 0);
        assert!(store.is_seeded());

        let mut builder = SnapshotBuilder::new();
        builder.add_account_row("alice", "%", None, true, None).unwrap();
        assert_eq!(store.install(builder.finish()), 1);

        // A later empty snapshot is discarded and the count is unchanged.
        assert_eq!(store.install(Snapshot::empty()), 1);
        assert_eq!(store.entry_count(), 1);
    }

    #[test]
    fn test_lookup_counts_fetches() {
        let store = SnapshotStore::new();
        let mut builder = SnapshotBuilder::new();
        builder
            .add_account_row("alice", "%", None, true, Some("cred"))
            .unwrap();
        store.install(builder.finish());

        assert_eq!(store.lookup(&query("alice", [1, 2, 3, 4], "")), Some("cred".into()));
        assert_eq!(store.lookup(&query("bob", [1, 2, 3, 4], "")), None);
        assert_eq!(store.fetch_count(), 2);
    }

    #[test]
    fn test_passwordless_lookup_is_empty_string() {
        let store = SnapshotStore::new();
        let mut builder = SnapshotBuilder::new();
        builder.add_account_row("alice", "%", None, true, None).unwrap();
        store.install(builder.finish());

        assert_eq!(store.lookup(&query("alice", [1, 2, 3, 4], "")), Some(String::new()));
    }

    #[test]
    fn test_concurrent_install_and_lookup_see_whole_generations() {
        use std::thread;

        const USERS: usize = 8;
        const GENERATIONS: usize = 200;

        fn generation(tag: &str) -> Snapshot {
            let mut builder = SnapshotBuilder::new();
            for i in 0..USERS {
                builder
                    .add_account_row(&format!("user{i}"), "%", None, true, Some(tag))
                    .unwrap();
            }
            builder.finish()
        }

        let store = Arc::new(SnapshotStore::new());
        store.install(generation("gen0"));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    while !store.current().iter().any(|g| g.credential.as_deref() == Some("done")) {
                        let snapshot = store.current();
                        let tags: Vec<_> = (0..USERS)
                            .map(|i| {
                                snapshot
                                    .find_grant(&AccountQuery::from_address(
                                        format!("user{i}"),
                                        Ipv4Addr::new(10, 0, 0, 1),
                                        "",
                                    ))
                                    .expect("every generation has every user")
                                    .credential
                                    .clone()
                                    .unwrap()
                            })
                            .collect();
                        // Every record read through one handle belongs to the
                        // same generation, never a mix.
                        assert!(tags.windows(2).all(|w| w[0] == w[1]), "mixed generations: {tags:?}");
                    }
                })
            })
            .collect();

        for gen in 1..GENERATIONS {
            store.install(generation(&format!("gen{gen}")));
        }
        store.install(generation("done"));

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
