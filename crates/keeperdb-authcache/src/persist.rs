//! Durable persistence for the grant cache.
//!
//! The cache is checkpointed to a local SQLite database after a successful
//! refresh and seeded back at startup, before the first network refresh
//! completes, so authentication keeps working across restarts and upstream
//! outages. Both directions create the schema if absent and replace the
//! destination contents inside a single transaction.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection};

use crate::grants::DatabaseScope;
use crate::snapshot::{Snapshot, SnapshotBuilder, SnapshotStore};

/// Idempotent schema for the persisted cache.
const SCHEMA_SQL: &str = "\
CREATE TABLE IF NOT EXISTS accounts (
    user TEXT NOT NULL,
    host TEXT NOT NULL,
    db TEXT,
    any_database INTEGER NOT NULL DEFAULT 0,
    credential TEXT
);
CREATE TABLE IF NOT EXISTS databases (
    name TEXT NOT NULL
);
";

/// Round-trips snapshots to a durable SQLite store.
///
/// Checkpoint and seed are serialized against each other (single writer at a
/// time); neither blocks lookups against the live snapshot.
pub struct PersistenceBridge {
    path: PathBuf,
    io_lock: Mutex<()>,
}

impl PersistenceBridge {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the durable store's contents with the snapshot.
    pub fn checkpoint(&self, snapshot: &Snapshot) -> crate::error::Result<()> {
        let _guard = self.io_lock.lock().unwrap();

        let mut conn = Connection::open(&self.path)?;
        conn.execute_batch(SCHEMA_SQL)?;

        let tx = conn.transaction()?;
        tx.execute("DELETE FROM accounts", [])?;
        tx.execute("DELETE FROM databases", [])?;

        for grant in snapshot.iter() {
            let (db, any_database) = match &grant.scope {
                DatabaseScope::Denied => (None, 0i64),
                DatabaseScope::Any => (None, 1),
                DatabaseScope::Exact(name) => (Some(name.as_str()), 0),
                DatabaseScope::Pattern(pattern) => (Some(pattern.as_str()), 0),
            };
            tx.execute(
                "INSERT INTO accounts (user, host, db, any_database, credential) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![grant.user, grant.host_raw, db, any_database, grant.credential],
            )?;
        }

        for name in snapshot.databases().iter() {
            tx.execute("INSERT INTO databases (name) VALUES (?1)", params![name])?;
        }

        tx.commit()?;
        debug!(
            "Checkpointed {} grants and {} databases to {}",
            snapshot.entry_count(),
            snapshot.databases().len(),
            self.path.display()
        );
        Ok(())
    }

    /// Rebuild a snapshot from the durable store.
    ///
    /// A store that does not exist yet yields an empty snapshot. Rows whose
    /// host pattern no longer parses are skipped with a diagnostic.
    pub fn seed(&self) -> crate::error::Result<Snapshot> {
        let _guard = self.io_lock.lock().unwrap();

        let mut conn = Connection::open(&self.path)?;
        conn.execute_batch(SCHEMA_SQL)?;

        let tx = conn.transaction()?;
        let mut builder = SnapshotBuilder::new();

        {
            let mut stmt = tx.prepare("SELECT name FROM databases")?;
            let names = stmt.query_map([], |row| row.get::<_, String>(0))?;
            for name in names {
                builder.add_database(name?);
            }
        }

        {
            let mut stmt =
                tx.prepare("SELECT user, host, db, any_database, credential FROM accounts")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?;

            for row in rows {
                let (user, host, db, any_database, credential) = row?;
                if let Err(err) = builder.add_account_row(
                    &user,
                    &host,
                    db.as_deref(),
                    any_database != 0,
                    credential.as_deref(),
                ) {
                    warn!("Skipping persisted grant for '{}'@'{}': {}", user, host, err);
                }
            }
        }

        tx.commit()?;

        let snapshot = builder.finish();
        debug!(
            "Seeded {} grants and {} databases from {}",
            snapshot.entry_count(),
            snapshot.databases().len(),
            self.path.display()
        );
        Ok(snapshot)
    }

    /// Seed the store at startup.
    ///
    /// A persistence failure is not fatal: it logs and installs an empty
    /// first snapshot so the service starts with no cached accounts rather
    /// than not at all. Returns the installed entry count.
    pub fn seed_into(&self, store: &SnapshotStore) -> usize {
        match self.seed() {
            Ok(snapshot) => store.install(snapshot),
            Err(err) => {
                error!(
                    "Failed to seed user cache from {}: {}",
                    self.path.display(),
                    err
                );
                store.install(Snapshot::empty())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grants::AccountQuery;
    use std::collections::BTreeSet;
    use std::net::Ipv4Addr;

    fn sample_snapshot() -> Snapshot {
        let mut builder = SnapshotBuilder::new();
        for db in ["sales", "sales_archive", "hr"] {
            builder.add_database(db);
        }
        builder
            .add_account_row("alice", "10.0.%.%", Some("sales%"), false, Some("aa11"))
            .unwrap();
        builder
            .add_account_row("bob", "%", None, true, Some("bb22"))
            .unwrap();
        builder
            .add_account_row("carol", "192.168.1.3", None, false, None)
            .unwrap();
        builder.finish()
    }

    fn fingerprint(snapshot: &Snapshot) -> BTreeSet<String> {
        snapshot
            .iter()
            .map(|g| {
                format!(
                    "{}|{}|{:?}|{:?}",
                    g.user, g.host_raw, g.scope, g.credential
                )
            })
            .collect()
    }

    #[test]
    fn test_checkpoint_seed_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = PersistenceBridge::new(dir.path().join("users.db"));

        let original = sample_snapshot();
        bridge.checkpoint(&original).unwrap();

        let seeded = bridge.seed().unwrap();
        assert_eq!(fingerprint(&seeded), fingerprint(&original));
        assert_eq!(seeded.databases(), original.databases());
    }

    #[test]
    fn test_checkpoint_replaces_prior_contents() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = PersistenceBridge::new(dir.path().join("users.db"));

        bridge.checkpoint(&sample_snapshot()).unwrap();

        let mut builder = SnapshotBuilder::new();
        builder.add_account_row("dave", "%", None, true, None).unwrap();
        bridge.checkpoint(&builder.finish()).unwrap();

        let seeded = bridge.seed().unwrap();
        assert_eq!(seeded.entry_count(), 1);
        assert!(seeded
            .find_grant(&AccountQuery::from_address(
                "dave",
                Ipv4Addr::new(1, 2, 3, 4),
                ""
            ))
            .is_some());
    }

    #[test]
    fn test_seed_from_fresh_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = PersistenceBridge::new(dir.path().join("users.db"));

        let seeded = bridge.seed().unwrap();
        assert_eq!(seeded.entry_count(), 0);
        assert!(seeded.databases().is_empty());
    }

    #[test]
    fn test_seed_into_survives_io_failure() {
        // A directory path can never be opened as a database file.
        let dir = tempfile::tempdir().unwrap();
        let bridge = PersistenceBridge::new(dir.path());

        let store = SnapshotStore::new();
        let installed = bridge.seed_into(&store);
        assert_eq!(installed, 0);
        // Startup proceeded: the store is seeded, just empty.
        assert!(store.is_seeded());
    }

    #[test]
    fn test_seeded_snapshot_serves_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = PersistenceBridge::new(dir.path().join("users.db"));
        bridge.checkpoint(&sample_snapshot()).unwrap();

        let store = SnapshotStore::new();
        bridge.seed_into(&store);

        assert!(store
            .lookup(&AccountQuery::from_address(
                "alice",
                Ipv4Addr::new(10, 0, 7, 7),
                "sales_archive"
            ))
            .is_some());
        assert!(store
            .lookup(&AccountQuery::from_address(
                "alice",
                Ipv4Addr::new(10, 0, 7, 7),
                "hr"
            ))
            .is_none());
    }
}
