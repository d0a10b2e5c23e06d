//! Rebuilding the cache from upstream catalog sources.
//!
//! A refresh walks the ordered candidate list, pulls the account/grant rows
//! and the database list from each reachable server, expands wildcard
//! database grants, and installs the result as a new snapshot. All network
//! I/O happens here, off the lookup path; a refresh that fails outright
//! leaves the previous snapshot untouched.

mod source;

pub use source::{CatalogSource, GrantRow, MySqlCatalogSource};

use std::sync::Arc;
use std::time::Duration;

use crate::config::{RefreshConfig, SourceConfig};
use crate::error::{AuthCacheError, Result};
use crate::persist::PersistenceBridge;
use crate::snapshot::{SnapshotBuilder, SnapshotStore};

/// Password column on the account table.
const PASSWORD_COLUMN: &str = "password";

/// Password column on 5.7-family servers.
const PASSWORD_COLUMN_57: &str = "authentication_string";

/// The account/grant query: the account table left-joined with both the
/// per-database and the per-table grant tables, UNIONed.
pub fn users_query(server_version: &str, include_root: bool) -> String {
    let password = password_column(server_version);
    let filter = root_filter(include_root);
    format!(
        "SELECT u.user, u.host, d.db, u.select_priv, u.{password} \
         FROM mysql.user AS u LEFT JOIN mysql.db AS d \
         ON (u.user = d.user AND u.host = d.host) {filter} \
         UNION \
         SELECT u.user, u.host, t.db, u.select_priv, u.{password} \
         FROM mysql.user AS u LEFT JOIN mysql.tables_priv AS t \
         ON (u.user = t.user AND u.host = t.host) {filter}"
    )
}

/// Degraded account query for sources that deny access to the grant tables.
/// Shaped like [`users_query`] with a NULL database column.
pub fn users_only_query(server_version: &str, include_root: bool) -> String {
    let password = password_column(server_version);
    let filter = root_filter(include_root);
    format!(
        "SELECT u.user, u.host, NULL, u.select_priv, u.{password} \
         FROM mysql.user AS u {filter}"
    )
}

fn password_column(server_version: &str) -> &'static str {
    if server_version.contains("5.7.") {
        PASSWORD_COLUMN_57
    } else {
        PASSWORD_COLUMN
    }
}

fn root_filter(include_root: bool) -> &'static str {
    if include_root {
        ""
    } else {
        "WHERE u.user NOT IN ('root')"
    }
}

/// Refresh tuning, typically taken from [`RefreshConfig`].
#[derive(Debug, Clone)]
pub struct RefreshSettings {
    /// Load the root account too (excluded by default).
    pub include_root: bool,
    /// Aggregate rows from every reachable source instead of stopping at the
    /// first success. The reported total is the maximum row count observed.
    pub users_from_all: bool,
    /// Strip backslash escapes from database grant names.
    pub strip_db_escapes: bool,
    /// Explicit localhost wildcard policy; `None` derives it from the
    /// presence of an anonymous account.
    pub localhost_match_wildcard: Option<bool>,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            include_root: false,
            users_from_all: false,
            strip_db_escapes: true,
            localhost_match_wildcard: None,
        }
    }
}

impl From<&RefreshConfig> for RefreshSettings {
    fn from(config: &RefreshConfig) -> Self {
        Self {
            include_root: config.include_root,
            users_from_all: config.users_from_all,
            strip_db_escapes: config.strip_db_escapes,
            localhost_match_wildcard: config.localhost_match_wildcard,
        }
    }
}

/// Pulls the catalog from upstream and installs new snapshots.
pub struct RefreshOrchestrator {
    settings: RefreshSettings,
    store: Arc<SnapshotStore>,
    persistence: Option<Arc<PersistenceBridge>>,
}

impl RefreshOrchestrator {
    pub fn new(store: Arc<SnapshotStore>, settings: RefreshSettings) -> Self {
        Self {
            settings,
            store,
            persistence: None,
        }
    }

    /// Checkpoint the cache through `bridge` after each successful refresh.
    pub fn with_persistence(mut self, bridge: Arc<PersistenceBridge>) -> Self {
        self.persistence = Some(bridge);
        self
    }

    /// Refresh from already-connected sources, in order.
    ///
    /// Returns the loaded row count (`Ok(0)` is a real, empty result). When
    /// no source yields data the previous snapshot is retained and
    /// [`AuthCacheError::NoReachableSource`] is returned.
    pub async fn refresh(&self, sources: &[&dyn CatalogSource]) -> Result<usize> {
        let mut builder =
            SnapshotBuilder::new().with_localhost_policy(self.settings.localhost_match_wildcard);
        let mut total: Option<usize> = None;

        for source in sources {
            match self.load_from_source(*source, &mut builder).await {
                Ok(count) => {
                    info!("Loaded {} account rows from [{}]", count, source.label());
                    total = Some(total.map_or(count, |prior| prior.max(count)));
                    if !self.settings.users_from_all {
                        break;
                    }
                }
                Err(err) => {
                    error!(
                        "Failure loading users data from backend [{}]: {}",
                        source.label(),
                        err
                    );
                }
            }
        }

        self.install(builder, total)
    }

    /// Connect to the configured candidates and refresh from them.
    ///
    /// Candidates are attempted in order; a connection failure moves on to
    /// the next. Only as many servers are contacted as the
    /// first-success/aggregate-all setting requires.
    pub async fn refresh_from_config(
        &self,
        sources: &[SourceConfig],
        connect_timeout: Duration,
    ) -> Result<usize> {
        let mut builder =
            SnapshotBuilder::new().with_localhost_policy(self.settings.localhost_match_wildcard);
        let mut total: Option<usize> = None;

        for config in sources {
            let source = match MySqlCatalogSource::connect(config, connect_timeout).await {
                Ok(source) => source,
                Err(err) => {
                    error!(
                        "Failure connecting to backend [{}:{}]: {}",
                        config.host, config.port, err
                    );
                    continue;
                }
            };

            match self.load_from_source(&source, &mut builder).await {
                Ok(count) => {
                    info!("Loaded {} account rows from [{}]", count, source.label());
                    total = Some(total.map_or(count, |prior| prior.max(count)));
                    if !self.settings.users_from_all {
                        break;
                    }
                }
                Err(err) => {
                    error!(
                        "Failure loading users data from backend [{}]: {}",
                        source.label(),
                        err
                    );
                }
            }
        }

        self.install(builder, total)
    }

    fn install(&self, builder: SnapshotBuilder, total: Option<usize>) -> Result<usize> {
        let total = match total {
            Some(total) => total,
            None => {
                error!("Unable to get user data: failed to load from any backend database");
                return Err(AuthCacheError::NoReachableSource);
            }
        };

        let installed = self.store.install(builder.finish());
        debug!("Users table replaced, {} entries current", installed);

        if let Some(bridge) = &self.persistence {
            // Checkpoint failure is logged only; it never touches the
            // in-memory snapshot.
            if let Err(err) = bridge.checkpoint(&self.store.current()) {
                error!("Failed to checkpoint the user cache: {}", err);
            }
        }

        Ok(total)
    }

    async fn load_from_source(
        &self,
        source: &dyn CatalogSource,
        builder: &mut SnapshotBuilder,
    ) -> Result<usize> {
        let version = source.server_version().await?;
        debug!("Backend [{}] reports version {}", source.label(), version);

        // The database list comes first so wildcard grants expand against
        // the catalog of the same refresh cycle.
        match source.list_databases().await {
            Ok(databases) => {
                for name in databases {
                    builder.add_database(name);
                }
            }
            Err(err) => {
                warn!(
                    "Failed to load list of databases from [{}]: {}",
                    source.label(),
                    err
                );
            }
        }

        let sql = users_query(&version, self.settings.include_root);
        let (rows, ignore_database_scope) = match source.fetch_grant_rows(&sql).await {
            Ok(rows) => (rows, false),
            Err(err) if err.is_access_denied() => {
                warn!(
                    "[{}] missing SELECT privileges on the grant tables, database names \
                     will be ignored in authentication: {}",
                    source.label(),
                    err
                );
                let fallback = users_only_query(&version, self.settings.include_root);
                (source.fetch_grant_rows(&fallback).await?, true)
            }
            Err(err) => return Err(err),
        };

        let mut count = 0;
        for row in &rows {
            let database = row.database.as_deref().map(|db| {
                if self.settings.strip_db_escapes {
                    db.replace('\\', "")
                } else {
                    db.to_string()
                }
            });
            let any_database = row.any_database || ignore_database_scope;

            match builder.add_account_row(
                &row.user,
                &row.host,
                database.as_deref(),
                any_database,
                row.credential.as_deref(),
            ) {
                Ok(_) => count += 1,
                Err(err) => {
                    warn!(
                        "Dropping unusable grant for '{}'@'{}': {}",
                        row.user, row.host, err
                    );
                }
            }
        }

        Ok(count)
    }
}
