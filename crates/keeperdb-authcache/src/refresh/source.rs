//! The upstream catalog source seam.
//!
//! [`CatalogSource`] abstracts the server the account catalog is pulled
//! from, so the orchestrator can be exercised against mocks; the production
//! implementation speaks to a MySQL-compatible server through sqlx.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::Row;

use crate::config::SourceConfig;
use crate::error::{AuthCacheError, Result};

/// One account/grant row as pulled from the upstream catalog.
#[derive(Debug, Clone)]
pub struct GrantRow {
    pub user: String,
    pub host: String,
    /// Per-database (or per-table) grant column; `None` when the account has
    /// no database grant.
    pub database: Option<String>,
    /// Whether the account holds the global select privilege.
    pub any_database: bool,
    /// Stored password digest, hex-encoded.
    pub credential: Option<String>,
}

/// A reachable server the account catalog can be pulled from.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Human-readable identity for diagnostics ("host:port").
    fn label(&self) -> &str;

    /// The server version string, used to pick the password column name.
    async fn server_version(&self) -> Result<String>;

    /// Run the account/grant query and return its rows.
    async fn fetch_grant_rows(&self, sql: &str) -> Result<Vec<GrantRow>>;

    /// Enumerate the databases that currently exist on the server.
    async fn list_databases(&self) -> Result<Vec<String>>;
}

/// Production [`CatalogSource`] backed by a sqlx MySQL pool.
pub struct MySqlCatalogSource {
    pool: MySqlPool,
    label: String,
}

impl MySqlCatalogSource {
    /// Connect to one candidate server. Establishes (and validates) a single
    /// connection, bounded by `connect_timeout`.
    pub async fn connect(config: &SourceConfig, connect_timeout: Duration) -> Result<Self> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.username)
            .password(&config.password)
            .database("mysql");

        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(connect_timeout)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            label: format!("{}:{}", config.host, config.port),
        })
    }
}

#[async_trait]
impl CatalogSource for MySqlCatalogSource {
    fn label(&self) -> &str {
        &self.label
    }

    async fn server_version(&self) -> Result<String> {
        let row = sqlx::query("SELECT VERSION()").fetch_one(&self.pool).await?;
        Ok(row.try_get::<String, _>(0)?)
    }

    async fn fetch_grant_rows(&self, sql: &str) -> Result<Vec<GrantRow>> {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| classify(err, "the grant tables"))?;

        let mut grants = Vec::with_capacity(rows.len());
        for row in rows {
            let select_priv: Option<String> = row.try_get(3)?;
            grants.push(GrantRow {
                user: row.try_get(0)?,
                host: row.try_get(1)?,
                database: row.try_get(2)?,
                any_database: select_priv.as_deref() == Some("Y"),
                credential: row.try_get(4)?,
            });
        }
        Ok(grants)
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SHOW DATABASES")
            .fetch_all(&self.pool)
            .await
            .map_err(|err| classify(err, "the database list"))?;

        let mut names = Vec::with_capacity(rows.len());
        for row in rows {
            names.push(row.try_get::<String, _>(0)?);
        }
        Ok(names)
    }
}

/// Separate "the server refused" from "the server is broken/unreachable" so
/// the orchestrator can degrade instead of failing the whole source.
fn classify(err: sqlx::Error, table: &str) -> AuthCacheError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.message().to_lowercase().contains("denied") {
            return AuthCacheError::AccessDenied {
                table: table.to_string(),
                message: db_err.message().to_string(),
            };
        }
    }
    err.into()
}
