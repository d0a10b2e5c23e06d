//! keeperdb-authcache - Replicated account/grant cache for connection gating
//!
//! This library maintains a local, queryable replica of an upstream MySQL
//! server's account-and-grant catalog so the proxy can gate connections:
//! - Verifies client credentials with the native challenge-response protocol
//! - Matches user/host/database grants with wildcard and netmask support
//! - Rebuilds the replica from candidate upstream servers without blocking
//!   concurrent lookups
//! - Persists the replica locally so authentication survives restarts and
//!   upstream outages

#[macro_use]
mod logging;

pub mod catalog;
pub mod config;
pub mod error;
pub mod grants;
pub mod host;
pub mod legacy;
pub mod persist;
pub mod refresh;
pub mod resolve;
pub mod session;
pub mod snapshot;
pub mod verify;

pub use catalog::DatabaseCatalog;
pub use config::Config;
pub use error::{AuthCacheError, Result};
pub use grants::{AccountQuery, DatabaseScope, GrantRecord, MatchPolicy};
pub use host::{HostKey, HostPattern};
pub use persist::PersistenceBridge;
pub use refresh::{CatalogSource, GrantRow, MySqlCatalogSource, RefreshOrchestrator};
pub use resolve::ReverseResolver;
pub use session::{authenticate, ConnectionDescriptor};
pub use snapshot::{Snapshot, SnapshotBuilder, SnapshotStore};
pub use verify::{compute_token, generate_scramble, verify_token, PassThrough};
