//! Per-attempt authentication flow.
//!
//! The listener layer owns the client connection and the handshake; it hands
//! this module one [`ConnectionDescriptor`] per attempt. Verification runs
//! against in-memory snapshot data only. The single potentially slow step,
//! the reverse-DNS retry for literal host grants, is bounded and taken only
//! after the address path has already missed.

use std::net::IpAddr;

use crate::grants::AccountQuery;
use crate::resolve::ReverseResolver;
use crate::snapshot::SnapshotStore;
use crate::verify::{verify_token, PassThrough};

/// Everything known about one authentication attempt.
#[derive(Debug, Clone)]
pub struct ConnectionDescriptor {
    /// Client-presented user name.
    pub user: String,
    /// Peer network address.
    pub peer: IpAddr,
    /// Requested database; empty when the client named none.
    pub database: String,
    /// Client challenge response from the handshake.
    pub token: Vec<u8>,
    /// The scramble this connection was issued.
    pub scramble: Vec<u8>,
    /// Reverse-resolved peer host name, populated lazily on the fallback
    /// path.
    pub hostname: Option<String>,
}

impl ConnectionDescriptor {
    pub fn new(
        user: impl Into<String>,
        peer: IpAddr,
        database: impl Into<String>,
        token: Vec<u8>,
        scramble: Vec<u8>,
    ) -> Self {
        Self {
            user: user.into(),
            peer,
            database: database.into(),
            token,
            scramble,
            hostname: None,
        }
    }

    /// The address-path lookup key. IPv6 peers cannot satisfy network
    /// patterns and are matched by their string form instead.
    fn address_query(&self) -> AccountQuery {
        match self.peer {
            IpAddr::V4(addr) => AccountQuery::from_address(&self.user, addr, &self.database),
            IpAddr::V6(addr) => AccountQuery::from_name(
                &self.user,
                addr.to_string(),
                &self.database,
                addr.is_loopback(),
            ),
        }
    }

    fn hostname_query(&self, hostname: &str) -> AccountQuery {
        AccountQuery::from_name(
            &self.user,
            hostname,
            &self.database,
            self.peer.is_loopback(),
        )
    }
}

/// Authenticate one connection attempt against the current snapshot.
///
/// Returns the pass-through credential on success and `None` on rejection.
/// A missing grant and a failed password check are both ordinary outcomes,
/// never errors.
pub async fn authenticate(
    store: &SnapshotStore,
    resolver: &ReverseResolver,
    descriptor: &mut ConnectionDescriptor,
) -> Option<PassThrough> {
    let mut stored = store.lookup(&descriptor.address_query());

    if stored.is_none() && store.current().has_literal_host_grants() {
        // Try the host name instead of the address. Done only as a last
        // resort to avoid the cost of the DNS lookup.
        if descriptor.hostname.is_none() {
            descriptor.hostname = resolver.resolve(descriptor.peer).await;
        }
        if let Some(hostname) = descriptor.hostname.clone() {
            stored = store.lookup(&descriptor.hostname_query(&hostname));
        }
    }

    let stored = match stored {
        Some(stored) => stored,
        None => {
            debug!(
                "No grant matches {}@{} (database '{}')",
                descriptor.user, descriptor.peer, descriptor.database
            );
            return None;
        }
    };

    match verify_token(&stored, &descriptor.token, &descriptor.scramble) {
        Some(passthrough) => Some(passthrough),
        None => {
            info!(
                "Password rejected for {}@{}",
                descriptor.user, descriptor.peer
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotBuilder;
    use crate::verify::{compute_token, double_sha1_hex, generate_scramble};
    use std::net::Ipv4Addr;

    fn store_with(rows: &[(&str, &str, Option<&str>, bool, Option<String>)]) -> SnapshotStore {
        let store = SnapshotStore::new();
        let mut builder = SnapshotBuilder::new();
        for (user, host, db, any, credential) in rows {
            builder
                .add_account_row(user, host, *db, *any, credential.as_deref())
                .unwrap();
        }
        store.install(builder.finish());
        store
    }

    #[tokio::test]
    async fn test_accepts_correct_password() {
        let scramble = generate_scramble();
        let store = store_with(&[("bob", "10.0.%.%", None, true, Some(double_sha1_hex("secret")))]);
        let resolver = ReverseResolver::new();

        let mut descriptor = ConnectionDescriptor::new(
            "bob",
            IpAddr::V4(Ipv4Addr::new(10, 0, 5, 9)),
            "reports",
            compute_token("secret", &scramble),
            scramble.to_vec(),
        );

        let passthrough = authenticate(&store, &resolver, &mut descriptor).await;
        assert!(passthrough.is_some());
    }

    #[tokio::test]
    async fn test_rejects_wrong_password() {
        let scramble = generate_scramble();
        let store = store_with(&[("bob", "10.0.%.%", None, true, Some(double_sha1_hex("secret")))]);
        let resolver = ReverseResolver::new();

        let mut descriptor = ConnectionDescriptor::new(
            "bob",
            IpAddr::V4(Ipv4Addr::new(10, 0, 5, 9)),
            "reports",
            compute_token("wrong", &scramble),
            scramble.to_vec(),
        );

        assert!(authenticate(&store, &resolver, &mut descriptor).await.is_none());
    }

    #[tokio::test]
    async fn test_rejects_unknown_host() {
        let scramble = generate_scramble();
        let store = store_with(&[("bob", "10.0.%.%", None, true, Some(double_sha1_hex("secret")))]);
        let resolver = ReverseResolver::new();

        let mut descriptor = ConnectionDescriptor::new(
            "bob",
            IpAddr::V4(Ipv4Addr::new(192, 168, 0, 9)),
            "",
            compute_token("secret", &scramble),
            scramble.to_vec(),
        );

        assert!(authenticate(&store, &resolver, &mut descriptor).await.is_none());
    }

    #[tokio::test]
    async fn test_no_dns_attempt_without_literal_grants() {
        let scramble = generate_scramble();
        let store = store_with(&[("bob", "10.0.0.1", None, true, None)]);
        let resolver = ReverseResolver::new();

        let mut descriptor = ConnectionDescriptor::new(
            "bob",
            IpAddr::V4(Ipv4Addr::new(172, 16, 0, 1)),
            "",
            Vec::new(),
            scramble.to_vec(),
        );

        assert!(authenticate(&store, &resolver, &mut descriptor).await.is_none());
        // The fast path must not touch DNS when no literal grant exists.
        assert_eq!(resolver.cached(), 0);
        assert!(descriptor.hostname.is_none());
    }

    #[tokio::test]
    async fn test_literal_grant_matches_address_string() {
        let scramble = generate_scramble();
        let store = store_with(&[("bob", "10.0.0._", None, true, None)]);
        let resolver = ReverseResolver::new();

        let mut descriptor = ConnectionDescriptor::new(
            "bob",
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)),
            "",
            Vec::new(),
            scramble.to_vec(),
        );

        // Matched on the address path; no DNS involved.
        assert!(authenticate(&store, &resolver, &mut descriptor).await.is_some());
        assert_eq!(resolver.cached(), 0);
    }
}
