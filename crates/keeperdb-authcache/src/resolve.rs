//! Reverse DNS fallback for literal host patterns.
//!
//! Reverse lookup is a slow, blocking operation, so it runs on the blocking
//! pool under a timeout, is attempted only after the address-based match has
//! already failed, and its results (including failures) are cached for the
//! life of the process.

use std::net::IpAddr;
use std::time::Duration;

use dashmap::DashMap;

/// Timeout-bounded, caching reverse resolver.
pub struct ReverseResolver {
    /// Resolved names by address; `None` caches a failed lookup.
    cache: DashMap<IpAddr, Option<String>>,
    timeout: Duration,
}

impl ReverseResolver {
    /// Create a resolver with the default timeout (5 seconds).
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(5))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cache: DashMap::new(),
            timeout,
        }
    }

    /// Resolve the host name for an address, or `None` if the lookup fails
    /// or exceeds the timeout.
    pub async fn resolve(&self, address: IpAddr) -> Option<String> {
        if let Some(cached) = self.cache.get(&address) {
            return cached.value().clone();
        }

        debug!("Resolving host name for {}", address);
        let lookup =
            tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&address));

        let resolved = match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(Ok(name))) => {
                debug!("Reverse lookup of {} resolved to '{}'", address, name);
                Some(name)
            }
            Ok(Ok(Err(err))) => {
                debug!("Reverse lookup of {} failed: {}", address, err);
                None
            }
            Ok(Err(join_err)) => {
                error!("Reverse lookup task for {} failed: {}", address, join_err);
                None
            }
            Err(_) => {
                warn!(
                    "Reverse lookup of {} exceeded the {:?} timeout",
                    address, self.timeout
                );
                None
            }
        };

        self.cache.insert(address, resolved.clone());
        resolved
    }

    /// Number of cached results (hits and misses).
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

impl Default for ReverseResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_loopback_resolves_and_caches() {
        let resolver = ReverseResolver::new();
        let addr = IpAddr::V4(Ipv4Addr::LOCALHOST);

        let first = resolver.resolve(addr).await;
        assert_eq!(resolver.cached(), 1);

        // Second call is served from the cache with an identical result.
        let second = resolver.resolve(addr).await;
        assert_eq!(first, second);
        assert_eq!(resolver.cached(), 1);
    }

    #[tokio::test]
    async fn test_failed_lookups_are_cached_too() {
        let resolver = ReverseResolver::with_timeout(Duration::from_millis(1));
        // TEST-NET-1, never resolvable; either the lookup fails or the tiny
        // timeout fires, and the outcome is cached either way.
        let addr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
        resolver.resolve(addr).await;
        assert_eq!(resolver.cached(), 1);
    }
}
