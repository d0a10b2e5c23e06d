//! Host pattern compilation
//!
//! Upstream grants identify the client side of an account as a hostname
//! string that may contain `%` multi-octet wildcards (`10.0.%.%`), `_`
//! single-character wildcards (`10.0.0._`) or a netmask suffix
//! (`192.168.1.0/255.255.255.0`). This module compiles such strings into a
//! matchable [`HostPattern`].

use std::fmt;
use std::net::Ipv4Addr;

use crate::error::{AuthCacheError, Result};

/// Maximum accepted length for a raw host string.
pub const MAX_HOST_LEN: usize = 60;

/// A compiled host specification from an upstream grant.
///
/// The netmask prefix values are: 0 for any, 32 for a single IPv4 address,
/// 24 for a class C from `a.b.c.%`, 16 for a class B from `a.b.%.%` and
/// 8 for a class A from `a.%.%.%`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostPattern {
    /// Matches every address (`%`).
    Any,
    /// A network prefix produced by normalizing `%` wildcards or a netmask
    /// suffix. `prefix` is always a multiple of 8 in `0..=32`.
    Network { address: Ipv4Addr, prefix: u8 },
    /// A raw dotted pattern with `_` single-character wildcards. Used only
    /// when the pattern cannot be reduced to a network prefix.
    Literal(String),
}

/// The host half of a lookup key, built per authentication attempt.
///
/// Lookup keys always carry an exact connecting address (prefix 32) unless
/// the literal fallback is in use, in which case they carry a name to be
/// compared character-wise against [`HostPattern::Literal`] grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKey {
    Address(Ipv4Addr),
    Name(String),
}

impl HostPattern {
    /// Compile a raw host string from the catalog.
    ///
    /// Returns an error when the string cannot be turned into any matchable
    /// form; callers must treat that as "grant unusable", not as fatal.
    pub fn parse(raw: &str) -> Result<HostPattern> {
        if raw.len() > MAX_HOST_LEN {
            return Err(AuthCacheError::InvalidField {
                field: "host",
                reason: format!("{} bytes exceeds the {} byte limit", raw.len(), MAX_HOST_LEN),
            });
        }

        if raw == "%" {
            return Ok(HostPattern::Any);
        }

        // An ip-address with a '_'-wildcard but no '%' (a combination of both
        // is invalid) cannot be expressed as a binary network mask.
        if is_ip_pattern(raw) && has_singlechar_wildcard(raw) {
            return Ok(HostPattern::Literal(raw.to_string()));
        }

        let (address, prefix) = normalize_hostname(raw)?;
        Ok(HostPattern::Network { address, prefix })
    }

    /// Leading bits of the address a query must share for this pattern to
    /// apply. Literal patterns report 32: they stand in for one exact host.
    pub fn prefix(&self) -> u8 {
        match self {
            HostPattern::Any => 0,
            HostPattern::Network { prefix, .. } => *prefix,
            HostPattern::Literal(_) => 32,
        }
    }

    /// True when the pattern can match more than one client host.
    ///
    /// Used by the localhost policy: loopback connections may be barred from
    /// satisfying wildcard-host grants.
    pub fn is_wildcard(&self) -> bool {
        match self {
            HostPattern::Any => true,
            HostPattern::Network { prefix, .. } => *prefix < 32,
            HostPattern::Literal(pattern) => pattern.contains('_'),
        }
    }

    /// Whether a lookup key satisfies this pattern.
    pub fn matches(&self, key: &HostKey) -> bool {
        match self {
            HostPattern::Any => true,
            HostPattern::Network { address, prefix } => match key {
                HostKey::Address(addr) => {
                    let mask = prefix_mask(*prefix);
                    (u32::from(*addr) & mask) == (u32::from(*address) & mask)
                }
                HostKey::Name(_) => false,
            },
            HostPattern::Literal(pattern) => {
                let candidate = match key {
                    HostKey::Address(addr) => addr.to_string(),
                    HostKey::Name(name) => name.clone(),
                };
                matches_singlechar_wildcard(&candidate, pattern)
            }
        }
    }
}

impl fmt::Display for HostPattern {
    /// Formats the pattern back into the upstream `user@host` notation.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostPattern::Any => write!(f, "%"),
            HostPattern::Network { address, prefix } => {
                let o = address.octets();
                match prefix {
                    32 => write!(f, "{}", address),
                    24 => write!(f, "{}.{}.{}.%", o[0], o[1], o[2]),
                    16 => write!(f, "{}.{}.%.%", o[0], o[1]),
                    8 => write!(f, "{}.%.%.%", o[0]),
                    _ => write!(f, "%"),
                }
            }
            HostPattern::Literal(pattern) => write!(f, "{}", pattern),
        }
    }
}

fn prefix_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

/// Check if the host string is a valid MySQL-style IP pattern: digits, dots
/// and the `_`/`%` wildcards only.
fn is_ip_pattern(host: &str) -> bool {
    !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_digit() || c == '.' || c == '_' || c == '%')
}

/// Check if an IP pattern carries a single-character wildcard. Returns false
/// outright when any `%` is present: the two wildcard kinds never combine.
fn has_singlechar_wildcard(host: &str) -> bool {
    let mut found = false;
    for c in host.chars() {
        if !c.is_ascii_digit() && c != '.' {
            if c == '_' {
                found = true;
            } else {
                return false;
            }
        }
    }
    found
}

/// Compare a concrete host string against a pattern with `_` wildcards.
fn matches_singlechar_wildcard(candidate: &str, pattern: &str) -> bool {
    if candidate.len() != pattern.len() {
        return false;
    }
    candidate
        .bytes()
        .zip(pattern.bytes())
        .all(|(c, p)| p == b'_' || c == p)
}

/// Normalize a hostname with `%` wildcards to an address and prefix length.
///
/// Valid input values: `a.b.c.d`, `a.b.c.%`, `a.b.%.%`, `a.%.%.%`. The short
/// formats `a.%` and `a.%.%` are both treated as `a.%.%.%`, and `a.b.%` as
/// `a.b.%.%`. The last octet of a wildcard address is set to 1 so the result
/// stays a parseable, routable address.
fn normalize_hostname(input: &str) -> Result<(Ipv4Addr, u8)> {
    let merged = match merge_netmask(input) {
        Some(merged) => merged,
        // Unmergeable netmask combinations fall back to the original string
        // as one exact host.
        None => return parse_exact(input),
    };

    let mut output = String::with_capacity(15);
    let mut prefix: u8 = 0;
    let mut octets: u8 = 0;
    let mut found_wildcard = false;

    for token in merged.split('.') {
        if !output.is_empty() {
            output.push('.');
        }
        if token == "%" {
            found_wildcard = true;
            output.push(if octets == 3 { '1' } else { '0' });
        } else {
            if !token.starts_with(|c: char| c.is_ascii_digit()) {
                // Not a dotted address at all; treat verbatim as one host.
                return parse_exact(input);
            }
            output.push_str(token);
            prefix += 8;
        }
        octets += 1;
    }

    if !found_wildcard {
        return parse_exact(input);
    }

    while octets < 4 {
        octets += 1;
        output.push_str(if octets == 4 { ".1" } else { ".0" });
    }

    match output.parse::<Ipv4Addr>() {
        Ok(address) => Ok((address, prefix)),
        Err(_) => Err(AuthCacheError::HostPattern(input.to_string())),
    }
}

fn parse_exact(input: &str) -> Result<(Ipv4Addr, u8)> {
    input
        .parse::<Ipv4Addr>()
        .map(|address| (address, 32))
        .map_err(|_| AuthCacheError::HostPattern(input.to_string()))
}

/// If the hostname is of form `a.b.c.d/e.f.g.h` where each mask octet is 255
/// or 0, replace the masked-out address octets with `%` and drop the suffix.
///
/// Returns the merged string, the input unchanged when there is no suffix,
/// or `None` when the combination is unrecognized (callers then treat the
/// whole string as a single exact host).
fn merge_netmask(host: &str) -> Option<String> {
    let (address, mask) = match host.split_once('/') {
        Some(parts) => parts,
        None => return Some(host.to_string()),
    };

    let address_octets: Vec<&str> = address.split('.').collect();
    let mask_octets: Vec<&str> = mask.split('.').collect();

    if address_octets.len() != mask_octets.len() {
        error!(
            "Unequal number of IP-bytes in host/mask-combination: {}",
            host
        );
        return None;
    }

    let mut merged = Vec::with_capacity(address_octets.len());
    for (addr_octet, mask_octet) in address_octets.iter().zip(&mask_octets) {
        if *mask_octet == "255" {
            merged.push(*addr_octet);
        } else if *mask_octet == "0" && *addr_octet == "0" {
            merged.push("%");
        } else {
            error!(
                "Unrecognized IP-bytes in host/mask-combination: {}",
                host
            );
            return None;
        }
    }

    Some(merged.join("."))
}
