//! The set of database names known to exist upstream.
//!
//! Rebuilt alongside each snapshot from the same catalog pull, and consulted
//! only while wildcard database grants are expanded at load time.

use std::collections::HashSet;

use crate::grants::{wildcard_db_match, MAX_DATABASE_LEN};

/// Known database names for one snapshot generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseCatalog {
    names: HashSet<String>,
}

impl DatabaseCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a database name. Oversized names are dropped with a diagnostic
    /// rather than truncated.
    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if name.len() > MAX_DATABASE_LEN {
            warn!(
                "Ignoring database name of {} bytes (limit {})",
                name.len(),
                MAX_DATABASE_LEN
            );
            return false;
        }
        self.names.insert(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Expand a `%` grant pattern into the concrete names it covers.
    ///
    /// Sorted so expansion output is deterministic.
    pub fn matching(&self, pattern: &str) -> Vec<String> {
        let mut matches: Vec<String> = self
            .names
            .iter()
            .filter(|name| wildcard_db_match(pattern, name))
            .cloned()
            .collect();
        matches.sort();
        matches
    }
}

impl<S: Into<String>> FromIterator<S> for DatabaseCatalog {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut catalog = Self::new();
        for name in iter {
            catalog.insert(name);
        }
        catalog
    }
}
