//! Destination matcher
//!
//! Reverse-keyed prefix index: for every `(tenant, prefix)` seen in any
//! destination, the index holds the destination ids claiming that prefix.
//! Matching trims one trailing digit at a time off the dialed number and
//! probes the index, assembling the ranked longest-prefix-first list.

use charon_core::models::{destination::normalize_number, Destination};
use parking_lot::RwLock;
use std::collections::HashMap;

/// One ranked hit of a destination match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationMatch {
    pub dest_id: String,
    pub prefix: String,
}

/// Read-mostly reverse prefix index, rebuilt per tenant on reload
#[derive(Default)]
pub struct DestinationIndex {
    // tenant -> prefix -> destination ids in insertion order
    inner: RwLock<HashMap<String, HashMap<String, Vec<String>>>>,
}

impl DestinationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the index contents for one tenant
    pub fn rebuild_tenant(&self, tenant: &str, destinations: &[Destination]) {
        let mut prefixes: HashMap<String, Vec<String>> = HashMap::new();
        for dest in destinations {
            for prefix in &dest.prefixes {
                let ids = prefixes.entry(prefix.clone()).or_default();
                if !ids.iter().any(|id| id == &dest.name) {
                    ids.push(dest.name.clone());
                }
            }
        }
        self.inner.write().insert(tenant.to_string(), prefixes);
    }

    pub fn drop_tenant(&self, tenant: &str) {
        self.inner.write().remove(tenant);
    }

    /// All destination groups the number belongs to, longest prefix first;
    /// ids sharing a prefix keep their insertion order
    pub fn match_number(&self, tenant: &str, number: &str) -> Vec<DestinationMatch> {
        let number = normalize_number(number);
        let guard = self.inner.read();
        let Some(prefixes) = guard.get(tenant) else {
            return Vec::new();
        };
        let mut matches = Vec::new();
        // the empty prefix is a legal terminal probe
        for end in (0..=number.len()).rev() {
            let prefix = &number[..end];
            if let Some(ids) = prefixes.get(prefix) {
                for id in ids {
                    matches.push(DestinationMatch {
                        dest_id: id.clone(),
                        prefix: prefix.to_string(),
                    });
                }
            }
        }
        matches
    }

    /// Whether the prefix maps to the destination id
    pub fn has_prefix(&self, tenant: &str, dest_id: &str, prefix: &str) -> bool {
        self.inner
            .read()
            .get(tenant)
            .and_then(|prefixes| prefixes.get(prefix))
            .map_or(false, |ids| ids.iter().any(|id| id == dest_id))
    }
}
