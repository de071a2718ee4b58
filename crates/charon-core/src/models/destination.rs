//! Destination groups
//!
//! A destination gathers multiple number prefixes under a common name,
//! scoped to a tenant. Matching against dialed numbers goes through the
//! reverse prefix index in the rating crate.

use serde::{Deserialize, Serialize};

/// Named set of number prefixes under a tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub tenant: String,
    pub name: String,
    pub prefixes: Vec<String>,
}

impl Destination {
    pub fn new(tenant: &str, name: &str, prefixes: &[&str]) -> Self {
        Self {
            tenant: tenant.to_string(),
            name: name.to_string(),
            prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Length of the longest owned prefix the number starts with, 0 if none
    pub fn prefix_precision(&self, number: &str) -> usize {
        self.prefixes
            .iter()
            .filter(|p| number.starts_with(p.as_str()))
            .map(|p| p.len())
            .max()
            .unwrap_or(0)
    }

    pub fn add_prefix(&mut self, prefix: &str) {
        self.prefixes.push(prefix.to_string());
    }
}

/// Strips the international `+` and anything non-digit off a dialed number
pub fn normalize_number(number: &str) -> String {
    number.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_precision() {
        let dest = Destination::new("cgrates.org", "DST_UK_Mobile_BIG5", &["447956", "447957"]);
        assert_eq!(dest.prefix_precision("447956933443"), 6);
        assert_eq!(dest.prefix_precision("441231234"), 0);
    }

    #[test]
    fn test_normalize_number() {
        assert_eq!(normalize_number("+447956933443"), "447956933443");
        assert_eq!(normalize_number("44-795 6933"), "447956933");
    }
}
