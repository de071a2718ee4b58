//! Shared groups
//!
//! A shared group lets balances of several accounts pay for each other's
//! usage. Membership is a back-index (group → account names) so the
//! balance engine never chases account pointers.

use serde::{Deserialize, Serialize};

/// Ordering applied to shared candidates when picking who pays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SharingStrategy {
    #[serde(rename = "*highest")]
    Highest,
    #[serde(rename = "*lowest")]
    Lowest,
    #[serde(rename = "*mostused")]
    MostUsed,
    #[serde(rename = "*leastused")]
    LeastUsed,
    #[default]
    #[serde(rename = "*random")]
    Random,
    #[serde(rename = "*equal")]
    Equal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedGroup {
    pub tenant: String,
    pub name: String,
    #[serde(default)]
    pub strategy: SharingStrategy,
    /// Accounts whose balances participate in the pool
    #[serde(default)]
    pub member_ids: Vec<String>,
}

impl SharedGroup {
    pub fn new(tenant: &str, name: &str, strategy: SharingStrategy) -> Self {
        Self {
            tenant: tenant.to_string(),
            name: name.to_string(),
            strategy,
            member_ids: Vec::new(),
        }
    }

    pub fn add_member(&mut self, account: &str) {
        if !self.member_ids.iter().any(|m| m == account) {
            self.member_ids.push(account.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership_is_deduplicated() {
        let mut sg = SharedGroup::new("cgrates.org", "SG1", SharingStrategy::Highest);
        sg.add_member("1001");
        sg.add_member("1001");
        sg.add_member("1002");
        assert_eq!(sg.member_ids, vec!["1001", "1002"]);
    }
}
