//! Call detail records
//!
//! The core does not persist rated CDRs itself; it synthesizes them (for
//! `*cdrlog` actions and session costs) and hands them to the injected CDR
//! store.

use super::balance::BalanceType;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cdr {
    pub origin_id: String,
    pub run_id: String,
    pub source: String,
    pub tenant: String,
    pub category: String,
    pub account: String,
    pub subject: String,
    pub destination: String,
    #[serde(default)]
    pub tor: BalanceType,
    pub setup_time: DateTime<Utc>,
    pub answer_time: DateTime<Utc>,
    #[serde(default)]
    pub usage: Duration,
    pub cost: Decimal,
    #[serde(default)]
    pub extra_fields: HashMap<String, String>,
}

/// Selection predicate for `get_cdrs`; unset fields match anything
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CdrFilter {
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

impl CdrFilter {
    pub fn matches(&self, cdr: &Cdr) -> bool {
        self.tenant.as_ref().map_or(true, |t| &cdr.tenant == t)
            && self.account.as_ref().map_or(true, |a| &cdr.account == a)
            && self.run_id.as_ref().map_or(true, |r| &cdr.run_id == r)
            && self.source.as_ref().map_or(true, |s| &cdr.source == s)
    }
}

/// Session-manager cost attached to a call id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmCost {
    pub cgr_id: String,
    pub run_id: String,
    pub origin_id: String,
    pub cost_source: String,
    #[serde(default)]
    pub usage: Duration,
    pub cost: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_cdr_filter() {
        let cdr = Cdr {
            origin_id: "abc".to_string(),
            run_id: "*topup".to_string(),
            source: "cdrlog".to_string(),
            tenant: "cgrates.org".to_string(),
            category: String::new(),
            account: "1001".to_string(),
            subject: "1001".to_string(),
            destination: String::new(),
            tor: BalanceType::Monetary,
            setup_time: Utc::now(),
            answer_time: Utc::now(),
            usage: Duration::ZERO,
            cost: dec!(10),
            extra_fields: HashMap::new(),
        };
        assert!(CdrFilter::default().matches(&cdr));
        assert!(CdrFilter {
            account: Some("1001".to_string()),
            ..CdrFilter::default()
        }
        .matches(&cdr));
        assert!(!CdrFilter {
            account: Some("1002".to_string()),
            ..CdrFilter::default()
        }
        .matches(&cdr));
    }
}
