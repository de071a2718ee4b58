//! Rating plans
//!
//! A rating plan maps destination prefixes to weighted, time-banded rate
//! intervals. The effective destination rate at an instant is the interval
//! whose timing matches with the greatest weight.

use super::rate::RateInterval;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-prefix interval list inside a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DestinationRateEntry {
    /// Human-readable destination group name the prefix came from
    pub dest_name: String,
    pub intervals: Vec<RateInterval>,
}

/// Time-banded map from destination prefixes to rate intervals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingPlan {
    pub tenant: String,
    pub name: String,
    /// Keyed by destination prefix code; `*any` is the catch-all
    pub dest_rates: HashMap<String, DestinationRateEntry>,
}

impl RatingPlan {
    pub fn new(tenant: &str, name: &str) -> Self {
        Self {
            tenant: tenant.to_string(),
            name: name.to_string(),
            dest_rates: HashMap::new(),
        }
    }

    /// Register intervals for a prefix code
    pub fn add_rate_interval(&mut self, code: &str, dest_name: &str, interval: RateInterval) {
        let entry = self.dest_rates.entry(code.to_string()).or_default();
        entry.dest_name = dest_name.to_string();
        if !entry.intervals.contains(&interval) {
            entry.intervals.push(interval);
        }
    }

    /// Interval list for a prefix code, if any
    pub fn rate_intervals(&self, code: &str) -> Option<&DestinationRateEntry> {
        self.dest_rates.get(code)
    }

    /// Longest matching prefix of the destination present in the plan,
    /// falling back to `*any`
    pub fn match_destination(&self, destination: &str) -> Option<(String, &DestinationRateEntry)> {
        if destination.is_empty() || destination == super::ANY {
            return self
                .dest_rates
                .get(super::ANY)
                .map(|e| (super::ANY.to_string(), e));
        }
        for end in (1..=destination.len()).rev() {
            let prefix = &destination[..end];
            if let Some(entry) = self.dest_rates.get(prefix) {
                return Some((prefix.to_string(), entry));
            }
        }
        self.dest_rates
            .get(super::ANY)
            .map(|e| (super::ANY.to_string(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rate::{DestinationRate, RateSlot};
    use crate::models::timing::TimingSpec;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn interval() -> RateInterval {
        RateInterval {
            timing: TimingSpec::default(),
            rating: DestinationRate::new(
                dec!(0),
                vec![RateSlot::new(
                    Duration::from_secs(0),
                    dec!(0.10),
                    Duration::from_secs(60),
                    Duration::from_secs(1),
                )],
            ),
            weight: 10.0,
        }
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut plan = RatingPlan::new("cgrates.org", "RP_UK");
        plan.add_rate_interval("44", "DST_UK", interval());
        plan.add_rate_interval("447956", "DST_UK_Mobile", interval());

        let (prefix, entry) = plan.match_destination("447956933443").unwrap();
        assert_eq!(prefix, "447956");
        assert_eq!(entry.dest_name, "DST_UK_Mobile");
    }

    #[test]
    fn test_any_fallback() {
        let mut plan = RatingPlan::new("cgrates.org", "RP_ANY");
        plan.add_rate_interval(crate::models::ANY, "ALL", interval());

        let (prefix, _) = plan.match_destination("33123").unwrap();
        assert_eq!(prefix, crate::models::ANY);
    }

    #[test]
    fn test_no_match() {
        let mut plan = RatingPlan::new("cgrates.org", "RP_UK");
        plan.add_rate_interval("44", "DST_UK", interval());
        assert!(plan.match_destination("33123").is_none());
    }

    #[test]
    fn test_duplicate_intervals_collapse() {
        let mut plan = RatingPlan::new("cgrates.org", "RP_UK");
        plan.add_rate_interval("44", "DST_UK", interval());
        plan.add_rate_interval("44", "DST_UK", interval());
        assert_eq!(plan.rate_intervals("44").unwrap().intervals.len(), 1);
    }
}
