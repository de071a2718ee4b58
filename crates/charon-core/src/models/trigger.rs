//! Action triggers
//!
//! A trigger fires an action group when the account state crosses its
//! threshold. Execution state lives on the account as a trigger record;
//! non-recurrent triggers stay executed until reset.

use super::balance::{BalanceFilter, BalanceType};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdType {
    #[serde(rename = "*min_balance")]
    MinBalance,
    #[serde(rename = "*max_balance")]
    MaxBalance,
    #[serde(rename = "*min_event_counter")]
    MinEventCounter,
    #[serde(rename = "*max_event_counter")]
    MaxEventCounter,
    #[serde(rename = "*balance_expired")]
    BalanceExpired,
}

impl ThresholdType {
    pub fn is_counter(&self) -> bool {
        matches!(
            self,
            ThresholdType::MinEventCounter | ThresholdType::MaxEventCounter
        )
    }
}

/// Predicate on account state paired with the action group it fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionTrigger {
    /// Individual id, also the key of the account-side record
    pub unique_id: String,

    pub threshold_type: ThresholdType,
    pub threshold_value: Decimal,

    /// Balance type the threshold watches
    pub tor: BalanceType,

    /// Selects which balances are compared against the threshold
    #[serde(default)]
    pub filter: BalanceFilter,

    /// Action group executed on fire
    pub actions_id: String,

    /// Re-arms after every fire instead of staying executed
    #[serde(default)]
    pub recurrent: bool,

    /// Minimum pause between recurrent fires
    #[serde(default)]
    pub min_sleep: Duration,

    #[serde(default)]
    pub activation_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expiration_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub weight: f64,

    /// Fire only once this many queued items accumulated (stats triggers)
    #[serde(default)]
    pub min_queued_items: usize,
}

impl ActionTrigger {
    pub fn is_active_at(&self, t: DateTime<Utc>) -> bool {
        self.activation_time.map_or(true, |at| t >= at)
    }

    pub fn is_expired_at(&self, t: DateTime<Utc>) -> bool {
        self.expiration_time.map_or(false, |exp| t > exp)
    }
}

/// Loader-owned group of triggers referenced by accounts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionTriggerGroup {
    pub tenant: String,
    pub name: String,
    pub triggers: Vec<ActionTrigger>,
}

impl ActionTriggerGroup {
    /// Triggers in evaluation order: descending weight, stable
    pub fn sorted_triggers(&self) -> Vec<&ActionTrigger> {
        let mut triggers: Vec<&ActionTrigger> = self.triggers.iter().collect();
        triggers.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        triggers
    }
}

/// Account-side execution state of one trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionTriggerRecord {
    pub unique_id: String,
    #[serde(default)]
    pub recurrent: bool,
    #[serde(default)]
    pub executed: bool,
    #[serde(default)]
    pub activation_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expiration_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_execution_time: Option<DateTime<Utc>>,
}

impl ActionTriggerRecord {
    pub fn for_trigger(trigger: &ActionTrigger) -> Self {
        Self {
            unique_id: trigger.unique_id.clone(),
            recurrent: trigger.recurrent,
            executed: false,
            activation_time: trigger.activation_time,
            expiration_time: trigger.expiration_time,
            last_execution_time: None,
        }
    }

    /// Whether a recurrent trigger slept long enough to fire again
    pub fn min_sleep_elapsed(&self, min_sleep: Duration, now: DateTime<Utc>) -> bool {
        match self.last_execution_time {
            None => true,
            Some(last) => {
                let elapsed = now - last;
                elapsed >= chrono::Duration::from_std(min_sleep).unwrap_or(chrono::Duration::zero())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trigger() -> ActionTrigger {
        ActionTrigger {
            unique_id: "at1".to_string(),
            threshold_type: ThresholdType::MinBalance,
            threshold_value: dec!(5),
            tor: BalanceType::Monetary,
            filter: BalanceFilter::default(),
            actions_id: "DISABLE_ACNT".to_string(),
            recurrent: false,
            min_sleep: Duration::ZERO,
            activation_time: None,
            expiration_time: None,
            weight: 10.0,
            min_queued_items: 0,
        }
    }

    #[test]
    fn test_activation_window() {
        let now = Utc::now();
        let mut at = trigger();
        assert!(at.is_active_at(now));
        assert!(!at.is_expired_at(now));

        at.activation_time = Some(now + chrono::Duration::hours(1));
        assert!(!at.is_active_at(now));

        at.activation_time = None;
        at.expiration_time = Some(now - chrono::Duration::hours(1));
        assert!(at.is_expired_at(now));
    }

    #[test]
    fn test_min_sleep() {
        let now = Utc::now();
        let mut record = ActionTriggerRecord::for_trigger(&trigger());
        assert!(record.min_sleep_elapsed(Duration::from_secs(60), now));

        record.last_execution_time = Some(now - chrono::Duration::seconds(30));
        assert!(!record.min_sleep_elapsed(Duration::from_secs(60), now));
        assert!(record.min_sleep_elapsed(Duration::from_secs(10), now));
    }

    #[test]
    fn test_sorted_by_weight_descending() {
        let mut group = ActionTriggerGroup {
            tenant: "cgrates.org".to_string(),
            name: "TG1".to_string(),
            triggers: vec![],
        };
        for (id, weight) in [("low", 1.0), ("high", 9.0)] {
            let mut at = trigger();
            at.unique_id = id.to_string();
            at.weight = weight;
            group.triggers.push(at);
        }
        let order: Vec<&str> = group
            .sorted_triggers()
            .iter()
            .map(|t| t.unique_id.as_str())
            .collect();
        assert_eq!(order, vec!["high", "low"]);
    }
}
