//! Typed balances and balance filters
//!
//! A balance is a typed value carrier inside an account. Filters are the
//! nullable-field twin of the balance shape: every set field acts as an
//! equality or containment predicate when selecting balances.

use super::timing::TimingSpec;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Type-of-record: the unit a balance carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BalanceType {
    #[default]
    #[serde(rename = "*monetary")]
    Monetary,
    #[serde(rename = "*voice")]
    Voice,
    #[serde(rename = "*sms")]
    Sms,
    #[serde(rename = "*mms")]
    Mms,
    #[serde(rename = "*data")]
    Data,
    #[serde(rename = "*generic")]
    Generic,
}

impl BalanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceType::Monetary => "*monetary",
            BalanceType::Voice => "*voice",
            BalanceType::Sms => "*sms",
            BalanceType::Mms => "*mms",
            BalanceType::Data => "*data",
            BalanceType::Generic => "*generic",
        }
    }
}

impl std::str::FromStr for BalanceType {
    type Err = crate::error::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "*monetary" => Ok(BalanceType::Monetary),
            "*voice" => Ok(BalanceType::Voice),
            "*sms" => Ok(BalanceType::Sms),
            "*mms" => Ok(BalanceType::Mms),
            "*data" => Ok(BalanceType::Data),
            "*generic" => Ok(BalanceType::Generic),
            other => Err(crate::error::AppError::Parser(format!(
                "unknown balance type: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for BalanceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed value carrier inside an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    /// System-wide unique
    pub uuid: Uuid,

    /// Account-wide unique; `*default` marks the default monetary balance
    #[serde(default)]
    pub id: String,

    pub value: Decimal,

    /// Matching call directions; empty = any
    #[serde(default)]
    pub directions: Vec<String>,

    #[serde(default)]
    pub expiration_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub weight: f64,

    /// Destination inclusion set; `false` marks a negated (excluded) entry
    #[serde(default)]
    pub destination_ids: HashMap<String, bool>,

    /// Re-routes pricing through another subject; `*zero…` prefixes mark
    /// zero-rated unit balances
    #[serde(default)]
    pub rating_subject: String,

    /// Matching categories; empty = any
    #[serde(default)]
    pub categories: Vec<String>,

    #[serde(default)]
    pub shared_groups: Vec<String>,

    #[serde(default)]
    pub timing_ids: Vec<String>,

    /// Activation windows resolved from `timing_ids` at load time
    #[serde(default)]
    pub timings: Vec<TimingSpec>,

    #[serde(default)]
    pub disabled: bool,

    /// A matching blocker hides every lower-weighted balance of its type
    #[serde(default)]
    pub blocker: bool,

    /// Satisfies any amount without draining; used for postpaid
    #[serde(default)]
    pub unlimited: bool,

    /// Per-type consumption multiplier: using `d` units costs `d / factor`
    #[serde(default)]
    pub factor: HashMap<BalanceType, f64>,
}

impl Default for Balance {
    fn default() -> Self {
        Self {
            uuid: Uuid::new_v4(),
            id: String::new(),
            value: Decimal::ZERO,
            directions: Vec::new(),
            expiration_time: None,
            weight: 0.0,
            destination_ids: HashMap::new(),
            rating_subject: String::new(),
            categories: Vec::new(),
            shared_groups: Vec::new(),
            timing_ids: Vec::new(),
            timings: Vec::new(),
            disabled: false,
            blocker: false,
            unlimited: false,
            factor: HashMap::new(),
        }
    }
}

impl Balance {
    pub fn is_default(&self) -> bool {
        self.id == super::DEFAULT_BALANCE
    }

    pub fn is_expired_at(&self, t: DateTime<Utc>) -> bool {
        self.expiration_time.map_or(false, |exp| exp <= t)
    }

    /// Active means not disabled and inside at least one timing window
    /// (or carrying none)
    pub fn is_active_at(&self, t: DateTime<Utc>) -> bool {
        if self.disabled {
            return false;
        }
        if self.timings.is_empty() {
            return true;
        }
        self.timings.iter().any(|tim| tim.matches(t))
    }

    pub fn match_category(&self, category: &str) -> bool {
        self.categories.is_empty() || self.categories.iter().any(|c| c == category)
    }

    pub fn match_direction(&self, direction: &str) -> bool {
        self.directions.is_empty() || self.directions.iter().any(|d| d == direction)
    }

    /// True when the balance constrains destinations beyond `*any`
    pub fn has_destination_filter(&self) -> bool {
        !self.destination_ids.is_empty() && self.destination_ids.get(super::ANY) != Some(&true)
    }

    /// Matches the destination against the balance's inclusion set given
    /// the destination groups the dialed number belongs to. Returns the
    /// matched prefix length (0 = no constraint) or `None` on exclusion.
    pub fn match_destination_ids(&self, matched: &[(String, String)]) -> Option<usize> {
        if !self.has_destination_filter() {
            return Some(0);
        }
        let mut found: Option<usize> = None;
        for (dest_id, prefix) in matched {
            if let Some(&included) = self.destination_ids.get(dest_id) {
                if !included {
                    return None;
                }
                found = Some(found.map_or(prefix.len(), |len| len.max(prefix.len())));
            }
        }
        if found.is_some() {
            return found;
        }
        // a filter made purely of exclusions admits everything else
        if self.destination_ids.values().all(|included| !included) {
            return Some(0);
        }
        None
    }

    /// Units consumed for a duration amount, honoring the value factor
    pub fn amount_for(&self, tor: BalanceType, units: Decimal) -> Decimal {
        let factor = self.factor.get(&tor).copied().unwrap_or(1.0);
        if factor == 1.0 {
            return units;
        }
        units / Decimal::from_f64(factor).unwrap_or(Decimal::ONE)
    }

    pub fn add_value(&mut self, amount: Decimal) {
        if self.unlimited {
            return;
        }
        self.value += amount;
    }

    pub fn sub_value(&mut self, amount: Decimal) {
        if self.unlimited {
            return;
        }
        self.value -= amount;
    }

    /// Whether the balance can cover the amount
    pub fn covers(&self, amount: Decimal) -> bool {
        self.unlimited || self.value >= amount
    }

    pub fn as_summary(&self, tor: BalanceType) -> BalanceSummary {
        BalanceSummary {
            id: if self.id.is_empty() {
                self.uuid.to_string()
            } else {
                self.id.clone()
            },
            balance_type: tor,
            value: self.value,
            disabled: self.disabled,
        }
    }
}

/// Compact balance information for snapshots and RPC replies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub balance_type: BalanceType,
    pub value: Decimal,
    pub disabled: bool,
}

/// Nullable-field predicate over balances; every set field must match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BalanceFilter {
    #[serde(default)]
    pub uuid: Option<Uuid>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub value: Option<Decimal>,
    #[serde(default)]
    pub directions: Option<Vec<String>>,
    #[serde(default)]
    pub expiration_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub destination_ids: Option<HashMap<String, bool>>,
    #[serde(default)]
    pub rating_subject: Option<String>,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    #[serde(default)]
    pub shared_groups: Option<Vec<String>>,
    #[serde(default)]
    pub timing_ids: Option<Vec<String>>,
    #[serde(default)]
    pub disabled: Option<bool>,
    #[serde(default)]
    pub blocker: Option<bool>,
    #[serde(default)]
    pub factor: Option<HashMap<BalanceType, f64>>,
}

impl BalanceFilter {
    /// Filter matching a single balance id
    pub fn with_id(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether the balance satisfies every set field
    pub fn matches(&self, balance: &Balance) -> bool {
        if let Some(uuid) = self.uuid {
            if balance.uuid != uuid {
                return false;
            }
        }
        if let Some(ref id) = self.id {
            if &balance.id != id {
                return false;
            }
        }
        if let Some(ref directions) = self.directions {
            if !directions.iter().all(|d| balance.directions.contains(d)) {
                return false;
            }
        }
        if let Some(ref dest_ids) = self.destination_ids {
            if !dest_ids
                .iter()
                .all(|(k, v)| balance.destination_ids.get(k) == Some(v))
            {
                return false;
            }
        }
        if let Some(ref subject) = self.rating_subject {
            if &balance.rating_subject != subject {
                return false;
            }
        }
        if let Some(ref categories) = self.categories {
            if !categories.iter().all(|c| balance.categories.contains(c)) {
                return false;
            }
        }
        if let Some(ref groups) = self.shared_groups {
            if !groups.iter().all(|g| balance.shared_groups.contains(g)) {
                return false;
            }
        }
        if let Some(ref timing_ids) = self.timing_ids {
            if !timing_ids.iter().all(|t| balance.timing_ids.contains(t)) {
                return false;
            }
        }
        if let Some(disabled) = self.disabled {
            if balance.disabled != disabled {
                return false;
            }
        }
        if let Some(blocker) = self.blocker {
            if balance.blocker != blocker {
                return false;
            }
        }
        true
    }

    /// Build a balance from the filter's set fields (used by topup and
    /// set-balance actions creating on miss)
    pub fn as_balance(&self) -> Balance {
        let mut balance = Balance::default();
        self.apply_to(&mut balance);
        balance.uuid = self.uuid.unwrap_or_else(Uuid::new_v4);
        balance
    }

    /// Overwrite the set fields onto an existing balance
    pub fn apply_to(&self, balance: &mut Balance) {
        if let Some(ref id) = self.id {
            balance.id = id.clone();
        }
        if let Some(value) = self.value {
            balance.value = value;
        }
        if let Some(ref directions) = self.directions {
            balance.directions = directions.clone();
        }
        if let Some(expiration_time) = self.expiration_time {
            balance.expiration_time = Some(expiration_time);
        }
        if let Some(weight) = self.weight {
            balance.weight = weight;
        }
        if let Some(ref dest_ids) = self.destination_ids {
            balance.destination_ids = dest_ids.clone();
        }
        if let Some(ref subject) = self.rating_subject {
            balance.rating_subject = subject.clone();
        }
        if let Some(ref categories) = self.categories {
            balance.categories = categories.clone();
        }
        if let Some(ref groups) = self.shared_groups {
            balance.shared_groups = groups.clone();
        }
        if let Some(ref timing_ids) = self.timing_ids {
            balance.timing_ids = timing_ids.clone();
        }
        if let Some(disabled) = self.disabled {
            balance.disabled = disabled;
        }
        if let Some(blocker) = self.blocker {
            balance.blocker = blocker;
        }
        if let Some(ref factor) = self.factor {
            balance.factor = factor.clone();
        }
    }
}
