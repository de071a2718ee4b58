//! Call descriptors and priced call costs
//!
//! A [`CallDescriptor`] is the charging request; the cost calculator turns
//! it into a [`CallCost`]: an ordered list of timespans, each holding the
//! priced increments that paid (or will pay) for it.

use super::balance::BalanceType;
use super::rate::RateInterval;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Charging request for one call window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallDescriptor {
    pub direction: String,
    pub category: String,
    pub tenant: String,
    pub subject: String,
    #[serde(default)]
    pub account: String,
    pub destination: String,
    pub time_start: DateTime<Utc>,
    pub time_end: DateTime<Utc>,

    /// Call duration so far, for continuation debits of ongoing sessions
    #[serde(default)]
    pub duration_index: Duration,

    #[serde(default)]
    pub tor: BalanceType,

    #[serde(default)]
    pub fallback_subjects: Vec<String>,
}

impl CallDescriptor {
    pub fn duration(&self) -> Duration {
        (self.time_end - self.time_start).to_std().unwrap_or(Duration::ZERO)
    }

    /// The account this descriptor debits; defaults to the subject
    pub fn account_name(&self) -> &str {
        if self.account.is_empty() {
            &self.subject
        } else {
            &self.account
        }
    }

    /// Guardian lock key for the target account
    pub fn account_key(&self) -> String {
        super::concat_key(&[&self.tenant, self.account_name()])
    }

    /// Rating key without the subject part
    pub fn key_with_subject(&self, subject: &str) -> String {
        super::concat_key(&[&self.direction, &self.tenant, &self.category, subject])
    }
}

/// Where the money/units for one increment came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub uuid: Uuid,
    pub id: String,
    /// Balance value after this payment
    pub value_after: Decimal,
    /// Amount taken from the balance
    pub consumed: Decimal,
}

/// Payment breakdown of one increment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DebitInfo {
    /// Account the paying balances belong to (shared groups may point at
    /// another account than the debited one)
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub unit: Option<PaymentInfo>,
    #[serde(default)]
    pub monetary: Option<PaymentInfo>,
}

/// One priced slice of usage; equal-cost runs stay compressed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Increment {
    pub duration: Duration,
    pub cost: Decimal,
    #[serde(default)]
    pub balance_info: DebitInfo,
    /// Number of identical increments this entry stands for
    pub compressed_count: u32,
}

impl Increment {
    pub fn new(duration: Duration, cost: Decimal, compressed_count: u32) -> Self {
        Self {
            duration,
            cost,
            balance_info: DebitInfo::default(),
            compressed_count,
        }
    }

    pub fn total_cost(&self) -> Decimal {
        self.cost * Decimal::from(self.compressed_count)
    }

    pub fn total_duration(&self) -> Duration {
        self.duration * self.compressed_count
    }
}

/// Contiguous sub-interval of a call priced under one rate interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSpan {
    pub time_start: DateTime<Utc>,
    pub time_end: DateTime<Utc>,

    /// Rounded cost of this span
    pub cost: Decimal,

    #[serde(default)]
    pub rate_interval: Option<RateInterval>,

    /// Call duration up to `time_end`, used for slot selection
    #[serde(default)]
    pub duration_index: Duration,

    #[serde(default)]
    pub increments: Vec<Increment>,

    #[serde(default)]
    pub matched_subject: String,
    #[serde(default)]
    pub matched_prefix: String,
    #[serde(default)]
    pub matched_dest_id: String,
    #[serde(default)]
    pub rating_plan_id: String,
}

impl TimeSpan {
    pub fn new(time_start: DateTime<Utc>, time_end: DateTime<Utc>) -> Self {
        Self {
            time_start,
            time_end,
            cost: Decimal::ZERO,
            rate_interval: None,
            duration_index: Duration::ZERO,
            increments: Vec::new(),
            matched_subject: String::new(),
            matched_prefix: String::new(),
            matched_dest_id: String::new(),
            rating_plan_id: String::new(),
        }
    }

    pub fn duration(&self) -> Duration {
        (self.time_end - self.time_start)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Call second this span starts at
    pub fn group_start(&self) -> Duration {
        self.duration_index
            .checked_sub(self.duration())
            .unwrap_or(Duration::ZERO)
    }

    /// Call second this span ends at
    pub fn group_end(&self) -> Duration {
        self.duration_index
    }

    /// Sum of increment costs, before rounding
    pub fn raw_cost(&self) -> Decimal {
        self.increments.iter().map(|i| i.total_cost()).sum()
    }

    /// Collapse neighbouring increments with identical unit cost and
    /// duration into compressed entries
    pub fn compress_increments(&mut self) {
        let mut compressed: Vec<Increment> = Vec::with_capacity(self.increments.len());
        for inc in self.increments.drain(..) {
            match compressed.last_mut() {
                Some(last)
                    if last.cost == inc.cost
                        && last.duration == inc.duration
                        && last.balance_info == inc.balance_info =>
                {
                    last.compressed_count += inc.compressed_count.max(1);
                }
                _ => compressed.push(inc),
            }
        }
        self.increments = compressed;
    }
}

/// Priced timeline for one call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallCost {
    pub direction: String,
    pub category: String,
    pub tenant: String,
    pub subject: String,
    #[serde(default)]
    pub account: String,
    pub destination: String,
    #[serde(default)]
    pub tor: BalanceType,

    pub timespans: Vec<TimeSpan>,

    /// Charged once, carried by the first increment of the call
    #[serde(default)]
    pub connect_fee: Decimal,

    /// False once the fee was already charged by a previous partial debit
    #[serde(default)]
    pub deduct_connect_fee: bool,

    /// Set when a `*disconnect` max-cost strategy truncated the call
    #[serde(default)]
    pub max_cost_disconnect: bool,
}

impl CallCost {
    pub fn from_descriptor(cd: &CallDescriptor) -> Self {
        Self {
            direction: cd.direction.clone(),
            category: cd.category.clone(),
            tenant: cd.tenant.clone(),
            subject: cd.subject.clone(),
            account: cd.account_name().to_string(),
            destination: cd.destination.clone(),
            tor: cd.tor,
            timespans: Vec::new(),
            connect_fee: Decimal::ZERO,
            deduct_connect_fee: false,
            max_cost_disconnect: false,
        }
    }

    /// Total cost: connect fee plus the rounded timespan costs
    pub fn cost(&self) -> Decimal {
        let fee = if self.deduct_connect_fee {
            self.connect_fee
        } else {
            Decimal::ZERO
        };
        fee + self.timespans.iter().map(|ts| ts.cost).sum::<Decimal>()
    }

    pub fn duration(&self) -> Duration {
        self.timespans.iter().map(|ts| ts.duration()).sum()
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.timespans.last().map(|ts| ts.time_end)
    }
}
