//! Accounts
//!
//! An account holds typed balance lists, the trigger groups watching it and
//! their execution records, and the negative/disabled flags. Within a
//! balance-type list, balances stay ordered by descending weight; the
//! balance engine relies on that invariant when consuming.

use super::balance::{Balance, BalanceSummary, BalanceType};
use super::trigger::ActionTriggerRecord;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Account {
    pub tenant: String,
    pub name: String,

    /// Balance lists per type, each ordered by descending weight
    #[serde(default)]
    pub balances: HashMap<BalanceType, Vec<Balance>>,

    /// Trigger groups watching this account
    #[serde(default)]
    pub trigger_ids: Vec<String>,

    /// Per-trigger execution state, keyed by trigger unique id
    #[serde(default)]
    pub trigger_records: HashMap<String, ActionTriggerRecord>,

    /// Per-type event counters fed by debits and topups
    #[serde(default)]
    pub unit_counters: HashMap<BalanceType, Decimal>,

    #[serde(default)]
    pub allow_negative: bool,

    #[serde(default)]
    pub disabled: bool,

    #[serde(default)]
    pub update_time: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(tenant: &str, name: &str) -> Self {
        Self {
            tenant: tenant.to_string(),
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn full_id(&self) -> String {
        super::concat_key(&[&self.tenant, &self.name])
    }

    /// Insert a balance keeping the descending-weight order stable
    pub fn add_balance(&mut self, tor: BalanceType, balance: Balance) {
        let list = self.balances.entry(tor).or_default();
        let pos = list
            .iter()
            .position(|b| b.weight < balance.weight)
            .unwrap_or(list.len());
        list.insert(pos, balance);
    }

    /// Re-establish the weight ordering after in-place mutations
    pub fn sort_balances(&mut self) {
        for list in self.balances.values_mut() {
            list.sort_by(|a, b| {
                b.weight
                    .partial_cmp(&a.weight)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
    }

    pub fn balance_by_uuid(&mut self, uuid: Uuid) -> Option<&mut Balance> {
        self.balances
            .values_mut()
            .flat_map(|list| list.iter_mut())
            .find(|b| b.uuid == uuid)
    }

    /// The default monetary balance, created on first use
    pub fn default_money_balance_mut(&mut self) -> &mut Balance {
        let list = self.balances.entry(BalanceType::Monetary).or_default();
        if let Some(pos) = list.iter().position(|b| b.is_default()) {
            return &mut list[pos];
        }
        list.push(Balance {
            id: super::DEFAULT_BALANCE.to_string(),
            ..Balance::default()
        });
        list.last_mut().expect("balance just pushed")
    }

    /// Total value of not-expired, active balances of a type
    pub fn total_value(&self, tor: BalanceType, at: DateTime<Utc>) -> Decimal {
        self.balances
            .get(&tor)
            .map(|list| {
                list.iter()
                    .filter(|b| !b.is_expired_at(at) && b.is_active_at(at))
                    .map(|b| b.value)
                    .sum()
            })
            .unwrap_or(Decimal::ZERO)
    }

    /// Drop balances whose expiry has passed
    pub fn clean_expired(&mut self, at: DateTime<Utc>) {
        for list in self.balances.values_mut() {
            list.retain(|b| !b.is_expired_at(at));
        }
        self.balances.retain(|_, list| !list.is_empty());
    }

    /// Every shared group any balance of this account belongs to
    pub fn shared_groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self
            .balances
            .values()
            .flat_map(|list| list.iter())
            .flat_map(|b| b.shared_groups.iter().cloned())
            .collect();
        groups.sort();
        groups.dedup();
        groups
    }

    /// Bump the event counter for a type
    pub fn count_units(&mut self, tor: BalanceType, amount: Decimal) {
        *self.unit_counters.entry(tor).or_insert(Decimal::ZERO) += amount;
    }

    pub fn reset_counters(&mut self) {
        self.unit_counters.clear();
    }

    pub fn as_summary(&self) -> AccountSummary {
        let mut balance_summaries: Vec<BalanceSummary> = self
            .balances
            .iter()
            .flat_map(|(tor, list)| list.iter().map(|b| b.as_summary(*tor)))
            .collect();
        balance_summaries.sort_by(|a, b| a.id.cmp(&b.id));
        AccountSummary {
            tenant: self.tenant.clone(),
            id: self.name.clone(),
            balance_summaries,
            allow_negative: self.allow_negative,
            disabled: self.disabled,
        }
    }
}

/// Compressed account snapshot for RPC replies and action payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub tenant: String,
    pub id: String,
    pub balance_summaries: Vec<BalanceSummary>,
    pub allow_negative: bool,
    pub disabled: bool,
}
