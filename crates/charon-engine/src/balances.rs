//! Candidate balance selection
//!
//! Filters an account's balances for a debit: destination inclusion,
//! category, direction, activation timings, expiry and the disabled flag,
//! ordered by matched-prefix precision then weight. A matching blocker
//! hides every lower-ranked balance of the type.

use charon_core::models::{Account, Balance, BalanceType};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Increment attributes the filters run against
pub struct DebitAttrs<'a> {
    /// Destination groups the dialed number belongs to, `(dest_id, prefix)`
    pub destination_matches: &'a [(String, String)],
    pub category: &'a str,
    pub direction: &'a str,
    pub at: DateTime<Utc>,
}

fn usable(balance: &Balance, attrs: &DebitAttrs, shared_group: Option<&str>) -> Option<usize> {
    if balance.disabled || balance.is_expired_at(attrs.at) {
        return None;
    }
    // drained balances stay visible only as blockers or shared-group links
    if balance.value <= rust_decimal::Decimal::ZERO
        && !balance.unlimited
        && !balance.blocker
        && balance.shared_groups.is_empty()
    {
        return None;
    }
    if let Some(group) = shared_group {
        if !balance.shared_groups.iter().any(|g| g == group) {
            return None;
        }
    }
    if !balance.match_category(attrs.category) {
        return None;
    }
    if !balance.match_direction(attrs.direction) {
        return None;
    }
    if !balance.is_active_at(attrs.at) {
        return None;
    }
    balance.match_destination_ids(attrs.destination_matches)
}

/// Candidate balances of one account for a balance type, best first.
/// Generic balances back every non-monetary type. When `shared_group` is
/// set only balances belonging to that group qualify.
pub fn candidate_balances(
    account: &Account,
    tor: BalanceType,
    attrs: &DebitAttrs,
    shared_group: Option<&str>,
) -> Vec<(BalanceType, Uuid)> {
    let mut scored: Vec<(usize, f64, BalanceType, Uuid, bool)> = Vec::new();
    let mut types = vec![tor];
    if tor != BalanceType::Monetary && tor != BalanceType::Generic {
        types.push(BalanceType::Generic);
    }
    for t in types {
        if let Some(list) = account.balances.get(&t) {
            for balance in list {
                if let Some(precision) = usable(balance, attrs, shared_group) {
                    scored.push((precision, balance.weight, t, balance.uuid, balance.blocker));
                }
            }
        }
    }
    scored.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then_with(|| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal))
    });
    // a blocker cuts off everything ranked below it
    let mut result = Vec::with_capacity(scored.len());
    for (_, _, t, uuid, blocker) in scored {
        result.push((t, uuid));
        if blocker {
            break;
        }
    }
    result
}
