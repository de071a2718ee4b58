//! Shared-group candidate ordering
//!
//! When a candidate balance carries a shared group, every matching balance
//! of every member account joins the candidate set; the group's strategy
//! decides who pays first for the increment at hand.

use charon_core::models::SharingStrategy;
use rand::seq::SliceRandom;
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

/// One shared candidate: a balance of a member account
#[derive(Debug, Clone, PartialEq)]
pub struct SharedCandidate {
    pub account: String,
    pub uuid: Uuid,
    pub value: Decimal,
    pub weight: f64,
}

/// Order candidates for this increment only. `used` carries the amounts
/// already consumed per balance inside the running operation, feeding the
/// `*mostused` / `*leastused` strategies.
pub fn order_by_strategy(
    strategy: SharingStrategy,
    candidates: Vec<SharedCandidate>,
    used: &HashMap<Uuid, Decimal>,
) -> Vec<SharedCandidate> {
    let mut candidates = candidates;
    match strategy {
        SharingStrategy::Highest => {
            candidates.sort_by(|a, b| b.value.cmp(&a.value));
        }
        SharingStrategy::Lowest => {
            candidates.sort_by(|a, b| a.value.cmp(&b.value));
        }
        SharingStrategy::MostUsed => {
            candidates.sort_by(|a, b| {
                let ua = used.get(&a.uuid).copied().unwrap_or_default();
                let ub = used.get(&b.uuid).copied().unwrap_or_default();
                ub.cmp(&ua)
            });
        }
        SharingStrategy::LeastUsed => {
            candidates.sort_by(|a, b| {
                let ua = used.get(&a.uuid).copied().unwrap_or_default();
                let ub = used.get(&b.uuid).copied().unwrap_or_default();
                ua.cmp(&ub)
            });
        }
        SharingStrategy::Random => {
            candidates.shuffle(&mut rand::thread_rng());
        }
        SharingStrategy::Equal => {
            // round-robin across member accounts
            let mut by_account: Vec<(String, Vec<SharedCandidate>)> = Vec::new();
            for candidate in candidates.drain(..) {
                match by_account.iter_mut().find(|(acc, _)| acc == &candidate.account) {
                    Some((_, list)) => list.push(candidate),
                    None => by_account.push((candidate.account.clone(), vec![candidate])),
                }
            }
            let mut interleaved = Vec::new();
            let mut round = 0;
            loop {
                let mut any = false;
                for (_, list) in by_account.iter_mut() {
                    if round < list.len() {
                        interleaved.push(list[round].clone());
                        any = true;
                    }
                }
                if !any {
                    break;
                }
                round += 1;
            }
            candidates = interleaved;
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candidate(account: &str, value: Decimal) -> SharedCandidate {
        SharedCandidate {
            account: account.to_string(),
            uuid: Uuid::new_v4(),
            value,
            weight: 0.0,
        }
    }

    #[test]
    fn test_highest_and_lowest() {
        let pool = vec![
            candidate("a", dec!(5)),
            candidate("b", dec!(20)),
            candidate("c", dec!(10)),
        ];
        let ordered = order_by_strategy(SharingStrategy::Highest, pool.clone(), &HashMap::new());
        let values: Vec<Decimal> = ordered.iter().map(|c| c.value).collect();
        assert_eq!(values, vec![dec!(20), dec!(10), dec!(5)]);

        let ordered = order_by_strategy(SharingStrategy::Lowest, pool, &HashMap::new());
        let values: Vec<Decimal> = ordered.iter().map(|c| c.value).collect();
        assert_eq!(values, vec![dec!(5), dec!(10), dec!(20)]);
    }

    #[test]
    fn test_usage_strategies() {
        let a = candidate("a", dec!(10));
        let b = candidate("b", dec!(10));
        let mut used = HashMap::new();
        used.insert(a.uuid, dec!(7));
        used.insert(b.uuid, dec!(2));

        let ordered =
            order_by_strategy(SharingStrategy::MostUsed, vec![a.clone(), b.clone()], &used);
        assert_eq!(ordered[0].account, "a");

        let ordered = order_by_strategy(SharingStrategy::LeastUsed, vec![a, b], &used);
        assert_eq!(ordered[0].account, "b");
    }

    #[test]
    fn test_equal_round_robins_accounts() {
        let pool = vec![
            candidate("a", dec!(1)),
            candidate("a", dec!(2)),
            candidate("b", dec!(3)),
        ];
        let ordered = order_by_strategy(SharingStrategy::Equal, pool, &HashMap::new());
        let accounts: Vec<&str> = ordered.iter().map(|c| c.account.as_str()).collect();
        assert_eq!(accounts, vec!["a", "b", "a"]);
    }

    #[test]
    fn test_random_keeps_everyone() {
        let pool = vec![
            candidate("a", dec!(1)),
            candidate("b", dec!(2)),
            candidate("c", dec!(3)),
        ];
        let ordered = order_by_strategy(SharingStrategy::Random, pool.clone(), &HashMap::new());
        assert_eq!(ordered.len(), pool.len());
    }
}
