//! Actions, action groups, action plans and timings
//!
//! Actions are named mutations applied to accounts by the executor. Groups
//! run in ascending weight order; plans pair groups with recurring timings
//! and bind to accounts through action-plan bindings.

use super::balance::{BalanceFilter, BalanceType};
use super::timing::TimingSpec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// action type registry keys
pub const LOG: &str = "*log";
pub const CDRLOG: &str = "*cdrlog";
pub const RESET_TRIGGERS: &str = "*reset_triggers";
pub const SET_RECURRENT: &str = "*set_recurrent";
pub const UNSET_RECURRENT: &str = "*unset_recurrent";
pub const ALLOW_NEGATIVE: &str = "*allow_negative";
pub const DENY_NEGATIVE: &str = "*deny_negative";
pub const RESET_ACCOUNT: &str = "*reset_account";
pub const REMOVE_ACCOUNT: &str = "*remove_account";
pub const SET_BALANCE: &str = "*set_balance";
pub const REMOVE_BALANCE: &str = "*remove_balance";
pub const TOPUP: &str = "*topup";
pub const TOPUP_RESET: &str = "*topup_reset";
pub const DEBIT: &str = "*debit";
pub const DEBIT_RESET: &str = "*debit_reset";
pub const RESET_COUNTERS: &str = "*reset_counters";
pub const ENABLE_ACCOUNT: &str = "*enable_account";
pub const DISABLE_ACCOUNT: &str = "*disable_account";
pub const CALL_URL: &str = "*call_url";
pub const CALL_URL_ASYNC: &str = "*call_url_async";
pub const MAIL_ASYNC: &str = "*mail_async";

/// A single named mutation on an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Handler name, one of the `*…` registry keys
    pub action_type: String,

    /// Balance type the action applies to, when it touches balances
    #[serde(default)]
    pub tor: Option<BalanceType>,

    /// Free-form handler parameters (URL for `*call_url`, addresses for
    /// `*mail_async`, …)
    #[serde(default)]
    pub params: serde_json::Value,

    /// Gate expression evaluated against the account before running
    #[serde(default)]
    pub exec_filter: Option<String>,

    /// Balance selector; its `value` doubles as the action amount
    #[serde(default)]
    pub filter: BalanceFilter,

    #[serde(default)]
    pub weight: f64,

    /// A failing mandatory action skips the remainder of its group
    #[serde(default)]
    pub mandatory: bool,
}

impl Action {
    pub fn new(action_type: &str) -> Self {
        Self {
            action_type: action_type.to_string(),
            tor: None,
            params: serde_json::Value::Null,
            exec_filter: None,
            filter: BalanceFilter::default(),
            weight: 0.0,
            mandatory: false,
        }
    }

    /// Amount carried by the action's balance filter
    pub fn units(&self) -> rust_decimal::Decimal {
        self.filter.value.unwrap_or_default()
    }
}

/// Ordered, weighted set of actions executed together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionGroup {
    pub tenant: String,
    pub name: String,
    pub actions: Vec<Action>,
}

impl ActionGroup {
    /// Actions in execution order: ascending weight, stable
    pub fn sorted_actions(&self) -> Vec<&Action> {
        let mut actions: Vec<&Action> = self.actions.iter().collect();
        actions.sort_by(|a, b| {
            a.weight
                .partial_cmp(&b.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        actions
    }
}

/// Pairing of a timing spec with an action group inside a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionTiming {
    pub uuid: Uuid,
    pub actions_id: String,
    #[serde(default)]
    pub timing: Option<TimingSpec>,
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub last_executed: Option<chrono::DateTime<chrono::Utc>>,
}

impl ActionTiming {
    pub fn new(actions_id: &str, timing: TimingSpec) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            actions_id: actions_id.to_string(),
            timing: Some(timing),
            weight: 0.0,
            last_executed: None,
        }
    }

    pub fn is_asap(&self) -> bool {
        self.timing.as_ref().map_or(false, |t| t.asap)
    }

    pub fn next_start(
        &self,
        after: chrono::DateTime<chrono::Utc>,
    ) -> Option<chrono::DateTime<chrono::Utc>> {
        self.timing.as_ref().and_then(|t| t.next_start(after))
    }
}

/// Named set of action timings under a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub tenant: String,
    pub name: String,
    pub timings: Vec<ActionTiming>,
}

/// Binds an account to an action plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPlanBinding {
    pub tenant: String,
    pub account: String,
    pub action_plan: String,
}

/// One-shot ASAP work item drained by the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub uuid: Uuid,
    pub tenant: String,
    pub account_id: String,
    pub actions_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_group_runs_in_ascending_weight() {
        let mut group = ActionGroup {
            tenant: "cgrates.org".to_string(),
            name: "AG1".to_string(),
            actions: vec![],
        };
        for (name, weight) in [("c", 30.0), ("a", 10.0), ("b", 20.0)] {
            let mut action = Action::new(TOPUP);
            action.filter.id = Some(name.to_string());
            action.weight = weight;
            group.actions.push(action);
        }
        let order: Vec<String> = group
            .sorted_actions()
            .iter()
            .map(|a| a.filter.id.clone().unwrap())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_action_units_come_from_filter() {
        let mut action = Action::new(TOPUP_RESET);
        action.tor = Some(BalanceType::Voice);
        action.filter.value = Some(dec!(40));
        assert_eq!(action.units(), dec!(40));
    }

    #[test]
    fn test_asap_timing() {
        let at = ActionTiming::new("TOPUP10_AC", TimingSpec::asap());
        assert!(at.is_asap());
        assert_eq!(at.next_start(chrono::Utc::now()), None);
    }
}
