//! Action executor
//!
//! Registry of named action handlers. Grouped actions run in ascending
//! weight; exec-filters gate each action against the account; a failing
//! mandatory action aborts the remainder of its group.

use crate::context::Context;
use crate::triggers;
use charon_core::error::{AppError, AppResult};
use charon_core::expr;
use charon_core::models::{
    action, Account, Action, ActionGroup, ActionTiming, Balance, BalanceType, CallCost, Cdr, Task,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// What the caller has to do with the account after a group ran
#[derive(Debug, Default, Clone, Copy)]
pub struct GroupOutcome {
    pub remove_account: bool,
}

pub struct ActionExecutor {
    ctx: Arc<Context>,
}

impl ActionExecutor {
    pub fn new(ctx: Arc<Context>) -> Arc<Self> {
        Arc::new(Self { ctx })
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Run a group against an account already held under the guardian
    pub async fn execute_group_on_account(
        &self,
        account: &mut Account,
        group: &ActionGroup,
        call_cost: Option<&CallCost>,
    ) -> AppResult<GroupOutcome> {
        let mut outcome = GroupOutcome::default();
        for act in group.sorted_actions() {
            if let Some(src) = &act.exec_filter {
                let gate = expr::compile(src)?;
                if !expr::account_matches(&gate, account) {
                    continue;
                }
            }
            match self.apply(account, act, group, call_cost).await {
                Ok(removed) => outcome.remove_account |= removed,
                Err(err) => {
                    error!(
                        action = %act.action_type,
                        account = %account.full_id(),
                        %err,
                        "action failed"
                    );
                    if act.mandatory {
                        return Err(AppError::ActionGroupAborted(format!(
                            "{} in group {}",
                            act.action_type, group.name
                        )));
                    }
                }
            }
        }
        Ok(outcome)
    }

    async fn apply(
        &self,
        account: &mut Account,
        act: &Action,
        group: &ActionGroup,
        _call_cost: Option<&CallCost>,
    ) -> AppResult<bool> {
        match act.action_type.as_str() {
            action::LOG => {
                let snapshot = serde_json::to_string(&account.as_summary())?;
                info!(action = "*log", account = %snapshot, "account state");
            }
            action::CDRLOG => self.cdr_log(account, group).await?,
            action::RESET_TRIGGERS => {
                for record in account.trigger_records.values_mut() {
                    record.executed = false;
                }
            }
            action::SET_RECURRENT => set_recurrent(account, true),
            action::UNSET_RECURRENT => set_recurrent(account, false),
            action::ALLOW_NEGATIVE => account.allow_negative = true,
            action::DENY_NEGATIVE => account.allow_negative = false,
            action::RESET_ACCOUNT => {
                for list in account.balances.values_mut() {
                    for balance in list.iter_mut() {
                        balance.value = Decimal::ZERO;
                    }
                }
                for record in account.trigger_records.values_mut() {
                    record.executed = false;
                }
                account.reset_counters();
            }
            action::REMOVE_ACCOUNT => return Ok(true),
            action::ENABLE_ACCOUNT => account.disabled = false,
            action::DISABLE_ACCOUNT => account.disabled = true,
            action::SET_BALANCE => self.set_balance(account, act).await?,
            action::REMOVE_BALANCE => remove_balance(account, act),
            action::TOPUP => self.topup(account, act, false).await?,
            action::TOPUP_RESET => self.topup(account, act, true).await?,
            action::DEBIT => debit_balance(account, act, false)?,
            action::DEBIT_RESET => debit_balance(account, act, true)?,
            action::RESET_COUNTERS => account.reset_counters(),
            action::CALL_URL => self.call_url(account, act).await?,
            action::CALL_URL_ASYNC => self.call_url_async(account, act),
            action::MAIL_ASYNC => self.mail_async(account, act),
            other => {
                return Err(AppError::NotFound(format!("action handler {}", other)));
            }
        }
        Ok(false)
    }

    /// Credit balances selected by the filter; `reset` overwrites instead
    /// of adding. Creates the balance on miss.
    async fn topup(&self, account: &mut Account, act: &Action, reset: bool) -> AppResult<()> {
        let tor = act
            .tor
            .ok_or_else(|| AppError::MandatoryFieldMissing("tor".to_string()))?;
        let amount = act.units();
        let now = Utc::now();
        let mut found = false;
        if let Some(list) = account.balances.get_mut(&tor) {
            for balance in list.iter_mut() {
                if balance.is_expired_at(now) {
                    continue;
                }
                if act.filter.matches(balance) {
                    if reset {
                        balance.value = Decimal::ZERO;
                    }
                    balance.add_value(amount);
                    found = true;
                }
            }
        }
        if !found {
            let mut balance = act.filter.as_balance();
            balance.value = amount;
            self.register_shared_groups(account, &balance).await?;
            account.add_balance(tor, balance);
        }
        account.count_units(tor, amount);
        account.sort_balances();
        Ok(())
    }

    /// Overwrite attributes of the first matched balance; create on miss
    async fn set_balance(&self, account: &mut Account, act: &Action) -> AppResult<()> {
        let tor = act
            .tor
            .ok_or_else(|| AppError::MandatoryFieldMissing("tor".to_string()))?;
        let now = Utc::now();
        let position = account.balances.get(&tor).and_then(|list| {
            list.iter()
                .position(|b| !b.is_expired_at(now) && act.filter.matches(b))
        });
        let snapshot = match position {
            Some(index) => {
                let list = account.balances.get_mut(&tor).expect("list just probed");
                act.filter.apply_to(&mut list[index]);
                list[index].clone()
            }
            None => {
                let balance = act.filter.as_balance();
                account.add_balance(tor, balance.clone());
                balance
            }
        };
        self.register_shared_groups(account, &snapshot).await?;
        account.sort_balances();
        Ok(())
    }

    /// Keep the shared-group back-index in step with balance membership
    async fn register_shared_groups(&self, account: &Account, balance: &Balance) -> AppResult<()> {
        for group_name in &balance.shared_groups {
            match self.ctx.tariff.shared_group(&account.tenant, group_name).await? {
                Some(mut group) => {
                    if !group.member_ids.iter().any(|m| m == &account.name) {
                        group.add_member(&account.name);
                        self.ctx.tariff.set_shared_group(group).await?;
                    }
                }
                None => warn!(group = %group_name, "balance references missing shared group"),
            }
        }
        Ok(())
    }

    async fn cdr_log(&self, account: &Account, group: &ActionGroup) -> AppResult<()> {
        let now = Utc::now();
        for act in &group.actions {
            let chargeable = matches!(
                act.action_type.as_str(),
                action::TOPUP | action::TOPUP_RESET | action::DEBIT | action::DEBIT_RESET
            );
            if !chargeable {
                continue;
            }
            let cdr = Cdr {
                origin_id: Uuid::new_v4().to_string(),
                run_id: act.action_type.clone(),
                source: action::CDRLOG.to_string(),
                tenant: account.tenant.clone(),
                category: String::new(),
                account: account.name.clone(),
                subject: account.name.clone(),
                destination: String::new(),
                tor: act.tor.unwrap_or(BalanceType::Monetary),
                setup_time: now,
                answer_time: now,
                usage: Duration::ZERO,
                cost: act.units(),
                extra_fields: Default::default(),
            };
            self.ctx.cdrs.set_cdr(cdr).await?;
        }
        Ok(())
    }

    fn action_url(act: &Action) -> AppResult<String> {
        match &act.params {
            serde_json::Value::String(url) => Ok(url.clone()),
            serde_json::Value::Object(map) => map
                .get("url")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| AppError::MandatoryFieldMissing("params.url".to_string())),
            _ => Err(AppError::MandatoryFieldMissing("params.url".to_string())),
        }
    }

    /// POST the account snapshot to the configured URL, blocking the group
    async fn call_url(&self, account: &Account, act: &Action) -> AppResult<()> {
        let url = Self::action_url(act)?;
        let payload = serde_json::to_value(account.as_summary())?;
        self.ctx
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::ServerError(format!("call_url {}: {}", url, e)))?;
        Ok(())
    }

    /// Fire-and-forget variant; failures are logged, never reported
    fn call_url_async(&self, account: &Account, act: &Action) {
        let Ok(url) = Self::action_url(act) else {
            warn!("call_url_async without url parameter");
            return;
        };
        let Ok(payload) = serde_json::to_value(account.as_summary()) else {
            return;
        };
        let client = self.ctx.http.clone();
        tokio::spawn(async move {
            if let Err(err) = client.post(&url).json(&payload).send().await {
                warn!(%url, %err, "call_url_async failed");
            }
        });
    }

    fn mail_async(&self, account: &Account, act: &Action) {
        let to: Vec<String> = act
            .params
            .get("to")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        if to.is_empty() {
            warn!("mail_async without recipients");
            return;
        }
        let subject = format!("account update {}", account.full_id());
        let body = serde_json::to_string(&account.as_summary()).unwrap_or_default();
        let mailer = self.ctx.mailer.clone();
        tokio::spawn(async move {
            if let Err(err) = mailer.send(&to, &subject, &body).await {
                warn!(%err, "mail_async failed");
            }
        });
    }

    /// Execute a timing's action group against every bound account
    #[instrument(skip(self, timing), fields(actions = %timing.actions_id))]
    pub async fn execute_timing(
        &self,
        tenant: &str,
        plan_name: &str,
        timing: &ActionTiming,
    ) -> AppResult<()> {
        let bindings = self.ctx.tariff.bindings_for_plan(tenant, plan_name).await?;
        if bindings.is_empty() {
            warn!(tenant, plan = %plan_name, "action timing has no bound accounts");
            return Ok(());
        }
        let mut last_err = None;
        for binding in bindings {
            if let Err(err) = self
                .execute_for_account(&binding.tenant, &binding.account, &timing.actions_id)
                .await
            {
                error!(
                    account = %binding.account,
                    actions = %timing.actions_id,
                    %err,
                    "scheduled action failed"
                );
                last_err = Some(err);
            }
        }
        match last_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Execute one ASAP task
    pub async fn execute_task(&self, task: &Task) -> AppResult<()> {
        self.execute_for_account(&task.tenant, &task.account_id, &task.actions_id)
            .await
    }

    /// Load, mutate and persist a single account under the guardian
    pub async fn execute_for_account(
        &self,
        tenant: &str,
        account_name: &str,
        actions_id: &str,
    ) -> AppResult<()> {
        let group = self
            .ctx
            .tariff
            .action_group(tenant, actions_id)
            .await?
            .ok_or_else(|| AppError::BrokenReference(format!("action group {}", actions_id)))?;

        let key = charon_core::models::concat_key(&[tenant, account_name]);
        let token = self.ctx.guardian.next_token();
        let _guard = self.ctx.guardian.acquire(&key, token).await?;

        let mut account = self
            .ctx
            .accounting
            .get_account(tenant, account_name)
            .await?
            .ok_or_else(|| AppError::NotFound(key.clone()))?;

        let outcome = self
            .execute_group_on_account(&mut account, &group, None)
            .await?;

        let mut passes = 0;
        triggers::run_triggers(
            self,
            &mut account,
            &mut passes,
            self.ctx.config.accounting.trigger_depth_max,
        )
        .await?;

        if outcome.remove_account {
            self.ctx.accounting.remove_account(tenant, account_name).await?;
        } else {
            account.update_time = Some(Utc::now());
            self.ctx.accounting.set_account(&account).await?;
        }
        Ok(())
    }
}

fn set_recurrent(account: &mut Account, recurrent: bool) {
    for record in account.trigger_records.values_mut() {
        record.recurrent = recurrent;
    }
}

fn remove_balance(account: &mut Account, act: &Action) {
    match act.tor {
        Some(tor) => {
            if let Some(list) = account.balances.get_mut(&tor) {
                list.retain(|b| !act.filter.matches(b));
            }
        }
        None => {
            for list in account.balances.values_mut() {
                list.retain(|b| !act.filter.matches(b));
            }
        }
    }
    account.balances.retain(|_, list| !list.is_empty());
}

/// Debit balances selected by the filter; `reset` floors the result at
/// zero. Creates a negative balance on miss for plain debits.
fn debit_balance(account: &mut Account, act: &Action, reset: bool) -> AppResult<()> {
    let tor = act
        .tor
        .ok_or_else(|| AppError::MandatoryFieldMissing("tor".to_string()))?;
    let amount = act.units();
    let now = Utc::now();
    let mut found = false;
    if let Some(list) = account.balances.get_mut(&tor) {
        for balance in list.iter_mut() {
            if balance.is_expired_at(now) {
                continue;
            }
            if act.filter.matches(balance) {
                balance.sub_value(amount);
                if reset && balance.value < Decimal::ZERO {
                    balance.value = Decimal::ZERO;
                }
                found = true;
            }
        }
    }
    if !found {
        let mut balance = act.filter.as_balance();
        balance.value = if reset { Decimal::ZERO } else { -amount };
        account.add_balance(tor, balance);
    }
    account.count_units(tor, amount);
    account.sort_balances();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use charon_core::models::BalanceFilter;
    use rust_decimal_macros::dec;

    #[test]
    fn test_debit_balance_floors_on_reset() {
        let mut account = Account::new("cgrates.org", "1001");
        account.add_balance(
            BalanceType::Monetary,
            Balance {
                id: "m".to_string(),
                value: dec!(3),
                ..Balance::default()
            },
        );
        let mut act = Action::new(action::DEBIT_RESET);
        act.tor = Some(BalanceType::Monetary);
        act.filter = BalanceFilter {
            id: Some("m".to_string()),
            value: Some(dec!(10)),
            ..BalanceFilter::default()
        };
        debit_balance(&mut account, &act, true).unwrap();
        assert_eq!(account.balances[&BalanceType::Monetary][0].value, dec!(0));
    }

    #[test]
    fn test_debit_creates_negative_balance_on_miss() {
        let mut account = Account::new("cgrates.org", "1001");
        let mut act = Action::new(action::DEBIT);
        act.tor = Some(BalanceType::Monetary);
        act.filter = BalanceFilter {
            id: Some("m".to_string()),
            value: Some(dec!(5)),
            ..BalanceFilter::default()
        };
        debit_balance(&mut account, &act, false).unwrap();
        assert_eq!(account.balances[&BalanceType::Monetary][0].value, dec!(-5));
    }

    #[test]
    fn test_remove_balance_by_filter() {
        let mut account = Account::new("cgrates.org", "1001");
        account.add_balance(
            BalanceType::Voice,
            Balance {
                id: "keep".to_string(),
                value: dec!(10),
                ..Balance::default()
            },
        );
        account.add_balance(
            BalanceType::Voice,
            Balance {
                id: "drop".to_string(),
                value: dec!(10),
                ..Balance::default()
            },
        );
        let mut act = Action::new(action::REMOVE_BALANCE);
        act.tor = Some(BalanceType::Voice);
        act.filter = BalanceFilter::with_id("drop");
        remove_balance(&mut account, &act);
        let list = &account.balances[&BalanceType::Voice];
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "keep");
    }
}
