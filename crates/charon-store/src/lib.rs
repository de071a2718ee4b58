//! In-memory storage backends
//!
//! Map-backed implementations of the three storage traits plus a logging
//! mail sink. The demo binary and every test suite run on these;
//! persistent drivers live outside the core.

use async_trait::async_trait;
use charon_core::error::{AppError, AppResult};
use charon_core::models::{
    concat_key, Account, ActionGroup, ActionPlan, ActionPlanBinding, ActionTriggerGroup, Cdr,
    CdrFilter, Destination, RatingPlan, RatingProfile, SharedGroup, SimpleAccount, SmCost, Task,
};
use charon_core::traits::{AccountingStore, CdrStore, Mailer, TariffPlanStore};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use tracing::info;

#[derive(Default)]
struct TariffData {
    destinations: Vec<Destination>,
    rating_plans: HashMap<String, RatingPlan>,
    rating_profiles: HashMap<String, RatingProfile>,
    action_groups: HashMap<String, ActionGroup>,
    action_plans: HashMap<String, ActionPlan>,
    bindings: Vec<ActionPlanBinding>,
    trigger_groups: HashMap<String, ActionTriggerGroup>,
    shared_groups: HashMap<String, SharedGroup>,
    tasks: VecDeque<Task>,
}

/// Map-backed tariff-plan store
#[derive(Default)]
pub struct MemTariffStore {
    data: RwLock<TariffData>,
}

impl MemTariffStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_destination(&self, destination: Destination) {
        self.data.write().destinations.push(destination);
    }

    pub fn add_rating_plan(&self, plan: RatingPlan) {
        let key = concat_key(&[&plan.tenant, &plan.name]);
        self.data.write().rating_plans.insert(key, plan);
    }

    pub fn add_rating_profile(&self, profile: RatingProfile) {
        let key = profile.full_id();
        self.data.write().rating_profiles.insert(key, profile);
    }

    pub fn add_action_group(&self, group: ActionGroup) {
        let key = concat_key(&[&group.tenant, &group.name]);
        self.data.write().action_groups.insert(key, group);
    }

    pub fn add_action_plan(&self, plan: ActionPlan) {
        let key = concat_key(&[&plan.tenant, &plan.name]);
        self.data.write().action_plans.insert(key, plan);
    }

    pub fn add_trigger_group(&self, group: ActionTriggerGroup) {
        let key = concat_key(&[&group.tenant, &group.name]);
        self.data.write().trigger_groups.insert(key, group);
    }

    pub fn add_shared_group(&self, group: SharedGroup) {
        let key = concat_key(&[&group.tenant, &group.name]);
        self.data.write().shared_groups.insert(key, group);
    }

    pub fn pending_tasks(&self) -> usize {
        self.data.read().tasks.len()
    }
}

#[async_trait]
impl TariffPlanStore for MemTariffStore {
    async fn destinations(&self, tenant: &str) -> AppResult<Vec<Destination>> {
        Ok(self
            .data
            .read()
            .destinations
            .iter()
            .filter(|d| d.tenant == tenant)
            .cloned()
            .collect())
    }

    async fn rating_plan(&self, tenant: &str, name: &str) -> AppResult<Option<RatingPlan>> {
        Ok(self
            .data
            .read()
            .rating_plans
            .get(&concat_key(&[tenant, name]))
            .cloned())
    }

    async fn rating_profile(
        &self,
        direction: &str,
        tenant: &str,
        category: &str,
        subject: &str,
    ) -> AppResult<Option<RatingProfile>> {
        let key = concat_key(&[direction, tenant, category, subject]);
        Ok(self.data.read().rating_profiles.get(&key).cloned())
    }

    async fn action_group(&self, tenant: &str, name: &str) -> AppResult<Option<ActionGroup>> {
        Ok(self
            .data
            .read()
            .action_groups
            .get(&concat_key(&[tenant, name]))
            .cloned())
    }

    async fn action_plans(&self) -> AppResult<Vec<ActionPlan>> {
        Ok(self.data.read().action_plans.values().cloned().collect())
    }

    async fn action_plan(&self, tenant: &str, name: &str) -> AppResult<Option<ActionPlan>> {
        Ok(self
            .data
            .read()
            .action_plans
            .get(&concat_key(&[tenant, name]))
            .cloned())
    }

    async fn remove_action_plan(&self, tenant: &str, name: &str) -> AppResult<bool> {
        let key = concat_key(&[tenant, name]);
        let mut data = self.data.write();
        data.bindings
            .retain(|b| !(b.tenant == tenant && b.action_plan == name));
        Ok(data.action_plans.remove(&key).is_some())
    }

    async fn remove_action_timing(
        &self,
        tenant: &str,
        plan: &str,
        timing_uuid: uuid::Uuid,
    ) -> AppResult<bool> {
        let key = concat_key(&[tenant, plan]);
        let mut data = self.data.write();
        let Some(plan) = data.action_plans.get_mut(&key) else {
            return Ok(false);
        };
        let before = plan.timings.len();
        plan.timings.retain(|t| t.uuid != timing_uuid);
        Ok(plan.timings.len() != before)
    }

    async fn bindings_for_plan(
        &self,
        tenant: &str,
        plan: &str,
    ) -> AppResult<Vec<ActionPlanBinding>> {
        Ok(self
            .data
            .read()
            .bindings
            .iter()
            .filter(|b| b.tenant == tenant && b.action_plan == plan)
            .cloned()
            .collect())
    }

    async fn set_binding(&self, binding: ActionPlanBinding) -> AppResult<()> {
        let mut data = self.data.write();
        if !data.bindings.contains(&binding) {
            data.bindings.push(binding);
        }
        Ok(())
    }

    async fn trigger_group(
        &self,
        tenant: &str,
        name: &str,
    ) -> AppResult<Option<ActionTriggerGroup>> {
        Ok(self
            .data
            .read()
            .trigger_groups
            .get(&concat_key(&[tenant, name]))
            .cloned())
    }

    async fn shared_group(&self, tenant: &str, name: &str) -> AppResult<Option<SharedGroup>> {
        Ok(self
            .data
            .read()
            .shared_groups
            .get(&concat_key(&[tenant, name]))
            .cloned())
    }

    async fn set_shared_group(&self, group: SharedGroup) -> AppResult<()> {
        let key = concat_key(&[&group.tenant, &group.name]);
        self.data.write().shared_groups.insert(key, group);
        Ok(())
    }

    async fn push_task(&self, task: Task) -> AppResult<()> {
        self.data.write().tasks.push_back(task);
        Ok(())
    }

    async fn pop_task(&self) -> AppResult<Option<Task>> {
        Ok(self.data.write().tasks.pop_front())
    }

    async fn remove_tenant(&self, tenant: &str) -> AppResult<()> {
        let prefix = format!("{}:", tenant);
        let mut data = self.data.write();
        data.destinations.retain(|d| d.tenant != tenant);
        data.rating_plans.retain(|k, _| !k.starts_with(&prefix));
        data.rating_profiles
            .retain(|_, p| p.tenant != tenant);
        data.action_groups.retain(|k, _| !k.starts_with(&prefix));
        data.action_plans.retain(|k, _| !k.starts_with(&prefix));
        data.bindings.retain(|b| b.tenant != tenant);
        data.trigger_groups.retain(|k, _| !k.starts_with(&prefix));
        data.shared_groups.retain(|k, _| !k.starts_with(&prefix));
        Ok(())
    }

    async fn flush(&self) -> AppResult<()> {
        *self.data.write() = TariffData::default();
        Ok(())
    }
}

/// Map-backed accounting store
#[derive(Default)]
pub struct MemAccountingStore {
    accounts: RwLock<HashMap<String, Account>>,
    simple_accounts: RwLock<HashMap<String, SimpleAccount>>,
}

impl MemAccountingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountingStore for MemAccountingStore {
    async fn get_account(&self, tenant: &str, name: &str) -> AppResult<Option<Account>> {
        Ok(self
            .accounts
            .read()
            .get(&concat_key(&[tenant, name]))
            .cloned())
    }

    async fn set_account(&self, account: &Account) -> AppResult<()> {
        self.accounts
            .write()
            .insert(account.full_id(), account.clone());
        Ok(())
    }

    async fn remove_account(&self, tenant: &str, name: &str) -> AppResult<bool> {
        Ok(self
            .accounts
            .write()
            .remove(&concat_key(&[tenant, name]))
            .is_some())
    }

    async fn new_simple_account(&self, account: SimpleAccount) -> AppResult<()> {
        let key = concat_key(&[&account.tenant, &account.name]);
        self.simple_accounts.write().insert(key, account);
        Ok(())
    }

    async fn get_simple_account(
        &self,
        tenant: &str,
        name: &str,
    ) -> AppResult<Option<SimpleAccount>> {
        Ok(self
            .simple_accounts
            .read()
            .get(&concat_key(&[tenant, name]))
            .cloned())
    }

    async fn set_max_balance(
        &self,
        tenant: &str,
        name: &str,
        max_balance: Option<Decimal>,
    ) -> AppResult<()> {
        let key = concat_key(&[tenant, name]);
        let mut accounts = self.simple_accounts.write();
        let account = accounts
            .get_mut(&key)
            .ok_or_else(|| AppError::NotFound(key.clone()))?;
        account.max_balance = max_balance;
        Ok(())
    }

    async fn debit_simple(&self, tenant: &str, name: &str, amount: Decimal) -> AppResult<Decimal> {
        let key = concat_key(&[tenant, name]);
        let mut accounts = self.simple_accounts.write();
        let account = accounts
            .get_mut(&key)
            .ok_or_else(|| AppError::NotFound(key.clone()))?;
        if account.disabled {
            return Err(AppError::AccountDisabled(key));
        }
        if account.balance < amount {
            return Err(AppError::InsufficientCredit {
                required: amount.to_string(),
                available: account.balance.to_string(),
            });
        }
        account.balance -= amount;
        Ok(account.balance)
    }

    async fn set_simple_value(&self, tenant: &str, name: &str, value: Decimal) -> AppResult<()> {
        let key = concat_key(&[tenant, name]);
        let mut accounts = self.simple_accounts.write();
        let account = accounts
            .get_mut(&key)
            .ok_or_else(|| AppError::NotFound(key.clone()))?;
        account.balance = value;
        Ok(())
    }
}

/// Map-backed CDR store
#[derive(Default)]
pub struct MemCdrStore {
    cdrs: RwLock<Vec<Cdr>>,
    sm_costs: RwLock<Vec<SmCost>>,
}

impl MemCdrStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CdrStore for MemCdrStore {
    async fn set_cdr(&self, cdr: Cdr) -> AppResult<()> {
        self.cdrs.write().push(cdr);
        Ok(())
    }

    async fn get_cdrs(&self, filter: &CdrFilter) -> AppResult<Vec<Cdr>> {
        Ok(self
            .cdrs
            .read()
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }

    async fn set_sm_cost(&self, cost: SmCost) -> AppResult<()> {
        self.sm_costs.write().push(cost);
        Ok(())
    }

    async fn get_sm_costs(&self, cgr_id: &str) -> AppResult<Vec<SmCost>> {
        Ok(self
            .sm_costs
            .read()
            .iter()
            .filter(|c| c.cgr_id == cgr_id)
            .cloned()
            .collect())
    }
}

/// Mail sink that only logs; stands in for a real SMTP transport
#[derive(Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &[String], subject: &str, _body: &str) -> AppResult<()> {
        info!(recipients = ?to, %subject, "mail sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_account_round_trip() {
        let store = MemAccountingStore::new();
        let account = Account::new("cgrates.org", "1001");
        store.set_account(&account).await.unwrap();
        let loaded = store.get_account("cgrates.org", "1001").await.unwrap();
        assert_eq!(loaded, Some(account));
        assert!(store.remove_account("cgrates.org", "1001").await.unwrap());
        assert!(store
            .get_account("cgrates.org", "1001")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_task_fifo_pop_is_destructive() {
        let store = MemTariffStore::new();
        for n in 0..3 {
            store
                .push_task(Task {
                    uuid: Uuid::new_v4(),
                    tenant: "cgrates.org".to_string(),
                    account_id: format!("100{}", n),
                    actions_id: "AG".to_string(),
                })
                .await
                .unwrap();
        }
        let first = store.pop_task().await.unwrap().unwrap();
        assert_eq!(first.account_id, "1000");
        assert_eq!(store.pending_tasks(), 2);
    }

    #[tokio::test]
    async fn test_simple_account_fast_path() {
        let store = MemAccountingStore::new();
        let mut acc = SimpleAccount::new("cgrates.org", "s1");
        acc.balance = dec!(10);
        store.new_simple_account(acc).await.unwrap();

        let left = store.debit_simple("cgrates.org", "s1", dec!(4)).await.unwrap();
        assert_eq!(left, dec!(6));

        let err = store
            .debit_simple("cgrates.org", "s1", dec!(100))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientCredit { .. }));

        store
            .set_simple_value("cgrates.org", "s1", dec!(50))
            .await
            .unwrap();
        let acc = store
            .get_simple_account("cgrates.org", "s1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(acc.balance, dec!(50));
    }

    #[tokio::test]
    async fn test_remove_tenant_scopes_by_prefix() {
        let store = MemTariffStore::new();
        store.add_rating_plan(RatingPlan::new("cgrates.org", "RP1"));
        store.add_rating_plan(RatingPlan::new("other.org", "RP1"));
        store.remove_tenant("cgrates.org").await.unwrap();
        assert!(store
            .rating_plan("cgrates.org", "RP1")
            .await
            .unwrap()
            .is_none());
        assert!(store.rating_plan("other.org", "RP1").await.unwrap().is_some());
    }
}
