//! Storage and sink traits consumed by the core
//!
//! Three orthogonal stores (tariff plans, accounting, CDRs) plus the mail
//! sink. All are injected; the core is agnostic to the backing engine.
//! In-memory implementations live in `charon-store`.

use crate::error::AppResult;
use crate::models::{
    Account, ActionGroup, ActionPlan, ActionPlanBinding, ActionTriggerGroup, Cdr, CdrFilter,
    Destination, RatingPlan, RatingProfile, SharedGroup, SimpleAccount, SmCost, Task,
};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Read-mostly tariff-plan entities plus the ASAP task queue
#[async_trait]
pub trait TariffPlanStore: Send + Sync {
    async fn destinations(&self, tenant: &str) -> AppResult<Vec<Destination>>;

    async fn rating_plan(&self, tenant: &str, name: &str) -> AppResult<Option<RatingPlan>>;

    async fn rating_profile(
        &self,
        direction: &str,
        tenant: &str,
        category: &str,
        subject: &str,
    ) -> AppResult<Option<RatingProfile>>;

    async fn action_group(&self, tenant: &str, name: &str) -> AppResult<Option<ActionGroup>>;

    async fn action_plans(&self) -> AppResult<Vec<ActionPlan>>;

    async fn action_plan(&self, tenant: &str, name: &str) -> AppResult<Option<ActionPlan>>;

    async fn remove_action_plan(&self, tenant: &str, name: &str) -> AppResult<bool>;

    async fn remove_action_timing(
        &self,
        tenant: &str,
        plan: &str,
        timing_uuid: uuid::Uuid,
    ) -> AppResult<bool>;

    /// Accounts bound to an action plan
    async fn bindings_for_plan(
        &self,
        tenant: &str,
        plan: &str,
    ) -> AppResult<Vec<ActionPlanBinding>>;

    async fn set_binding(&self, binding: ActionPlanBinding) -> AppResult<()>;

    async fn trigger_group(&self, tenant: &str, name: &str)
        -> AppResult<Option<ActionTriggerGroup>>;

    async fn shared_group(&self, tenant: &str, name: &str) -> AppResult<Option<SharedGroup>>;

    async fn set_shared_group(&self, group: SharedGroup) -> AppResult<()>;

    /// Append to the ASAP task FIFO
    async fn push_task(&self, task: Task) -> AppResult<()>;

    /// Atomically pop the head of the ASAP task FIFO
    async fn pop_task(&self) -> AppResult<Option<Task>>;

    async fn remove_tenant(&self, tenant: &str) -> AppResult<()>;

    async fn flush(&self) -> AppResult<()>;
}

/// Account records, write-through
#[async_trait]
pub trait AccountingStore: Send + Sync {
    async fn get_account(&self, tenant: &str, name: &str) -> AppResult<Option<Account>>;

    async fn set_account(&self, account: &Account) -> AppResult<()>;

    async fn remove_account(&self, tenant: &str, name: &str) -> AppResult<bool>;

    // simple-account fast path
    async fn new_simple_account(&self, account: SimpleAccount) -> AppResult<()>;

    async fn get_simple_account(&self, tenant: &str, name: &str)
        -> AppResult<Option<SimpleAccount>>;

    async fn set_max_balance(
        &self,
        tenant: &str,
        name: &str,
        max_balance: Option<Decimal>,
    ) -> AppResult<()>;

    async fn debit_simple(&self, tenant: &str, name: &str, amount: Decimal) -> AppResult<Decimal>;

    async fn set_simple_value(&self, tenant: &str, name: &str, value: Decimal) -> AppResult<()>;
}

/// Rated CDR sink and session costs
#[async_trait]
pub trait CdrStore: Send + Sync {
    async fn set_cdr(&self, cdr: Cdr) -> AppResult<()>;

    async fn get_cdrs(&self, filter: &CdrFilter) -> AppResult<Vec<Cdr>>;

    async fn set_sm_cost(&self, cost: SmCost) -> AppResult<()>;

    async fn get_sm_costs(&self, cgr_id: &str) -> AppResult<Vec<SmCost>>;
}

/// Outbound mail sink used by `*mail_async`
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &[String], subject: &str, body: &str) -> AppResult<()>;
}
