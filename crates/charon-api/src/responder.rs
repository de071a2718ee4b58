//! Responder: the method surface behind the RPC envelope

use crate::dto::{
    AttrAccount, AttrBalance, AttrExecute, AttrRemoveActionPlan, AttrRemoveActionTiming,
};
use charon_core::error::{AppError, AppResult};
use charon_core::models::{action, Account, Action, CallDescriptor, Task};
use charon_engine::{ActionExecutor, Context, Debiter};
use charon_scheduler::{replay, ReloadReason, SchedulerHandle};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

pub struct Responder {
    ctx: Arc<Context>,
    executor: Arc<ActionExecutor>,
    debiter: Debiter,
    scheduler: SchedulerHandle,
}

impl Responder {
    pub fn new(
        ctx: Arc<Context>,
        executor: Arc<ActionExecutor>,
        scheduler: SchedulerHandle,
    ) -> Arc<Self> {
        let debiter = Debiter::new(ctx.clone(), executor.clone());
        Arc::new(Self {
            ctx,
            executor,
            debiter,
            scheduler,
        })
    }

    /// Route one envelope to its method implementation
    #[instrument(skip(self, params))]
    pub async fn dispatch(&self, method: &str, params: Value) -> AppResult<Value> {
        match method {
            "Responder.GetCost" => {
                let cd: CallDescriptor = parse(params)?;
                let cc = self.ctx.calculator.price(&cd).await?;
                Ok(json!({"cost": cc.cost(), "call_cost": cc}))
            }
            "Responder.Debit" => {
                let cd: CallDescriptor = parse(params)?;
                let cc = self.debiter.debit(&cd).await?;
                Ok(json!({"cost": cc.cost(), "call_cost": cc}))
            }
            "Responder.MaxDebit" => {
                let cd: CallDescriptor = parse(params)?;
                let cc = self.debiter.max_debit(&cd).await?;
                Ok(json!({"cost": cc.cost(), "call_cost": cc}))
            }
            "Responder.GetMaxSessionTime" => {
                let cd: CallDescriptor = parse(params)?;
                let seconds = self.debiter.get_max_session_time(&cd).await?;
                Ok(json!(seconds))
            }
            "Account.Get" => {
                let attrs: AttrAccount = parse(params)?;
                let account = self
                    .ctx
                    .accounting
                    .get_account(&attrs.tenant, &attrs.account)
                    .await?
                    .ok_or_else(|| {
                        AppError::NotFound(format!("{}:{}", attrs.tenant, attrs.account))
                    })?;
                let summary = account.as_summary();
                Ok(json!({
                    "account": account,
                    "summary": summary,
                }))
            }
            "Account.Set" => self.set_account(parse(params)?).await,
            "Account.Remove" => {
                let attrs: AttrAccount = parse(params)?;
                let removed = self
                    .ctx
                    .accounting
                    .remove_account(&attrs.tenant, &attrs.account)
                    .await?;
                if !removed {
                    return Err(AppError::NotFound(format!(
                        "{}:{}",
                        attrs.tenant, attrs.account
                    )));
                }
                Ok(json!("OK"))
            }
            "Balance.Add" => self.balance_action(parse(params)?, action::TOPUP).await,
            "Balance.Debit" => self.balance_action(parse(params)?, action::DEBIT).await,
            "Balance.Set" => self.balance_action(parse(params)?, action::SET_BALANCE).await,
            "Balance.Remove" => {
                self.balance_action(parse(params)?, action::REMOVE_BALANCE)
                    .await
            }
            "ActionPlan.Remove" => {
                let attrs: AttrRemoveActionPlan = parse(params)?;
                let removed = self
                    .ctx
                    .tariff
                    .remove_action_plan(&attrs.tenant, &attrs.action_plan)
                    .await?;
                if !removed {
                    return Err(AppError::NotFound(attrs.action_plan));
                }
                self.scheduler.reload(ReloadReason::Api);
                Ok(json!("OK"))
            }
            "ActionTiming.Remove" => {
                let attrs: AttrRemoveActionTiming = parse(params)?;
                let removed = self
                    .ctx
                    .tariff
                    .remove_action_timing(&attrs.tenant, &attrs.action_plan, attrs.timing_uuid)
                    .await?;
                if !removed {
                    return Err(AppError::NotFound(attrs.timing_uuid.to_string()));
                }
                self.scheduler.reload(ReloadReason::Api);
                Ok(json!("OK"))
            }
            "Scheduler.Reload" => {
                self.scheduler.reload(ReloadReason::Api);
                Ok(json!("OK"))
            }
            "Scheduler.Execute" => {
                let attrs: AttrExecute = parse(params)?;
                let executed = replay(
                    &self.ctx,
                    &self.executor,
                    &attrs.tenant,
                    attrs.action_plan.as_deref(),
                    attrs.time_start,
                    attrs.time_end,
                )
                .await?;
                Ok(json!({"executed": executed}))
            }
            other => Err(AppError::NotFound(format!("method {}", other))),
        }
    }

    /// Create or patch an account; binding an action plan also enqueues
    /// its ASAP timings as tasks and wakes the scheduler
    async fn set_account(&self, attrs: crate::dto::AttrSetAccount) -> AppResult<Value> {
        let mut account = self
            .ctx
            .accounting
            .get_account(&attrs.tenant, &attrs.account)
            .await?
            .unwrap_or_else(|| Account::new(&attrs.tenant, &attrs.account));
        if let Some(allow_negative) = attrs.allow_negative {
            account.allow_negative = allow_negative;
        }
        if let Some(disabled) = attrs.disabled {
            account.disabled = disabled;
        }
        if let Some(trigger_ids) = attrs.trigger_ids {
            account.trigger_ids = trigger_ids;
        }
        account.update_time = Some(chrono::Utc::now());
        self.ctx.accounting.set_account(&account).await?;

        if let Some(plan_name) = attrs.action_plan {
            let plan = self
                .ctx
                .tariff
                .action_plan(&attrs.tenant, &plan_name)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("action plan {}", plan_name)))?;
            self.ctx
                .tariff
                .set_binding(charon_core::models::ActionPlanBinding {
                    tenant: attrs.tenant.clone(),
                    account: attrs.account.clone(),
                    action_plan: plan_name.clone(),
                })
                .await?;
            // ASAP timings fire once, through the task queue
            for timing in plan.timings.iter().filter(|t| t.is_asap()) {
                self.ctx
                    .tariff
                    .push_task(Task {
                        uuid: Uuid::new_v4(),
                        tenant: attrs.tenant.clone(),
                        account_id: attrs.account.clone(),
                        actions_id: timing.actions_id.clone(),
                    })
                    .await?;
            }
            info!(account = %attrs.account, plan = %plan_name, "account bound to action plan");
            self.scheduler.reload(ReloadReason::Api);
        }
        Ok(json!("OK"))
    }

    async fn balance_action(&self, attrs: AttrBalance, action_type: &str) -> AppResult<Value> {
        let mut act = Action::new(action_type);
        act.tor = Some(attrs.balance_type);
        act.filter = attrs.filter;
        if let Some(value) = attrs.value {
            act.filter.value = Some(value);
        }
        self.debiter
            .apply_account_action(&attrs.tenant, &attrs.account, act)
            .await?;
        Ok(json!("OK"))
    }
}

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> AppResult<T> {
    serde_json::from_value(params)
        .map_err(|e| AppError::MandatoryFieldMissing(format!("invalid params: {}", e)))
}
