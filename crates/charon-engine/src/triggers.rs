//! Action trigger evaluation
//!
//! After every balance mutation the engine re-walks the account's
//! triggers; predicates that flip to true fire their action group. Passes
//! are bounded so trigger/action feedback can never recurse indefinitely.

use crate::executor::ActionExecutor;
use charon_core::error::{AppError, AppResult};
use charon_core::models::{Account, ActionTrigger, ActionTriggerRecord, ThresholdType};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// Re-evaluate until no trigger fires, erroring out past `max_passes`
pub async fn run_triggers(
    executor: &ActionExecutor,
    account: &mut Account,
    passes: &mut usize,
    max_passes: usize,
) -> AppResult<()> {
    loop {
        *passes += 1;
        if *passes > max_passes {
            return Err(AppError::TriggerLoop(account.full_id()));
        }
        if !evaluate_once(executor, account).await? {
            return Ok(());
        }
    }
}

fn threshold_hit(trigger: &ActionTrigger, account: &Account) -> bool {
    let now = Utc::now();
    match trigger.threshold_type {
        ThresholdType::MinBalance | ThresholdType::MaxBalance => account
            .balances
            .get(&trigger.tor)
            .map(|list| {
                list.iter().filter(|b| trigger.filter.matches(b)).any(|b| {
                    match trigger.threshold_type {
                        ThresholdType::MinBalance => b.value <= trigger.threshold_value,
                        _ => b.value >= trigger.threshold_value,
                    }
                })
            })
            .unwrap_or(false),
        ThresholdType::MinEventCounter | ThresholdType::MaxEventCounter => {
            let counter = account
                .unit_counters
                .get(&trigger.tor)
                .copied()
                .unwrap_or(Decimal::ZERO);
            match trigger.threshold_type {
                ThresholdType::MinEventCounter => counter <= trigger.threshold_value,
                _ => counter >= trigger.threshold_value,
            }
        }
        ThresholdType::BalanceExpired => account
            .balances
            .get(&trigger.tor)
            .map(|list| {
                list.iter()
                    .filter(|b| trigger.filter.matches(b))
                    .any(|b| b.is_expired_at(now))
            })
            .unwrap_or(false),
    }
}

/// One evaluation pass; returns whether any trigger fired
async fn evaluate_once(executor: &ActionExecutor, account: &mut Account) -> AppResult<bool> {
    let now = Utc::now();
    let ctx = executor.context();

    let mut triggers: Vec<ActionTrigger> = Vec::new();
    for group_id in account.trigger_ids.clone() {
        match ctx.tariff.trigger_group(&account.tenant, &group_id).await? {
            Some(group) => triggers.extend(group.sorted_triggers().into_iter().cloned()),
            None => warn!(tenant = %account.tenant, group = %group_id, "missing trigger group"),
        }
    }
    if triggers.is_empty() {
        return Ok(false);
    }
    triggers.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // make sure every trigger has its record on the account
    for trigger in &triggers {
        account
            .trigger_records
            .entry(trigger.unique_id.clone())
            .or_insert_with(|| ActionTriggerRecord::for_trigger(trigger));
    }

    let mut fired_any = false;
    for trigger in triggers {
        if trigger.is_expired_at(now) || !trigger.is_active_at(now) {
            continue;
        }
        let record = account
            .trigger_records
            .get(&trigger.unique_id)
            .cloned()
            .unwrap_or_else(|| ActionTriggerRecord::for_trigger(&trigger));
        if record.executed && !trigger.recurrent {
            continue;
        }
        if trigger.recurrent && !record.min_sleep_elapsed(trigger.min_sleep, now) {
            continue;
        }
        if !threshold_hit(&trigger, account) {
            continue;
        }
        if account.disabled {
            debug!(account = %account.full_id(), "skipping trigger on disabled account");
            continue;
        }
        let Some(group) = ctx
            .tariff
            .action_group(&account.tenant, &trigger.actions_id)
            .await?
        else {
            warn!(actions = %trigger.actions_id, "trigger references missing action group");
            continue;
        };

        // mark executed before running, like the task queue pops first
        {
            let record = account
                .trigger_records
                .get_mut(&trigger.unique_id)
                .expect("record inserted above");
            record.executed = true;
            record.last_execution_time = Some(now);
        }
        debug!(trigger = %trigger.unique_id, actions = %trigger.actions_id, "trigger fired");
        executor
            .execute_group_on_account(account, &group, None)
            .await?;
        if trigger.recurrent {
            if let Some(record) = account.trigger_records.get_mut(&trigger.unique_id) {
                record.executed = false;
            }
        }
        fired_any = true;
    }
    Ok(fired_any)
}
