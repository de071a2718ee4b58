//! Account debiter
//!
//! Consumes typed balances for a rated call under the per-account
//! guardian. All mutations land on shadow copies of the involved accounts
//! and are recorded in a journal; committing writes the shadows back
//! through the accounting store, rolling back is dropping them.

use crate::balances::{candidate_balances, DebitAttrs};
use crate::context::Context;
use crate::executor::ActionExecutor;
use crate::guardian::GuardianGuard;
use crate::shared_group::{order_by_strategy, SharedCandidate};
use crate::triggers::run_triggers;
use charon_core::error::{AppError, AppResult};
use charon_core::models::{
    concat_key, Account, Action, Balance, BalanceFilter, BalanceType, CallCost, CallDescriptor,
    DebitInfo, Increment, PaymentInfo, TimeSpan, ZERO_RATING_SUBJECT_PREFIX,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// One applied balance mutation; the journal is the debit's audit trail
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub account: String,
    pub balance_uuid: Uuid,
    pub delta: Decimal,
}

pub struct Debiter {
    ctx: Arc<Context>,
    executor: Arc<ActionExecutor>,
}

struct Session {
    ctx: Arc<Context>,
    executor: Arc<ActionExecutor>,
    token: u64,
    dry_run: bool,
    truncate: bool,
    main_key: String,
    call_category: String,
    call_direction: String,
    dest_matches: Vec<(String, String)>,
    shadows: HashMap<String, Account>,
    guards: Vec<GuardianGuard>,
    used: HashMap<Uuid, Decimal>,
    journal: Vec<JournalEntry>,
    trigger_passes: usize,
}

impl Debiter {
    pub fn new(ctx: Arc<Context>, executor: Arc<ActionExecutor>) -> Self {
        Self { ctx, executor }
    }

    /// Debit the full call cost; fails with `InsufficientCredit` and no
    /// observable mutation when the account cannot cover it
    #[instrument(skip(self), fields(account = %cd.account_key()))]
    pub async fn debit(&self, cd: &CallDescriptor) -> AppResult<CallCost> {
        self.debit_inner(cd, false, false).await
    }

    /// Debit as much of the call as the balances cover; the returned
    /// CallCost is truncated instead of failing on shortfall
    pub async fn max_debit(&self, cd: &CallDescriptor) -> AppResult<CallCost> {
        self.debit_inner(cd, false, true).await
    }

    /// Full selection without mutating anything
    pub async fn dry_run(&self, cd: &CallDescriptor) -> AppResult<CallCost> {
        self.debit_inner(cd, true, true).await
    }

    /// Longest affordable session in seconds; -1 means unlimited
    pub async fn get_max_session_time(&self, cd: &CallDescriptor) -> AppResult<f64> {
        let account = self
            .ctx
            .accounting
            .get_account(&cd.tenant, cd.account_name())
            .await?
            .ok_or_else(|| AppError::NotFound(cd.account_key()))?;
        if account.disabled {
            return Err(AppError::AccountDisabled(cd.account_key()));
        }
        if account.allow_negative {
            return Ok(-1.0);
        }
        let cc = self.dry_run(cd).await?;
        Ok(cc.duration().as_secs_f64())
    }

    async fn debit_inner(
        &self,
        cd: &CallDescriptor,
        dry_run: bool,
        truncate: bool,
    ) -> AppResult<CallCost> {
        let main_key = cd.account_key();
        let token = self.ctx.guardian.next_token();
        let guard = self.ctx.guardian.acquire(&main_key, token).await?;

        let account = self
            .ctx
            .accounting
            .get_account(&cd.tenant, cd.account_name())
            .await?
            .ok_or_else(|| AppError::NotFound(main_key.clone()))?;
        if account.disabled {
            return Err(AppError::AccountDisabled(main_key));
        }

        let mut session = Session {
            ctx: self.ctx.clone(),
            executor: self.executor.clone(),
            token,
            dry_run,
            truncate,
            main_key: main_key.clone(),
            call_category: cd.category.clone(),
            call_direction: cd.direction.clone(),
            dest_matches: self
                .ctx
                .destinations
                .match_number(&cd.tenant, &cd.destination)
                .into_iter()
                .map(|m| (m.dest_id, m.prefix))
                .collect(),
            shadows: HashMap::new(),
            guards: vec![guard],
            used: HashMap::new(),
            journal: Vec::new(),
            trigger_passes: 0,
        };
        session.shadows.insert(main_key.clone(), account);

        let cc = session.debit_call(cd).await?;

        if !dry_run {
            let now = Utc::now();
            // write shared shadows first, the debited account last
            let mut keys: Vec<String> = session.shadows.keys().cloned().collect();
            keys.sort_by_key(|k| k == &main_key);
            for key in keys {
                let shadow = session.shadows.get_mut(&key).expect("shadow present");
                shadow.update_time = Some(now);
                self.ctx.accounting.set_account(shadow).await?;
            }
        }
        debug!(
            entries = session.journal.len(),
            cost = %cc.cost(),
            "debit committed"
        );
        Ok(cc)
    }

    /// Sum of the values of balances matching the filter
    pub async fn get_value(
        &self,
        tenant: &str,
        account_name: &str,
        tor: BalanceType,
        filter: &BalanceFilter,
    ) -> AppResult<Decimal> {
        let account = self
            .ctx
            .accounting
            .get_account(tenant, account_name)
            .await?
            .ok_or_else(|| AppError::NotFound(concat_key(&[tenant, account_name])))?;
        Ok(account
            .balances
            .get(&tor)
            .map(|list| {
                list.iter()
                    .filter(|b| filter.matches(b))
                    .map(|b| b.value)
                    .sum()
            })
            .unwrap_or(Decimal::ZERO))
    }

    /// Run a single synthesized action (topup, debit, set, remove) against
    /// the account under the guardian, with trigger re-evaluation
    pub async fn apply_account_action(
        &self,
        tenant: &str,
        account_name: &str,
        action: Action,
    ) -> AppResult<()> {
        let group = charon_core::models::ActionGroup {
            tenant: tenant.to_string(),
            name: format!("_api_{}", action.action_type),
            actions: vec![action],
        };
        let key = concat_key(&[tenant, account_name]);
        let token = self.ctx.guardian.next_token();
        let _guard = self.ctx.guardian.acquire(&key, token).await?;
        let mut account = self
            .ctx
            .accounting
            .get_account(tenant, account_name)
            .await?
            .ok_or_else(|| AppError::NotFound(key.clone()))?;
        self.executor
            .execute_group_on_account(&mut account, &group, None)
            .await?;
        let mut passes = 0;
        run_triggers(
            &self.executor,
            &mut account,
            &mut passes,
            self.ctx.config.accounting.trigger_depth_max,
        )
        .await?;
        account.update_time = Some(Utc::now());
        self.ctx.accounting.set_account(&account).await?;
        Ok(())
    }
}

/// Duration as an exact decimal number of seconds
fn duration_units(d: Duration) -> Decimal {
    Decimal::from_i128_with_scale(d.as_nanos() as i128, 9)
}

/// `*zero1s`-style rating subjects: zero cost with the encoded increment
pub fn parse_zero_rating_subject(subject: &str) -> Option<Duration> {
    let rest = subject.strip_prefix(ZERO_RATING_SUBJECT_PREFIX)?;
    if rest.is_empty() {
        return Some(Duration::from_secs(1));
    }
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let value: u64 = rest[..digits_end].parse().ok()?;
    match &rest[digits_end..] {
        "ns" => Some(Duration::from_nanos(value)),
        "us" => Some(Duration::from_micros(value)),
        "ms" => Some(Duration::from_millis(value)),
        "" | "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        _ => None,
    }
}

/// Free-of-charge cost timeline used by zero-rated unit balances
fn zero_rated_cost(cd: &CallDescriptor, step: Duration) -> CallCost {
    let mut cc = CallCost::from_descriptor(cd);
    let duration = cd.duration();
    if duration.is_zero() || step.is_zero() {
        return cc;
    }
    let count = ((duration.as_nanos() + step.as_nanos() - 1) / step.as_nanos()) as u32;
    let mut span = TimeSpan::new(cd.time_start, cd.time_end);
    span.duration_index = cd.duration_index;
    span.rating_plan_id = "*none".to_string();
    span.increments = vec![Increment::new(step, Decimal::ZERO, count)];
    cc.timespans.push(span);
    cc
}

impl Session {
    async fn debit_call(&mut self, cd: &CallDescriptor) -> AppResult<CallCost> {
        let mut remaining = cd.clone();
        if remaining.duration_index < remaining.duration() {
            remaining.duration_index = remaining.duration();
        }
        let mut cc = CallCost::from_descriptor(cd);

        let mut rounds = 0;
        loop {
            if remaining.duration().is_zero() {
                break;
            }
            rounds += 1;
            if rounds > 64 {
                return Err(AppError::ServerError(
                    "debit did not converge".to_string(),
                ));
            }
            let mut progress = false;

            if cd.tor != BalanceType::Monetary {
                let unit_candidates = self.gather_candidates(cd.tor, remaining.time_start).await?;
                for (key, _tor, uuid) in unit_candidates {
                    if remaining.duration().is_zero() {
                        break;
                    }
                    if self
                        .debit_unit_balance(&key, uuid, cd.tor, &mut remaining, &mut cc)
                        .await?
                    {
                        progress = true;
                    }
                }
            }
            if remaining.duration().is_zero() {
                break;
            }
            let money_candidates = self
                .gather_candidates(BalanceType::Monetary, remaining.time_start)
                .await?;
            for (key, _tor, uuid) in money_candidates {
                if remaining.duration().is_zero() {
                    break;
                }
                if self
                    .debit_money_balance(&key, uuid, &mut remaining, &mut cc)
                    .await?
                {
                    progress = true;
                }
            }
            if !progress {
                break;
            }
        }

        if !remaining.duration().is_zero() {
            self.settle_leftover(&mut remaining, &mut cc).await?;
        }
        Ok(cc)
    }

    async fn load_member_shadow(&mut self, tenant: &str, name: &str) -> AppResult<Option<String>> {
        let key = concat_key(&[tenant, name]);
        if self.shadows.contains_key(&key) {
            return Ok(Some(key));
        }
        let guard = self.ctx.guardian.acquire(&key, self.token).await?;
        match self.ctx.accounting.get_account(tenant, name).await? {
            Some(account) if !account.disabled => {
                self.guards.push(guard);
                self.shadows.insert(key.clone(), account);
                Ok(Some(key))
            }
            _ => Ok(None),
        }
    }

    fn balance_view(&self, key: &str, uuid: Uuid) -> Option<Balance> {
        self.shadows.get(key).and_then(|account| {
            account
                .balances
                .values()
                .flat_map(|list| list.iter())
                .find(|b| b.uuid == uuid)
                .cloned()
        })
    }

    fn apply_delta(&mut self, key: &str, uuid: Uuid, delta: Decimal) -> Option<Decimal> {
        let account = self.shadows.get_mut(key)?;
        let balance = account.balance_by_uuid(uuid)?;
        balance.add_value(delta);
        let after = balance.value;
        self.journal.push(JournalEntry {
            account: key.to_string(),
            balance_uuid: uuid,
            delta,
        });
        if delta < Decimal::ZERO {
            *self.used.entry(uuid).or_insert(Decimal::ZERO) -= delta;
        }
        Some(after)
    }

    fn count_units(&mut self, key: &str, tor: BalanceType, amount: Decimal) {
        if self.dry_run {
            return;
        }
        if let Some(account) = self.shadows.get_mut(key) {
            account.count_units(tor, amount);
        }
    }

    /// Candidates across the main account and any shared groups its
    /// matching balances belong to, best first
    async fn gather_candidates(
        &mut self,
        tor: BalanceType,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<(String, BalanceType, Uuid)>> {
        let dest_matches = self.dest_matches.clone();
        let tenant = self
            .shadows
            .get(&self.main_key)
            .expect("main shadow loaded")
            .tenant
            .clone();

        let own: Vec<(BalanceType, Uuid, Vec<String>)> = {
            let main = self
                .shadows
                .get(&self.main_key)
                .expect("main shadow loaded");
            let attrs = DebitAttrs {
                destination_matches: &dest_matches,
                category: &self.call_category,
                direction: &self.call_direction,
                at,
            };
            candidate_balances(main, tor, &attrs, None)
                .into_iter()
                .map(|(t, uuid)| {
                    let groups = main
                        .balances
                        .get(&t)
                        .and_then(|list| list.iter().find(|b| b.uuid == uuid))
                        .map(|b| b.shared_groups.clone())
                        .unwrap_or_default();
                    (t, uuid, groups)
                })
                .collect()
        };

        let mut result: Vec<(String, BalanceType, Uuid)> = Vec::new();
        for (t, uuid, groups) in own {
            if groups.is_empty() {
                result.push((self.main_key.clone(), t, uuid));
                continue;
            }
            for group_name in groups {
                let Some(group) = self.ctx.tariff.shared_group(&tenant, &group_name).await?
                else {
                    warn!(group = %group_name, "missing shared group");
                    continue;
                };
                let mut pool: Vec<SharedCandidate> = Vec::new();
                for member in &group.member_ids {
                    let Some(member_key) = self.load_member_shadow(&tenant, member).await? else {
                        continue;
                    };
                    let member_account = self.shadows.get(&member_key).expect("just loaded");
                    let attrs = DebitAttrs {
                        destination_matches: &dest_matches,
                        category: &self.call_category,
                        direction: &self.call_direction,
                        at,
                    };
                    for (_mt, member_uuid) in
                        candidate_balances(member_account, t, &attrs, Some(group_name.as_str()))
                    {
                        if let Some(balance) = self.balance_view(&member_key, member_uuid) {
                            pool.push(SharedCandidate {
                                account: member_key.clone(),
                                uuid: member_uuid,
                                value: balance.value,
                                weight: balance.weight,
                            });
                        }
                    }
                }
                for candidate in order_by_strategy(group.strategy, pool, &self.used) {
                    result.push((candidate.account, t, candidate.uuid));
                }
            }
        }
        // a balance can surface through several groups
        let mut seen = std::collections::HashSet::new();
        result.retain(|(_, _, uuid)| seen.insert(*uuid));
        Ok(result)
    }

    /// First monetary balance that covers the amount pays it
    async fn pay_cost(
        &mut self,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> AppResult<Option<(String, PaymentInfo)>> {
        let candidates = self.gather_candidates(BalanceType::Monetary, at).await?;
        for (key, _tor, uuid) in candidates {
            let Some(balance) = self.balance_view(&key, uuid) else {
                continue;
            };
            if !balance.covers(amount) {
                continue;
            }
            let after = self
                .apply_delta(&key, uuid, -amount)
                .unwrap_or(balance.value);
            self.count_units(&key, BalanceType::Monetary, amount);
            return Ok(Some((
                key,
                PaymentInfo {
                    uuid,
                    id: balance.id,
                    value_after: after,
                    consumed: amount,
                },
            )));
        }
        Ok(None)
    }

    async fn charge_connect_fee(&mut self, fee: Decimal, at: DateTime<Utc>, cc: &mut CallCost) -> AppResult<bool> {
        if let Some(_paid) = self.pay_cost(fee, at).await? {
            cc.connect_fee = fee;
            cc.deduct_connect_fee = true;
            return Ok(true);
        }
        let allow_negative = self
            .shadows
            .get(&self.main_key)
            .map(|a| a.allow_negative)
            .unwrap_or(false);
        if allow_negative {
            let main_key = self.main_key.clone();
            let uuid = {
                let main = self.shadows.get_mut(&main_key).expect("main shadow");
                main.default_money_balance_mut().uuid
            };
            self.apply_delta(&main_key, uuid, -fee);
            cc.connect_fee = fee;
            cc.deduct_connect_fee = true;
            return Ok(true);
        }
        Ok(false)
    }

    /// Price the remaining window under the unit balance's subject and
    /// consume it increment by increment. Units come from this balance,
    /// increment costs from the monetary candidates.
    async fn debit_unit_balance(
        &mut self,
        key: &str,
        uuid: Uuid,
        tor: BalanceType,
        remaining: &mut CallDescriptor,
        cc: &mut CallCost,
    ) -> AppResult<bool> {
        let Some(balance) = self.balance_view(key, uuid) else {
            return Ok(false);
        };
        let at = remaining.time_start;
        if !balance.is_active_at(at) {
            return Ok(false);
        }
        if !balance.unlimited && balance.value <= Decimal::ZERO {
            return Ok(false);
        }

        let part = if let Some(step) = parse_zero_rating_subject(&balance.rating_subject) {
            zero_rated_cost(remaining, step)
        } else {
            let priced = if balance.rating_subject.is_empty() {
                self.ctx.calculator.price(remaining).await
            } else {
                self.ctx
                    .calculator
                    .price_with_subject(remaining, &balance.rating_subject)
                    .await
            };
            match priced {
                Ok(part) => part,
                Err(AppError::RatingPlanNotFound(subject)) => {
                    debug!(%subject, "unit balance cannot price the window");
                    return Ok(false);
                }
                Err(err) => return Err(err),
            }
        };
        if part.timespans.is_empty() {
            return Ok(false);
        }
        if !cc.deduct_connect_fee && part.deduct_connect_fee && !part.connect_fee.is_zero() {
            if !self.charge_connect_fee(part.connect_fee, at, cc).await? {
                return Ok(false);
            }
        }

        let mut progress = false;
        let mut consumed_total = Decimal::ZERO;
        'spans: for span in &part.timespans {
            let mut consumed = partial_span(span);
            let mut stopped = false;
            for entry in &span.increments {
                for _ in 0..entry.compressed_count {
                    let current = match self.balance_view(key, uuid) {
                        Some(b) => b,
                        None => {
                            stopped = true;
                            break;
                        }
                    };
                    let amount = current.amount_for(tor, duration_units(entry.duration));
                    if !current.covers(amount) {
                        stopped = true;
                        break;
                    }
                    let money = if entry.cost.is_zero() {
                        None
                    } else {
                        match self.pay_cost(entry.cost, at).await? {
                            Some(paid) => Some(paid),
                            None => {
                                stopped = true;
                                break;
                            }
                        }
                    };
                    let after = self.apply_delta(key, uuid, -amount).unwrap_or(current.value);
                    self.count_units(key, tor, amount);
                    consumed_total += amount;

                    let mut inc = Increment::new(entry.duration, entry.cost, 1);
                    inc.balance_info = DebitInfo {
                        account_id: key.to_string(),
                        unit: Some(PaymentInfo {
                            uuid,
                            id: current.id.clone(),
                            value_after: after,
                            consumed: amount,
                        }),
                        monetary: money.map(|(_, info)| info),
                    };
                    consumed.increments.push(inc);
                    consumed.time_end = consumed.time_end
                        + chrono::Duration::from_std(entry.duration)
                            .unwrap_or_else(|_| chrono::Duration::zero());
                }
                if stopped {
                    break;
                }
            }
            if consumed.increments.is_empty() {
                if stopped {
                    break 'spans;
                }
                continue;
            }
            consumed.duration_index = span
                .duration_index
                .checked_sub(span.duration().saturating_sub(consumed.duration()))
                .unwrap_or(Duration::ZERO);
            consumed.compress_increments();
            consumed.cost = consumed.raw_cost();
            remaining.time_start = consumed.time_end;
            cc.timespans.push(consumed);
            progress = true;
            if stopped {
                break 'spans;
            }
        }

        if progress {
            debug!(balance = %uuid, consumed = %consumed_total, "unit balance consumed");
            self.run_account_triggers(key).await?;
        }
        Ok(progress)
    }

    /// The monetary balance pays the increment costs itself
    async fn debit_money_balance(
        &mut self,
        key: &str,
        uuid: Uuid,
        remaining: &mut CallDescriptor,
        cc: &mut CallCost,
    ) -> AppResult<bool> {
        let Some(balance) = self.balance_view(key, uuid) else {
            return Ok(false);
        };
        let at = remaining.time_start;
        if !balance.is_active_at(at) {
            return Ok(false);
        }
        if !balance.unlimited && balance.value <= Decimal::ZERO {
            return Ok(false);
        }

        let priced = if balance.rating_subject.is_empty() {
            self.ctx.calculator.price(remaining).await
        } else {
            self.ctx
                .calculator
                .price_with_subject(remaining, &balance.rating_subject)
                .await
        };
        let part = match priced {
            Ok(part) => part,
            Err(AppError::RatingPlanNotFound(subject)) => {
                debug!(%subject, "money balance cannot price the window");
                return Ok(false);
            }
            Err(err) => return Err(err),
        };
        if part.timespans.is_empty() {
            return Ok(false);
        }
        if !cc.deduct_connect_fee && part.deduct_connect_fee && !part.connect_fee.is_zero() {
            if !self.charge_connect_fee(part.connect_fee, at, cc).await? {
                return Ok(false);
            }
        }

        let mut progress = false;
        'spans: for span in &part.timespans {
            let mut consumed = partial_span(span);
            let mut stopped = false;
            for entry in &span.increments {
                for _ in 0..entry.compressed_count {
                    let current = match self.balance_view(key, uuid) {
                        Some(b) => b,
                        None => {
                            stopped = true;
                            break;
                        }
                    };
                    if !current.covers(entry.cost) {
                        stopped = true;
                        break;
                    }
                    let after = self
                        .apply_delta(key, uuid, -entry.cost)
                        .unwrap_or(current.value);
                    self.count_units(key, BalanceType::Monetary, entry.cost);

                    let mut inc = Increment::new(entry.duration, entry.cost, 1);
                    inc.balance_info = DebitInfo {
                        account_id: key.to_string(),
                        unit: None,
                        monetary: Some(PaymentInfo {
                            uuid,
                            id: current.id.clone(),
                            value_after: after,
                            consumed: entry.cost,
                        }),
                    };
                    consumed.increments.push(inc);
                    consumed.time_end = consumed.time_end
                        + chrono::Duration::from_std(entry.duration)
                            .unwrap_or_else(|_| chrono::Duration::zero());
                }
                if stopped {
                    break;
                }
            }
            if consumed.increments.is_empty() {
                if stopped {
                    break 'spans;
                }
                continue;
            }
            consumed.duration_index = span
                .duration_index
                .checked_sub(span.duration().saturating_sub(consumed.duration()))
                .unwrap_or(Duration::ZERO);
            consumed.compress_increments();
            consumed.cost = consumed.raw_cost();
            remaining.time_start = consumed.time_end;
            cc.timespans.push(consumed);
            progress = true;
            if stopped {
                break 'spans;
            }
        }

        if progress {
            self.run_account_triggers(key).await?;
        }
        Ok(progress)
    }

    /// Nothing left to consume from: free leftovers are attached, negative
    /// accounts fall onto the default monetary balance, everyone else gets
    /// `InsufficientCredit` (or a truncated result when asked for one)
    async fn settle_leftover(
        &mut self,
        remaining: &mut CallDescriptor,
        cc: &mut CallCost,
    ) -> AppResult<()> {
        let left = self.ctx.calculator.price(remaining).await?;
        let at = remaining.time_start;

        if left.cost().is_zero() {
            for span in &left.timespans {
                let mut free = span.clone();
                for inc in free.increments.iter_mut() {
                    inc.balance_info.account_id = self.main_key.clone();
                }
                cc.timespans.push(free);
            }
            remaining.time_start = remaining.time_end;
            return Ok(());
        }

        let allow_negative = self
            .shadows
            .get(&self.main_key)
            .map(|a| a.allow_negative)
            .unwrap_or(false);

        if allow_negative && !self.dry_run {
            if !cc.deduct_connect_fee && left.deduct_connect_fee && !left.connect_fee.is_zero() {
                self.charge_connect_fee(left.connect_fee, at, cc).await?;
            }
            let default_uuid = {
                let main = self.shadows.get_mut(&self.main_key).expect("main shadow");
                main.default_money_balance_mut().uuid
            };
            let main_key = self.main_key.clone();
            for span in &left.timespans {
                let mut paid = span.clone();
                let mut rebuilt: Vec<Increment> = Vec::new();
                for entry in &span.increments {
                    for _ in 0..entry.compressed_count {
                        let after = self
                            .apply_delta(&main_key, default_uuid, -entry.cost)
                            .unwrap_or(Decimal::ZERO);
                        let mut inc = Increment::new(entry.duration, entry.cost, 1);
                        inc.balance_info = DebitInfo {
                            account_id: main_key.clone(),
                            unit: None,
                            monetary: Some(PaymentInfo {
                                uuid: default_uuid,
                                id: charon_core::models::DEFAULT_BALANCE.to_string(),
                                value_after: after,
                                consumed: entry.cost,
                            }),
                        };
                        rebuilt.push(inc);
                    }
                }
                paid.increments = rebuilt;
                paid.compress_increments();
                cc.timespans.push(paid);
            }
            remaining.time_start = remaining.time_end;
            self.run_account_triggers(&main_key).await?;
            return Ok(());
        }

        if self.truncate {
            return Ok(());
        }

        let available = self
            .shadows
            .get(&self.main_key)
            .map(|a| a.total_value(BalanceType::Monetary, at))
            .unwrap_or(Decimal::ZERO);
        let mut required = left.cost();
        if !cc.deduct_connect_fee && left.deduct_connect_fee {
            required += left.connect_fee;
        }
        Err(AppError::InsufficientCredit {
            required: required.to_string(),
            available: available.to_string(),
        })
    }

    async fn run_account_triggers(&mut self, key: &str) -> AppResult<()> {
        if self.dry_run {
            return Ok(());
        }
        let Some(mut account) = self.shadows.remove(key) else {
            return Ok(());
        };
        let result = run_triggers(
            &self.executor,
            &mut account,
            &mut self.trigger_passes,
            self.ctx.config.accounting.trigger_depth_max,
        )
        .await;
        self.shadows.insert(key.to_string(), account);
        result
    }
}

/// Empty span carrying over the rating tags of the priced one
fn partial_span(span: &TimeSpan) -> TimeSpan {
    let mut consumed = TimeSpan::new(span.time_start, span.time_start);
    consumed.rate_interval = span.rate_interval.clone();
    consumed.matched_subject = span.matched_subject.clone();
    consumed.matched_prefix = span.matched_prefix.clone();
    consumed.matched_dest_id = span.matched_dest_id.clone();
    consumed.rating_plan_id = span.rating_plan_id.clone();
    consumed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_zero_rating_subject() {
        assert_eq!(
            parse_zero_rating_subject("*zero1s"),
            Some(Duration::from_secs(1))
        );
        assert_eq!(
            parse_zero_rating_subject("*zero10ms"),
            Some(Duration::from_millis(10))
        );
        assert_eq!(
            parse_zero_rating_subject("*zero1m"),
            Some(Duration::from_secs(60))
        );
        assert_eq!(parse_zero_rating_subject("1001"), None);
        assert_eq!(parse_zero_rating_subject(""), None);
    }

    #[test]
    fn test_duration_units_is_exact() {
        use rust_decimal_macros::dec;
        assert_eq!(duration_units(Duration::from_secs(1)), dec!(1));
        assert_eq!(duration_units(Duration::from_millis(500)), dec!(0.5));
    }

    #[test]
    fn test_zero_rated_cost_shape() {
        use charon_core::models::BalanceType;
        let cd = CallDescriptor {
            direction: "*out".to_string(),
            category: "call".to_string(),
            tenant: "cgrates.org".to_string(),
            subject: "1001".to_string(),
            account: String::new(),
            destination: "447956933443".to_string(),
            time_start: Utc::now(),
            time_end: Utc::now() + chrono::Duration::seconds(10),
            duration_index: Duration::from_secs(10),
            tor: BalanceType::Voice,
            fallback_subjects: Vec::new(),
        };
        let cc = zero_rated_cost(&cd, Duration::from_secs(1));
        assert_eq!(cc.timespans.len(), 1);
        assert_eq!(cc.timespans[0].increments[0].compressed_count, 10);
        assert!(cc.cost().is_zero());
    }
}
