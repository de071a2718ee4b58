//! Cost calculator
//!
//! Splits a call window across rating-plan activations, rate-interval
//! timings and rate-slot boundaries, then emits compressed increments per
//! final sub-span. Rounding is applied per timespan; the CallCost total is
//! exactly the sum of the rounded timespans plus the connect fee.

use crate::resolver::{RatingInfo, Resolver};
use charon_core::error::{AppError, AppResult};
use charon_core::models::{CallCost, CallDescriptor, Increment, MaxCostStrategy, RateInterval, TimeSpan};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

pub struct Calculator {
    resolver: Arc<Resolver>,
}

impl Calculator {
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Price a call window into a timeline of per-increment costs
    #[instrument(skip(self), fields(tenant = %cd.tenant, subject = %cd.subject))]
    pub async fn price(&self, cd: &CallDescriptor) -> AppResult<CallCost> {
        if cd.time_end < cd.time_start {
            return Err(AppError::Parser(
                "call window ends before it starts".to_string(),
            ));
        }
        let mut cc = CallCost::from_descriptor(cd);
        if cd.time_end == cd.time_start {
            return Ok(cc);
        }

        let mut infos = self.resolver.rating_infos(cd).await?;
        infos.sort_by_key(|i| i.activation_time);

        let mut spans = build_interval_spans(cd, &infos)?;
        split_by_slots(&mut spans);
        emit_increments(&mut spans)?;

        if let Some(first) = spans.first() {
            if let Some(interval) = &first.rate_interval {
                cc.connect_fee = interval.rating.connect_fee;
                cc.deduct_connect_fee = !cc.connect_fee.is_zero();
            }
        }
        cc.timespans = spans;
        apply_max_cost(&mut cc);
        Ok(cc)
    }

    /// Price under another rating subject (balance-level re-routing)
    pub async fn price_with_subject(
        &self,
        cd: &CallDescriptor,
        subject: &str,
    ) -> AppResult<CallCost> {
        let mut rerouted = cd.clone();
        rerouted.subject = subject.to_string();
        rerouted.account = subject.to_string();
        rerouted.fallback_subjects.clear();
        self.price(&rerouted).await
    }
}

/// Spans tagged with their winning rate interval, split at activation and
/// timing boundaries; adjacent spans under the same interval are merged
fn build_interval_spans(cd: &CallDescriptor, infos: &[RatingInfo]) -> AppResult<Vec<TimeSpan>> {
    let prior_usage = cd
        .duration_index
        .checked_sub(cd.duration())
        .unwrap_or(Duration::ZERO);

    // split the window at activations that start inside it
    let mut edges: Vec<DateTime<Utc>> = vec![cd.time_start];
    for info in infos {
        if info.activation_time > cd.time_start && info.activation_time < cd.time_end {
            edges.push(info.activation_time);
        }
    }
    edges.push(cd.time_end);
    edges.sort();
    edges.dedup();

    let mut spans: Vec<TimeSpan> = Vec::new();
    for window in edges.windows(2) {
        let (start, end) = (window[0], window[1]);
        let info = infos
            .iter()
            .filter(|i| i.activation_time <= start)
            .max_by_key(|i| i.activation_time)
            .ok_or_else(|| AppError::RatingPlanNotFound(cd.key_with_subject(&cd.subject)))?;

        let mut t = start;
        let mut guard = 0;
        while t < end {
            guard += 1;
            if guard > 10_000 {
                return Err(AppError::ServerError(
                    "rate interval split did not converge".to_string(),
                ));
            }
            let interval = select_interval(&info.intervals, t).ok_or_else(|| {
                AppError::RatingPlanNotFound(format!(
                    "{} has no rate interval at {}",
                    info.rating_plan_id, t
                ))
            })?;
            let boundary = next_boundary(&info.intervals, t, end);
            let mut span = TimeSpan::new(t, boundary);
            span.rate_interval = Some(interval.clone());
            span.matched_subject = info.matched_subject.clone();
            span.matched_prefix = info.matched_prefix.clone();
            span.matched_dest_id = info.matched_dest_id.clone();
            span.rating_plan_id = info.rating_plan_id.clone();
            spans.push(span);
            t = boundary;
        }
    }

    // irrelevant timing edges produce neighbours under the same interval;
    // merge them so each timespan rounds once
    let mut merged: Vec<TimeSpan> = Vec::with_capacity(spans.len());
    for span in spans {
        match merged.last_mut() {
            Some(last)
                if last.rate_interval == span.rate_interval
                    && last.rating_plan_id == span.rating_plan_id
                    && last.time_end == span.time_start =>
            {
                last.time_end = span.time_end;
            }
            _ => merged.push(span),
        }
    }

    for span in merged.iter_mut() {
        let offset = (span.time_end - cd.time_start)
            .to_std()
            .unwrap_or(Duration::ZERO);
        span.duration_index = prior_usage + offset;
    }
    Ok(merged)
}

/// The interval active at the instant with the greatest weight; ties go to
/// the one whose daily window opened last
fn select_interval(intervals: &[RateInterval], t: DateTime<Utc>) -> Option<&RateInterval> {
    intervals
        .iter()
        .filter(|i| i.contains(t, false))
        .max_by(|a, b| {
            a.weight
                .partial_cmp(&b.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.timing.left_margin(t).cmp(&b.timing.left_margin(t)))
        })
}

/// Earliest instant after `t` where any interval's daily window opens or
/// closes, capped at the span end
fn next_boundary(intervals: &[RateInterval], t: DateTime<Utc>, end: DateTime<Utc>) -> DateTime<Utc> {
    let mut boundary = end;
    let tomorrow = t + chrono::Duration::days(1);
    for interval in intervals {
        for reference in [t, tomorrow] {
            for edge in [
                interval.timing.left_margin(reference),
                interval.timing.right_margin(reference),
            ] {
                if edge > t && edge < boundary {
                    boundary = edge;
                }
            }
        }
    }
    boundary
}

/// Split spans further wherever a rate slot takes over mid-span
fn split_by_slots(spans: &mut Vec<TimeSpan>) {
    let mut result: Vec<TimeSpan> = Vec::with_capacity(spans.len());
    for span in spans.drain(..) {
        let slot_starts: Vec<Duration> = span
            .rate_interval
            .as_ref()
            .map(|i| i.rating.slots.iter().map(|s| s.group_interval_start).collect())
            .unwrap_or_default();
        let mut current = span;
        for slot_start in slot_starts {
            let group_start = current.group_start();
            let group_end = current.group_end();
            if slot_start > group_start && slot_start < group_end {
                let split_at = current.time_start
                    + chrono::Duration::from_std(slot_start - group_start)
                        .unwrap_or(chrono::Duration::zero());
                let mut tail = current.clone();
                tail.time_start = split_at;
                current.time_end = split_at;
                current.duration_index = group_end
                    .checked_sub(tail.duration())
                    .unwrap_or(Duration::ZERO);
                result.push(current);
                current = tail;
            }
        }
        result.push(current);
    }
    *spans = result;
}

/// Emit `⌈duration / rate_increment⌉` compressed increments per span and
/// round the span cost
fn emit_increments(spans: &mut [TimeSpan]) -> AppResult<()> {
    for span in spans.iter_mut() {
        let interval = span
            .rate_interval
            .as_ref()
            .ok_or_else(|| AppError::MalformedRate("timespan without rate interval".to_string()))?;
        let slot = interval
            .rating
            .slot_at(span.group_start())
            .ok_or_else(|| {
                AppError::MalformedRate("no rate slot covers the span start".to_string())
            })?;
        let inc_cost = slot.increment_cost()?;
        let duration = span.duration().as_nanos();
        let step = slot.rate_increment.as_nanos();
        let count = ((duration + step - 1) / step) as u32;
        span.increments = vec![Increment::new(slot.rate_increment, inc_cost, count)];
        span.cost = interval.rating.round(inc_cost * Decimal::from(count));
    }
    Ok(())
}

/// Enforce per-destination-rate max cost over the running call total
fn apply_max_cost(cc: &mut CallCost) {
    let mut acc = if cc.deduct_connect_fee {
        cc.connect_fee
    } else {
        Decimal::ZERO
    };
    let mut cut_from: Option<usize> = None;
    for (index, span) in cc.timespans.iter_mut().enumerate() {
        let Some(interval) = span.rate_interval.clone() else {
            acc += span.raw_cost();
            continue;
        };
        let Some(max_cost) = interval.rating.max_cost else {
            acc += span.raw_cost();
            continue;
        };
        let Some(inc) = span.increments.first().cloned() else {
            continue;
        };
        let mut allowed = 0u32;
        for _ in 0..inc.compressed_count {
            if acc >= max_cost {
                break;
            }
            acc += inc.cost;
            allowed += 1;
        }
        if allowed == inc.compressed_count {
            continue;
        }
        match interval.rating.max_cost_strategy {
            MaxCostStrategy::Free => {
                let mut increments = Vec::with_capacity(2);
                if allowed > 0 {
                    increments.push(Increment::new(inc.duration, inc.cost, allowed));
                }
                increments.push(Increment::new(
                    inc.duration,
                    Decimal::ZERO,
                    inc.compressed_count - allowed,
                ));
                span.increments = increments;
                span.cost = interval.rating.round(inc.cost * Decimal::from(allowed));
            }
            MaxCostStrategy::Disconnect => {
                let kept = inc.duration * allowed;
                span.time_end = span.time_start
                    + chrono::Duration::from_std(kept).unwrap_or(chrono::Duration::zero());
                span.duration_index = span
                    .duration_index
                    .checked_sub(inc.total_duration() - kept)
                    .unwrap_or(Duration::ZERO);
                span.increments = vec![Increment::new(inc.duration, inc.cost, allowed)];
                span.cost = interval.rating.round(inc.cost * Decimal::from(allowed));
                cc.max_cost_disconnect = true;
                cut_from = Some(index + 1);
                break;
            }
        }
    }
    if let Some(cut) = cut_from {
        cc.timespans.truncate(cut);
    }
}
