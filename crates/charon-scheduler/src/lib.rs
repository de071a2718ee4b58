//! Action scheduler
//!
//! A single cooperative loop over a priority queue of action timings:
//! sleep until the head's next start, fire its action group against the
//! bound accounts through a bounded worker pool, re-insert at the next
//! recurrence. A bounded channel carries reload signals; every reload
//! also drains the ASAP task queue.

use charon_core::error::AppResult;
use charon_core::models::{ActionPlan, ActionTiming};
use charon_engine::{ActionExecutor, Context};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Why a reload was requested; carried on the signal channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadReason {
    Startup,
    Api,
    TariffLoad,
}

/// Queued timing, ordered earliest-first with weight breaking ties
struct QueuedTiming {
    next_start: DateTime<Utc>,
    tenant: String,
    plan: String,
    timing: ActionTiming,
}

impl PartialEq for QueuedTiming {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedTiming {}

impl PartialOrd for QueuedTiming {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTiming {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops the maximum; make the earliest start (then the
        // heaviest timing) the maximum
        other
            .next_start
            .cmp(&self.next_start)
            .then_with(|| {
                self.timing
                    .weight
                    .partial_cmp(&other.timing.weight)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| self.timing.uuid.cmp(&other.timing.uuid))
    }
}

/// Cloneable handle used to signal the running scheduler
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<ReloadReason>,
}

impl SchedulerHandle {
    /// Ask the scheduler to reload its queue; never blocks the caller
    pub fn reload(&self, reason: ReloadReason) {
        if let Err(err) = self.tx.try_send(reason) {
            // a pending reload already covers us
            debug!(?err, "reload signal not enqueued");
        }
    }
}

pub struct Scheduler {
    ctx: Arc<Context>,
    executor: Arc<ActionExecutor>,
    reload_rx: mpsc::Receiver<ReloadReason>,
    queue: BinaryHeap<QueuedTiming>,
    /// Last fired instant per timing uuid; guards at-most-once firing per
    /// next_start across reloads
    fired: HashMap<Uuid, DateTime<Utc>>,
    workers: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(ctx: Arc<Context>, executor: Arc<ActionExecutor>) -> (Self, SchedulerHandle) {
        let (tx, reload_rx) = mpsc::channel(ctx.config.scheduler.reload_queue_depth);
        let workers = Arc::new(Semaphore::new(ctx.config.scheduler.workers));
        (
            Self {
                ctx,
                executor,
                reload_rx,
                queue: BinaryHeap::new(),
                fired: HashMap::new(),
                workers,
            },
            SchedulerHandle { tx },
        )
    }

    /// The scheduler loop; runs until every handle is dropped
    pub async fn run(mut self) {
        info!("scheduler started");
        loop {
            if self.queue.is_empty() {
                match self.reload_rx.recv().await {
                    Some(reason) => {
                        debug!(?reason, "reloading empty queue");
                        self.load().await;
                    }
                    None => break,
                }
                continue;
            }
            let head_start = self
                .queue
                .peek()
                .map(|q| q.next_start)
                .expect("queue not empty");
            let now = Utc::now();
            if head_start <= now {
                if let Some(item) = self.queue.pop() {
                    self.fire(item).await;
                }
                continue;
            }
            let sleep = (head_start - now)
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                reason = self.reload_rx.recv() => {
                    match reason {
                        Some(reason) => {
                            debug!(?reason, "reload interrupted tick");
                            self.load().await;
                        }
                        None => break,
                    }
                }
            }
        }
        info!("scheduler stopped");
    }

    /// Dispatch the timing through the worker pool and re-insert it at its
    /// next recurrence
    async fn fire(&mut self, item: QueuedTiming) {
        let already_fired = self.fired.get(&item.timing.uuid) == Some(&item.next_start);
        if already_fired {
            debug!(uuid = %item.timing.uuid, "timing already fired for this instant");
        } else {
            self.fired.insert(item.timing.uuid, item.next_start);
            let Ok(permit) = self.workers.clone().acquire_owned().await else {
                return;
            };
            let executor = self.executor.clone();
            let tenant = item.tenant.clone();
            let plan = item.plan.clone();
            let timing = item.timing.clone();
            info!(tenant = %tenant, plan = %plan, actions = %timing.actions_id, "firing action timing");
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(err) = executor.execute_timing(&tenant, &plan, &timing).await {
                    // the timing advances regardless; no same-tick retry
                    error!(plan = %plan, %err, "scheduled action group failed");
                }
            });
        }
        let after = item.next_start + chrono::Duration::seconds(1);
        if let Some(next) = item.timing.next_start(after) {
            if next >= Utc::now() {
                self.queue.push(QueuedTiming {
                    next_start: next,
                    ..item
                });
                return;
            }
        }
        debug!(uuid = %item.timing.uuid, "timing exhausted, dropped from queue");
    }

    /// Rebuild the queue from the stored action plans and drain the ASAP
    /// task queue
    pub async fn load(&mut self) {
        self.drain_tasks().await;

        let plans = match self.ctx.tariff.action_plans().await {
            Ok(plans) => plans,
            Err(err) => {
                error!(%err, "cannot load action plans");
                return;
            }
        };
        let now = Utc::now();
        self.queue.clear();
        for plan in plans {
            for timing in &plan.timings {
                if timing.timing.is_none() {
                    warn!(plan = %plan.name, "action timing without timing spec, discarding");
                    continue;
                }
                if timing.is_asap() {
                    continue;
                }
                let Some(next_start) = timing.next_start(now) else {
                    continue;
                };
                if next_start < now {
                    continue;
                }
                if self.fired.get(&timing.uuid) == Some(&next_start) {
                    // already executed for this instant before the reload
                    continue;
                }
                self.queue.push(QueuedTiming {
                    next_start,
                    tenant: plan.tenant.clone(),
                    plan: plan.name.clone(),
                    timing: timing.clone(),
                });
            }
        }
        info!(queued = self.queue.len(), "scheduler queue rebuilt");
    }

    /// Pop and dispatch every pending ASAP task through the worker pool
    async fn drain_tasks(&self) {
        loop {
            let task = match self.ctx.tariff.pop_task().await {
                Ok(Some(task)) => task,
                Ok(None) => break,
                Err(err) => {
                    error!(%err, "cannot pop task");
                    break;
                }
            };
            let Ok(permit) = self.workers.clone().acquire_owned().await else {
                break;
            };
            let executor = self.executor.clone();
            info!(account = %task.account_id, actions = %task.actions_id, "executing task");
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(err) = executor.execute_task(&task).await {
                    error!(account = %task.account_id, %err, "task failed");
                }
            });
        }
    }
}

/// Replay a tenant's non-ASAP timings over an arbitrary window through a
/// private queue. Live queue state and `last_executed` records are never
/// touched.
pub async fn replay(
    ctx: &Context,
    executor: &ActionExecutor,
    tenant: &str,
    plan_name: Option<&str>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> AppResult<usize> {
    let plans: Vec<ActionPlan> = match plan_name {
        Some(name) => ctx
            .tariff
            .action_plan(tenant, name)
            .await?
            .into_iter()
            .collect(),
        None => ctx
            .tariff
            .action_plans()
            .await?
            .into_iter()
            .filter(|p| p.tenant == tenant)
            .collect(),
    };

    let mut heap: BinaryHeap<QueuedTiming> = BinaryHeap::new();
    for plan in &plans {
        for timing in &plan.timings {
            if timing.is_asap() {
                continue;
            }
            if let Some(start) = timing.next_start(window_start) {
                if start <= window_end {
                    heap.push(QueuedTiming {
                        next_start: start,
                        tenant: plan.tenant.clone(),
                        plan: plan.name.clone(),
                        timing: timing.clone(),
                    });
                }
            }
        }
    }

    let mut executed = 0;
    while let Some(item) = heap.pop() {
        if let Err(err) = executor
            .execute_timing(&item.tenant, &item.plan, &item.timing)
            .await
        {
            error!(plan = %item.plan, %err, "replayed action group failed");
        }
        executed += 1;
        let after = item.next_start + chrono::Duration::seconds(1);
        if let Some(next) = item.timing.next_start(after) {
            if next <= window_end {
                heap.push(QueuedTiming {
                    next_start: next,
                    ..item
                });
            }
        }
    }
    Ok(executed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use charon_core::models::TimingSpec;
    use chrono::NaiveTime;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn queued(start: &str, weight: f64) -> QueuedTiming {
        let mut timing = ActionTiming::new(
            "AG",
            TimingSpec::daily(NaiveTime::from_hms_opt(8, 0, 0).unwrap()),
        );
        timing.weight = weight;
        QueuedTiming {
            next_start: ts(start),
            tenant: "cgrates.org".to_string(),
            plan: "AP".to_string(),
            timing,
        }
    }

    #[test]
    fn test_heap_pops_earliest_first() {
        let mut heap = BinaryHeap::new();
        heap.push(queued("2024-01-02T08:00:00Z", 0.0));
        heap.push(queued("2024-01-01T08:00:00Z", 0.0));
        heap.push(queued("2024-01-03T08:00:00Z", 0.0));
        assert_eq!(heap.pop().unwrap().next_start, ts("2024-01-01T08:00:00Z"));
        assert_eq!(heap.pop().unwrap().next_start, ts("2024-01-02T08:00:00Z"));
        assert_eq!(heap.pop().unwrap().next_start, ts("2024-01-03T08:00:00Z"));
    }

    #[test]
    fn test_heap_weight_breaks_ties() {
        let mut heap = BinaryHeap::new();
        heap.push(queued("2024-01-01T08:00:00Z", 5.0));
        heap.push(queued("2024-01-01T08:00:00Z", 20.0));
        assert_eq!(heap.pop().unwrap().timing.weight, 20.0);
    }
}
