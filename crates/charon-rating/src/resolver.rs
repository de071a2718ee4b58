//! Rating plan resolver
//!
//! Selects the active rating plan for a `(direction, tenant, category,
//! subject)` key at an instant, retrying through fallback subject chains
//! when the plan yields no destination match. Lookups go through the
//! bounded tariff cache.

use crate::cache::TariffCache;
use charon_core::error::{AppError, AppResult};
use charon_core::models::destination::normalize_number;
use charon_core::models::{CallDescriptor, RateInterval, RatingProfile};
use charon_core::traits::TariffPlanStore;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Rating information for one activation covering (part of) a call window
#[derive(Debug, Clone)]
pub struct RatingInfo {
    pub matched_subject: String,
    pub rating_plan_id: String,
    pub matched_prefix: String,
    pub matched_dest_id: String,
    pub activation_time: DateTime<Utc>,
    pub intervals: Vec<RateInterval>,
}

pub struct Resolver {
    store: Arc<dyn TariffPlanStore>,
    cache: TariffCache,
    prefix_subject_matching: bool,
    fallback_depth_max: usize,
}

impl Resolver {
    pub fn new(
        store: Arc<dyn TariffPlanStore>,
        cache_capacity: usize,
        prefix_subject_matching: bool,
        fallback_depth_max: usize,
    ) -> Self {
        Self {
            store,
            cache: TariffCache::new(cache_capacity),
            prefix_subject_matching,
            fallback_depth_max,
        }
    }

    /// Drop cached entries of a tenant after a tariff-plan reload
    pub fn invalidate_tenant(&self, tenant: &str) {
        self.cache.invalidate_tenant(tenant);
    }

    async fn cached_profile(
        &self,
        direction: &str,
        tenant: &str,
        category: &str,
        subject: &str,
    ) -> AppResult<Option<Arc<RatingProfile>>> {
        if let Some(profile) = self.cache.get_profile(tenant, direction, category, subject) {
            return Ok(Some(profile));
        }
        let Some(profile) = self
            .store
            .rating_profile(direction, tenant, category, subject)
            .await?
        else {
            return Ok(None);
        };
        let profile = Arc::new(profile);
        self.cache.put_profile(profile.clone());
        Ok(Some(profile))
    }

    /// Profile for the exact subject, optionally shortening the subject one
    /// trailing character at a time down to the empty subject
    async fn profile_for_subject(
        &self,
        direction: &str,
        tenant: &str,
        category: &str,
        subject: &str,
    ) -> AppResult<Option<Arc<RatingProfile>>> {
        if let Some(profile) = self
            .cached_profile(direction, tenant, category, subject)
            .await?
        {
            return Ok(Some(profile));
        }
        if !self.prefix_subject_matching {
            return Ok(None);
        }
        let mut shortened = subject.to_string();
        while !shortened.is_empty() {
            shortened.pop();
            if let Some(profile) = self
                .cached_profile(direction, tenant, category, &shortened)
                .await?
            {
                debug!(subject, matched = %shortened, "prefix subject match");
                return Ok(Some(profile));
            }
        }
        Ok(None)
    }

    async fn cached_plan(
        &self,
        tenant: &str,
        name: &str,
    ) -> AppResult<Option<Arc<charon_core::models::RatingPlan>>> {
        if let Some(plan) = self.cache.get_plan(tenant, name) {
            return Ok(Some(plan));
        }
        let Some(plan) = self.store.rating_plan(tenant, name).await? else {
            return Ok(None);
        };
        let plan = Arc::new(plan);
        self.cache.put_plan(plan.clone());
        Ok(Some(plan))
    }

    /// The active rating plan id for the key at the instant
    #[instrument(skip(self))]
    pub async fn resolve(
        &self,
        direction: &str,
        tenant: &str,
        category: &str,
        subject: &str,
        t: DateTime<Utc>,
    ) -> AppResult<String> {
        let key = charon_core::models::concat_key(&[direction, tenant, category, subject]);
        let profile = self
            .profile_for_subject(direction, tenant, category, subject)
            .await?
            .ok_or_else(|| AppError::RatingPlanNotFound(key.clone()))?;
        profile
            .activations
            .iter()
            .filter(|a| a.activation_time <= t)
            .max_by_key(|a| a.activation_time)
            .map(|a| a.rating_plan_id.clone())
            .ok_or(AppError::RatingPlanNotFound(key))
    }

    /// Rating infos covering the descriptor's window, walking fallback
    /// subjects when the plan has no destination match
    pub async fn rating_infos(&self, cd: &CallDescriptor) -> AppResult<Vec<RatingInfo>> {
        let mut visited = HashSet::new();
        let infos = self.infos_for_subject(cd, &cd.subject, &mut visited).await?;
        if infos.is_empty() {
            return Err(AppError::RatingPlanNotFound(
                cd.key_with_subject(&cd.subject),
            ));
        }
        Ok(infos)
    }

    fn infos_for_subject<'a>(
        &'a self,
        cd: &'a CallDescriptor,
        subject: &'a str,
        visited: &'a mut HashSet<String>,
    ) -> futures::future::BoxFuture<'a, AppResult<Vec<RatingInfo>>> {
        Box::pin(async move {
            let key = cd.key_with_subject(subject);
            if !visited.insert(key.clone()) {
                // already walked this subject in the current chain
                return Ok(Vec::new());
            }
            if visited.len() > self.fallback_depth_max {
                return Err(AppError::FallbackLoop(key));
            }

            let Some(profile) = self
                .profile_for_subject(&cd.direction, &cd.tenant, &cd.category, subject)
                .await?
            else {
                return Ok(Vec::new());
            };

            let destination = normalize_number(&cd.destination);
            let mut infos = Vec::new();
            let mut fallbacks: Vec<String> = Vec::new();
            for activation in profile.active_for_window(cd.time_start, cd.time_end) {
                let Some(plan) = self
                    .cached_plan(&cd.tenant, &activation.rating_plan_id)
                    .await?
                else {
                    warn!(
                        plan = %activation.rating_plan_id,
                        "activation references missing rating plan"
                    );
                    continue;
                };
                match plan.match_destination(&destination) {
                    Some((prefix, entry)) => infos.push(RatingInfo {
                        matched_subject: profile.full_id(),
                        rating_plan_id: plan.name.clone(),
                        matched_prefix: prefix,
                        matched_dest_id: entry.dest_name.clone(),
                        activation_time: activation.activation_time,
                        intervals: entry.intervals.clone(),
                    }),
                    None => fallbacks.extend(activation.fallback_subjects.iter().cloned()),
                }
            }
            if !infos.is_empty() {
                return Ok(infos);
            }
            // the plan had nothing for this destination; retry under the
            // fallback subjects in order
            for fallback in fallbacks {
                let fallback_infos = self.infos_for_subject(cd, &fallback, visited).await?;
                if !fallback_infos.is_empty() {
                    return Ok(fallback_infos);
                }
            }
            Ok(Vec::new())
        })
    }
}
