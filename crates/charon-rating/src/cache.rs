//! Tariff-plan cache
//!
//! Profiles and plans are content-addressed and held in a bounded LRU per
//! kind behind a read-mostly lock. Reloads invalidate by tenant prefix;
//! cache keys therefore lead with the tenant.

use charon_core::models::{RatingPlan, RatingProfile};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Bounded LRU over string keys
struct BoundedCache<V> {
    capacity: usize,
    map: HashMap<String, V>,
    order: VecDeque<String>,
}

impl<V: Clone> BoundedCache<V> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, key: &str) -> Option<V> {
        let value = self.map.get(key)?.clone();
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key.to_string());
        Some(value)
    }

    fn put(&mut self, key: String, value: V) {
        if self.map.insert(key.clone(), value).is_some() {
            if let Some(pos) = self.order.iter().position(|k| k == &key) {
                self.order.remove(pos);
            }
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.map.remove(&evicted);
            }
        }
    }

    fn invalidate_prefix(&mut self, prefix: &str) {
        self.map.retain(|k, _| !k.starts_with(prefix));
        self.order.retain(|k| !k.starts_with(prefix));
    }
}

/// LRU caches for the two hot tariff-plan kinds
pub struct TariffCache {
    profiles: RwLock<BoundedCache<Arc<RatingProfile>>>,
    plans: RwLock<BoundedCache<Arc<RatingPlan>>>,
}

impl TariffCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            profiles: RwLock::new(BoundedCache::new(capacity)),
            plans: RwLock::new(BoundedCache::new(capacity)),
        }
    }

    fn profile_key(tenant: &str, direction: &str, category: &str, subject: &str) -> String {
        format!("{}:{}:{}:{}", tenant, direction, category, subject)
    }

    fn plan_key(tenant: &str, name: &str) -> String {
        format!("{}:{}", tenant, name)
    }

    pub fn get_profile(
        &self,
        tenant: &str,
        direction: &str,
        category: &str,
        subject: &str,
    ) -> Option<Arc<RatingProfile>> {
        self.profiles
            .write()
            .get(&Self::profile_key(tenant, direction, category, subject))
    }

    pub fn put_profile(&self, profile: Arc<RatingProfile>) {
        let key = Self::profile_key(
            &profile.tenant,
            &profile.direction,
            &profile.category,
            &profile.subject,
        );
        self.profiles.write().put(key, profile);
    }

    pub fn get_plan(&self, tenant: &str, name: &str) -> Option<Arc<RatingPlan>> {
        self.plans.write().get(&Self::plan_key(tenant, name))
    }

    pub fn put_plan(&self, plan: Arc<RatingPlan>) {
        let key = Self::plan_key(&plan.tenant, &plan.name);
        self.plans.write().put(key, plan);
    }

    /// Drop every cached entry of the tenant
    pub fn invalidate_tenant(&self, tenant: &str) {
        let prefix = format!("{}:", tenant);
        self.profiles.write().invalidate_prefix(&prefix);
        self.plans.write().invalidate_prefix(&prefix);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(subject: &str) -> Arc<RatingProfile> {
        Arc::new(RatingProfile {
            direction: "*out".to_string(),
            tenant: "cgrates.org".to_string(),
            category: "call".to_string(),
            subject: subject.to_string(),
            activations: Vec::new(),
        })
    }

    #[test]
    fn test_round_trip() {
        let cache = TariffCache::new(16);
        cache.put_profile(profile("1001"));
        assert!(cache
            .get_profile("cgrates.org", "*out", "call", "1001")
            .is_some());
        assert!(cache
            .get_profile("cgrates.org", "*out", "call", "1002")
            .is_none());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = TariffCache::new(2);
        cache.put_profile(profile("a"));
        cache.put_profile(profile("b"));
        // touch "a" so "b" becomes the eviction candidate
        cache.get_profile("cgrates.org", "*out", "call", "a");
        cache.put_profile(profile("c"));
        assert!(cache.get_profile("cgrates.org", "*out", "call", "a").is_some());
        assert!(cache.get_profile("cgrates.org", "*out", "call", "b").is_none());
        assert!(cache.get_profile("cgrates.org", "*out", "call", "c").is_some());
    }

    #[test]
    fn test_tenant_invalidation() {
        let cache = TariffCache::new(16);
        cache.put_profile(profile("1001"));
        cache.put_plan(Arc::new(RatingPlan::new("cgrates.org", "RP1")));
        cache.put_plan(Arc::new(RatingPlan::new("other.org", "RP1")));

        cache.invalidate_tenant("cgrates.org");
        assert!(cache
            .get_profile("cgrates.org", "*out", "call", "1001")
            .is_none());
        assert!(cache.get_plan("cgrates.org", "RP1").is_none());
        assert!(cache.get_plan("other.org", "RP1").is_some());
    }
}
