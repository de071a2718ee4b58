//! Engine context
//!
//! Every component receives this at construction instead of reading
//! globals: the three injected stores, the mail sink, the guardian, the
//! rating services and the outbound HTTP client.

use crate::guardian::Guardian;
use charon_core::config::AppConfig;
use charon_core::traits::{AccountingStore, CdrStore, Mailer, TariffPlanStore};
use charon_rating::{Calculator, DestinationIndex, Resolver};
use std::sync::Arc;

pub struct Context {
    pub config: AppConfig,
    pub tariff: Arc<dyn TariffPlanStore>,
    pub accounting: Arc<dyn AccountingStore>,
    pub cdrs: Arc<dyn CdrStore>,
    pub mailer: Arc<dyn Mailer>,
    pub guardian: Arc<Guardian>,
    pub calculator: Arc<Calculator>,
    pub destinations: Arc<DestinationIndex>,
    pub http: reqwest::Client,
}

impl Context {
    pub fn new(
        config: AppConfig,
        tariff: Arc<dyn TariffPlanStore>,
        accounting: Arc<dyn AccountingStore>,
        cdrs: Arc<dyn CdrStore>,
        mailer: Arc<dyn Mailer>,
    ) -> Arc<Self> {
        let guardian = Arc::new(Guardian::new(config.guardian_timeout()));
        let resolver = Arc::new(Resolver::new(
            tariff.clone(),
            config.rating.cache_capacity,
            config.rating.prefix_subject_matching,
            config.rating.fallback_depth_max,
        ));
        let calculator = Arc::new(Calculator::new(resolver));
        Arc::new(Self {
            config,
            tariff,
            accounting,
            cdrs,
            mailer,
            guardian,
            calculator,
            destinations: Arc::new(DestinationIndex::new()),
            http: reqwest::Client::new(),
        })
    }

    /// Rebuild the destination index and drop tariff caches for a tenant;
    /// called after a tariff-plan reload
    pub async fn reload_tenant(&self, tenant: &str) -> charon_core::AppResult<()> {
        let destinations = self.tariff.destinations(tenant).await?;
        self.destinations.rebuild_tenant(tenant, &destinations);
        self.calculator.resolver().invalidate_tenant(tenant);
        Ok(())
    }
}
