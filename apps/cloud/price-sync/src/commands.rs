//! Price Sync Runner
//!
//! Wires the catalog source and the Morpheus store into the domain service,
//! runs one command and records metrics from its reports.

use chrono::Utc;
use domain_price_bundles::{
    COMPUTE_ENGINE_SERVICE_ID, CachedCatalog, CachedService, MappingReport, PlanValidation, PricingStore,
    RawSkuRecord, RunPlan, SyncReport, SyncRun, SyncService, collect_records,
};
use eyre::Result;
use futures::stream::{self, StreamExt};
use observability::SyncMetrics;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::providers::gcp::{GcpService, resolve_access_token};
use crate::providers::{GcpCatalogClient, MorpheusStore, ProviderError, UnconfiguredStore};

/// Cache age after which a warning is logged
const STALE_CACHE_DAYS: i64 = 7;

/// One service written to the catalog cache
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredService {
    pub service_id: String,
    pub display_name: String,
    pub skus: usize,
    /// SKU counts per resource family
    pub summary: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoverSummary {
    pub path: String,
    pub regions: Vec<String>,
    pub services: Vec<DiscoveredService>,
    pub total_skus: usize,
    pub retries: u32,
    /// Services skipped after their pages kept failing
    pub failed_services: Vec<String>,
}

/// Result of one command, printable as text or JSON
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum CommandReport {
    Discover(DiscoverSummary),
    CreatePrices(SyncReport),
    CreateBundles(SyncReport),
    Sync(SyncRun),
    CreatePlans(SyncReport),
    Map(MappingReport),
    Validate(PlanValidation),
}

impl CommandReport {
    /// Whether the process should exit non-zero
    pub fn has_failures(&self) -> bool {
        match self {
            CommandReport::Discover(summary) => !summary.failed_services.is_empty(),
            CommandReport::CreatePrices(report)
            | CommandReport::CreateBundles(report)
            | CommandReport::CreatePlans(report) => report.has_failures(),
            CommandReport::Sync(run) => run.has_failures(),
            CommandReport::Map(report) => report.has_failures(),
            CommandReport::Validate(validation) => !validation.is_complete(),
        }
    }
}

impl fmt::Display for CommandReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandReport::Discover(summary) => {
                writeln!(
                    f,
                    "catalog written to {} ({} SKUs, regions: {})",
                    summary.path,
                    summary.total_skus,
                    summary.regions.join(", ")
                )?;
                for service in &summary.services {
                    writeln!(f, "  {} {}: {} SKUs", service.service_id, service.display_name, service.skus)?;
                    for (family, count) in &service.summary {
                        writeln!(f, "    {family}: {count}")?;
                    }
                }
                for service_id in &summary.failed_services {
                    writeln!(f, "  {service_id}: FAILED")?;
                }
                Ok(())
            }
            CommandReport::CreatePrices(report) => write!(f, "prices\n{report}"),
            CommandReport::CreateBundles(report) => write!(f, "price sets\n{report}"),
            CommandReport::Sync(run) => write!(f, "prices\n{}\nprice sets\n{}", run.prices, run.bundles),
            CommandReport::CreatePlans(report) => write!(f, "service plans\n{report}"),
            CommandReport::Map(report) => {
                writeln!(
                    f,
                    "plans updated: {}  already linked: {}  unmapped: {}  failed: {}",
                    report.updated,
                    report.already_linked,
                    report.unmapped,
                    report.failures.len()
                )?;
                for link in &report.links {
                    if let domain_price_bundles::LinkAction::Unmapped { reason } = &link.action {
                        writeln!(f, "  {}: {}", link.plan_name, reason)?;
                    }
                }
                for failure in &report.failures {
                    writeln!(f, "  {}: FAILED {}", failure.code, failure.reason)?;
                }
                Ok(())
            }
            CommandReport::Validate(validation) => {
                writeln!(f, "priced: {} of {} plans", validation.priced, validation.total)?;
                if !validation.unpriced.is_empty() {
                    writeln!(f, "not priced:")?;
                    for name in &validation.unpriced {
                        writeln!(f, "  {name}")?;
                    }
                }
                Ok(())
            }
        }
    }
}

fn record_plan_metrics(plan: &RunPlan) {
    SyncMetrics::set_catalog_records(plan.classification.total_records);
    for entry in &plan.classification.entries {
        SyncMetrics::record_classification(&entry.axis.to_string());
    }
    for failure in &plan.classification.failures {
        SyncMetrics::record_classification_failure(failure.reason());
    }
}

fn record_price_metrics(report: &SyncReport) {
    for item in &report.outcomes {
        SyncMetrics::record_price_outcome(item.outcome.label());
    }
    SyncMetrics::record_retries("prices", u64::from(report.retries));
}

fn record_bundle_metrics(report: &SyncReport) {
    for item in &report.outcomes {
        let bundle_type = item.bundle_type.map(|t| t.to_string()).unwrap_or_default();
        SyncMetrics::record_bundle_outcome(item.outcome.label(), &bundle_type);
    }
    SyncMetrics::record_retries("bundles", u64::from(report.retries));
    SyncMetrics::set_coverage(report.coverage_percent);
}

fn record_service_plan_metrics(report: &SyncReport) {
    for item in &report.outcomes {
        SyncMetrics::record_service_plan_outcome(item.outcome.label());
    }
    SyncMetrics::record_retries("service_plans", u64::from(report.retries));
}

/// Runs price sync commands
pub struct PriceSync {
    config: Config,
    /// Fetch SKUs from the billing API even when a cache file exists
    live: bool,
    store: Option<Arc<dyn PricingStore>>,
}

impl PriceSync {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            live: false,
            store: None,
        }
    }

    pub fn with_live_catalog(mut self, live: bool) -> Self {
        self.live = live;
        self
    }

    /// Use `store` instead of the configured Morpheus appliance
    pub fn with_store(mut self, store: Arc<dyn PricingStore>) -> Self {
        self.store = Some(store);
        self
    }

    fn store(&self, offline_ok: bool) -> Result<Arc<dyn PricingStore>> {
        if let Some(store) = &self.store {
            return Ok(store.clone());
        }
        match &self.config.morpheus {
            Some(morpheus) => Ok(Arc::new(MorpheusStore::new(morpheus)?)),
            None if offline_ok => {
                info!("Morpheus not configured, running offline");
                Ok(Arc::new(UnconfiguredStore))
            }
            None => Err(ProviderError::NotConfigured(
                "set MORPHEUS_URL and MORPHEUS_TOKEN".to_string(),
            )
            .into()),
        }
    }

    fn service(&self, offline_ok: bool) -> Result<SyncService> {
        Ok(SyncService::new(self.store(offline_ok)?, self.config.sync.clone()))
    }

    async fn gcp_client(&self) -> Result<GcpCatalogClient> {
        let token = resolve_access_token(self.config.gcp.access_token.as_deref()).await?;
        Ok(GcpCatalogClient::new(&self.config.gcp.api_base, token)?)
    }

    /// Records from the cache file, or from the billing API when there is none
    async fn records(&self, service: &SyncService) -> Result<Vec<RawSkuRecord>> {
        let path = &self.config.sku_cache_file;
        let cached = !self.live && tokio::fs::try_exists(path).await.unwrap_or(false);

        if cached {
            let catalog = CachedCatalog::load(path).await?;
            let age = Utc::now() - catalog.metadata.downloaded_at;
            if age.num_days() > STALE_CACHE_DAYS {
                warn!(
                    path = %path.display(),
                    age_days = age.num_days(),
                    "SKU cache is stale, consider running discover again"
                );
            }
            let missing: Vec<&String> = self
                .config
                .sync
                .regions
                .iter()
                .filter(|r| !catalog.metadata.regions.is_empty() && !catalog.metadata.regions.contains(r))
                .collect();
            if !missing.is_empty() {
                warn!(regions = ?missing, "SKU cache was downloaded without these regions");
            }

            info!(path = %path.display(), skus = catalog.metadata.total_skus, "Using cached SKU catalog");
            let service_ids: Vec<String> = catalog.service_ids().map(str::to_string).collect();
            return Ok(service.load_records(&catalog, &service_ids).await?);
        }

        info!("Fetching Compute Engine SKUs from the billing API");
        let client = self.gcp_client().await?;
        Ok(service
            .load_records(&client, &[COMPUTE_ENGINE_SERVICE_ID.to_string()])
            .await?)
    }

    async fn plan(&self, service: &SyncService) -> Result<RunPlan> {
        let records = self.records(service).await?;
        let plan = service.plan(&records);
        record_plan_metrics(&plan);
        Ok(plan)
    }

    /// Download the catalog for the configured regions into the cache file
    pub async fn discover(&self, service_ids: &[String], all: bool) -> Result<CommandReport> {
        let client = self.gcp_client().await?;
        let regions = self.config.sync.regions.clone();

        let listed = match client.list_services().await {
            Ok(listed) => listed,
            Err(err) if !all => {
                warn!(error = %err, "Could not list billing services, using ids as names");
                Vec::new()
            }
            Err(err) => return Err(err.into()),
        };

        let wanted: Vec<GcpService> = if all {
            listed
        } else {
            service_ids
                .iter()
                .map(|id| {
                    listed.iter().find(|s| &s.service_id == id).cloned().unwrap_or_else(|| GcpService {
                        service_id: id.clone(),
                        display_name: id.clone(),
                    })
                })
                .collect()
        };

        let retry = &self.config.sync.retry;
        let client = &client;
        let regions_ref = &regions;
        let fetches: Vec<_> = stream::iter(wanted)
            .map(|svc| async move {
                let result = collect_records(client, &svc.service_id, regions_ref, retry).await;
                (svc, result)
            })
            .buffer_unordered(self.config.sync.concurrency)
            .collect()
            .await;

        let mut catalog = CachedCatalog::new(regions.clone());
        let mut retries = 0;
        let mut failed_services = Vec::new();
        for (svc, result) in fetches {
            match result {
                Ok(fetch) => {
                    retries += fetch.retries;
                    catalog.insert_service(svc.service_id, CachedService::new(svc.display_name, fetch.records));
                }
                // a comprehensive download keeps going past broken services
                Err(err) if all => {
                    warn!(service_id = %svc.service_id, error = %err, "Skipping service");
                    failed_services.push(svc.service_id);
                }
                Err(err) => return Err(err.into()),
            }
        }
        failed_services.sort();

        catalog.save(&self.config.sku_cache_file).await?;
        info!(
            path = %self.config.sku_cache_file.display(),
            services = catalog.metadata.total_services,
            skus = catalog.metadata.total_skus,
            "SKU catalog saved"
        );
        SyncMetrics::set_catalog_records(catalog.metadata.total_skus);

        let services = catalog
            .services
            .iter()
            .map(|(id, service)| DiscoveredService {
                service_id: id.clone(),
                display_name: service.display_name.clone(),
                skus: service.skus.len(),
                summary: service.summary.clone(),
            })
            .collect();

        Ok(CommandReport::Discover(DiscoverSummary {
            path: self.config.sku_cache_file.display().to_string(),
            regions,
            services,
            total_skus: catalog.metadata.total_skus,
            retries,
            failed_services,
        }))
    }

    pub async fn create_prices(&self, dry_run: bool) -> Result<CommandReport> {
        let service = self.service(dry_run)?;
        let plan = self.plan(&service).await?;
        let report = service.create_prices(&plan, dry_run).await;
        record_price_metrics(&report);
        Ok(CommandReport::CreatePrices(report))
    }

    pub async fn create_bundles(&self, dry_run: bool) -> Result<CommandReport> {
        let service = self.service(dry_run)?;
        let plan = self.plan(&service).await?;
        let report = service.create_bundles(&plan, dry_run).await;
        record_bundle_metrics(&report);
        Ok(CommandReport::CreateBundles(report))
    }

    /// Prices, then price sets
    pub async fn sync(&self, dry_run: bool) -> Result<CommandReport> {
        let service = self.service(dry_run)?;
        let plan = self.plan(&service).await?;
        let run = service.sync(&plan, dry_run).await;
        record_price_metrics(&run.prices);
        record_bundle_metrics(&run.bundles);
        Ok(CommandReport::Sync(run))
    }

    /// One service plan per family price set; the price sets must exist
    pub async fn create_plans(&self, dry_run: bool) -> Result<CommandReport> {
        let service = self.service(dry_run)?;
        let plan = self.plan(&service).await?;
        let report = service.create_plans(&plan, dry_run).await;
        record_service_plan_metrics(&report);
        Ok(CommandReport::CreatePlans(report))
    }

    /// Link service plans to the price sets of their family and region
    pub async fn map(&self, dry_run: bool) -> Result<CommandReport> {
        let service = self.service(false)?;
        let plan = self.plan(&service).await?;
        let report = service.map_plans(&plan.build, dry_run).await?;
        Ok(CommandReport::Map(report))
    }

    pub async fn validate(&self) -> Result<CommandReport> {
        let service = self.service(false)?;
        Ok(CommandReport::Validate(service.validate().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcpConfig;
    use core_config::Environment;
    use domain_price_bundles::testing::InMemoryPricingStore;
    use domain_price_bundles::{CategoryHints, RetryPolicy, ServicePlan, SyncConfig, TieredPrice};
    use serde_json::json;
    use std::path::Path;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const JAKARTA: &str = "asia-southeast2";

    fn sku(id: &str, description: &str, family: &str, group: &str, unit: &str, amount: &str) -> RawSkuRecord {
        RawSkuRecord {
            sku_id: id.to_string(),
            description: description.to_string(),
            category: CategoryHints {
                resource_family: Some(family.to_string()),
                resource_group: Some(group.to_string()),
                usage_type: Some("OnDemand".to_string()),
            },
            usage_unit: unit.to_string(),
            tiered_prices: vec![TieredPrice {
                start_usage_amount: 0.0,
                amount: amount.to_string(),
                currency: "USD".to_string(),
            }],
            regions: vec![JAKARTA.to_string()],
        }
    }

    fn config(cache: &Path, api_base: &str) -> Config {
        Config {
            environment: Environment::Development,
            morpheus: None,
            gcp: GcpConfig {
                api_base: api_base.to_string(),
                access_token: Some("test-token".to_string()),
            },
            sync: SyncConfig::default()
                .with_regions(vec![JAKARTA.to_string()])
                .with_retry(RetryPolicy::immediate(2)),
            sku_cache_file: cache.to_path_buf(),
        }
    }

    async fn write_cache(path: &Path) {
        let mut catalog = CachedCatalog::new(vec![JAKARTA.to_string()]);
        catalog.insert_service(
            COMPUTE_ENGINE_SERVICE_ID,
            CachedService::new(
                "Compute Engine",
                vec![
                    sku("N2-CORE", "N2 Instance Core running in Jakarta", "Compute", "CPU", "h", "0.0373"),
                    sku("N2-RAM", "N2 Instance Ram running in Jakarta", "Compute", "RAM", "GiBy.h", "0.005"),
                    sku("PD-STD", "Storage PD Capacity in Jakarta", "Storage", "PDStandard", "GiBy.mo", "0.048"),
                ],
            ),
        );
        catalog.save(path).await.unwrap();
    }

    #[tokio::test]
    async fn test_offline_dry_run_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("catalog.json");
        write_cache(&cache).await;

        let runner = PriceSync::new(config(&cache, "http://unused.invalid"));
        let report = runner.create_bundles(true).await.unwrap();

        let CommandReport::CreateBundles(bundles) = &report else {
            panic!("unexpected report {report:?}");
        };
        assert!(bundles.planned >= 1);
        assert!(!report.has_failures());
        assert!(report.to_string().contains("ioh-cp.gcp-n2-asia_southeast2 [component]"));
    }

    #[tokio::test]
    async fn test_writes_require_morpheus() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("catalog.json");
        write_cache(&cache).await;

        let runner = PriceSync::new(config(&cache, "http://unused.invalid"));
        let err = runner.sync(false).await.unwrap_err();
        assert!(err.to_string().contains("MORPHEUS_URL"));
        assert!(runner.validate().await.is_err());
    }

    #[tokio::test]
    async fn test_sync_map_validate_against_store() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("catalog.json");
        write_cache(&cache).await;

        let store = Arc::new(InMemoryPricingStore::new());
        store
            .insert_plan(ServicePlan {
                id: "p1".to_string(),
                name: "google-n2-standard-4".to_string(),
                zone_region: Some(JAKARTA.to_string()),
                ..Default::default()
            })
            .await;
        store
            .insert_plan(ServicePlan {
                id: "p2".to_string(),
                name: "google-t2a-standard-1".to_string(),
                zone_region: Some(JAKARTA.to_string()),
                ..Default::default()
            })
            .await;

        let runner = PriceSync::new(config(&cache, "http://unused.invalid")).with_store(store.clone());

        let sync = runner.sync(false).await.unwrap();
        assert!(!sync.has_failures());

        let map = runner.map(false).await.unwrap();
        let CommandReport::Map(mapping) = &map else {
            panic!("unexpected report {map:?}");
        };
        assert_eq!(mapping.updated, 1);
        assert_eq!(mapping.unmapped, 1);

        let validate = runner.validate().await.unwrap();
        assert!(validate.has_failures());
        assert!(validate.to_string().contains("google-t2a-standard-1"));

        let json = serde_json::to_value(&validate).unwrap();
        assert_eq!(json["command"], "validate");
        assert_eq!(json["priced"], 1);
    }

    #[tokio::test]
    async fn test_create_plans_after_sync() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("catalog.json");
        write_cache(&cache).await;

        let store = Arc::new(InMemoryPricingStore::new());
        let runner = PriceSync::new(config(&cache, "http://unused.invalid")).with_store(store.clone());

        let dry = runner.create_plans(true).await.unwrap();
        assert!(dry.to_string().contains("ioh-cp.gcp-plan-n2-asia_southeast2"));

        runner.sync(false).await.unwrap();
        let created = runner.create_plans(false).await.unwrap();
        let CommandReport::CreatePlans(report) = &created else {
            panic!("unexpected report {created:?}");
        };
        assert_eq!(report.created, 1);
        assert!(!created.has_failures());

        let json = serde_json::to_value(&created).unwrap();
        assert_eq!(json["command"], "create-plans");

        let validate = runner.validate().await.unwrap();
        assert!(!validate.has_failures());
    }

    #[tokio::test]
    async fn test_discover_writes_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "services": [{ "serviceId": COMPUTE_ENGINE_SERVICE_ID, "displayName": "Compute Engine" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/services/{COMPUTE_ENGINE_SERVICE_ID}/skus")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "skus": [{
                    "skuId": "N2-CORE",
                    "description": "N2 Instance Core running in Jakarta",
                    "category": { "resourceFamily": "Compute", "resourceGroup": "CPU", "usageType": "OnDemand" },
                    "serviceRegions": [JAKARTA],
                    "pricingInfo": [{ "pricingExpression": {
                        "usageUnit": "h",
                        "tieredRates": [{ "unitPrice": { "currencyCode": "USD", "units": "0", "nanos": 37300000 } }]
                    }}]
                }]
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("catalog.json");
        let runner = PriceSync::new(config(&cache, &server.uri()));

        let report = runner
            .discover(&[COMPUTE_ENGINE_SERVICE_ID.to_string()], false)
            .await
            .unwrap();
        assert!(!report.has_failures());
        assert!(report.to_string().contains("Compute Engine: 1 SKUs"));

        let saved = CachedCatalog::load(&cache).await.unwrap();
        assert_eq!(saved.metadata.total_skus, 1);
        assert_eq!(saved.services[COMPUTE_ENGINE_SERVICE_ID].summary["Compute"], 1);
    }
}
