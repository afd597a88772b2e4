use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::builder::{BuildOutput, BundleBuilder};
use crate::catalog::{CatalogSource, collect_records};
use crate::classifier::{ClassificationOutcome, Classifier};
use crate::config::SyncConfig;
use crate::error::BundleResult;
use crate::mapping::{BundleIndex, IndexedBundle, LinkAction, PlanLink, PlanValidation, plan_links, validate_plans};
use crate::models::RawSkuRecord;
use crate::plans::{PlanSpec, plan_specs};
use crate::prices::{PriceSpec, price_specs};
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::report::{FailureEntry, SyncReport, summarize};
use crate::store::PricingStore;

/// Pure part of a run: classification plus bundle composition
#[derive(Debug, Clone, Default)]
pub struct RunPlan {
    pub classification: ClassificationOutcome,
    pub build: BuildOutput,
}

/// Reports of a full sync: prices first, then bundles
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncRun {
    pub prices: SyncReport,
    pub bundles: SyncReport,
}

impl SyncRun {
    pub fn has_failures(&self) -> bool {
        self.prices.has_failures() || self.bundles.has_failures()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MappingReport {
    pub links: Vec<PlanLink>,
    pub updated: usize,
    pub already_linked: usize,
    pub unmapped: usize,
    pub failures: Vec<FailureEntry>,
}

impl MappingReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Orchestrates catalog → classifier → builder → reconciler → report
pub struct SyncService {
    config: SyncConfig,
    store: Arc<dyn PricingStore>,
    classifier: Classifier,
    builder: BundleBuilder,
    reconciler: Reconciler,
}

impl SyncService {
    pub fn new(store: Arc<dyn PricingStore>, config: SyncConfig) -> Self {
        let classifier = Classifier::new(config.regions.clone()).with_usage_types(config.usage_types.clone());
        let builder = BundleBuilder::new(&config);
        let reconciler = Reconciler::new(store.clone(), &config);
        Self {
            config,
            store,
            classifier,
            builder,
            reconciler,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Fetch every page of each service; a failing service aborts the run
    pub async fn load_records(
        &self,
        source: &dyn CatalogSource,
        service_ids: &[String],
    ) -> BundleResult<Vec<RawSkuRecord>> {
        let mut records = Vec::new();
        for service_id in service_ids {
            let fetch = collect_records(source, service_id, &self.config.regions, &self.config.retry).await?;
            records.extend(fetch.records);
        }
        Ok(records)
    }

    /// Classify and compose; no remote calls
    pub fn plan(&self, records: &[RawSkuRecord]) -> RunPlan {
        let classification = self.classifier.classify_all(records);
        let build = self.builder.build(&classification.entries);

        info!(
            records = classification.total_records,
            entries = classification.entries.len(),
            classification_failures = classification.failures.len(),
            bundles = build.bundles.len(),
            demoted = build.demoted.len(),
            rejected = build.rejected.len(),
            "Planned price bundles"
        );

        RunPlan { classification, build }
    }

    /// Prices for every entry that made it into a bundle
    pub fn price_specs(&self, plan: &RunPlan) -> Vec<PriceSpec> {
        price_specs(&plan.build.attached, &self.config.prefix)
    }

    pub async fn create_prices(&self, plan: &RunPlan, dry_run: bool) -> SyncReport {
        let specs = self.price_specs(plan);
        let outcomes = if dry_run {
            specs.iter().map(ReconcileOutcome::planned_price).collect()
        } else {
            self.reconciler.reconcile_prices(&specs).await
        };
        summarize(&outcomes).with_classification(&plan.classification)
    }

    pub async fn create_bundles(&self, plan: &RunPlan, dry_run: bool) -> SyncReport {
        let mut outcomes: Vec<ReconcileOutcome> = if dry_run {
            plan.build.bundles.iter().map(ReconcileOutcome::planned).collect()
        } else {
            self.reconciler.reconcile_bundles(&plan.build.bundles).await
        };
        outcomes.extend(plan.build.rejected.iter().map(ReconcileOutcome::rejected));

        summarize(&outcomes)
            .with_coverage(&plan.build)
            .with_classification(&plan.classification)
    }

    /// Prices then bundles
    pub async fn sync(&self, plan: &RunPlan, dry_run: bool) -> SyncRun {
        let prices = self.create_prices(plan, dry_run).await;
        let bundles = self.create_bundles(plan, dry_run).await;
        SyncRun { prices, bundles }
    }

    /// One service plan per machine-family bundle
    pub fn plan_specs(&self, plan: &RunPlan) -> Vec<PlanSpec> {
        plan_specs(&plan.build.bundles, &self.config.prefix)
    }

    /// Create missing service plans; their bundles must already exist
    pub async fn create_plans(&self, plan: &RunPlan, dry_run: bool) -> SyncReport {
        let specs = self.plan_specs(plan);
        let outcomes: Vec<ReconcileOutcome> = if dry_run {
            specs.iter().map(ReconcileOutcome::planned_plan).collect()
        } else {
            self.reconciler.reconcile_plans(&specs).await
        };
        summarize(&outcomes)
    }

    /// Remote ids of the planned bundles that exist exactly once
    pub async fn bundle_index(&self, build: &BuildOutput) -> BundleIndex {
        let lookups: Vec<_> = stream::iter(&build.bundles)
            .map(|spec| async move {
                let retried = self
                    .config
                    .retry
                    .run("find_bundles_by_code", || self.store.find_bundles_by_code(&spec.code))
                    .await;
                (spec, retried.result)
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        let mut index = BundleIndex::new();
        for (spec, result) in lookups {
            match result {
                Ok(found) if found.len() == 1 => {
                    index.insert(
                        spec.code.clone(),
                        IndexedBundle {
                            id: found[0].reference.id.clone(),
                            bundle_type: spec.bundle_type,
                        },
                    );
                }
                Ok(found) => warn!(code = %spec.code, matches = found.len(), "Bundle not linkable"),
                Err(err) => warn!(code = %spec.code, error = %err, "Bundle lookup failed"),
            }
        }
        index
    }

    /// Link service plans to the bundles of their family and region
    pub async fn map_plans(&self, build: &BuildOutput, dry_run: bool) -> BundleResult<MappingReport> {
        let plans = self
            .config
            .retry
            .run("list_service_plans", || self.store.list_service_plans())
            .await
            .result?;
        let index = self.bundle_index(build).await;
        let links = plan_links(&plans, &index, &self.config.prefix);

        let mut report = MappingReport::default();
        for link in &links {
            match &link.action {
                LinkAction::AlreadyLinked => report.already_linked += 1,
                LinkAction::Unmapped { reason } => {
                    info!(plan = %link.plan_name, reason = %reason, "Plan left unmapped");
                    report.unmapped += 1;
                }
                LinkAction::Update { .. } if dry_run => report.updated += 1,
                LinkAction::Update { bundle_ids } => {
                    let retried = self
                        .config
                        .retry
                        .run("update_plan_bundles", || {
                            self.store.update_plan_bundles(&link.plan_id, bundle_ids)
                        })
                        .await;
                    match retried.result {
                        Ok(()) => {
                            info!(plan = %link.plan_name, bundles = bundle_ids.len(), "Linked plan");
                            report.updated += 1;
                        }
                        Err(err) => {
                            warn!(plan = %link.plan_name, error = %err, "Plan update failed");
                            report.failures.push(FailureEntry {
                                code: link.plan_name.clone(),
                                reason: err.to_string(),
                            });
                        }
                    }
                }
            }
        }

        report.links = links;
        Ok(report)
    }

    pub async fn validate(&self) -> BundleResult<PlanValidation> {
        let plans = self
            .config
            .retry
            .run("list_service_plans", || self.store.list_service_plans())
            .await
            .result?;
        Ok(validate_plans(&plans))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogPage, MockCatalogSource};
    use crate::error::{CatalogError, StoreError};
    use crate::models::{BundleType, CategoryHints, ServicePlan, TieredPrice};
    use crate::reconciler::Outcome;
    use crate::retry::RetryPolicy;
    use crate::testing::InMemoryPricingStore;

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

    fn catalog() -> Vec<RawSkuRecord> {
        vec![
            sku("N2-CORE", "N2 Instance Core running in Jakarta", "Compute", "CPU", "h", "0.0373"),
            sku("N2-RAM", "N2 Instance Ram running in Jakarta", "Compute", "RAM", "GiBy.h", "0.005"),
            sku("C2-CORE", "Compute optimized Core running in Jakarta", "Compute", "CPU", "h", "0.0413"),
            sku("PD-SSD", "SSD backed PD Capacity in Jakarta", "Storage", "SSD", "GiBy.mo", "0.221"),
            sku("EGRESS", "Network Internet Egress from Jakarta", "Network", "Egress", "GiBy", "0.12"),
            sku("BROKEN", "N2 Instance Core running in Jakarta", "Compute", "CPU", "h", "n/a"),
        ]
    }

    fn service(store: Arc<InMemoryPricingStore>) -> SyncService {
        let config = SyncConfig::default()
            .with_regions(vec![JAKARTA.to_string()])
            .with_retry(RetryPolicy::immediate(3));
        SyncService::new(store, config)
    }

    #[tokio::test]
    async fn test_full_sync_then_rerun_is_idempotent() {
        let store = Arc::new(InMemoryPricingStore::new());
        let service = service(store.clone());
        let plan = service.plan(&catalog());

        let first = service.sync(&plan, false).await;
        assert!(!first.has_failures());
        assert_eq!(first.bundles.created, 3);
        assert_eq!(first.prices.created, 4);
        assert_eq!(first.bundles.classification_failures, 1);
        assert_eq!(first.bundles.coverage_gaps, vec!["ioh-cp.gcp-c2-asia_southeast2"]);
        // egress is classified but never attached
        assert_eq!(first.bundles.attached_entries, 4);
        assert_eq!(first.bundles.total_entries, 5);

        let second = service.sync(&service.plan(&catalog()), false).await;
        assert_eq!(second.bundles.skipped, 3);
        assert_eq!(second.prices.skipped, 4);
        assert_eq!(second.bundles.created + second.bundles.updated, 0);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let store = Arc::new(InMemoryPricingStore::new());
        let service = service(store.clone());
        let plan = service.plan(&catalog());

        let run = service.sync(&plan, true).await;
        assert_eq!(run.bundles.planned, 3);
        assert!(run.bundles.to_string().contains("ioh-cp.gcp-n2-asia_southeast2 [component]"));
        assert_eq!(store.write_count().await, 0);
    }

    #[tokio::test]
    async fn test_rejected_bundles_are_failures_when_fallback_disabled() {
        let store = Arc::new(InMemoryPricingStore::new());
        let config = SyncConfig::default()
            .with_fixed_fallback(false)
            .with_retry(RetryPolicy::immediate(1));
        let service = SyncService::new(store, config);

        let report = service.create_bundles(&service.plan(&catalog()), false).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].code, "ioh-cp.gcp-c2-asia_southeast2");
        assert!(report.failures[0].reason.contains("missing memory"));
    }

    #[tokio::test]
    async fn test_map_links_plans_and_validate_counts_them() {
        let store = Arc::new(InMemoryPricingStore::new());
        let service = service(store.clone());
        let plan = service.plan(&catalog());
        service.sync(&plan, false).await;

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
                name: "c2-standard-8".to_string(),
                availability_zone: Some("asia-southeast2-b".to_string()),
                ..Default::default()
            })
            .await;
        store
            .insert_plan(ServicePlan {
                id: "p3".to_string(),
                name: "a2-highgpu-1g".to_string(),
                region: Some(JAKARTA.to_string()),
                ..Default::default()
            })
            .await;

        let mapping = service.map_plans(&plan.build, false).await.unwrap();
        assert_eq!(mapping.updated, 2);
        assert_eq!(mapping.unmapped, 1);

        let plans = store.plans().await;
        let c2 = plans.iter().find(|p| p.id == "p2").unwrap();
        // fixed family bundle plus the standalone storage bundle
        assert_eq!(c2.bundle_ids.len(), 2);

        let again = service.map_plans(&plan.build, false).await.unwrap();
        assert_eq!(again.already_linked, 2);
        assert_eq!(again.updated, 0);

        let validation = service.validate().await.unwrap();
        assert_eq!(validation.priced, 2);
        assert_eq!(validation.unpriced, vec!["a2-highgpu-1g"]);
    }

    #[tokio::test]
    async fn test_create_plans_for_family_bundles() {
        let store = Arc::new(InMemoryPricingStore::new());
        let service = service(store.clone());
        let plan = service.plan(&catalog());

        let dry = service.create_plans(&plan, true).await;
        assert_eq!(dry.planned, 2);
        assert_eq!(store.write_count().await, 0);

        // bundles do not exist yet
        let early = service.create_plans(&plan, false).await;
        assert_eq!(early.failed, 2);
        assert!(early.failures[0].reason.contains("not-found"));

        service.sync(&plan, false).await;
        let created = service.create_plans(&plan, false).await;
        assert_eq!(created.created, 2);
        assert!(!created.has_failures());

        let plans = store.plans().await;
        let n2 = plans
            .iter()
            .find(|p| p.code == "ioh-cp.gcp-plan-n2-asia_southeast2")
            .unwrap();
        let n2_bundle = store.bundle("ioh-cp.gcp-n2-asia_southeast2").await.unwrap();
        assert_eq!(n2.bundle_ids, vec![n2_bundle.reference.id]);
        assert_eq!(n2.region.as_deref(), Some(JAKARTA));

        let again = service.create_plans(&plan, false).await;
        assert_eq!(again.skipped, 2);

        // the new plans map back onto their family bundles
        let mapping = service.map_plans(&plan.build, false).await.unwrap();
        assert_eq!(mapping.unmapped, 0);
        assert_eq!(mapping.already_linked, 1);
        assert_eq!(mapping.updated, 1);
        assert_eq!(service.validate().await.unwrap().priced, 2);
    }

    #[tokio::test]
    async fn test_transient_store_errors_are_absorbed() {
        let store = Arc::new(InMemoryPricingStore::new());
        store
            .fail_next("create_bundle", StoreError::transient("503 Service Unavailable"))
            .await;
        let service = service(store.clone());

        let report = service.create_bundles(&service.plan(&catalog()), false).await;
        assert_eq!(report.created, 3);
        assert_eq!(report.retries, 1);
        let retried: Vec<_> = report.outcomes.iter().filter(|o| o.retries == 1).collect();
        assert_eq!(retried.len(), 1);
        assert_eq!(retried[0].outcome, Outcome::Created);
        assert!(retried[0].bundle_type.is_some());
    }

    #[tokio::test]
    async fn test_catalog_failure_aborts_the_run() {
        let mut source = MockCatalogSource::new();
        source
            .expect_fetch_page()
            .returning(|_, _| Err(CatalogError::Auth("403 Forbidden".to_string())));

        let service = service(Arc::new(InMemoryPricingStore::new()));
        let result = service.load_records(&source, &["6F81-5844-456A".to_string()]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_load_records_reads_every_page() {
        let mut source = MockCatalogSource::new();
        source.expect_fetch_page().returning(|_, cursor| {
            Ok(match cursor {
                None => CatalogPage {
                    records: vec![catalog()[0].clone()],
                    next_cursor: Some("next".to_string()),
                },
                Some(_) => CatalogPage {
                    records: vec![catalog()[1].clone()],
                    next_cursor: None,
                },
            })
        });

        let service = service(Arc::new(InMemoryPricingStore::new()));
        let records = service
            .load_records(&source, &["6F81-5844-456A".to_string()])
            .await
            .unwrap();
        assert_eq!(records.len(), 2);

        let plan = service.plan(&records);
        assert_eq!(plan.build.bundles[0].bundle_type, BundleType::Fixed);
    }
}
