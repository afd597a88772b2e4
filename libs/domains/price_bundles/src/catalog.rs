//! Billing catalog access and the on-disk catalog cache

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{CatalogError, CatalogResult, ErrorCategory, Retryable};
use crate::models::RawSkuRecord;
use crate::retry::RetryPolicy;

/// Compute Engine service id in the Cloud Billing Catalog
pub const COMPUTE_ENGINE_SERVICE_ID: &str = "6F81-5844-456A";

/// One page of catalog records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogPage {
    pub records: Vec<RawSkuRecord>,
    /// `None` on the last page
    pub next_cursor: Option<String>,
}

/// Paged source of raw SKU records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetch one page for `service_id`, starting at `cursor` (`None` for the first page)
    async fn fetch_page(&self, service_id: &str, cursor: Option<String>) -> CatalogResult<CatalogPage>;
}

/// Records collected across all pages of one service
#[derive(Debug, Clone, Default)]
pub struct CatalogFetch {
    pub records: Vec<RawSkuRecord>,
    pub pages: usize,
    pub retries: u32,
    /// Records dropped by the region filter
    pub filtered_out: usize,
}

/// Page through `service_id` until the cursor runs out, keeping records for `regions`
///
/// Records without any region are kept so classification can count them.
/// A page that keeps failing after every retry aborts the whole collection.
pub async fn collect_records(
    source: &dyn CatalogSource,
    service_id: &str,
    regions: &[String],
    retry: &RetryPolicy,
) -> CatalogResult<CatalogFetch> {
    let mut fetch = CatalogFetch::default();
    let mut cursor: Option<String> = None;
    let mut seen: HashSet<String> = HashSet::new();

    loop {
        let outcome = retry
            .run("catalog.fetch_page", || source.fetch_page(service_id, cursor.clone()))
            .await;
        fetch.retries += outcome.retries;

        let page = match outcome.result {
            Ok(page) => page,
            Err(err) if err.category() == ErrorCategory::Permanent => return Err(err),
            Err(err) => {
                return Err(CatalogError::Exhausted {
                    service_id: service_id.to_string(),
                    attempts: outcome.retries + 1,
                    message: err.to_string(),
                });
            }
        };

        fetch.pages += 1;
        let before = page.records.len();
        let kept: Vec<RawSkuRecord> = page
            .records
            .into_iter()
            .filter(|r| r.regions.is_empty() || r.applies_to_any(regions))
            .collect();
        fetch.filtered_out += before - kept.len();
        fetch.records.extend(kept);

        debug!(
            service_id = %service_id,
            page = fetch.pages,
            records = fetch.records.len(),
            "Fetched catalog page"
        );

        match page.next_cursor.filter(|c| !c.is_empty()) {
            None => break,
            Some(next) => {
                if !seen.insert(next.clone()) {
                    return Err(CatalogError::CursorLoop {
                        service_id: service_id.to_string(),
                        cursor: next,
                    });
                }
                cursor = Some(next);
            }
        }
    }

    info!(
        service_id = %service_id,
        pages = fetch.pages,
        records = fetch.records.len(),
        retries = fetch.retries,
        "Collected catalog records"
    );
    Ok(fetch)
}

/// Metadata block of the cached catalog document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogMetadata {
    pub regions: Vec<String>,
    pub downloaded_at: DateTime<Utc>,
    pub total_services: usize,
    pub total_skus: usize,
}

/// SKUs of one cached service plus per-resource-family counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedService {
    pub display_name: String,
    pub skus: Vec<RawSkuRecord>,
    #[serde(default)]
    pub summary: BTreeMap<String, usize>,
}

impl CachedService {
    pub fn new(display_name: impl Into<String>, skus: Vec<RawSkuRecord>) -> Self {
        let mut summary = BTreeMap::new();
        for sku in &skus {
            let family = sku
                .category
                .resource_family
                .clone()
                .unwrap_or_else(|| "Unknown".to_string());
            *summary.entry(family).or_insert(0) += 1;
        }

        Self {
            display_name: display_name.into(),
            skus,
            summary,
        }
    }
}

/// Catalog document persisted between `discover` and the other commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedCatalog {
    pub metadata: CatalogMetadata,
    /// Keyed by service id
    pub services: BTreeMap<String, CachedService>,
}

impl CachedCatalog {
    pub fn new(regions: Vec<String>) -> Self {
        Self {
            metadata: CatalogMetadata {
                regions,
                downloaded_at: Utc::now(),
                total_services: 0,
                total_skus: 0,
            },
            services: BTreeMap::new(),
        }
    }

    pub fn insert_service(&mut self, service_id: impl Into<String>, service: CachedService) {
        self.services.insert(service_id.into(), service);
        self.metadata.total_services = self.services.len();
        self.metadata.total_skus = self.services.values().map(|s| s.skus.len()).sum();
    }

    pub fn service_ids(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    pub async fn load(path: impl AsRef<Path>) -> CatalogResult<Self> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> CatalogResult<()> {
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path.as_ref(), json).await?;
        Ok(())
    }
}

/// The cache serves each service as a single page
#[async_trait]
impl CatalogSource for CachedCatalog {
    async fn fetch_page(&self, service_id: &str, _cursor: Option<String>) -> CatalogResult<CatalogPage> {
        let service = self
            .services
            .get(service_id)
            .ok_or_else(|| CatalogError::UnknownService(service_id.to_string()))?;

        Ok(CatalogPage {
            records: service.skus.clone(),
            next_cursor: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Classifier;
    use crate::error::ClassificationError;
    use crate::models::{CategoryHints, TieredPrice};
    use mockall::predicate::eq;

    fn sku(id: &str, family: &str, region: &str) -> RawSkuRecord {
        RawSkuRecord {
            sku_id: id.to_string(),
            description: format!("{id} description"),
            category: CategoryHints {
                resource_family: Some(family.to_string()),
                resource_group: None,
                usage_type: Some("OnDemand".to_string()),
            },
            usage_unit: "h".to_string(),
            tiered_prices: vec![TieredPrice {
                start_usage_amount: 0.0,
                amount: "0.01".to_string(),
                currency: "USD".to_string(),
            }],
            regions: vec![region.to_string()],
        }
    }

    fn page(records: Vec<RawSkuRecord>, next: Option<&str>) -> CatalogPage {
        CatalogPage {
            records,
            next_cursor: next.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_collects_all_pages_and_filters_regions() {
        let mut source = MockCatalogSource::new();
        source
            .expect_fetch_page()
            .with(eq("svc"), eq(None))
            .returning(|_, _| {
                Ok(page(
                    vec![sku("A", "Compute", "asia-southeast2"), sku("B", "Compute", "us-east1")],
                    Some("p2"),
                ))
            });
        source
            .expect_fetch_page()
            .with(eq("svc"), eq(Some("p2".to_string())))
            .returning(|_, _| Ok(page(vec![sku("C", "Storage", "asia-southeast2")], None)));

        let regions = vec!["asia-southeast2".to_string()];
        let fetch = collect_records(&source, "svc", &regions, &RetryPolicy::immediate(3))
            .await
            .unwrap();

        let ids: Vec<_> = fetch.records.iter().map(|r| r.sku_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "C"]);
        assert_eq!(fetch.pages, 2);
        assert_eq!(fetch.filtered_out, 1);
    }

    #[tokio::test]
    async fn test_records_without_regions_reach_classification() {
        let mut source = MockCatalogSource::new();
        source.expect_fetch_page().returning(|_, _| {
            let mut regionless = sku("G", "Compute", "asia-southeast2");
            regionless.regions.clear();
            Ok(page(vec![regionless, sku("B", "Compute", "us-east1")], None))
        });

        let regions = vec!["asia-southeast2".to_string()];
        let fetch = collect_records(&source, "svc", &regions, &RetryPolicy::immediate(1))
            .await
            .unwrap();
        assert_eq!(fetch.records.len(), 1);
        assert_eq!(fetch.filtered_out, 1);

        let outcome = Classifier::new(regions).classify_all(&fetch.records);
        assert!(outcome.entries.is_empty());
        assert!(matches!(
            outcome.failures.as_slice(),
            [ClassificationError::NoRegions { sku_id }] if sku_id == "G"
        ));
    }

    #[tokio::test]
    async fn test_transient_page_failures_are_retried_then_exhausted() {
        let mut source = MockCatalogSource::new();
        source
            .expect_fetch_page()
            .times(3)
            .returning(|_, _| Err(CatalogError::Http("503 Service Unavailable".to_string())));

        let err = collect_records(&source, "svc", &[], &RetryPolicy::immediate(3))
            .await
            .unwrap_err();

        match err {
            CatalogError::Exhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let mut source = MockCatalogSource::new();
        source
            .expect_fetch_page()
            .times(1)
            .returning(|_, _| Err(CatalogError::Auth("401".to_string())));

        let err = collect_records(&source, "svc", &[], &RetryPolicy::immediate(5))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Auth(_)));
    }

    #[tokio::test]
    async fn test_repeated_cursor_is_detected() {
        let mut source = MockCatalogSource::new();
        source
            .expect_fetch_page()
            .returning(|_, _| Ok(page(vec![], Some("same"))));

        let err = collect_records(&source, "svc", &[], &RetryPolicy::immediate(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::CursorLoop { .. }));
    }

    #[tokio::test]
    async fn test_cached_catalog_round_trip_and_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gcp_sku_catalog.json");

        let mut catalog = CachedCatalog::new(vec!["asia-southeast2".to_string()]);
        catalog.insert_service(
            COMPUTE_ENGINE_SERVICE_ID,
            CachedService::new(
                "Compute Engine",
                vec![
                    sku("A", "Compute", "asia-southeast2"),
                    sku("B", "Compute", "asia-southeast2"),
                    sku("C", "Storage", "asia-southeast2"),
                ],
            ),
        );
        catalog.save(&path).await.unwrap();

        let loaded = CachedCatalog::load(&path).await.unwrap();
        assert_eq!(loaded, catalog);
        assert_eq!(loaded.metadata.total_skus, 3);
        assert_eq!(loaded.services[COMPUTE_ENGINE_SERVICE_ID].summary["Compute"], 2);

        let fetch = collect_records(&loaded, COMPUTE_ENGINE_SERVICE_ID, &[], &RetryPolicy::immediate(1))
            .await
            .unwrap();
        assert_eq!(fetch.records.len(), 3);

        let err = loaded.fetch_page("missing", None).await.unwrap_err();
        assert!(matches!(err, CatalogError::UnknownService(_)));
    }

    #[tokio::test]
    async fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CachedCatalog::load(dir.path().join("absent.json")).await.unwrap_err();
        assert!(matches!(err, CatalogError::Io(_)));
    }
}
