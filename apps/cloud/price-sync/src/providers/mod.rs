//! Remote endpoints
//!
//! The GCP Cloud Billing catalog is the source of SKUs; Morpheus is the
//! pricing store that receives prices, price sets and plan links.

pub mod gcp;
pub mod morpheus;

use async_trait::async_trait;
use domain_price_bundles::{
    PlanSpec, PriceBundleSpec, PriceSpec, PricingStore, RemoteBundle, RemotePrice, RemotePriceReference, ServicePlan,
    StoreError, StoreErrorKind, StoreResult,
};
use thiserror::Error;

pub use gcp::GcpCatalogClient;
pub use morpheus::MorpheusStore;

/// Error type for building provider clients
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP client could not be built: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Stand-in store for offline dry runs; every call fails
pub struct UnconfiguredStore;

impl UnconfiguredStore {
    fn error<T>() -> StoreResult<T> {
        Err(StoreError::new(
            StoreErrorKind::Other,
            "Morpheus is not configured (set MORPHEUS_URL and MORPHEUS_TOKEN)",
        ))
    }
}

#[async_trait]
impl PricingStore for UnconfiguredStore {
    async fn find_bundles_by_code(&self, _code: &str) -> StoreResult<Vec<RemoteBundle>> {
        Self::error()
    }

    async fn create_bundle(&self, _spec: &PriceBundleSpec) -> StoreResult<RemotePriceReference> {
        Self::error()
    }

    async fn update_bundle(&self, _id: &str, _spec: &PriceBundleSpec) -> StoreResult<RemotePriceReference> {
        Self::error()
    }

    async fn find_prices_by_code(&self, _code: &str) -> StoreResult<Vec<RemotePrice>> {
        Self::error()
    }

    async fn create_price(&self, _spec: &PriceSpec) -> StoreResult<RemotePriceReference> {
        Self::error()
    }

    async fn update_price(&self, _id: &str, _spec: &PriceSpec) -> StoreResult<RemotePriceReference> {
        Self::error()
    }

    async fn list_service_plans(&self) -> StoreResult<Vec<ServicePlan>> {
        Self::error()
    }

    async fn update_plan_bundles(&self, _plan_id: &str, _bundle_ids: &[String]) -> StoreResult<()> {
        Self::error()
    }

    async fn find_plans_by_code(&self, _code: &str) -> StoreResult<Vec<ServicePlan>> {
        Self::error()
    }

    async fn create_plan(&self, _spec: &PlanSpec) -> StoreResult<RemotePriceReference> {
        Self::error()
    }
}

/// Remote ids arrive as JSON numbers or strings
pub(crate) fn id_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
