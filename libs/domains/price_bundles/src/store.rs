use async_trait::async_trait;

use crate::error::StoreResult;
use crate::models::{PriceBundleSpec, RemoteBundle, RemotePrice, RemotePriceReference, ServicePlan};
use crate::plans::PlanSpec;
use crate::prices::PriceSpec;

/// Remote pricing store (Morpheus price sets, prices and service plans)
///
/// Lookups are by code and return every match so callers can detect
/// duplicated codes. Bundle members are price codes; implementations resolve
/// them to remote ids.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PricingStore: Send + Sync {
    /// Find bundles whose code equals `code` exactly
    async fn find_bundles_by_code(&self, code: &str) -> StoreResult<Vec<RemoteBundle>>;

    /// Create a bundle with the spec's full member list
    async fn create_bundle(&self, spec: &PriceBundleSpec) -> StoreResult<RemotePriceReference>;

    /// Replace the bundle's members wholesale
    async fn update_bundle(&self, id: &str, spec: &PriceBundleSpec) -> StoreResult<RemotePriceReference>;

    /// Find prices whose code equals `code` exactly
    async fn find_prices_by_code(&self, code: &str) -> StoreResult<Vec<RemotePrice>>;

    async fn create_price(&self, spec: &PriceSpec) -> StoreResult<RemotePriceReference>;

    async fn update_price(&self, id: &str, spec: &PriceSpec) -> StoreResult<RemotePriceReference>;

    /// List the service plans bundles can be linked to
    async fn list_service_plans(&self) -> StoreResult<Vec<ServicePlan>>;

    /// Set the plan's bundle ids to exactly `bundle_ids`
    async fn update_plan_bundles(&self, plan_id: &str, bundle_ids: &[String]) -> StoreResult<()>;

    /// Find service plans whose code equals `code` exactly
    async fn find_plans_by_code(&self, code: &str) -> StoreResult<Vec<ServicePlan>>;

    /// Create a plan linked to the bundle named by `spec.bundle_code`
    async fn create_plan(&self, spec: &PlanSpec) -> StoreResult<RemotePriceReference>;
}
