//! Price-bundle domain
//!
//! Turns a cloud billing catalog into price bundles ("price sets") that a
//! cost-management platform accepts, and syncs them idempotently.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐
//! │ CatalogSource  │  ← paged raw SKUs (HTTP client or cached document)
//! └───────┬────────┘
//!         │
//! ┌───────▼────────┐
//! │   Classifier   │  ← ordered rule cascade, one entry per region
//! └───────┬────────┘
//!         │
//! ┌───────▼────────┐
//! │ BundleBuilder  │  ← family/region grouping, completeness rule
//! └───────┬────────┘
//!         │
//! ┌───────▼────────┐
//! │   Reconciler   │  ← lookup by code, create / update / skip
//! └───────┬────────┘
//!         │
//! ┌───────▼────────┐
//! │   SyncReport   │  ← counts, failures, coverage
//! └────────────────┘
//! ```
//!
//! Classification and composition are pure. Remote access goes through the
//! [`CatalogSource`] and [`PricingStore`] traits with retries handled by
//! [`RetryPolicy`].

pub mod builder;
pub mod catalog;
pub mod classifier;
pub mod config;
pub mod error;
pub mod mapping;
pub mod models;
pub mod plans;
pub mod prices;
pub mod reconciler;
pub mod report;
pub mod retry;
pub mod service;
pub mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

// Re-export commonly used types
pub use builder::{BuildOutput, BundleBuilder, RejectedBundle};
pub use catalog::{
    COMPUTE_ENGINE_SERVICE_ID, CachedCatalog, CachedService, CatalogFetch, CatalogMetadata,
    CatalogPage, CatalogSource, collect_records,
};
pub use classifier::{ClassificationOutcome, Classifier};
pub use config::{StoragePooling, SyncConfig};
pub use error::{
    BundleError, BundleResult, CatalogError, CatalogResult, ClassificationError, ErrorCategory,
    Retryable, StoreError, StoreErrorKind, StoreResult,
};
pub use mapping::{BundleIndex, LinkAction, PlanLink, PlanValidation};
pub use models::{
    BundleAxis, BundleType, CanonicalPriceEntry, CategoryHints, GroupingKey, PriceBundleSpec,
    RawSkuRecord, RemoteBundle, RemotePrice, RemotePriceReference, ResourceAxis, ServicePlan,
    StorageVariant, TieredPrice,
};
pub use plans::PlanSpec;
pub use prices::{IncurCharges, PriceSpec, PriceType, PriceUnit};
pub use reconciler::{FailureReason, Outcome, ReconcileOutcome, Reconciler};
pub use report::{FailureEntry, SyncReport, summarize};
pub use retry::RetryPolicy;
pub use service::{MappingReport, RunPlan, SyncRun, SyncService};
pub use store::PricingStore;
