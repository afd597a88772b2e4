//! Error types for the price-bundle domain
//!
//! Remote errors are categorized to determine retry behavior:
//! - **Transient**: timeouts, 5xx, retry with exponential backoff
//! - **RateLimited**: 429, retry with a longer backoff
//! - **Permanent**: validation or permission failures, surfaced immediately

use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

/// Result type for pricing store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for catalog source operations
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Result type for whole-run operations
pub type BundleResult<T> = Result<T, BundleError>;

/// Category of error for determining retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transient,
    RateLimited,
    Permanent,
}

/// Errors implement this to take part in [`crate::retry::RetryPolicy`]
pub trait Retryable {
    fn category(&self) -> ErrorCategory;
}

/// Why a single SKU was dropped during classification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassificationError {
    #[error("SKU {sku_id} has no tiered prices")]
    NoTieredPrices { sku_id: String },

    #[error("SKU {sku_id} has an invalid price amount '{amount}'")]
    InvalidAmount { sku_id: String, amount: String },

    #[error("SKU {sku_id} lists no regions")]
    NoRegions { sku_id: String },
}

impl ClassificationError {
    pub fn sku_id(&self) -> &str {
        match self {
            ClassificationError::NoTieredPrices { sku_id }
            | ClassificationError::InvalidAmount { sku_id, .. }
            | ClassificationError::NoRegions { sku_id } => sku_id,
        }
    }

    /// Short machine-readable reason, used for metric labels
    pub fn reason(&self) -> &'static str {
        match self {
            ClassificationError::NoTieredPrices { .. } => "no_tiered_prices",
            ClassificationError::InvalidAmount { .. } => "invalid_amount",
            ClassificationError::NoRegions { .. } => "no_regions",
        }
    }
}

/// Kind of failure reported by the pricing store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StoreErrorKind {
    MissingRequiredAxis,
    DuplicateCode,
    PermissionDenied,
    NotFound,
    Transient,
    RateLimited,
    Other,
}

/// Error returned by a [`crate::store::PricingStore`]
///
/// `message` carries the remote validation text verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Transient, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::RateLimited, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::NotFound, message)
    }
}

impl Retryable for StoreError {
    fn category(&self) -> ErrorCategory {
        match self.kind {
            StoreErrorKind::Transient => ErrorCategory::Transient,
            StoreErrorKind::RateLimited => ErrorCategory::RateLimited,
            _ => ErrorCategory::Permanent,
        }
    }
}

/// Errors raised while fetching or caching the billing catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Catalog request failed: {0}")]
    Http(String),

    #[error("Catalog rate limited: {0}")]
    RateLimited(String),

    #[error("Catalog authentication failed: {0}")]
    Auth(String),

    #[error("Failed to parse catalog data: {0}")]
    Parse(String),

    #[error("Unknown catalog service: {0}")]
    UnknownService(String),

    /// Any other client error; retrying will not help
    #[error("Catalog request rejected: {0}")]
    Rejected(String),

    /// A page kept failing after every retry
    #[error("Catalog paging for {service_id} gave up after {attempts} attempts: {message}")]
    Exhausted {
        service_id: String,
        attempts: u32,
        message: String,
    },

    #[error("Catalog paging for {service_id} did not terminate (cursor {cursor} repeated)")]
    CursorLoop { service_id: String, cursor: String },

    #[error("Catalog I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::Parse(err.to_string())
    }
}

impl Retryable for CatalogError {
    fn category(&self) -> ErrorCategory {
        match self {
            CatalogError::Http(_) => ErrorCategory::Transient,
            CatalogError::RateLimited(_) => ErrorCategory::RateLimited,
            _ => ErrorCategory::Permanent,
        }
    }
}

/// Run-level errors
#[derive(Debug, Error)]
pub enum BundleError {
    /// The catalog could not be read; nothing downstream is trustworthy
    #[error("Catalog source failed: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Pricing store failed: {0}")]
    Store(#[from] StoreError),
}
