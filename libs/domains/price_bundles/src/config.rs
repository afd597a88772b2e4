//! Explicit configuration for the sync engine
//!
//! Nothing in this crate reads process environment; callers build a
//! [`SyncConfig`] and hand it to each component's constructor.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::retry::RetryPolicy;

/// Scope from which storage entries are pooled into compute bundles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StoragePooling {
    /// Every storage entry in a region joins every family bundle of that region
    #[default]
    Region,
    /// Storage entries join only the bundle of the family they mention
    Family,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Prefix for remote names and codes, e.g. `IOH-CP`
    pub prefix: String,
    /// Client-side region filter; empty keeps every region
    pub regions: Vec<String>,
    /// Usage types (`OnDemand`, `Preemptible`, ...) kept by the classifier; empty keeps all
    pub usage_types: Vec<String>,
    pub storage_pooling: StoragePooling,
    /// Demote incomplete bundles to `fixed` instead of failing them
    pub allow_fixed_fallback: bool,
    /// Emit one standalone `fixed` storage bundle per region
    pub standalone_storage_bundles: bool,
    /// Maximum concurrent remote writes
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            prefix: "IOH-CP".to_string(),
            regions: Vec::new(),
            usage_types: vec!["OnDemand".to_string()],
            storage_pooling: StoragePooling::default(),
            allow_fixed_fallback: true,
            standalone_storage_bundles: true,
            concurrency: 4,
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    pub fn with_regions(mut self, regions: Vec<String>) -> Self {
        self.regions = regions;
        self
    }

    pub fn with_usage_types(mut self, usage_types: Vec<String>) -> Self {
        self.usage_types = usage_types;
        self
    }

    pub fn with_storage_pooling(mut self, pooling: StoragePooling) -> Self {
        self.storage_pooling = pooling;
        self
    }

    pub fn with_fixed_fallback(mut self, allow: bool) -> Self {
        self.allow_fixed_fallback = allow;
        self
    }

    pub fn with_standalone_storage_bundles(mut self, enabled: bool) -> Self {
        self.standalone_storage_bundles = enabled;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.prefix, "IOH-CP");
        assert_eq!(config.storage_pooling, StoragePooling::Region);
        assert!(config.allow_fixed_fallback);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_builder_clamps_concurrency() {
        let config = SyncConfig::new("ACME").with_concurrency(0);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.prefix, "ACME");
    }

    #[test]
    fn test_storage_pooling_parses_case_insensitively() {
        assert_eq!(StoragePooling::from_str("Family").unwrap(), StoragePooling::Family);
        assert_eq!(StoragePooling::from_str("region").unwrap(), StoragePooling::Region);
        assert!(StoragePooling::from_str("zone").is_err());
    }
}
