//! Configuration for the price sync

use core_config::{
    ConfigError, Environment, FromEnv, env_bool, env_list, env_optional, env_or_default, env_parse,
    env_required,
};
use domain_price_bundles::{RetryPolicy, StoragePooling, SyncConfig};
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_GCP_BILLING_API: &str = "https://cloudbilling.googleapis.com/v1";

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    /// Present only when `MORPHEUS_URL` is set; `discover` runs without it
    pub morpheus: Option<MorpheusConfig>,
    pub gcp: GcpConfig,
    pub sync: SyncConfig,
    /// Catalog document written by `discover` and read by the other commands
    pub sku_cache_file: PathBuf,
}

#[derive(Clone)]
pub struct MorpheusConfig {
    pub url: String,
    pub token: String,
    /// Accept self-signed appliance certificates
    pub insecure_tls: bool,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for MorpheusConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MorpheusConfig")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("insecure_tls", &self.insecure_tls)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl FromEnv for MorpheusConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            url: env_required("MORPHEUS_URL")?.trim_end_matches('/').to_string(),
            token: env_required("MORPHEUS_TOKEN")?,
            insecure_tls: env_bool("MORPHEUS_INSECURE_TLS", false)?,
            timeout_secs: env_parse("MORPHEUS_TIMEOUT_SECS", 30)?,
        })
    }
}

#[derive(Clone)]
pub struct GcpConfig {
    pub api_base: String,
    /// Falls back to `gcloud auth print-access-token` when unset
    pub access_token: Option<String>,
}

impl std::fmt::Debug for GcpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpConfig")
            .field("api_base", &self.api_base)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl FromEnv for GcpConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_base: env_or_default("GCP_BILLING_API", DEFAULT_GCP_BILLING_API)
                .trim_end_matches('/')
                .to_string(),
            access_token: env_optional("GCP_ACCESS_TOKEN"),
        })
    }
}

fn sync_config_from_env() -> Result<SyncConfig, ConfigError> {
    let pooling_raw = env_or_default("STORAGE_POOLING", "region");
    let storage_pooling = StoragePooling::from_str(pooling_raw.trim()).map_err(|_| ConfigError::ParseError {
        key: "STORAGE_POOLING".to_string(),
        details: format!("'{pooling_raw}' is not one of region, family"),
    })?;

    let max_attempts: u32 = env_parse("SYNC_MAX_ATTEMPTS", RetryPolicy::default().max_attempts)?;
    let base_delay_ms: u64 = env_parse("SYNC_RETRY_BASE_MS", RetryPolicy::default().base_delay_ms)?;

    Ok(SyncConfig::new(env_or_default("PRICE_PREFIX", "IOH-CP"))
        .with_regions(env_list("GCP_REGIONS", "asia-southeast2"))
        .with_usage_types(env_list("GCP_USAGE_TYPES", "OnDemand"))
        .with_storage_pooling(storage_pooling)
        .with_fixed_fallback(env_bool("ALLOW_FIXED_FALLBACK", true)?)
        .with_standalone_storage_bundles(env_bool("STANDALONE_STORAGE_BUNDLES", true)?)
        .with_concurrency(env_parse("SYNC_CONCURRENCY", 4)?)
        .with_retry(RetryPolicy::new(max_attempts).with_base_delay_ms(base_delay_ms)))
}

impl FromEnv for Config {
    fn from_env() -> Result<Self, ConfigError> {
        let morpheus = match env_optional("MORPHEUS_URL") {
            Some(_) => Some(MorpheusConfig::from_env()?),
            None => None,
        };

        Ok(Self {
            environment: Environment::from_env(),
            morpheus,
            gcp: GcpConfig::from_env()?,
            sync: sync_config_from_env()?,
            sku_cache_file: PathBuf::from(env_or_default("SKU_CACHE_FILE", "gcp_sku_catalog.json")),
        })
    }
}

impl Config {
    /// Apply command line overrides on top of the environment
    pub fn with_overrides(mut self, regions: Option<Vec<String>>, prefix: Option<String>) -> Self {
        if let Some(regions) = regions.filter(|r| !r.is_empty()) {
            self.sync = self.sync.with_regions(regions);
        }
        if let Some(prefix) = prefix {
            self.sync.prefix = prefix;
        }
        self
    }
}
