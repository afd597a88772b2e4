//! GCP Cloud Billing catalog client
//!
//! Pages through the public SKU listing of a billing service.
//! https://cloud.google.com/billing/docs/reference/rest/v1/services.skus

use async_trait::async_trait;
use domain_price_bundles::{
    CatalogError, CatalogPage, CatalogResult, CatalogSource, CategoryHints, RawSkuRecord, TieredPrice,
};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info};

use super::ProviderResult;

const PAGE_SIZE: u32 = 5000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Billing service as listed by `/services`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcpService {
    pub service_id: String,
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceListResponse {
    #[serde(default)]
    services: Vec<ServiceRecord>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceRecord {
    service_id: String,
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SkuListResponse {
    #[serde(default)]
    skus: Vec<GcpSku>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcpSku {
    sku_id: String,
    #[serde(default)]
    description: String,
    category: Option<GcpCategory>,
    #[serde(default)]
    service_regions: Vec<String>,
    #[serde(default)]
    pricing_info: Vec<GcpPricingInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcpCategory {
    resource_family: Option<String>,
    resource_group: Option<String>,
    usage_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcpPricingInfo {
    pricing_expression: Option<GcpPricingExpression>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcpPricingExpression {
    #[serde(default)]
    usage_unit: String,
    #[serde(default)]
    tiered_rates: Vec<GcpTieredRate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcpTieredRate {
    #[serde(default)]
    start_usage_amount: f64,
    unit_price: Option<GcpMoney>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcpMoney {
    #[serde(default)]
    currency_code: String,
    units: Option<String>,
    nanos: Option<i64>,
}

impl GcpMoney {
    /// Decimal text of `units + nanos / 1e9`; unparseable units pass through
    /// untouched so the classifier can reject them
    fn amount(&self) -> String {
        let units = self.units.as_deref().unwrap_or("0").trim();
        let nanos = self.nanos.unwrap_or(0);
        match units.parse::<i64>() {
            Ok(units) => (units as f64 + nanos as f64 / 1e9).to_string(),
            Err(_) => units.to_string(),
        }
    }
}

impl From<GcpSku> for RawSkuRecord {
    fn from(sku: GcpSku) -> Self {
        let category = sku.category.unwrap_or_default();
        let expression = sku.pricing_info.into_iter().next().and_then(|p| p.pricing_expression);

        let (usage_unit, tiered_prices) = match expression {
            Some(expression) => {
                let tiers = expression
                    .tiered_rates
                    .into_iter()
                    .filter_map(|rate| {
                        let money = rate.unit_price?;
                        Some(TieredPrice {
                            start_usage_amount: rate.start_usage_amount,
                            amount: money.amount(),
                            currency: money.currency_code,
                        })
                    })
                    .collect();
                (expression.usage_unit, tiers)
            }
            None => (String::new(), Vec::new()),
        };

        RawSkuRecord {
            sku_id: sku.sku_id,
            description: sku.description,
            category: CategoryHints {
                resource_family: category.resource_family,
                resource_group: category.resource_group,
                usage_type: category.usage_type,
            },
            usage_unit,
            tiered_prices,
            regions: sku.service_regions,
        }
    }
}

/// Short excerpt of an error body for messages
fn excerpt(body: &str) -> String {
    body.trim().chars().take(200).collect()
}

fn status_error(status: StatusCode, body: &str) -> CatalogError {
    let detail = format!("{status}: {}", excerpt(body));
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CatalogError::Auth(detail),
        StatusCode::TOO_MANY_REQUESTS => CatalogError::RateLimited(detail),
        StatusCode::NOT_FOUND => CatalogError::UnknownService(detail),
        s if s.is_server_error() => CatalogError::Http(detail),
        _ => CatalogError::Rejected(detail),
    }
}

/// Token from configuration, otherwise from the gcloud CLI
pub async fn resolve_access_token(configured: Option<&str>) -> CatalogResult<String> {
    if let Some(token) = configured.map(str::trim).filter(|t| !t.is_empty()) {
        return Ok(token.to_string());
    }

    debug!("GCP_ACCESS_TOKEN unset, asking gcloud for a token");
    let output = tokio::process::Command::new("gcloud")
        .args(["auth", "print-access-token"])
        .output()
        .await
        .map_err(|e| CatalogError::Auth(format!("gcloud is not available: {e}")))?;

    if !output.status.success() {
        return Err(CatalogError::Auth(format!(
            "gcloud auth print-access-token failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(CatalogError::Auth("gcloud returned an empty token".to_string()));
    }
    Ok(token)
}

/// Cloud Billing catalog client
pub struct GcpCatalogClient {
    client: Client,
    base_url: String,
    access_token: String,
    currency: String,
}

impl GcpCatalogClient {
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> ProviderResult<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            currency: "USD".to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> CatalogResult<T> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| CatalogError::Http(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| CatalogError::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Every billing service, across all pages
    pub async fn list_services(&self) -> CatalogResult<Vec<GcpService>> {
        let mut services = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!("{}/services?pageSize={}", self.base_url, PAGE_SIZE);
            if let Some(token) = &page_token {
                url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
            }

            let page: ServiceListResponse = self.get_json(&url).await?;
            services.extend(page.services.into_iter().map(|s| GcpService {
                service_id: s.service_id,
                display_name: s.display_name,
            }));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) if page_token.as_deref() != Some(next.as_str()) => page_token = Some(next),
                _ => break,
            }
        }

        info!(count = services.len(), "Listed GCP billing services");
        Ok(services)
    }
}

#[async_trait]
impl CatalogSource for GcpCatalogClient {
    async fn fetch_page(&self, service_id: &str, cursor: Option<String>) -> CatalogResult<CatalogPage> {
        let mut url = format!(
            "{}/services/{}/skus?currencyCode={}&pageSize={}",
            self.base_url,
            urlencoding::encode(service_id),
            urlencoding::encode(&self.currency),
            PAGE_SIZE
        );
        if let Some(token) = &cursor {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        let page: SkuListResponse = self.get_json(&url).await?;
        debug!(service_id = %service_id, skus = page.skus.len(), "Fetched SKU page");

        Ok(CatalogPage {
            records: page.skus.into_iter().map(RawSkuRecord::from).collect(),
            next_cursor: page.next_page_token.filter(|t| !t.is_empty()),
        })
    }
}
