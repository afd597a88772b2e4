//! Morpheus pricing store
//!
//! Prices, price sets and service plans over the Morpheus REST API. Price
//! sets reference prices by id, so bundle members (price codes) are resolved
//! before every write.

use async_trait::async_trait;
use domain_price_bundles::{
    PlanSpec, PriceBundleSpec, PriceSpec, PriceType, PricingStore, RemoteBundle, RemotePrice,
    RemotePriceReference, ServicePlan, StoreError, StoreErrorKind, StoreResult,
};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

use super::{ProviderResult, id_string};
use crate::config::MorpheusConfig;

/// Provision type of the plans bundles are linked to
const PROVISION_TYPE: &str = "google";
const LIST_MAX: u32 = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceSetList {
    #[serde(default)]
    price_sets: Vec<PriceSetRecord>,
}

#[derive(Debug, Deserialize)]
struct PriceSetRecord {
    id: Value,
    #[serde(default)]
    code: String,
    #[serde(default)]
    prices: Vec<PriceRef>,
}

#[derive(Debug, Deserialize)]
struct PriceRef {
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PriceList {
    #[serde(default)]
    prices: Vec<PriceRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceRecord {
    id: Value,
    #[serde(default)]
    code: String,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    price_type: Option<String>,
    #[serde(default)]
    price_unit: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServicePlanList {
    #[serde(default)]
    service_plans: Vec<ServicePlanRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServicePlanRecord {
    id: Value,
    #[serde(default)]
    name: String,
    #[serde(default)]
    code: String,
    #[serde(default)]
    config: Option<PlanConfig>,
    /// Entries can be null in older appliances
    #[serde(default)]
    price_sets: Option<Vec<Option<IdRef>>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanConfig {
    zone_region: Option<String>,
    region: Option<String>,
    availability_zone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdRef {
    id: Value,
}

impl From<ServicePlanRecord> for ServicePlan {
    fn from(record: ServicePlanRecord) -> Self {
        let config = record.config.unwrap_or_default();
        ServicePlan {
            id: id_string(&record.id),
            name: record.name,
            code: record.code,
            zone_region: config.zone_region,
            region: config.region,
            availability_zone: config.availability_zone,
            bundle_ids: record
                .price_sets
                .unwrap_or_default()
                .into_iter()
                .flatten()
                .map(|r| id_string(&r.id))
                .collect(),
        }
    }
}

/// Numeric ids go back as numbers
fn id_value(id: &str) -> Value {
    id.parse::<i64>().map(Value::from).unwrap_or_else(|_| Value::from(id))
}

fn excerpt(body: &str) -> String {
    body.trim().chars().take(300).collect()
}

/// Map a non-success response onto the store's error kinds
///
/// Validation failures (400/422) are told apart by the message text, which
/// is kept verbatim.
pub(crate) fn status_error(status: StatusCode, body: &str) -> StoreError {
    let message = format!("{status}: {}", excerpt(body));
    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreErrorKind::PermissionDenied,
        StatusCode::NOT_FOUND => StoreErrorKind::NotFound,
        StatusCode::TOO_MANY_REQUESTS => StoreErrorKind::RateLimited,
        s if s.is_server_error() => StoreErrorKind::Transient,
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            validation_kind(body)
        }
        _ => StoreErrorKind::Other,
    };
    StoreError::new(kind, message)
}

fn validation_kind(body: &str) -> StoreErrorKind {
    let text = body.to_ascii_lowercase();
    if text.contains("unique") || text.contains("already") || text.contains("duplicate") {
        StoreErrorKind::DuplicateCode
    } else if text.contains("require") || text.contains("missing") || text.contains("must include") {
        StoreErrorKind::MissingRequiredAxis
    } else {
        StoreErrorKind::Other
    }
}

/// Timeouts and refused connections are transient; everything else is final
fn transport_error(err: reqwest::Error) -> StoreError {
    if err.is_timeout() || err.is_connect() {
        StoreError::transient(err.to_string())
    } else {
        StoreError::new(StoreErrorKind::Other, err.to_string())
    }
}

/// Morpheus REST client implementing [`PricingStore`]
pub struct MorpheusStore {
    client: Client,
    base_url: String,
    token: String,
}

impl MorpheusStore {
    pub fn new(config: &MorpheusConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.insecure_tls)
            .build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    async fn request<T: DeserializeOwned>(&self, method: Method, endpoint: &str, body: Option<Value>) -> StoreResult<T> {
        let url = format!("{}/api/{}", self.base_url, endpoint);
        debug!(method = %method, endpoint = %endpoint, "Morpheus request");

        let mut builder = self
            .client
            .request(method, &url)
            .header(AUTHORIZATION, format!("BEARER {}", self.token))
            .header(CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(status_error(status, &text));
        }

        serde_json::from_str(&text).map_err(|e| {
            StoreError::new(
                StoreErrorKind::Other,
                format!("unexpected response from {endpoint}: {e}"),
            )
        })
    }

    /// Reject `{"success": false, "msg": ...}` bodies that arrive with a 200
    fn check_success(body: &Value) -> StoreResult<()> {
        if body.get("success").and_then(Value::as_bool) == Some(false) {
            let message = body
                .get("msg")
                .or_else(|| body.get("errors"))
                .map(|m| m.as_str().map(str::to_string).unwrap_or_else(|| m.to_string()))
                .unwrap_or_else(|| body.to_string());
            return Err(StoreError::new(validation_kind(&message), message));
        }
        Ok(())
    }

    fn created_reference(body: &Value, key: &str, code: &str) -> StoreResult<RemotePriceReference> {
        Self::check_success(body)?;
        let id = body
            .get(key)
            .and_then(|record| record.get("id"))
            .or_else(|| body.get("id"))
            .ok_or_else(|| StoreError::new(StoreErrorKind::Other, format!("no {key} id in response for {code}")))?;
        Ok(RemotePriceReference {
            id: id_string(id),
            code: code.to_string(),
        })
    }

    /// Price ids for every member code; each code must exist exactly once
    async fn resolve_members(&self, spec: &PriceBundleSpec) -> StoreResult<Vec<Value>> {
        let mut ids = Vec::with_capacity(spec.members.len());
        for code in &spec.members {
            let found = self.find_prices_by_code(code).await?;
            match found.as_slice() {
                [price] => ids.push(id_value(&price.reference.id)),
                [] => {
                    return Err(StoreError::not_found(format!(
                        "price {code} for bundle {} does not exist",
                        spec.code
                    )));
                }
                _ => {
                    return Err(StoreError::new(
                        StoreErrorKind::DuplicateCode,
                        format!("price code {code} matches {} records", found.len()),
                    ));
                }
            }
        }
        Ok(ids)
    }

    async fn price_set_payload(&self, spec: &PriceBundleSpec) -> StoreResult<Value> {
        let prices: Vec<Value> = self
            .resolve_members(spec)
            .await?
            .into_iter()
            .map(|id| json!({ "id": id }))
            .collect();

        Ok(json!({
            "priceSet": {
                "name": spec.name,
                "code": spec.code,
                "type": spec.bundle_type.to_string(),
                "priceUnit": "hour",
                "regionCode": spec.key.region,
                "prices": prices,
            }
        }))
    }

    /// Id of the one price set a new plan is linked to
    async fn resolve_plan_bundle(&self, spec: &PlanSpec) -> StoreResult<Value> {
        let found = self.find_bundles_by_code(&spec.bundle_code).await?;
        match found.as_slice() {
            [bundle] => Ok(id_value(&bundle.reference.id)),
            [] => Err(StoreError::not_found(format!(
                "price set {} for plan {} does not exist",
                spec.bundle_code, spec.code
            ))),
            _ => Err(StoreError::new(
                StoreErrorKind::DuplicateCode,
                format!("price set code {} matches {} records", spec.bundle_code, found.len()),
            )),
        }
    }

    fn plan_payload(spec: &PlanSpec, price_set_id: Value) -> Value {
        json!({
            "servicePlan": {
                "name": spec.name,
                "code": spec.code,
                "description": spec.description,
                "editable": true,
                "provisionType": { "code": PROVISION_TYPE },
                "priceSets": [{ "id": price_set_id }],
                "config": {
                    "family": spec.key.label,
                    "region": spec.key.region,
                },
            }
        })
    }

    fn price_payload(spec: &PriceSpec) -> Value {
        let mut price = json!({
            "name": spec.name,
            "code": spec.code,
            "priceType": spec.price_type.to_string(),
            "priceUnit": spec.price_unit.to_string(),
            "price": spec.amount,
            "cost": spec.amount,
            "incurCharges": spec.incur_charges.to_string(),
            "currency": spec.currency,
            "active": true,
        });
        if spec.price_type == PriceType::Software {
            price["software"] = Value::from(spec.name.clone());
        }
        json!({ "price": price })
    }
}

#[async_trait]
impl PricingStore for MorpheusStore {
    async fn find_bundles_by_code(&self, code: &str) -> StoreResult<Vec<RemoteBundle>> {
        let list: PriceSetList = self
            .request(Method::GET, &format!("price-sets?code={}", urlencoding::encode(code)), None)
            .await?;

        // the code filter is not guaranteed exact
        Ok(list
            .price_sets
            .into_iter()
            .filter(|set| set.code == code)
            .map(|set| RemoteBundle {
                reference: RemotePriceReference {
                    id: id_string(&set.id),
                    code: set.code,
                },
                member_codes: set.prices.into_iter().filter_map(|p| p.code).collect(),
            })
            .collect())
    }

    async fn create_bundle(&self, spec: &PriceBundleSpec) -> StoreResult<RemotePriceReference> {
        let payload = self.price_set_payload(spec).await?;
        let body: Value = self.request(Method::POST, "price-sets", Some(payload)).await?;
        Self::created_reference(&body, "priceSet", &spec.code)
    }

    async fn update_bundle(&self, id: &str, spec: &PriceBundleSpec) -> StoreResult<RemotePriceReference> {
        let payload = self.price_set_payload(spec).await?;
        let body: Value = self
            .request(Method::PUT, &format!("price-sets/{}", urlencoding::encode(id)), Some(payload))
            .await?;
        Self::check_success(&body)?;
        Ok(RemotePriceReference {
            id: id.to_string(),
            code: spec.code.clone(),
        })
    }

    async fn find_prices_by_code(&self, code: &str) -> StoreResult<Vec<RemotePrice>> {
        let list: PriceList = self
            .request(Method::GET, &format!("prices?code={}", urlencoding::encode(code)), None)
            .await?;

        Ok(list
            .prices
            .into_iter()
            .filter(|price| price.code == code)
            .map(|price| RemotePrice {
                reference: RemotePriceReference {
                    id: id_string(&price.id),
                    code: price.code,
                },
                amount: price.price.unwrap_or_default(),
                price_type: price.price_type.unwrap_or_default(),
                price_unit: price.price_unit.unwrap_or_default(),
            })
            .collect())
    }

    async fn create_price(&self, spec: &PriceSpec) -> StoreResult<RemotePriceReference> {
        let body: Value = self
            .request(Method::POST, "prices", Some(Self::price_payload(spec)))
            .await?;
        Self::created_reference(&body, "price", &spec.code)
    }

    async fn update_price(&self, id: &str, spec: &PriceSpec) -> StoreResult<RemotePriceReference> {
        let body: Value = self
            .request(
                Method::PUT,
                &format!("prices/{}", urlencoding::encode(id)),
                Some(Self::price_payload(spec)),
            )
            .await?;
        Self::check_success(&body)?;
        Ok(RemotePriceReference {
            id: id.to_string(),
            code: spec.code.clone(),
        })
    }

    async fn list_service_plans(&self) -> StoreResult<Vec<ServicePlan>> {
        let list: ServicePlanList = self
            .request(
                Method::GET,
                &format!("service-plans?provisionTypeCode={PROVISION_TYPE}&max={LIST_MAX}"),
                None,
            )
            .await?;

        if list.service_plans.len() as u32 >= LIST_MAX {
            warn!(max = LIST_MAX, "Service plan listing hit the page limit, some plans may be missing");
        }
        Ok(list.service_plans.into_iter().map(ServicePlan::from).collect())
    }

    async fn update_plan_bundles(&self, plan_id: &str, bundle_ids: &[String]) -> StoreResult<()> {
        let price_sets: Vec<Value> = bundle_ids.iter().map(|id| json!({ "id": id_value(id) })).collect();
        let body: Value = self
            .request(
                Method::PUT,
                &format!("service-plans/{}", urlencoding::encode(plan_id)),
                Some(json!({ "servicePlan": { "priceSets": price_sets } })),
            )
            .await?;
        Self::check_success(&body)
    }

    async fn find_plans_by_code(&self, code: &str) -> StoreResult<Vec<ServicePlan>> {
        let list: ServicePlanList = self
            .request(Method::GET, &format!("service-plans?code={}", urlencoding::encode(code)), None)
            .await?;

        Ok(list
            .service_plans
            .into_iter()
            .filter(|plan| plan.code == code)
            .map(ServicePlan::from)
            .collect())
    }

    async fn create_plan(&self, spec: &PlanSpec) -> StoreResult<RemotePriceReference> {
        let price_set_id = self.resolve_plan_bundle(spec).await?;
        let body: Value = self
            .request(Method::POST, "service-plans", Some(Self::plan_payload(spec, price_set_id)))
            .await?;
        Self::created_reference(&body, "servicePlan", &spec.code)
    }
}
