//! Service plans derived from family bundles

use serde::{Deserialize, Serialize};

use crate::builder::STORAGE_BUNDLE_LABEL;
use crate::models::{GroupingKey, PriceBundleSpec, UNKNOWN_FAMILY, region_slug};

/// Desired state of one remote service plan, priced by a single bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSpec {
    pub code: String,
    /// `IOH-CP - GCP N2-asia-southeast2`; the family stays recognizable for plan mapping
    pub name: String,
    pub description: String,
    /// Machine family and region
    pub key: GroupingKey,
    /// Code of the bundle that prices the plan
    pub bundle_code: String,
}

/// Deterministic plan code, e.g. `ioh-cp.gcp-plan-n2-asia_southeast2`
pub fn plan_code(prefix: &str, key: &GroupingKey) -> String {
    format!(
        "{}.gcp-plan-{}-{}",
        prefix.to_lowercase(),
        key.label,
        region_slug(&key.region)
    )
}

impl PlanSpec {
    pub fn from_bundle(bundle: &PriceBundleSpec, prefix: &str) -> Self {
        let family = bundle.key.label.to_uppercase();
        Self {
            code: plan_code(prefix, &bundle.key),
            name: format!("{prefix} - GCP {family}-{}", bundle.key.region),
            description: format!("Google Cloud Platform {family} instance in {}", bundle.key.region),
            key: bundle.key.clone(),
            bundle_code: bundle.code.clone(),
        }
    }
}

/// One plan per machine-family bundle, sorted by code
///
/// Standalone storage bundles price no plan of their own.
pub fn plan_specs(bundles: &[PriceBundleSpec], prefix: &str) -> Vec<PlanSpec> {
    let mut specs: Vec<PlanSpec> = bundles
        .iter()
        .filter(|b| b.key.label != STORAGE_BUNDLE_LABEL && b.key.label != UNKNOWN_FAMILY)
        .map(|b| PlanSpec::from_bundle(b, prefix))
        .collect();
    specs.sort_by(|a, b| a.code.cmp(&b.code));
    specs
}
