use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use strum::{Display, EnumString};

/// Hours used to turn a monthly rate into an hourly one.
pub const HOURS_PER_MONTH: f64 = 730.0;

/// Structured category hints attached to a catalog SKU
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryHints {
    /// e.g. "Compute", "Storage", "Network"
    #[serde(default)]
    pub resource_family: Option<String>,
    /// e.g. "CPU", "RAM", "SSD", "PDStandard"
    #[serde(default)]
    pub resource_group: Option<String>,
    /// e.g. "OnDemand", "Preemptible", "Commit1Yr"
    #[serde(default)]
    pub usage_type: Option<String>,
}

/// One tier of a tiered unit price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TieredPrice {
    /// Usage amount at which this tier starts
    #[serde(default)]
    pub start_usage_amount: f64,
    /// Decimal amount as delivered by the catalog, e.g. "0.031611"
    pub amount: String,
    pub currency: String,
}

/// A billing catalog line item, exactly as the catalog source delivered it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSkuRecord {
    pub sku_id: String,
    pub description: String,
    #[serde(default)]
    pub category: CategoryHints,
    /// Catalog usage unit, e.g. "h", "GiBy.h", "GiBy.mo"
    pub usage_unit: String,
    #[serde(default)]
    pub tiered_prices: Vec<TieredPrice>,
    #[serde(default)]
    pub regions: Vec<String>,
}

impl RawSkuRecord {
    /// Whether the record applies to any of `regions` (an empty filter accepts everything)
    pub fn applies_to_any(&self, regions: &[String]) -> bool {
        regions.is_empty() || self.regions.iter().any(|r| regions.contains(r))
    }

    /// Whether the usage unit is billed per month rather than per hour
    pub fn is_monthly(&self) -> bool {
        let unit = self.usage_unit.to_ascii_lowercase();
        unit == "mo" || unit.ends_with(".mo") || unit.contains("month")
    }
}

/// Resource category a priced entry contributes to
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ResourceAxis {
    Core,
    Memory,
    StorageVariant,
    Network,
    Other,
}

impl ResourceAxis {
    /// Axes that are grouped by machine family
    pub fn is_compute(&self) -> bool {
        matches!(self, ResourceAxis::Core | ResourceAxis::Memory)
    }
}

/// Disk offerings recognised by the classifier
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum StorageVariant {
    PdStandard,
    PdSsd,
    PdBalanced,
    PdExtreme,
    LocalSsd,
    HyperdiskBalanced,
    HyperdiskExtreme,
    RegionalPdStandard,
    RegionalPdSsd,
}

/// A classified, region-scoped price derived from exactly one [`RawSkuRecord`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPriceEntry {
    pub sku_id: String,
    pub description: String,
    pub axis: ResourceAxis,
    /// Set only when `axis` is [`ResourceAxis::StorageVariant`]
    pub storage_variant: Option<StorageVariant>,
    /// Machine family token (`n2`, `e2`, ...); `None` is the unknown bucket
    pub family: Option<String>,
    pub region: String,
    pub hourly_price: f64,
    pub currency: String,
    /// True when the catalog billed this SKU monthly
    pub monthly_source: bool,
}

impl CanonicalPriceEntry {
    /// Stable identifier of this entry within one run
    pub fn entry_id(&self) -> String {
        format!("{}@{}", self.sku_id, self.region)
    }

    /// Label half of the grouping key
    pub fn group_label(&self) -> String {
        match (self.axis, self.storage_variant, &self.family) {
            (ResourceAxis::StorageVariant, Some(variant), _) => variant.to_string(),
            (_, _, Some(family)) => family.clone(),
            _ => UNKNOWN_FAMILY.to_string(),
        }
    }

    pub fn grouping_key(&self) -> GroupingKey {
        GroupingKey {
            label: self.group_label(),
            region: self.region.clone(),
        }
    }

    /// Remote price code for this entry, e.g. `ioh-cp.gcp.0C5C-A2D6-1E40.asia_southeast2`
    pub fn price_code(&self, prefix: &str) -> String {
        format!(
            "{}.gcp.{}.{}",
            prefix.to_lowercase(),
            self.sku_id,
            region_slug(&self.region)
        )
    }
}

/// Label used for entries whose machine family could not be determined
pub const UNKNOWN_FAMILY: &str = "unknown";

/// (family-or-subtype, region) pair used to cluster entries
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupingKey {
    pub label: String,
    pub region: String,
}

impl fmt::Display for GroupingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.label, self.region)
    }
}

/// Region codes use underscores inside remote codes
pub fn region_slug(region: &str) -> String {
    region.replace('-', "_").to_lowercase()
}

/// Remote bundle type
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BundleType {
    /// Requires core, memory and at least one storage variant
    Component,
    /// Degraded type, any non-empty subset of axes
    Fixed,
}

/// Axis present in a bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundleAxis {
    Core,
    Memory,
    Storage(StorageVariant),
}

impl fmt::Display for BundleAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BundleAxis::Core => write!(f, "core"),
            BundleAxis::Memory => write!(f, "memory"),
            BundleAxis::Storage(variant) => write!(f, "storage:{variant}"),
        }
    }
}

/// Whether an axis set satisfies the component completeness rule
pub fn is_component_complete(axes: &BTreeSet<BundleAxis>) -> bool {
    axes.contains(&BundleAxis::Core)
        && axes.contains(&BundleAxis::Memory)
        && axes.iter().any(|a| matches!(a, BundleAxis::Storage(_)))
}

/// Mandatory component axes missing from `axes`, as display labels
pub fn missing_component_axes(axes: &BTreeSet<BundleAxis>) -> Vec<String> {
    let mut missing = Vec::new();
    if !axes.contains(&BundleAxis::Core) {
        missing.push("core".to_string());
    }
    if !axes.contains(&BundleAxis::Memory) {
        missing.push("memory".to_string());
    }
    if !axes.iter().any(|a| matches!(a, BundleAxis::Storage(_))) {
        missing.push("storage".to_string());
    }
    missing
}

/// Desired state of one remote price bundle ("price set")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBundleSpec {
    /// Deterministic code derived from the grouping key
    pub code: String,
    pub name: String,
    pub bundle_type: BundleType,
    pub key: GroupingKey,
    /// Price codes of the member entries
    pub members: BTreeSet<String>,
    pub axes: BTreeSet<BundleAxis>,
}

/// Opaque remote identifier plus code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePriceReference {
    pub id: String,
    pub code: String,
}

/// A bundle as currently stored remotely
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteBundle {
    pub reference: RemotePriceReference,
    pub member_codes: BTreeSet<String>,
}

/// A price as currently stored remotely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePrice {
    pub reference: RemotePriceReference,
    pub amount: f64,
    pub price_type: String,
    pub price_unit: String,
}

/// Remote instance-size offering that bundles are linked to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePlan {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub zone_region: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub availability_zone: Option<String>,
    /// Ids of bundles already linked to the plan
    #[serde(default)]
    pub bundle_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn entry(axis: ResourceAxis, variant: Option<StorageVariant>, family: Option<&str>) -> CanonicalPriceEntry {
        CanonicalPriceEntry {
            sku_id: "ABCD-1234".to_string(),
            description: "test".to_string(),
            axis,
            storage_variant: variant,
            family: family.map(str::to_string),
            region: "asia-southeast2".to_string(),
            hourly_price: 0.1,
            currency: "USD".to_string(),
            monthly_source: false,
        }
    }

    #[test]
    fn test_storage_variant_labels() {
        assert_eq!(StorageVariant::PdSsd.to_string(), "pd-ssd");
        assert_eq!(StorageVariant::RegionalPdStandard.to_string(), "regional-pd-standard");
        assert_eq!(
            StorageVariant::from_str("hyperdisk-extreme").unwrap(),
            StorageVariant::HyperdiskExtreme
        );
        assert_eq!(ResourceAxis::StorageVariant.to_string(), "storage-variant");
    }

    #[test]
    fn test_grouping_key_uses_variant_for_storage() {
        let disk = entry(ResourceAxis::StorageVariant, Some(StorageVariant::PdBalanced), Some("n2"));
        assert_eq!(disk.group_label(), "pd-balanced");

        let core = entry(ResourceAxis::Core, None, Some("n2"));
        assert_eq!(core.grouping_key().to_string(), "n2/asia-southeast2");

        let orphan = entry(ResourceAxis::Memory, None, None);
        assert_eq!(orphan.group_label(), UNKNOWN_FAMILY);
    }

    #[test]
    fn test_price_code_is_lowercase_prefixed() {
        let core = entry(ResourceAxis::Core, None, Some("n2"));
        assert_eq!(core.price_code("IOH-CP"), "ioh-cp.gcp.ABCD-1234.asia_southeast2");
    }

    #[test]
    fn test_component_completeness() {
        let mut axes = BTreeSet::from([BundleAxis::Core, BundleAxis::Memory]);
        assert!(!is_component_complete(&axes));
        assert_eq!(missing_component_axes(&axes), vec!["storage"]);

        axes.insert(BundleAxis::Storage(StorageVariant::PdStandard));
        assert!(is_component_complete(&axes));
        assert!(missing_component_axes(&axes).is_empty());
    }

    #[test]
    fn test_monthly_unit_detection() {
        let mut record = RawSkuRecord {
            sku_id: "X".to_string(),
            description: String::new(),
            category: CategoryHints::default(),
            usage_unit: "GiBy.mo".to_string(),
            tiered_prices: vec![],
            regions: vec!["us-east1".to_string()],
        };
        assert!(record.is_monthly());
        record.usage_unit = "h".to_string();
        assert!(!record.is_monthly());
        assert!(record.applies_to_any(&[]));
        assert!(!record.applies_to_any(&["europe-west1".to_string()]));
    }
}
