//! Bundle composition
//!
//! Compute entries are grouped by (machine family, region). Storage entries
//! are pooled according to [`StoragePooling`] and attached to every family
//! bundle in scope. A bundle is emitted as `component` only when it carries
//! core, memory and at least one storage variant; otherwise it is demoted to
//! `fixed` or, when the fallback is disabled, rejected.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::config::{StoragePooling, SyncConfig};
use crate::models::{
    BundleAxis, BundleType, CanonicalPriceEntry, GroupingKey, PriceBundleSpec, ResourceAxis,
    StorageVariant, is_component_complete, missing_component_axes, region_slug,
};

/// Label of the per-region standalone storage bundle
pub const STORAGE_BUNDLE_LABEL: &str = "storage";

/// Bundle that failed the completeness rule while demotion was disabled
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedBundle {
    pub spec: PriceBundleSpec,
    pub missing: Vec<String>,
}

/// Everything the builder decided for one run
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    /// Bundles to reconcile, sorted by code
    pub bundles: Vec<PriceBundleSpec>,
    pub rejected: Vec<RejectedBundle>,
    /// Codes of bundles that were demoted from `component` to `fixed`
    pub demoted: Vec<String>,
    /// Entries that ended up in at least one emitted bundle
    pub attached: Vec<CanonicalPriceEntry>,
    /// Compute entries whose family is unknown
    pub unclassified: Vec<CanonicalPriceEntry>,
    /// Entries no bundle takes (network, other, superseded duplicates)
    pub unattached: Vec<CanonicalPriceEntry>,
    pub duplicates: usize,
    pub total_entries: usize,
}

impl BuildOutput {
    pub fn bundle(&self, code: &str) -> Option<&PriceBundleSpec> {
        self.bundles.iter().find(|b| b.code == code)
    }
}

#[derive(Debug, Default)]
struct FamilyAccumulator {
    core: Option<CanonicalPriceEntry>,
    memory: Option<CanonicalPriceEntry>,
}

impl FamilyAccumulator {
    /// Returns the entry that was replaced, if any
    fn put(&mut self, entry: CanonicalPriceEntry) -> Option<CanonicalPriceEntry> {
        let slot = match entry.axis {
            ResourceAxis::Core => &mut self.core,
            _ => &mut self.memory,
        };
        slot.replace(entry)
    }

    fn entries(&self) -> impl Iterator<Item = &CanonicalPriceEntry> {
        self.core.iter().chain(self.memory.iter())
    }
}

/// Deterministic remote code, e.g. `ioh-cp.gcp-n2-asia_southeast2`
pub fn bundle_code(prefix: &str, key: &GroupingKey) -> String {
    format!(
        "{}.gcp-{}-{}",
        prefix.to_lowercase(),
        key.label,
        region_slug(&key.region)
    )
}

#[derive(Debug, Clone)]
pub struct BundleBuilder {
    prefix: String,
    storage_pooling: StoragePooling,
    allow_fixed_fallback: bool,
    standalone_storage_bundles: bool,
}

impl BundleBuilder {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            prefix: config.prefix.clone(),
            storage_pooling: config.storage_pooling,
            allow_fixed_fallback: config.allow_fixed_fallback,
            standalone_storage_bundles: config.standalone_storage_bundles,
        }
    }

    pub fn bundle_code(&self, key: &GroupingKey) -> String {
        bundle_code(&self.prefix, key)
    }

    /// Human readable name, e.g. `IOH-CP - GCP - N2 (asia-southeast2)`
    pub fn bundle_name(&self, key: &GroupingKey) -> String {
        format!(
            "{} - GCP - {} ({})",
            self.prefix,
            key.label.to_uppercase(),
            key.region
        )
    }

    pub fn build(&self, entries: &[CanonicalPriceEntry]) -> BuildOutput {
        let mut output = BuildOutput {
            total_entries: entries.len(),
            ..Default::default()
        };

        let mut families: BTreeMap<GroupingKey, FamilyAccumulator> = BTreeMap::new();
        // region -> storage entries, in input order
        let mut storage: BTreeMap<String, Vec<CanonicalPriceEntry>> = BTreeMap::new();

        for entry in entries {
            match entry.axis {
                ResourceAxis::Core | ResourceAxis::Memory => {
                    if entry.family.is_none() {
                        output.unclassified.push(entry.clone());
                        continue;
                    }
                    let key = entry.grouping_key();
                    if let Some(previous) = families.entry(key.clone()).or_default().put(entry.clone()) {
                        warn!(
                            key = %key,
                            axis = %entry.axis,
                            kept = %entry.sku_id,
                            dropped = %previous.sku_id,
                            "Duplicate SKU for family and region, keeping the last one"
                        );
                        output.duplicates += 1;
                        output.unattached.push(previous);
                    }
                }
                ResourceAxis::StorageVariant if entry.storage_variant.is_some() => {
                    storage.entry(entry.region.clone()).or_default().push(entry.clone());
                }
                _ => output.unattached.push(entry.clone()),
            }
        }

        let mut attached: BTreeMap<String, CanonicalPriceEntry> = BTreeMap::new();
        let mut bundles = Vec::new();

        for (key, accumulator) in &families {
            let pooled = self.storage_for(key, storage.get(&key.region).map(Vec::as_slice).unwrap_or_default());
            let members: Vec<&CanonicalPriceEntry> = accumulator.entries().chain(pooled).collect();
            if members.is_empty() {
                continue;
            }

            let spec = self.compose(key.clone(), &members);
            if spec.bundle_type == BundleType::Component {
                bundles.push((spec, members));
                continue;
            }

            let missing = missing_component_axes(&spec.axes);
            if self.allow_fixed_fallback {
                debug!(code = %spec.code, missing = ?missing, "Demoting incomplete bundle to fixed");
                output.demoted.push(spec.code.clone());
                bundles.push((spec, members));
            } else {
                warn!(code = %spec.code, missing = ?missing, "Rejecting incomplete bundle");
                output.rejected.push(RejectedBundle { spec, missing });
            }
        }

        if self.standalone_storage_bundles {
            for (region, pool) in &storage {
                let key = GroupingKey {
                    label: STORAGE_BUNDLE_LABEL.to_string(),
                    region: region.clone(),
                };
                let members: Vec<&CanonicalPriceEntry> = pool.iter().collect();
                bundles.push((self.compose(key, &members), members));
            }
        }

        for (spec, members) in bundles {
            for entry in members {
                attached.entry(entry.entry_id()).or_insert_with(|| entry.clone());
            }
            output.bundles.push(spec);
        }

        // storage never picked up by any bundle
        for entry in storage.values().flatten() {
            if !attached.contains_key(&entry.entry_id()) {
                output.unattached.push(entry.clone());
            }
        }
        // compute entries of rejected bundles
        for rejected in &output.rejected {
            if let Some(accumulator) = families.get(&rejected.spec.key) {
                output.unattached.extend(
                    accumulator
                        .entries()
                        .filter(|e| !attached.contains_key(&e.entry_id()))
                        .cloned(),
                );
            }
        }

        output.bundles.sort_by(|a, b| a.code.cmp(&b.code));
        output.demoted.sort();
        output.rejected.sort_by(|a, b| a.spec.code.cmp(&b.spec.code));
        output.attached = attached.into_values().collect();
        output
    }

    /// Storage entries that join the bundle for `key`
    fn storage_for<'a>(
        &self,
        key: &GroupingKey,
        region_pool: &'a [CanonicalPriceEntry],
    ) -> Vec<&'a CanonicalPriceEntry> {
        match self.storage_pooling {
            StoragePooling::Region => region_pool.iter().collect(),
            StoragePooling::Family => {
                let scoped: Vec<_> = region_pool
                    .iter()
                    .filter(|e| e.family.as_deref() == Some(key.label.as_str()))
                    .collect();
                if scoped.is_empty() {
                    // broaden to the region when the family has no storage of its own
                    region_pool.iter().collect()
                } else {
                    scoped
                }
            }
        }
    }

    fn compose(&self, key: GroupingKey, members: &[&CanonicalPriceEntry]) -> PriceBundleSpec {
        let axes: BTreeSet<BundleAxis> = members.iter().filter_map(|e| bundle_axis(e)).collect();
        let bundle_type = if is_component_complete(&axes) {
            BundleType::Component
        } else {
            BundleType::Fixed
        };

        PriceBundleSpec {
            code: self.bundle_code(&key),
            name: self.bundle_name(&key),
            bundle_type,
            members: members.iter().map(|e| e.price_code(&self.prefix)).collect(),
            axes,
            key,
        }
    }
}

fn bundle_axis(entry: &CanonicalPriceEntry) -> Option<BundleAxis> {
    match (entry.axis, entry.storage_variant) {
        (ResourceAxis::Core, _) => Some(BundleAxis::Core),
        (ResourceAxis::Memory, _) => Some(BundleAxis::Memory),
        (ResourceAxis::StorageVariant, Some(variant)) => Some(BundleAxis::Storage(variant)),
        _ => None,
    }
}

/// Storage variants present in a bundle, in enum order
pub fn storage_variants(spec: &PriceBundleSpec) -> Vec<StorageVariant> {
    spec.axes
        .iter()
        .filter_map(|axis| match axis {
            BundleAxis::Storage(variant) => Some(*variant),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const JAKARTA: &str = "asia-southeast2";

    fn entry(sku: &str, axis: ResourceAxis, family: Option<&str>, region: &str) -> CanonicalPriceEntry {
        CanonicalPriceEntry {
            sku_id: sku.to_string(),
            description: format!("{sku} description"),
            axis,
            storage_variant: None,
            family: family.map(str::to_string),
            region: region.to_string(),
            hourly_price: 0.05,
            currency: "USD".to_string(),
            monthly_source: false,
        }
    }

    fn disk(sku: &str, variant: StorageVariant, region: &str) -> CanonicalPriceEntry {
        CanonicalPriceEntry {
            storage_variant: Some(variant),
            monthly_source: true,
            ..entry(sku, ResourceAxis::StorageVariant, None, region)
        }
    }

    fn builder(config: SyncConfig) -> BundleBuilder {
        BundleBuilder::new(&config)
    }

    #[test]
    fn test_family_without_regional_storage_is_fixed() {
        let entries = vec![
            entry("N2-CORE", ResourceAxis::Core, Some("n2"), JAKARTA),
            entry("N2-RAM", ResourceAxis::Memory, Some("n2"), JAKARTA),
            disk("PD-SSD", StorageVariant::PdSsd, "us-east1"),
        ];

        let output = builder(SyncConfig::default()).build(&entries);
        let n2 = output.bundle("ioh-cp.gcp-n2-asia_southeast2").unwrap();

        assert_eq!(n2.bundle_type, BundleType::Fixed);
        assert_eq!(n2.axes, BTreeSet::from([BundleAxis::Core, BundleAxis::Memory]));
        assert_eq!(n2.name, "IOH-CP - GCP - N2 (asia-southeast2)");
        assert_eq!(output.demoted, vec!["ioh-cp.gcp-n2-asia_southeast2"]);
    }

    #[test]
    fn test_regional_storage_completes_every_family() {
        let entries = vec![
            entry("N2-CORE", ResourceAxis::Core, Some("n2"), JAKARTA),
            entry("N2-RAM", ResourceAxis::Memory, Some("n2"), JAKARTA),
            entry("E2-CORE", ResourceAxis::Core, Some("e2"), JAKARTA),
            entry("E2-RAM", ResourceAxis::Memory, Some("e2"), JAKARTA),
            disk("PD-STD", StorageVariant::PdStandard, JAKARTA),
            disk("PD-SSD", StorageVariant::PdSsd, JAKARTA),
        ];

        let output = builder(SyncConfig::default()).build(&entries);
        let codes: Vec<_> = output.bundles.iter().map(|b| b.code.as_str()).collect();
        assert_eq!(
            codes,
            vec![
                "ioh-cp.gcp-e2-asia_southeast2",
                "ioh-cp.gcp-n2-asia_southeast2",
                "ioh-cp.gcp-storage-asia_southeast2",
            ]
        );

        let n2 = output.bundle("ioh-cp.gcp-n2-asia_southeast2").unwrap();
        assert_eq!(n2.bundle_type, BundleType::Component);
        assert_eq!(n2.members.len(), 4);
        assert!(n2.members.contains("ioh-cp.gcp.PD-SSD.asia_southeast2"));
        assert_eq!(storage_variants(n2), vec![StorageVariant::PdStandard, StorageVariant::PdSsd]);

        let storage = output.bundle("ioh-cp.gcp-storage-asia_southeast2").unwrap();
        assert_eq!(storage.bundle_type, BundleType::Fixed);
        assert_eq!(storage.members.len(), 2);

        assert!(output.demoted.is_empty());
        assert_eq!(output.attached.len(), 6);
    }

    #[test]
    fn test_no_component_bundle_is_ever_incomplete() {
        let entries = vec![
            entry("N2-CORE", ResourceAxis::Core, Some("n2"), JAKARTA),
            entry("C2-RAM", ResourceAxis::Memory, Some("c2"), JAKARTA),
            entry("E2-CORE", ResourceAxis::Core, Some("e2"), "us-east1"),
            entry("E2-RAM", ResourceAxis::Memory, Some("e2"), "us-east1"),
            disk("PD-STD", StorageVariant::PdStandard, "us-east1"),
            disk("LOCAL", StorageVariant::LocalSsd, JAKARTA),
        ];

        for pooling in [StoragePooling::Region, StoragePooling::Family] {
            let output = builder(SyncConfig::default().with_storage_pooling(pooling)).build(&entries);
            for bundle in &output.bundles {
                if bundle.bundle_type == BundleType::Component {
                    assert!(is_component_complete(&bundle.axes), "{}", bundle.code);
                }
            }
        }
    }

    #[test]
    fn test_duplicate_core_keeps_last_entry() {
        let entries = vec![
            entry("FIRST", ResourceAxis::Core, Some("n2"), JAKARTA),
            entry("SECOND", ResourceAxis::Core, Some("n2"), JAKARTA),
        ];

        let output = builder(SyncConfig::default()).build(&entries);
        let n2 = &output.bundles[0];

        assert_eq!(output.duplicates, 1);
        assert_eq!(n2.members, BTreeSet::from(["ioh-cp.gcp.SECOND.asia_southeast2".to_string()]));
        assert_eq!(output.unattached[0].sku_id, "FIRST");
    }

    #[test]
    fn test_unknown_family_is_unclassified_not_bundled() {
        let entries = vec![
            entry("MYSTERY", ResourceAxis::Core, None, JAKARTA),
            entry("EGRESS", ResourceAxis::Network, None, JAKARTA),
        ];

        let output = builder(SyncConfig::default()).build(&entries);
        assert!(output.bundles.is_empty());
        assert_eq!(output.unclassified.len(), 1);
        assert_eq!(output.unattached.len(), 1);
        assert_eq!(output.total_entries, 2);
    }

    #[test]
    fn test_rejects_instead_of_demoting_when_fallback_disabled() {
        let entries = vec![
            entry("N2-CORE", ResourceAxis::Core, Some("n2"), JAKARTA),
            entry("N2-RAM", ResourceAxis::Memory, Some("n2"), JAKARTA),
        ];

        let output = builder(SyncConfig::default().with_fixed_fallback(false)).build(&entries);
        assert!(output.bundles.is_empty());
        assert_eq!(output.rejected.len(), 1);
        assert_eq!(output.rejected[0].missing, vec!["storage"]);
        assert_eq!(output.unattached.len(), 2);
    }

    #[test]
    fn test_family_pooling_prefers_family_storage_then_broadens() {
        let mut tagged = disk("N2-LOCAL", StorageVariant::LocalSsd, JAKARTA);
        tagged.family = Some("n2".to_string());
        let entries = vec![
            entry("N2-CORE", ResourceAxis::Core, Some("n2"), JAKARTA),
            entry("N2-RAM", ResourceAxis::Memory, Some("n2"), JAKARTA),
            entry("E2-CORE", ResourceAxis::Core, Some("e2"), JAKARTA),
            entry("E2-RAM", ResourceAxis::Memory, Some("e2"), JAKARTA),
            tagged,
            disk("PD-STD", StorageVariant::PdStandard, JAKARTA),
        ];

        let config = SyncConfig::default()
            .with_storage_pooling(StoragePooling::Family)
            .with_standalone_storage_bundles(false);
        let output = builder(config).build(&entries);

        let n2 = output.bundle("ioh-cp.gcp-n2-asia_southeast2").unwrap();
        assert_eq!(storage_variants(n2), vec![StorageVariant::LocalSsd]);

        let e2 = output.bundle("ioh-cp.gcp-e2-asia_southeast2").unwrap();
        assert_eq!(e2.bundle_type, BundleType::Component);
        assert_eq!(e2.members.len(), 4);
    }

    #[test]
    fn test_build_is_order_independent_for_codes() {
        let mut entries = vec![
            entry("E2-CORE", ResourceAxis::Core, Some("e2"), JAKARTA),
            entry("N2-CORE", ResourceAxis::Core, Some("n2"), "us-east1"),
            disk("PD-STD", StorageVariant::PdStandard, JAKARTA),
        ];
        let first = builder(SyncConfig::default()).build(&entries);
        entries.reverse();
        let second = builder(SyncConfig::default()).build(&entries);

        assert_eq!(first.bundles, second.bundles);
    }
}
