//! Linking service plans to bundles

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::builder::{STORAGE_BUNDLE_LABEL, bundle_code};
use crate::models::{BundleType, GroupingKey, ServicePlan};

static PLAN_FAMILY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:google-)?([a-z][a-z0-9]*\d[a-z]?)-").unwrap());

/// Remote bundle known to exist, keyed by code in a [`BundleIndex`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedBundle {
    pub id: String,
    pub bundle_type: BundleType,
}

pub type BundleIndex = BTreeMap<String, IndexedBundle>;

/// What mapping decided for one plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum LinkAction {
    /// Set the plan's bundle ids to `bundle_ids`
    Update { bundle_ids: Vec<String> },
    AlreadyLinked,
    Unmapped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanLink {
    pub plan_id: String,
    pub plan_name: String,
    pub family: Option<String>,
    pub region: Option<String>,
    pub action: LinkAction,
}

/// Machine family from a plan name such as `google-n2-standard-4` or `e2-medium`
pub fn plan_family(name: &str) -> Option<String> {
    PLAN_FAMILY
        .captures(&name.to_lowercase())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Region from the plan config: zone region, region, or the zone minus its suffix
pub fn plan_region(plan: &ServicePlan) -> Option<String> {
    let non_empty = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(str::to_string);

    non_empty(&plan.zone_region)
        .or_else(|| non_empty(&plan.region))
        .or_else(|| {
            let zone = non_empty(&plan.availability_zone)?;
            let parts: Vec<&str> = zone.split('-').collect();
            (parts.len() >= 2).then(|| parts[..2].join("-"))
        })
}

/// Decide the bundle links for every plan
///
/// A plan gets its family bundle for its region. When that bundle is `fixed`
/// the region's standalone storage bundle is linked as well. Existing links
/// are kept; the update is the union of current and desired ids.
pub fn plan_links(plans: &[ServicePlan], index: &BundleIndex, prefix: &str) -> Vec<PlanLink> {
    plans
        .iter()
        .map(|plan| {
            let family = plan_family(&plan.name);
            let region = plan_region(plan);
            let action = match (&family, &region) {
                (Some(family), Some(region)) => link_action(plan, family, region, index, prefix),
                (None, _) => LinkAction::Unmapped {
                    reason: "no machine family in plan name".to_string(),
                },
                (_, None) => LinkAction::Unmapped {
                    reason: "no region in plan config".to_string(),
                },
            };

            PlanLink {
                plan_id: plan.id.clone(),
                plan_name: plan.name.clone(),
                family,
                region,
                action,
            }
        })
        .collect()
}

fn link_action(
    plan: &ServicePlan,
    family: &str,
    region: &str,
    index: &BundleIndex,
    prefix: &str,
) -> LinkAction {
    let key = |label: &str| GroupingKey {
        label: label.to_string(),
        region: region.to_string(),
    };

    let Some(family_bundle) = index.get(&bundle_code(prefix, &key(family))) else {
        return LinkAction::Unmapped {
            reason: format!("no bundle for {family}/{region}"),
        };
    };

    let mut desired = vec![family_bundle.id.clone()];
    if family_bundle.bundle_type == BundleType::Fixed {
        if let Some(storage) = index.get(&bundle_code(prefix, &key(STORAGE_BUNDLE_LABEL))) {
            desired.push(storage.id.clone());
        }
    }

    if desired.iter().all(|id| plan.bundle_ids.contains(id)) {
        return LinkAction::AlreadyLinked;
    }

    let mut bundle_ids = plan.bundle_ids.clone();
    for id in desired {
        if !bundle_ids.contains(&id) {
            bundle_ids.push(id);
        }
    }
    LinkAction::Update { bundle_ids }
}

/// Priced and unpriced plan counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanValidation {
    pub total: usize,
    pub priced: usize,
    /// Names of plans without any bundle
    pub unpriced: Vec<String>,
}

impl PlanValidation {
    pub fn is_complete(&self) -> bool {
        self.unpriced.is_empty()
    }
}

pub fn validate_plans(plans: &[ServicePlan]) -> PlanValidation {
    let mut unpriced: Vec<String> = plans
        .iter()
        .filter(|p| p.bundle_ids.is_empty())
        .map(|p| p.name.clone())
        .collect();
    unpriced.sort();

    PlanValidation {
        total: plans.len(),
        priced: plans.len() - unpriced.len(),
        unpriced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(id: &str, name: &str, zone_region: Option<&str>, bundles: &[&str]) -> ServicePlan {
        ServicePlan {
            id: id.to_string(),
            name: name.to_string(),
            zone_region: zone_region.map(str::to_string),
            bundle_ids: bundles.iter().map(|b| b.to_string()).collect(),
            ..Default::default()
        }
    }

    fn index(entries: &[(&str, &str, BundleType)]) -> BundleIndex {
        entries
            .iter()
            .map(|(code, id, bundle_type)| {
                (
                    code.to_string(),
                    IndexedBundle {
                        id: id.to_string(),
                        bundle_type: *bundle_type,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_plan_family() {
        assert_eq!(plan_family("google-n2-standard-4").as_deref(), Some("n2"));
        assert_eq!(plan_family("N2D-highmem-8").as_deref(), Some("n2d"));
        assert_eq!(plan_family("e2-medium").as_deref(), Some("e2"));
        assert_eq!(plan_family("custom plan"), None);
    }

    #[test]
    fn test_plan_region_fallbacks() {
        let mut p = ServicePlan::default();
        assert_eq!(plan_region(&p), None);

        p.availability_zone = Some("asia-southeast2-a".to_string());
        assert_eq!(plan_region(&p).as_deref(), Some("asia-southeast2"));

        p.region = Some("us-east1".to_string());
        assert_eq!(plan_region(&p).as_deref(), Some("us-east1"));

        p.zone_region = Some("europe-west1".to_string());
        assert_eq!(plan_region(&p).as_deref(), Some("europe-west1"));
    }

    #[test]
    fn test_component_bundle_links_alone() {
        let idx = index(&[
            ("ioh-cp.gcp-n2-asia_southeast2", "10", BundleType::Component),
            ("ioh-cp.gcp-storage-asia_southeast2", "11", BundleType::Fixed),
        ]);
        let links = plan_links(
            &[plan("p1", "google-n2-standard-4", Some("asia-southeast2"), &["3"])],
            &idx,
            "IOH-CP",
        );

        assert_eq!(
            links[0].action,
            LinkAction::Update {
                bundle_ids: vec!["3".to_string(), "10".to_string()]
            }
        );
    }

    #[test]
    fn test_fixed_bundle_pulls_in_storage_bundle() {
        let idx = index(&[
            ("ioh-cp.gcp-c2-asia_southeast2", "20", BundleType::Fixed),
            ("ioh-cp.gcp-storage-asia_southeast2", "21", BundleType::Fixed),
        ]);
        let links = plan_links(&[plan("p1", "c2-standard-8", Some("asia-southeast2"), &[])], &idx, "IOH-CP");

        assert_eq!(
            links[0].action,
            LinkAction::Update {
                bundle_ids: vec!["20".to_string(), "21".to_string()]
            }
        );
    }

    #[test]
    fn test_already_linked_and_unmapped() {
        let idx = index(&[("ioh-cp.gcp-n2-asia_southeast2", "10", BundleType::Component)]);
        let links = plan_links(
            &[
                plan("p1", "n2-standard-2", Some("asia-southeast2"), &["10"]),
                plan("p2", "n2-standard-2", Some("us-east1"), &[]),
                plan("p3", "n2-standard-2", None, &[]),
            ],
            &idx,
            "IOH-CP",
        );

        assert_eq!(links[0].action, LinkAction::AlreadyLinked);
        assert!(matches!(&links[1].action, LinkAction::Unmapped { reason } if reason.contains("n2/us-east1")));
        assert!(matches!(&links[2].action, LinkAction::Unmapped { .. }));
    }

    #[test]
    fn test_validate_plans() {
        let validation = validate_plans(&[
            plan("1", "n2-standard-2", None, &["10"]),
            plan("2", "e2-micro", None, &[]),
        ]);
        assert_eq!(validation.total, 2);
        assert_eq!(validation.priced, 1);
        assert_eq!(validation.unpriced, vec!["e2-micro"]);
        assert!(!validation.is_complete());
    }
}
