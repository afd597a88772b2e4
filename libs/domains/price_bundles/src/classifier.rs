//! SKU classification
//!
//! Each [`RawSkuRecord`] is mapped to zero or more [`CanonicalPriceEntry`]
//! values (one per accepted region). The resource axis comes from an ordered
//! list of [`AxisRule`]s evaluated first-match-wins; storage rules come first
//! because "balanced" and "extreme" also appear next to generic
//! "persistent disk" text.

use once_cell::sync::Lazy;
use std::collections::BTreeSet;
use tracing::debug;

use crate::error::ClassificationError;
use crate::models::{
    CanonicalPriceEntry, HOURS_PER_MONTH, RawSkuRecord, ResourceAxis, StorageVariant,
};

/// Machine family tokens recognised in descriptions and SKU ids
pub const KNOWN_FAMILIES: &[&str] = &[
    "a2", "a3", "c2", "c2d", "c3", "c3d", "c4", "c4a", "c4d", "e2", "f1", "g1", "g2", "h3", "m1",
    "m2", "m3", "m4", "n1", "n2", "n2d", "n4", "t2a", "t2d", "x4", "z3",
];

/// Catalog phrases that name a family without its token
const FAMILY_ALIASES: &[(&str, &str)] = &[
    ("compute optimized", "c2"),
    ("memory optimized", "m1"),
    ("micro instance", "f1"),
    ("small instance", "g1"),
];

static KNOWN_FAMILY_SET: Lazy<BTreeSet<&'static str>> =
    Lazy::new(|| KNOWN_FAMILIES.iter().copied().collect());

/// Normalized view of a record that rules are evaluated against
#[derive(Debug, Clone)]
pub struct RuleInput {
    /// Lowercase description, punctuation replaced by single spaces
    pub text: String,
    pub words: BTreeSet<String>,
    /// Lowercase structured resource family, empty when absent
    pub resource_family: String,
    /// Lowercase structured resource group, empty when absent
    pub resource_group: String,
}

impl RuleInput {
    pub fn from_record(record: &RawSkuRecord) -> Self {
        let text = normalize_description(&record.description);
        let words = text.split(' ').filter(|w| !w.is_empty()).map(str::to_string).collect();
        Self {
            text,
            words,
            resource_family: lowercase_hint(record.category.resource_family.as_deref()),
            resource_group: lowercase_hint(record.category.resource_group.as_deref()),
        }
    }

    pub fn has_word(&self, word: &str) -> bool {
        self.words.contains(word)
    }

    pub fn has_any_word(&self, words: &[&str]) -> bool {
        words.iter().any(|w| self.has_word(w))
    }

    /// Phrase match on word boundaries
    pub fn has_phrase(&self, phrase: &str) -> bool {
        format!(" {} ", self.text).contains(&format!(" {phrase} "))
    }

    fn is_persistent_disk(&self) -> bool {
        self.has_phrase("persistent disk") || self.has_word("pd")
    }

    fn mentions_cpu(&self) -> bool {
        self.has_any_word(&["cpu", "vcpu", "core", "cores"])
    }

    fn is_license(&self) -> bool {
        self.resource_family == "license"
    }

    fn mentions_ram(&self) -> bool {
        self.has_any_word(&["ram", "memory"]) || self.has_phrase("gib hour")
    }
}

fn lowercase_hint(hint: Option<&str>) -> String {
    hint.map(|h| h.trim().to_lowercase()).unwrap_or_default()
}

/// Lowercase and replace every run of non-alphanumeric characters with one space
pub fn normalize_description(description: &str) -> String {
    description
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// What a matching rule assigns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisLabel {
    Storage(StorageVariant),
    Core,
    Memory,
    Network,
    Other,
}

impl AxisLabel {
    pub fn axis(&self) -> ResourceAxis {
        match self {
            AxisLabel::Storage(_) => ResourceAxis::StorageVariant,
            AxisLabel::Core => ResourceAxis::Core,
            AxisLabel::Memory => ResourceAxis::Memory,
            AxisLabel::Network => ResourceAxis::Network,
            AxisLabel::Other => ResourceAxis::Other,
        }
    }

    pub fn storage_variant(&self) -> Option<StorageVariant> {
        match self {
            AxisLabel::Storage(variant) => Some(*variant),
            _ => None,
        }
    }
}

/// A pure predicate paired with the label it assigns
#[derive(Clone, Copy)]
pub struct AxisRule {
    pub name: &'static str,
    pub predicate: fn(&RuleInput) -> bool,
    pub label: AxisLabel,
}

impl std::fmt::Debug for AxisRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AxisRule")
            .field("name", &self.name)
            .field("label", &self.label)
            .finish()
    }
}

impl AxisRule {
    pub fn matches(&self, input: &RuleInput) -> bool {
        (self.predicate)(input)
    }
}

/// The classification cascade in priority order
pub fn default_rules() -> Vec<AxisRule> {
    use StorageVariant::*;

    vec![
        AxisRule {
            name: "local-ssd",
            predicate: |i| i.has_phrase("local ssd") || (i.has_word("local") && i.has_word("ssd")),
            label: AxisLabel::Storage(LocalSsd),
        },
        AxisRule {
            name: "hyperdisk-balanced",
            predicate: |i| i.has_word("hyperdisk") && i.has_word("balanced"),
            label: AxisLabel::Storage(HyperdiskBalanced),
        },
        AxisRule {
            name: "hyperdisk-extreme",
            predicate: |i| i.has_word("hyperdisk") && i.has_word("extreme"),
            label: AxisLabel::Storage(HyperdiskExtreme),
        },
        AxisRule {
            name: "regional-pd-ssd",
            predicate: |i| i.has_word("regional") && i.is_persistent_disk() && i.has_word("ssd"),
            label: AxisLabel::Storage(RegionalPdSsd),
        },
        AxisRule {
            name: "regional-pd-standard",
            predicate: |i| {
                i.has_word("regional")
                    && i.is_persistent_disk()
                    && (i.has_word("standard") || i.has_phrase("storage pd"))
            },
            label: AxisLabel::Storage(RegionalPdStandard),
        },
        AxisRule {
            name: "pd-extreme",
            predicate: |i| i.is_persistent_disk() && i.has_word("extreme"),
            label: AxisLabel::Storage(PdExtreme),
        },
        AxisRule {
            name: "pd-balanced",
            predicate: |i| i.is_persistent_disk() && i.has_word("balanced"),
            label: AxisLabel::Storage(PdBalanced),
        },
        AxisRule {
            name: "pd-ssd",
            predicate: |i| i.is_persistent_disk() && i.has_word("ssd"),
            label: AxisLabel::Storage(PdSsd),
        },
        AxisRule {
            name: "storage-fallback",
            predicate: |i| i.resource_family == "storage",
            label: AxisLabel::Storage(PdStandard),
        },
        AxisRule {
            name: "core-text",
            predicate: |i| !i.is_license() && i.mentions_cpu() && !i.mentions_ram(),
            label: AxisLabel::Core,
        },
        AxisRule {
            name: "memory-text",
            predicate: |i| !i.is_license() && i.mentions_ram() && !i.mentions_cpu(),
            label: AxisLabel::Memory,
        },
        AxisRule {
            name: "core-hint",
            predicate: |i| i.resource_group == "cpu",
            label: AxisLabel::Core,
        },
        AxisRule {
            name: "memory-hint",
            predicate: |i| i.resource_group == "ram",
            label: AxisLabel::Memory,
        },
        AxisRule {
            name: "network",
            predicate: |i| i.resource_family == "network" || i.resource_family == "networking",
            label: AxisLabel::Network,
        },
    ]
}

/// Entries and failures of classifying a whole catalog
#[derive(Debug, Clone, Default)]
pub struct ClassificationOutcome {
    pub entries: Vec<CanonicalPriceEntry>,
    pub failures: Vec<ClassificationError>,
    /// Records that applied to no accepted region
    pub out_of_scope: usize,
    pub total_records: usize,
}

#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<AxisRule>,
    regions: Vec<String>,
    usage_types: Vec<String>,
}

impl Classifier {
    /// Classifier keeping entries for `regions` only (empty keeps every region)
    pub fn new(regions: Vec<String>) -> Self {
        Self {
            rules: default_rules(),
            regions,
            usage_types: Vec::new(),
        }
    }

    /// Keep only records whose usage type is listed (records without one are kept)
    pub fn with_usage_types(mut self, usage_types: Vec<String>) -> Self {
        self.usage_types = usage_types;
        self
    }

    /// First matching label, `Other` when nothing matches
    pub fn label(&self, input: &RuleInput) -> AxisLabel {
        self.rules
            .iter()
            .find(|rule| rule.matches(input))
            .map(|rule| rule.label)
            .unwrap_or(AxisLabel::Other)
    }

    /// Classify one record into one entry per accepted region
    pub fn classify(
        &self,
        record: &RawSkuRecord,
    ) -> Result<Vec<CanonicalPriceEntry>, ClassificationError> {
        if !self.accepts_usage_type(record) {
            return Ok(Vec::new());
        }

        let price = parse_price(record)?;
        if record.regions.is_empty() {
            return Err(ClassificationError::NoRegions {
                sku_id: record.sku_id.clone(),
            });
        }

        let hourly_price = if record.is_monthly() {
            price.amount / HOURS_PER_MONTH
        } else {
            price.amount
        };

        let input = RuleInput::from_record(record);
        let label = self.label(&input);
        let family = extract_family(&input, &record.sku_id);

        let regions: BTreeSet<&String> = record
            .regions
            .iter()
            .filter(|r| self.regions.is_empty() || self.regions.contains(r))
            .collect();

        Ok(regions
            .into_iter()
            .map(|region| CanonicalPriceEntry {
                sku_id: record.sku_id.clone(),
                description: record.description.clone(),
                axis: label.axis(),
                storage_variant: label.storage_variant(),
                family: family.clone(),
                region: region.clone(),
                hourly_price,
                currency: price.currency.clone(),
                monthly_source: record.is_monthly(),
            })
            .collect())
    }

    fn accepts_usage_type(&self, record: &RawSkuRecord) -> bool {
        match record.category.usage_type.as_deref() {
            Some(usage) if !self.usage_types.is_empty() => self
                .usage_types
                .iter()
                .any(|accepted| accepted.eq_ignore_ascii_case(usage)),
            _ => true,
        }
    }

    /// Classify every record, collecting failures instead of aborting
    pub fn classify_all(&self, records: &[RawSkuRecord]) -> ClassificationOutcome {
        let mut outcome = ClassificationOutcome {
            total_records: records.len(),
            ..Default::default()
        };

        for record in records {
            match self.classify(record) {
                Ok(entries) if entries.is_empty() => outcome.out_of_scope += 1,
                Ok(entries) => outcome.entries.extend(entries),
                Err(err) => {
                    debug!(sku = %record.sku_id, error = %err, "Dropping unclassifiable SKU");
                    outcome.failures.push(err);
                }
            }
        }

        outcome
    }
}

struct ParsedPrice {
    amount: f64,
    currency: String,
}

/// Every tier must parse as a non-negative number; the first tier is the unit price
fn parse_price(record: &RawSkuRecord) -> Result<ParsedPrice, ClassificationError> {
    let first = record
        .tiered_prices
        .first()
        .ok_or_else(|| ClassificationError::NoTieredPrices {
            sku_id: record.sku_id.clone(),
        })?;

    let mut amounts = Vec::with_capacity(record.tiered_prices.len());
    for tier in &record.tiered_prices {
        let amount = tier
            .amount
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|a| a.is_finite() && *a >= 0.0)
            .ok_or_else(|| ClassificationError::InvalidAmount {
                sku_id: record.sku_id.clone(),
                amount: tier.amount.clone(),
            })?;
        amounts.push(amount);
    }

    Ok(ParsedPrice {
        amount: amounts[0],
        currency: first.currency.clone(),
    })
}

/// Find the machine family in the description first, then in the SKU id
pub fn extract_family(input: &RuleInput, sku_id: &str) -> Option<String> {
    let from_description = input
        .text
        .split(' ')
        .find(|w| KNOWN_FAMILY_SET.contains(w))
        .map(str::to_string);
    if from_description.is_some() {
        return from_description;
    }

    if let Some((_, family)) = FAMILY_ALIASES
        .iter()
        .find(|(phrase, _)| input.has_phrase(phrase))
    {
        return Some((*family).to_string());
    }

    normalize_description(sku_id)
        .split(' ')
        .find(|w| KNOWN_FAMILY_SET.contains(w))
        .map(str::to_string)
}
