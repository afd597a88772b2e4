//! Remote price records derived from canonical entries

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::models::{CanonicalPriceEntry, HOURS_PER_MONTH, RemotePrice, ResourceAxis};

/// Remote price type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PriceType {
    Cores,
    Memory,
    Storage,
    Software,
}

impl From<ResourceAxis> for PriceType {
    fn from(axis: ResourceAxis) -> Self {
        match axis {
            ResourceAxis::Core => PriceType::Cores,
            ResourceAxis::Memory => PriceType::Memory,
            ResourceAxis::StorageVariant => PriceType::Storage,
            ResourceAxis::Network | ResourceAxis::Other => PriceType::Software,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PriceUnit {
    Hour,
    Month,
}

/// When the remote platform starts charging for a price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum IncurCharges {
    /// Only while the instance runs
    Running,
    Always,
}

/// Desired state of one remote price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSpec {
    pub code: String,
    pub name: String,
    pub price_type: PriceType,
    pub price_unit: PriceUnit,
    pub incur_charges: IncurCharges,
    pub currency: String,
    /// Amount per `price_unit`
    pub amount: f64,
}

impl PriceSpec {
    pub fn from_entry(entry: &CanonicalPriceEntry, prefix: &str) -> Self {
        let price_type = PriceType::from(entry.axis);
        let (price_unit, amount) = if price_type == PriceType::Storage && entry.monthly_source {
            (PriceUnit::Month, entry.hourly_price * HOURS_PER_MONTH)
        } else {
            (PriceUnit::Hour, entry.hourly_price)
        };

        Self {
            code: entry.price_code(prefix),
            name: format!("{prefix} - {}", entry.description),
            price_type,
            price_unit,
            incur_charges: if entry.axis.is_compute() {
                IncurCharges::Running
            } else {
                IncurCharges::Always
            },
            currency: entry.currency.clone(),
            amount,
        }
    }

    /// Whether the remote record already matches this spec
    pub fn matches(&self, remote: &RemotePrice) -> bool {
        (remote.amount - self.amount).abs() <= amount_tolerance(self.amount)
            && remote.price_type == self.price_type.to_string()
            && remote.price_unit == self.price_unit.to_string()
    }
}

/// Relative tolerance for amounts that went through a decimal round trip
fn amount_tolerance(amount: f64) -> f64 {
    (amount.abs() * 1e-9).max(1e-12)
}

/// One spec per entry, sorted by code, duplicates collapsed
pub fn price_specs(entries: &[CanonicalPriceEntry], prefix: &str) -> Vec<PriceSpec> {
    let mut specs: Vec<PriceSpec> = entries.iter().map(|e| PriceSpec::from_entry(e, prefix)).collect();
    specs.sort_by(|a, b| a.code.cmp(&b.code));
    specs.dedup_by(|a, b| a.code == b.code);
    specs
}
