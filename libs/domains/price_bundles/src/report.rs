//! Run summary

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use crate::builder::BuildOutput;
use crate::classifier::ClassificationOutcome;
use crate::reconciler::{Outcome, ReconcileOutcome};

/// One failed bundle or price with its reason
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureEntry {
    pub code: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    /// Dry-run items that would have been written
    pub planned: usize,
    pub failed: usize,
    pub failures: Vec<FailureEntry>,
    pub retries: u32,

    /// Records dropped by the classifier (bad or missing prices, no regions)
    pub classification_failures: usize,
    /// Compute entries whose machine family is unknown
    pub unclassified: usize,
    /// Bundles demoted to `fixed` for lack of a mandatory axis
    pub coverage_gaps: Vec<String>,
    pub total_entries: usize,
    pub attached_entries: usize,
    /// `attached_entries / total_entries`, in percent
    pub coverage_percent: f64,

    /// Every outcome, sorted by code
    pub outcomes: Vec<ReconcileOutcome>,
}

/// Aggregate per-item outcomes; coverage fields stay zero
pub fn summarize(outcomes: &[ReconcileOutcome]) -> SyncReport {
    let mut report = SyncReport::default();

    for item in outcomes {
        report.retries += item.retries;
        match &item.outcome {
            Outcome::Created => report.created += 1,
            Outcome::Updated => report.updated += 1,
            Outcome::Skipped => report.skipped += 1,
            Outcome::Planned => report.planned += 1,
            Outcome::Failed(reason) => {
                report.failed += 1;
                report.failures.push(FailureEntry {
                    code: item.code.clone(),
                    reason: reason.to_string(),
                });
            }
        }
    }

    let mut sorted = outcomes.to_vec();
    sorted.sort_by(|a, b| a.code.cmp(&b.code));
    report.outcomes = sorted;
    report.failures.sort_by(|a, b| a.code.cmp(&b.code));
    report
}

impl SyncReport {
    /// Fill coverage from the builder output
    ///
    /// An entry counts as attached when at least one bundle holding it was
    /// not a failure.
    pub fn with_coverage(mut self, build: &BuildOutput) -> Self {
        let succeeded: BTreeSet<&str> = self
            .outcomes
            .iter()
            .filter(|o| !o.outcome.is_failure())
            .map(|o| o.code.as_str())
            .collect();

        let attached: BTreeSet<&String> = build
            .bundles
            .iter()
            .filter(|b| succeeded.contains(b.code.as_str()))
            .flat_map(|b| b.members.iter())
            .collect();

        self.total_entries = build.total_entries;
        self.attached_entries = attached.len();
        self.unclassified = build.unclassified.len();
        self.coverage_gaps = build.demoted.clone();
        self.coverage_percent = percent(self.attached_entries, self.total_entries);
        self
    }

    pub fn with_classification(mut self, classification: &ClassificationOutcome) -> Self {
        self.classification_failures = classification.failures.len();
        self
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "created: {}  updated: {}  skipped: {}  failed: {}",
            self.created, self.updated, self.skipped, self.failed
        )?;
        if self.planned > 0 {
            writeln!(f, "planned (dry run): {}", self.planned)?;
            for item in self.outcomes.iter().filter(|o| o.outcome == Outcome::Planned) {
                match item.bundle_type {
                    Some(bundle_type) => writeln!(f, "  {} [{}]", item.code, bundle_type)?,
                    None => writeln!(f, "  {}", item.code)?,
                }
            }
        }
        writeln!(f, "retries: {}", self.retries)?;
        writeln!(
            f,
            "coverage: {:.1}% ({} of {} entries attached)",
            self.coverage_percent, self.attached_entries, self.total_entries
        )?;
        writeln!(
            f,
            "classification failures: {}  unclassified: {}",
            self.classification_failures, self.unclassified
        )?;
        if !self.coverage_gaps.is_empty() {
            writeln!(f, "demoted to fixed:")?;
            for code in &self.coverage_gaps {
                writeln!(f, "  {code}")?;
            }
        }
        if !self.failures.is_empty() {
            writeln!(f, "failures:")?;
            for failure in &self.failures {
                writeln!(f, "  {}: {}", failure.code, failure.reason)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BundleType, GroupingKey, PriceBundleSpec};
    use crate::reconciler::FailureReason;

    fn outcome(code: &str, outcome: Outcome, retries: u32) -> ReconcileOutcome {
        ReconcileOutcome {
            code: code.to_string(),
            bundle_type: Some(BundleType::Component),
            outcome,
            retries,
            remote_id: None,
        }
    }

    fn bundle(code: &str, members: &[&str]) -> PriceBundleSpec {
        PriceBundleSpec {
            code: code.to_string(),
            name: code.to_string(),
            bundle_type: BundleType::Fixed,
            key: GroupingKey {
                label: "n2".to_string(),
                region: "asia-southeast2".to_string(),
            },
            members: members.iter().map(|m| m.to_string()).collect(),
            axes: Default::default(),
        }
    }

    #[test]
    fn test_summarize_counts_and_failures() {
        let report = summarize(&[
            outcome("c", Outcome::Created, 1),
            outcome("a", Outcome::Skipped, 0),
            outcome("b", Outcome::Failed(FailureReason::DataIntegrity { matches: 2 }), 0),
            outcome("d", Outcome::Updated, 2),
        ]);

        assert_eq!(
            (report.created, report.updated, report.skipped, report.failed),
            (1, 1, 1, 1)
        );
        assert_eq!(report.retries, 3);
        assert_eq!(report.failures[0].code, "b");
        assert!(report.failures[0].reason.contains("2 remote records"));
        assert_eq!(report.outcomes[0].code, "a");
        assert!(report.has_failures());
    }

    #[test]
    fn test_coverage_ignores_failed_bundles() {
        let build = BuildOutput {
            bundles: vec![bundle("ok", &["p1", "p2"]), bundle("bad", &["p3"])],
            demoted: vec!["ok".to_string()],
            total_entries: 4,
            ..Default::default()
        };

        let report = summarize(&[
            outcome("ok", Outcome::Created, 0),
            outcome("bad", Outcome::Failed(FailureReason::DataIntegrity { matches: 3 }), 0),
        ])
        .with_coverage(&build);

        assert_eq!(report.attached_entries, 2);
        assert!((report.coverage_percent - 50.0).abs() < 1e-9);
        assert_eq!(report.coverage_gaps, vec!["ok"]);

        let text = report.to_string();
        assert!(text.contains("coverage: 50.0% (2 of 4 entries attached)"));
        assert!(text.contains("bad: data integrity"));
    }

    #[test]
    fn test_empty_run_has_zero_coverage() {
        let report = summarize(&[]).with_coverage(&BuildOutput::default());
        assert_eq!(report.coverage_percent, 0.0);
        assert!(!report.has_failures());
    }
}
