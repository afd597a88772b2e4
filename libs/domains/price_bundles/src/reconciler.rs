//! Idempotent sync of desired bundles, prices and plans against the pricing store
//!
//! Each item is looked up by code: absent items are created, identical ones
//! skipped and differing ones replaced wholesale. Existing plans are left
//! alone; linking them is the job of plan mapping. A lookup that returns more
//! than one match is a data-integrity failure and nothing is written. Every
//! store call goes through the configured [`RetryPolicy`]; failures stay
//! scoped to the item that produced them.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info};

use crate::builder::RejectedBundle;
use crate::config::SyncConfig;
use crate::error::{StoreError, StoreResult};
use crate::models::{BundleType, PriceBundleSpec, RemotePriceReference};
use crate::plans::PlanSpec;
use crate::prices::PriceSpec;
use crate::retry::RetryPolicy;
use crate::store::PricingStore;

/// Why one bundle, price or plan could not be synced
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum FailureReason {
    /// The code matched several remote records
    DataIntegrity { matches: usize },
    /// The store refused or kept failing; message is the remote text
    Store { kind: String, message: String },
    /// Component completeness could not be met and demotion was disabled
    MissingAxes { missing: Vec<String> },
}

impl From<StoreError> for FailureReason {
    fn from(err: StoreError) -> Self {
        FailureReason::Store {
            kind: err.kind.to_string(),
            message: err.message,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::DataIntegrity { matches } => {
                write!(f, "data integrity: {matches} remote records share this code")
            }
            FailureReason::Store { kind, message } => write!(f, "{kind}: {message}"),
            FailureReason::MissingAxes { missing } => {
                write!(f, "incomplete component bundle, missing {}", missing.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Created,
    Updated,
    Skipped,
    /// Dry run: computed but not written
    Planned,
    Failed(FailureReason),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Created => "created",
            Outcome::Updated => "updated",
            Outcome::Skipped => "skipped",
            Outcome::Planned => "planned",
            Outcome::Failed(_) => "failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

/// Result of syncing one bundle or price
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileOutcome {
    pub code: String,
    /// Set for bundles only
    pub bundle_type: Option<BundleType>,
    pub outcome: Outcome,
    /// Retries spent across all store calls for this item
    pub retries: u32,
    /// Remote id after a successful create, update or skip
    pub remote_id: Option<String>,
}

impl ReconcileOutcome {
    pub fn planned(spec: &PriceBundleSpec) -> Self {
        Self {
            code: spec.code.clone(),
            bundle_type: Some(spec.bundle_type),
            outcome: Outcome::Planned,
            retries: 0,
            remote_id: None,
        }
    }

    pub fn planned_price(spec: &PriceSpec) -> Self {
        Self {
            code: spec.code.clone(),
            bundle_type: None,
            outcome: Outcome::Planned,
            retries: 0,
            remote_id: None,
        }
    }

    pub fn planned_plan(spec: &PlanSpec) -> Self {
        Self {
            code: spec.code.clone(),
            bundle_type: None,
            outcome: Outcome::Planned,
            retries: 0,
            remote_id: None,
        }
    }

    pub fn rejected(rejected: &RejectedBundle) -> Self {
        Self {
            code: rejected.spec.code.clone(),
            bundle_type: Some(rejected.spec.bundle_type),
            outcome: Outcome::Failed(FailureReason::MissingAxes {
                missing: rejected.missing.clone(),
            }),
            retries: 0,
            remote_id: None,
        }
    }
}

/// Per-item retry bookkeeping
struct Attempt {
    code: String,
    bundle_type: Option<BundleType>,
    retries: u32,
}

impl Attempt {
    fn finish(self, outcome: Outcome, remote_id: Option<String>) -> ReconcileOutcome {
        match &outcome {
            Outcome::Failed(reason) => {
                error!(code = %self.code, retries = self.retries, reason = %reason, "Sync failed")
            }
            other => {
                info!(code = %self.code, retries = self.retries, outcome = other.label(), "Synced")
            }
        }
        ReconcileOutcome {
            code: self.code,
            bundle_type: self.bundle_type,
            outcome,
            retries: self.retries,
            remote_id,
        }
    }

    fn fail(self, reason: impl Into<FailureReason>) -> ReconcileOutcome {
        self.finish(Outcome::Failed(reason.into()), None)
    }

    fn written(self, outcome: Outcome, reference: RemotePriceReference) -> ReconcileOutcome {
        self.finish(outcome, Some(reference.id))
    }
}

pub struct Reconciler {
    store: Arc<dyn PricingStore>,
    retry: RetryPolicy,
    concurrency: usize,
}

impl Reconciler {
    pub fn new(store: Arc<dyn PricingStore>, config: &SyncConfig) -> Self {
        Self {
            store,
            retry: config.retry.clone(),
            concurrency: config.concurrency.max(1),
        }
    }

    async fn call<T, F, Fut>(&self, attempt: &mut Attempt, operation: &str, op: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let retried = self.retry.run(operation, op).await;
        attempt.retries += retried.retries;
        retried.result
    }

    /// Sync one bundle
    pub async fn reconcile_bundle(&self, spec: &PriceBundleSpec) -> ReconcileOutcome {
        let mut attempt = Attempt {
            code: spec.code.clone(),
            bundle_type: Some(spec.bundle_type),
            retries: 0,
        };

        let existing = match self
            .call(&mut attempt, "find_bundles_by_code", || self.store.find_bundles_by_code(&spec.code))
            .await
        {
            Ok(existing) => existing,
            Err(err) => return attempt.fail(err),
        };

        match existing.as_slice() {
            [] => match self
                .call(&mut attempt, "create_bundle", || self.store.create_bundle(spec))
                .await
            {
                Ok(reference) => attempt.written(Outcome::Created, reference),
                Err(err) => attempt.fail(err),
            },
            [remote] if remote.member_codes == spec.members => {
                let id = remote.reference.id.clone();
                attempt.finish(Outcome::Skipped, Some(id))
            }
            [remote] => {
                let id = remote.reference.id.clone();
                match self
                    .call(&mut attempt, "update_bundle", || self.store.update_bundle(&id, spec))
                    .await
                {
                    Ok(reference) => attempt.written(Outcome::Updated, reference),
                    Err(err) => attempt.fail(err),
                }
            }
            many => attempt.fail(FailureReason::DataIntegrity { matches: many.len() }),
        }
    }

    /// Sync one price
    pub async fn reconcile_price(&self, spec: &PriceSpec) -> ReconcileOutcome {
        let mut attempt = Attempt {
            code: spec.code.clone(),
            bundle_type: None,
            retries: 0,
        };

        let existing = match self
            .call(&mut attempt, "find_prices_by_code", || self.store.find_prices_by_code(&spec.code))
            .await
        {
            Ok(existing) => existing,
            Err(err) => return attempt.fail(err),
        };

        match existing.as_slice() {
            [] => match self
                .call(&mut attempt, "create_price", || self.store.create_price(spec))
                .await
            {
                Ok(reference) => attempt.written(Outcome::Created, reference),
                Err(err) => attempt.fail(err),
            },
            [remote] if spec.matches(remote) => {
                let id = remote.reference.id.clone();
                attempt.finish(Outcome::Skipped, Some(id))
            }
            [remote] => {
                let id = remote.reference.id.clone();
                match self
                    .call(&mut attempt, "update_price", || self.store.update_price(&id, spec))
                    .await
                {
                    Ok(reference) => attempt.written(Outcome::Updated, reference),
                    Err(err) => attempt.fail(err),
                }
            }
            many => attempt.fail(FailureReason::DataIntegrity { matches: many.len() }),
        }
    }

    /// Create one service plan unless its code already exists
    pub async fn reconcile_plan(&self, spec: &PlanSpec) -> ReconcileOutcome {
        let mut attempt = Attempt {
            code: spec.code.clone(),
            bundle_type: None,
            retries: 0,
        };

        let existing = match self
            .call(&mut attempt, "find_plans_by_code", || self.store.find_plans_by_code(&spec.code))
            .await
        {
            Ok(existing) => existing,
            Err(err) => return attempt.fail(err),
        };

        match existing.as_slice() {
            [] => match self
                .call(&mut attempt, "create_plan", || self.store.create_plan(spec))
                .await
            {
                Ok(reference) => attempt.written(Outcome::Created, reference),
                Err(err) => attempt.fail(err),
            },
            [remote] => {
                let id = remote.id.clone();
                attempt.finish(Outcome::Skipped, Some(id))
            }
            many => attempt.fail(FailureReason::DataIntegrity { matches: many.len() }),
        }
    }

    /// Sync every bundle with bounded concurrency; outcomes sorted by code
    pub async fn reconcile_bundles(&self, specs: &[PriceBundleSpec]) -> Vec<ReconcileOutcome> {
        let mut outcomes: Vec<ReconcileOutcome> = stream::iter(specs)
            .map(|spec| self.reconcile_bundle(spec))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        outcomes.sort_by(|a, b| a.code.cmp(&b.code));
        outcomes
    }

    /// Sync every price with bounded concurrency; outcomes sorted by code
    pub async fn reconcile_prices(&self, specs: &[PriceSpec]) -> Vec<ReconcileOutcome> {
        let mut outcomes: Vec<ReconcileOutcome> = stream::iter(specs)
            .map(|spec| self.reconcile_price(spec))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        outcomes.sort_by(|a, b| a.code.cmp(&b.code));
        outcomes
    }

    pub async fn reconcile_plans(&self, specs: &[PlanSpec]) -> Vec<ReconcileOutcome> {
        let mut outcomes: Vec<ReconcileOutcome> = stream::iter(specs)
            .map(|spec| self.reconcile_plan(spec))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        outcomes.sort_by(|a, b| a.code.cmp(&b.code));
        outcomes
    }
}
