//! In-memory [`PricingStore`] for round-trip tests
//!
//! Behaves like the remote platform where it matters to the engine:
//! codes are unique on create, `component` bundles must be complete, and
//! failures can be scripted per operation.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

use crate::error::{StoreError, StoreErrorKind, StoreResult};
use crate::models::{
    BundleType, PriceBundleSpec, RemoteBundle, RemotePrice, RemotePriceReference, ServicePlan,
    is_component_complete,
};
use crate::plans::PlanSpec;
use crate::prices::PriceSpec;
use crate::store::PricingStore;

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    bundles: Vec<RemoteBundle>,
    prices: Vec<RemotePrice>,
    plans: Vec<ServicePlan>,
    writes: usize,
    failures: HashMap<String, VecDeque<StoreError>>,
}

impl State {
    fn next_reference(&mut self, code: &str) -> RemotePriceReference {
        self.next_id += 1;
        RemotePriceReference {
            id: self.next_id.to_string(),
            code: code.to_string(),
        }
    }

    fn scripted(&mut self, operation: &str) -> StoreResult<()> {
        match self.failures.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPricingStore {
    state: Mutex<State>,
}

impl InMemoryPricingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `operation` (a trait method name) fail with `err`
    pub async fn fail_next(&self, operation: &str, err: StoreError) {
        self.state
            .lock()
            .await
            .failures
            .entry(operation.to_string())
            .or_default()
            .push_back(err);
    }

    /// Seed a bundle directly, bypassing uniqueness checks
    pub async fn insert_bundle(&self, code: &str, members: &[&str]) -> String {
        let mut state = self.state.lock().await;
        let reference = state.next_reference(code);
        let id = reference.id.clone();
        state.bundles.push(RemoteBundle {
            reference,
            member_codes: members.iter().map(|m| m.to_string()).collect(),
        });
        id
    }

    pub async fn insert_plan(&self, plan: ServicePlan) {
        self.state.lock().await.plans.push(plan);
    }

    pub async fn bundle(&self, code: &str) -> Option<RemoteBundle> {
        let state = self.state.lock().await;
        state.bundles.iter().find(|b| b.reference.code == code).cloned()
    }

    pub async fn bundles(&self) -> Vec<RemoteBundle> {
        self.state.lock().await.bundles.clone()
    }

    pub async fn prices(&self) -> Vec<RemotePrice> {
        self.state.lock().await.prices.clone()
    }

    pub async fn plans(&self) -> Vec<ServicePlan> {
        self.state.lock().await.plans.clone()
    }

    /// Successful create and update calls so far
    pub async fn write_count(&self) -> usize {
        self.state.lock().await.writes
    }
}

#[async_trait]
impl PricingStore for InMemoryPricingStore {
    async fn find_bundles_by_code(&self, code: &str) -> StoreResult<Vec<RemoteBundle>> {
        let mut state = self.state.lock().await;
        state.scripted("find_bundles_by_code")?;
        Ok(state
            .bundles
            .iter()
            .filter(|b| b.reference.code == code)
            .cloned()
            .collect())
    }

    async fn create_bundle(&self, spec: &PriceBundleSpec) -> StoreResult<RemotePriceReference> {
        let mut state = self.state.lock().await;
        state.scripted("create_bundle")?;

        if state.bundles.iter().any(|b| b.reference.code == spec.code) {
            return Err(StoreError::new(
                StoreErrorKind::DuplicateCode,
                format!("Code {} is already in use", spec.code),
            ));
        }
        if spec.bundle_type == BundleType::Component && !is_component_complete(&spec.axes) {
            return Err(StoreError::new(
                StoreErrorKind::MissingRequiredAxis,
                "Component price sets must include cores, memory and storage",
            ));
        }

        let reference = state.next_reference(&spec.code);
        state.bundles.push(RemoteBundle {
            reference: reference.clone(),
            member_codes: spec.members.clone(),
        });
        state.writes += 1;
        Ok(reference)
    }

    async fn update_bundle(&self, id: &str, spec: &PriceBundleSpec) -> StoreResult<RemotePriceReference> {
        let mut state = self.state.lock().await;
        state.scripted("update_bundle")?;

        let bundle = state
            .bundles
            .iter_mut()
            .find(|b| b.reference.id == id)
            .ok_or_else(|| StoreError::not_found(format!("Price set {id} not found")))?;
        bundle.member_codes = spec.members.clone();
        let reference = bundle.reference.clone();
        state.writes += 1;
        Ok(reference)
    }

    async fn find_prices_by_code(&self, code: &str) -> StoreResult<Vec<RemotePrice>> {
        let mut state = self.state.lock().await;
        state.scripted("find_prices_by_code")?;
        Ok(state
            .prices
            .iter()
            .filter(|p| p.reference.code == code)
            .cloned()
            .collect())
    }

    async fn create_price(&self, spec: &PriceSpec) -> StoreResult<RemotePriceReference> {
        let mut state = self.state.lock().await;
        state.scripted("create_price")?;

        if state.prices.iter().any(|p| p.reference.code == spec.code) {
            return Err(StoreError::new(
                StoreErrorKind::DuplicateCode,
                format!("Code {} is already in use", spec.code),
            ));
        }

        let reference = state.next_reference(&spec.code);
        state.prices.push(RemotePrice {
            reference: reference.clone(),
            amount: spec.amount,
            price_type: spec.price_type.to_string(),
            price_unit: spec.price_unit.to_string(),
        });
        state.writes += 1;
        Ok(reference)
    }

    async fn update_price(&self, id: &str, spec: &PriceSpec) -> StoreResult<RemotePriceReference> {
        let mut state = self.state.lock().await;
        state.scripted("update_price")?;

        let price = state
            .prices
            .iter_mut()
            .find(|p| p.reference.id == id)
            .ok_or_else(|| StoreError::not_found(format!("Price {id} not found")))?;
        price.amount = spec.amount;
        price.price_type = spec.price_type.to_string();
        price.price_unit = spec.price_unit.to_string();
        let reference = price.reference.clone();
        state.writes += 1;
        Ok(reference)
    }

    async fn list_service_plans(&self) -> StoreResult<Vec<ServicePlan>> {
        let mut state = self.state.lock().await;
        state.scripted("list_service_plans")?;
        Ok(state.plans.clone())
    }

    async fn update_plan_bundles(&self, plan_id: &str, bundle_ids: &[String]) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.scripted("update_plan_bundles")?;

        let plan = state
            .plans
            .iter_mut()
            .find(|p| p.id == plan_id)
            .ok_or_else(|| StoreError::not_found(format!("Service plan {plan_id} not found")))?;
        plan.bundle_ids = bundle_ids.to_vec();
        state.writes += 1;
        Ok(())
    }

    async fn find_plans_by_code(&self, code: &str) -> StoreResult<Vec<ServicePlan>> {
        let mut state = self.state.lock().await;
        state.scripted("find_plans_by_code")?;
        Ok(state.plans.iter().filter(|p| p.code == code).cloned().collect())
    }

    async fn create_plan(&self, spec: &PlanSpec) -> StoreResult<RemotePriceReference> {
        let mut state = self.state.lock().await;
        state.scripted("create_plan")?;

        if state.plans.iter().any(|p| p.code == spec.code) {
            return Err(StoreError::new(
                StoreErrorKind::DuplicateCode,
                format!("Code {} is already in use", spec.code),
            ));
        }
        let bundle_ids: Vec<String> = state
            .bundles
            .iter()
            .filter(|b| b.reference.code == spec.bundle_code)
            .map(|b| b.reference.id.clone())
            .collect();
        if bundle_ids.len() != 1 {
            return Err(StoreError::not_found(format!(
                "Price set {} for plan {} does not exist",
                spec.bundle_code, spec.code
            )));
        }

        let reference = state.next_reference(&spec.code);
        state.plans.push(ServicePlan {
            id: reference.id.clone(),
            name: spec.name.clone(),
            code: spec.code.clone(),
            region: Some(spec.key.region.clone()),
            bundle_ids,
            ..Default::default()
        });
        state.writes += 1;
        Ok(reference)
    }
}
