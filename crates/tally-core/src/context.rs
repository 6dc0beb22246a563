//! The explicit handle every component is constructed with.

use std::sync::Arc;

use crate::{
  Result,
  live::{ChangeBus, ChangeSet},
  plan::{Plan, StepOutcome},
  store::{DocumentStore, EntityStore as _},
};

/// A store plus the change bus its writes are announced on.
///
/// Cloning is cheap; clones share the store and the bus.
pub struct Context<S> {
  store: Arc<S>,
  bus:   ChangeBus,
}

impl<S> Clone for Context<S> {
  fn clone(&self) -> Self { Self { store: self.store.clone(), bus: self.bus.clone() } }
}

impl<S: DocumentStore> Context<S> {
  pub fn new(store: Arc<S>) -> Self { Self::with_bus(store, ChangeBus::default()) }

  pub fn with_bus(store: Arc<S>, bus: ChangeBus) -> Self { Self { store, bus } }

  pub fn store(&self) -> &S { &self.store }

  pub fn bus(&self) -> &ChangeBus { &self.bus }

  pub fn notify(&self, changes: ChangeSet) { self.bus.publish(changes); }

  /// Commit `plan` and announce it. A failed plan is still announced unless
  /// the backend rolled it back entirely.
  pub async fn commit(&self, operation: &'static str, plan: Plan) -> Result<Vec<StepOutcome>> {
    let touched = plan.touches();
    let result = self.store.run_plan(operation, plan).await;
    match &result {
      Ok(_) => self.notify(touched),
      Err(crate::Error::PartialFailure { applied, rolled_back: false, .. }) if !applied.is_empty() => {
        self.notify(applied.iter().map(StepOutcome::collection).collect());
      }
      Err(_) => {}
    }
    result
  }
}
