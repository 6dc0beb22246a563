//! An in-process [`DocumentStore`], used as the test double for the
//! components in this crate.
//!
//! Plans are applied step by step with no rollback, so a failure partway
//! leaves the earlier steps in place. [`MemoryStore::reject_writes_to`] makes
//! a collection refuse writes, which is how the partial-failure paths are
//! exercised.

use std::{
  collections::{BTreeMap, BTreeSet},
  sync::{Arc, Mutex, MutexGuard},
};

use serde_json::Value;
use thiserror::Error;

use crate::{
  model::{Collection, field},
  plan::{Plan, PlanFailure, Step, StepOutcome},
  store::{Document, DocumentStore, Filter},
};

#[derive(Debug, Error)]
pub enum MemoryError {
  #[error("writes to {0} are rejected")]
  Rejected(Collection),

  #[error("invalid filter field: {0:?}")]
  InvalidField(&'static str),

  #[error("store lock poisoned")]
  Poisoned,
}

#[derive(Debug, Default)]
struct Table {
  last_id: i64,
  rows:    BTreeMap<i64, Document>,
}

#[derive(Debug, Default)]
struct Inner {
  tables:   BTreeMap<Collection, Table>,
  rejected: BTreeSet<Collection>,
}

impl Inner {
  fn check_writable(&self, collection: Collection) -> Result<(), MemoryError> {
    if self.rejected.contains(&collection) {
      Err(MemoryError::Rejected(collection))
    } else {
      Ok(())
    }
  }

  fn insert(&mut self, collection: Collection, mut body: Document) -> Result<i64, MemoryError> {
    self.check_writable(collection)?;
    let table = self.tables.entry(collection).or_default();
    table.last_id += 1;
    let id = table.last_id;
    body.insert(field::ID.to_owned(), Value::from(id));
    table.rows.insert(id, body);
    Ok(id)
  }

  fn remove(&mut self, collection: Collection, id: i64) -> Result<bool, MemoryError> {
    self.check_writable(collection)?;
    Ok(
      self
        .tables
        .get_mut(&collection)
        .and_then(|t| t.rows.remove(&id))
        .is_some(),
    )
  }

  fn remove_where(&mut self, collection: Collection, filter: &Filter) -> Result<usize, MemoryError> {
    self.check_writable(collection)?;
    if let Some(bad) = filter.invalid_field() {
      return Err(MemoryError::InvalidField(bad));
    }
    let Some(table) = self.tables.get_mut(&collection) else {
      return Ok(0);
    };
    let before = table.rows.len();
    table.rows.retain(|_, doc| !filter.matches(doc));
    Ok(before - table.rows.len())
  }

  fn apply(&mut self, step: Step) -> Result<StepOutcome, MemoryError> {
    match step {
      Step::Delete { collection, id } => {
        let count = usize::from(self.remove(collection, id)?);
        Ok(StepOutcome::Deleted { collection, count })
      }
      Step::DeleteWhere { collection, filter } => {
        let count = self.remove_where(collection, &filter)?;
        Ok(StepOutcome::Deleted { collection, count })
      }
      Step::Insert { collection, body } => {
        let id = self.insert(collection, body)?;
        Ok(StepOutcome::Inserted { collection, id })
      }
    }
  }
}

/// In-memory document store. Cloning is cheap; clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
  inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }

  fn lock(&self) -> Result<MutexGuard<'_, Inner>, MemoryError> {
    self.inner.lock().map_err(|_| MemoryError::Poisoned)
  }

  /// Make every subsequent write to `collection` fail.
  pub fn reject_writes_to(&self, collection: Collection) {
    if let Ok(mut inner) = self.lock() {
      inner.rejected.insert(collection);
    }
  }

  /// Undo [`Self::reject_writes_to`].
  pub fn accept_writes_to(&self, collection: Collection) {
    if let Ok(mut inner) = self.lock() {
      inner.rejected.remove(&collection);
    }
  }
}

impl DocumentStore for MemoryStore {
  type Error = MemoryError;

  async fn insert(&self, collection: Collection, body: Document) -> Result<i64, MemoryError> {
    self.lock()?.insert(collection, body)
  }

  async fn fetch(&self, collection: Collection, id: i64) -> Result<Option<Document>, MemoryError> {
    Ok(
      self
        .lock()?
        .tables
        .get(&collection)
        .and_then(|t| t.rows.get(&id))
        .cloned(),
    )
  }

  async fn replace(
    &self,
    collection: Collection,
    id: i64,
    mut body: Document,
  ) -> Result<bool, MemoryError> {
    let mut inner = self.lock()?;
    inner.check_writable(collection)?;
    let Some(slot) = inner
      .tables
      .get_mut(&collection)
      .and_then(|t| t.rows.get_mut(&id))
    else {
      return Ok(false);
    };
    body.insert(field::ID.to_owned(), Value::from(id));
    *slot = body;
    Ok(true)
  }

  async fn remove(&self, collection: Collection, id: i64) -> Result<bool, MemoryError> {
    self.lock()?.remove(collection, id)
  }

  async fn scan<'a>(
    &'a self,
    collection: Collection,
    filter: &'a Filter,
  ) -> Result<Vec<Document>, MemoryError> {
    if let Some(bad) = filter.invalid_field() {
      return Err(MemoryError::InvalidField(bad));
    }
    Ok(
      self
        .lock()?
        .tables
        .get(&collection)
        .map(|t| {
          t.rows
            .values()
            .filter(|doc| filter.matches(doc))
            .cloned()
            .collect()
        })
        .unwrap_or_default(),
    )
  }

  async fn commit(&self, plan: Plan) -> Result<Vec<StepOutcome>, PlanFailure<MemoryError>> {
    let mut inner = self.lock().map_err(|error| PlanFailure {
      applied: Vec::new(),
      failed_step: 0,
      rolled_back: true,
      error,
    })?;

    let mut applied = Vec::with_capacity(plan.len());
    for (index, step) in plan.into_steps().into_iter().enumerate() {
      match inner.apply(step) {
        Ok(outcome) => applied.push(outcome),
        Err(error) => {
          return Err(PlanFailure { applied, failed_step: index, rolled_back: false, error });
        }
      }
    }
    Ok(applied)
  }
}
