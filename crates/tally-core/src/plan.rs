//! Units of work for multi-write operations.
//!
//! A cascade delete or a bulk publish is planned up front as a list of
//! [`Step`]s and committed in a single [`DocumentStore::commit`] call. The
//! backend reports either every step's outcome or a [`PlanFailure`] naming
//! what had already been applied.
//!
//! [`DocumentStore::commit`]: crate::store::DocumentStore::commit

use serde::Serialize;

use crate::{
  Result,
  live::ChangeSet,
  model::{Collection, Record, field},
  store::{Document, Filter, to_document},
};

/// A single planned write.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
  /// Delete one row; a row that is already gone counts as zero deletions.
  Delete { collection: Collection, id: i64 },
  DeleteWhere { collection: Collection, filter: Filter },
  Insert { collection: Collection, body: Document },
}

impl Step {
  pub fn collection(&self) -> Collection {
    match self {
      Self::Delete { collection, .. }
      | Self::DeleteWhere { collection, .. }
      | Self::Insert { collection, .. } => *collection,
    }
  }
}

/// What one committed step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutcome {
  Deleted { collection: Collection, count: usize },
  Inserted { collection: Collection, id: i64 },
}

impl StepOutcome {
  pub fn collection(&self) -> Collection {
    match self {
      Self::Deleted { collection, .. } | Self::Inserted { collection, .. } => *collection,
    }
  }
}

/// A backend's report of a plan that did not complete.
#[derive(Debug)]
pub struct PlanFailure<E> {
  /// Outcomes of the steps that took effect and remain in effect.
  pub applied:     Vec<StepOutcome>,
  /// Index of the step that failed.
  pub failed_step: usize,
  /// Set when the backend undid the whole plan.
  pub rolled_back: bool,
  pub error:       E,
}

/// An ordered list of writes committed as one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
  steps: Vec<Step>,
}

impl Plan {
  pub fn new() -> Self { Self::default() }

  pub fn push(&mut self, step: Step) -> &mut Self {
    self.steps.push(step);
    self
  }

  pub fn delete<R: Record>(&mut self, id: R::Id) -> &mut Self {
    self.push(Step::Delete { collection: R::COLLECTION, id: id.into() })
  }

  pub fn delete_where<R: Record>(&mut self, filter: Filter) -> &mut Self {
    self.push(Step::DeleteWhere { collection: R::COLLECTION, filter })
  }

  /// Queue an insert. The body must not carry an `id`; the backend assigns it.
  pub fn insert<R: Record>(&mut self, new: &R::New) -> Result<&mut Self> {
    let mut body = to_document(new)?;
    body.remove(field::ID);
    Ok(self.push(Step::Insert { collection: R::COLLECTION, body }))
  }

  pub fn steps(&self) -> &[Step] { &self.steps }

  pub fn into_steps(self) -> Vec<Step> { self.steps }

  pub fn len(&self) -> usize { self.steps.len() }

  pub fn is_empty(&self) -> bool { self.steps.is_empty() }

  /// Every collection this plan writes to.
  pub fn touches(&self) -> ChangeSet { self.steps.iter().map(Step::collection).collect() }
}

/// Ids of inserted rows, in plan order.
pub fn inserted_ids(outcomes: &[StepOutcome]) -> impl Iterator<Item = i64> + '_ {
  outcomes.iter().filter_map(|o| match o {
    StepOutcome::Inserted { id, .. } => Some(*id),
    StepOutcome::Deleted { .. } => None,
  })
}
