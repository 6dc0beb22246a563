//! Error types for `tally-core`.

use thiserror::Error;

use crate::{model::Collection, plan::StepOutcome};

#[derive(Debug, Error)]
pub enum Error {
  /// Input rejected before any store write.
  #[error("validation failed: {0}")]
  Validation(String),

  #[error("{collection} record {id} not found")]
  NotFound { collection: Collection, id: i64 },

  #[error("{collection} already holds a record with {field} {value:?}")]
  DuplicateKey {
    collection: Collection,
    field:      &'static str,
    value:      String,
  },

  /// A multi-write operation failed partway. `applied` lists the steps that
  /// took effect; when `rolled_back` is set the backend undid all of them.
  #[error(
    "{operation} failed at step {failed_step} after {} applied step(s) (rolled back: {rolled_back}): {source}",
    .applied.len()
  )]
  PartialFailure {
    operation:   &'static str,
    applied:     Vec<StepOutcome>,
    failed_step: usize,
    rolled_back: bool,
    #[source]
    source:      Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }

  pub fn not_found(collection: Collection, id: impl Into<i64>) -> Self {
    Self::NotFound { collection, id: id.into() }
  }

  pub fn is_not_found(&self) -> bool { matches!(self, Self::NotFound { .. }) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
