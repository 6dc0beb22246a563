//! Error type for `tally-store-sqlite`.

use tally_core::model::Collection;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// A filter named a field that cannot be spliced into SQL.
  #[error("invalid filter field: {0:?}")]
  InvalidField(&'static str),

  /// A stored body that is not a JSON object.
  #[error("corrupt document {collection}/{id}")]
  CorruptDocument { collection: Collection, id: i64 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
