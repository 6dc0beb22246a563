//! [`SqliteStore`], the SQLite implementation of [`DocumentStore`].

use std::path::Path;

use rusqlite::OptionalExtension as _;
use tally_core::{
  model::Collection,
  plan::{Plan, PlanFailure, StepOutcome},
  store::{Document, DocumentStore, Filter},
};

use crate::{
  Error, Result,
  schema::{SCHEMA, SCHEMA_VERSION},
  sql::{Predicate, Statement, decode_body, encode_body},
};

/// A Tally store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    tracing::debug!(version = SCHEMA_VERSION, "sqlite schema ready");
    Ok(())
  }

  #[cfg(test)]
  pub(crate) async fn execute_batch(&self, sql: String) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(&sql)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// The schema revision recorded in `PRAGMA user_version`.
  pub async fn schema_version(&self) -> Result<i64> {
    let version = self
      .conn
      .call(|conn| Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?))
      .await?;
    Ok(version)
  }
}

impl DocumentStore for SqliteStore {
  type Error = Error;

  async fn insert(&self, collection: Collection, body: Document) -> Result<i64> {
    let body = encode_body(body)?;
    let sql = format!("INSERT INTO {} (body) VALUES (?1)", collection.name());

    let id = self
      .conn
      .call(move |conn| {
        conn.execute(&sql, rusqlite::params![body])?;
        Ok(conn.last_insert_rowid())
      })
      .await?;
    Ok(id)
  }

  async fn fetch(&self, collection: Collection, id: i64) -> Result<Option<Document>> {
    let sql = format!("SELECT body FROM {} WHERE id = ?1", collection.name());

    let body: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(&sql, rusqlite::params![id], |row| row.get(0))
            .optional()?,
        )
      })
      .await?;

    body.map(|b| decode_body(collection, id, &b)).transpose()
  }

  async fn replace(&self, collection: Collection, id: i64, body: Document) -> Result<bool> {
    let body = encode_body(body)?;
    let sql = format!("UPDATE {} SET body = ?2 WHERE id = ?1", collection.name());

    let changed = self
      .conn
      .call(move |conn| Ok(conn.execute(&sql, rusqlite::params![id, body])?))
      .await?;
    Ok(changed > 0)
  }

  async fn remove(&self, collection: Collection, id: i64) -> Result<bool> {
    let sql = format!("DELETE FROM {} WHERE id = ?1", collection.name());

    let changed = self
      .conn
      .call(move |conn| Ok(conn.execute(&sql, rusqlite::params![id])?))
      .await?;
    Ok(changed > 0)
  }

  async fn scan<'a>(&'a self, collection: Collection, filter: &'a Filter) -> Result<Vec<Document>> {
    let Predicate { clause, params } = Predicate::compile(filter)?;
    let sql = format!(
      "SELECT id, body FROM {} WHERE {clause} ORDER BY id",
      collection.name()
    );

    let rows: Vec<(i64, String)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok((row.get(0)?, row.get(1)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(id, body)| decode_body(collection, id, &body))
      .collect()
  }

  /// Run the whole plan in one transaction. On failure nothing is applied.
  async fn commit(&self, plan: Plan) -> Result<Vec<StepOutcome>, PlanFailure<Error>> {
    let rolled_back = |failed_step, error| PlanFailure {
      applied: Vec::new(),
      failed_step,
      rolled_back: true,
      error,
    };

    let mut statements = Vec::with_capacity(plan.len());
    for (index, step) in plan.into_steps().into_iter().enumerate() {
      statements.push(Statement::from_step(step).map_err(|e| rolled_back(index, e))?);
    }
    let steps = statements.len();

    let result = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut outcomes = Vec::with_capacity(statements.len());
        for (index, statement) in statements.iter().enumerate() {
          match statement.execute(&tx) {
            Ok(outcome) => outcomes.push(outcome),
            // Dropping `tx` rolls back.
            Err(e) => return Ok(Err((index, e))),
          }
        }
        match tx.commit() {
          Ok(()) => Ok(Ok(outcomes)),
          Err(e) => Ok(Err((statements.len(), e))),
        }
      })
      .await;

    match result {
      Ok(Ok(outcomes)) => {
        tracing::debug!(steps, "committed plan");
        Ok(outcomes)
      }
      Ok(Err((failed_step, e))) => Err(rolled_back(failed_step, Error::Sqlite(e))),
      Err(e) => Err(rolled_back(0, Error::Database(e))),
    }
  }
}
