//! The store contract.
//!
//! Backends implement [`DocumentStore`], which deals in untyped JSON documents
//! addressed by `(Collection, id)`. Every backend automatically gets the typed
//! [`EntityStore`] layer on top, which is what the rest of the crate (and the
//! presentation layers) talk to.
//!
//! The store offers no cross-collection transaction primitive of its own.
//! Multi-write operations are expressed as a [`Plan`] handed to
//! [`DocumentStore::commit`] in one call; whether that is atomic is up to the
//! backend.

use std::future::Future;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::{
  Error, Result,
  model::{Collection, Record, field},
  plan::{Plan, PlanFailure, StepOutcome},
};

/// One stored row: a JSON object that always carries its `id`.
pub type Document = Map<String, Value>;

// ─── Filters ─────────────────────────────────────────────────────────────────

/// A scalar compared against a document field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scalar {
  Int(i64),
  Text(String),
}

impl From<i64> for Scalar {
  fn from(v: i64) -> Self { Self::Int(v) }
}

impl From<&str> for Scalar {
  fn from(v: &str) -> Self { Self::Text(v.to_owned()) }
}

impl From<String> for Scalar {
  fn from(v: String) -> Self { Self::Text(v) }
}

impl Scalar {
  fn matches(&self, value: Option<&Value>) -> bool {
    match (self, value) {
      (Self::Int(want), Some(v)) => v.as_i64() == Some(*want),
      (Self::Text(want), Some(v)) => v.as_str() == Some(want.as_str()),
      (_, None) => false,
    }
  }
}

/// A predicate over the top-level fields of a document.
///
/// Deliberately small so that every backend can evaluate it natively (the
/// SQLite backend translates it to `json_extract` comparisons).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Filter {
  #[default]
  All,
  Eq(&'static str, Scalar),
  And(Vec<Filter>),
}

impl Filter {
  pub fn eq(field: &'static str, value: impl Into<Scalar>) -> Self {
    Self::Eq(field, value.into())
  }

  /// Conjunction of `self` and `other`, flattened.
  pub fn and(self, other: Filter) -> Self {
    match (self, other) {
      (Self::All, f) | (f, Self::All) => f,
      (Self::And(mut a), Self::And(b)) => {
        a.extend(b);
        Self::And(a)
      }
      (Self::And(mut a), f) => {
        a.push(f);
        Self::And(a)
      }
      (f, Self::And(mut b)) => {
        b.insert(0, f);
        Self::And(b)
      }
      (a, b) => Self::And(vec![a, b]),
    }
  }

  pub fn matches(&self, doc: &Document) -> bool {
    match self {
      Self::All => true,
      Self::Eq(field, want) => want.matches(doc.get(*field)),
      Self::And(parts) => parts.iter().all(|p| p.matches(doc)),
    }
  }

  /// The first field name that is not a plain ASCII identifier, if any.
  pub fn invalid_field(&self) -> Option<&'static str> {
    match self {
      Self::All => None,
      Self::Eq(field, _) => (!is_identifier(field)).then_some(*field),
      Self::And(parts) => parts.iter().find_map(Filter::invalid_field),
    }
  }
}

fn is_identifier(name: &str) -> bool {
  !name.is_empty()
    && !name.starts_with(|c: char| c.is_ascii_digit())
    && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ─── Backend trait ───────────────────────────────────────────────────────────

/// Abstraction over a document storage backend.
///
/// Ids are assigned by the backend, start at 1, and are never reused within a
/// collection. Each method is atomic with respect to the single record it
/// touches.
pub trait DocumentStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Persist `body` under a fresh id, embedding the id as the `"id"` field.
  fn insert(
    &self,
    collection: Collection,
    body: Document,
  ) -> impl Future<Output = Result<i64, Self::Error>> + Send + '_;

  fn fetch(
    &self,
    collection: Collection,
    id: i64,
  ) -> impl Future<Output = Result<Option<Document>, Self::Error>> + Send + '_;

  /// Overwrite the document stored under `id`. Returns `false` if absent.
  fn replace(
    &self,
    collection: Collection,
    id: i64,
    body: Document,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Remove the document stored under `id`. Returns `false` if absent.
  fn remove(
    &self,
    collection: Collection,
    id: i64,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// All documents matching `filter`, in ascending id (insertion) order.
  fn scan<'a>(
    &'a self,
    collection: Collection,
    filter: &'a Filter,
  ) -> impl Future<Output = Result<Vec<Document>, Self::Error>> + Send + 'a;

  /// Apply every step of `plan`, in order, as one unit of work.
  fn commit(
    &self,
    plan: Plan,
  ) -> impl Future<Output = Result<Vec<StepOutcome>, PlanFailure<Self::Error>>> + Send + '_;
}

// ─── Typed layer ─────────────────────────────────────────────────────────────

pub(crate) fn to_document<T: Serialize>(value: &T) -> Result<Document> {
  match serde_json::to_value(value)? {
    Value::Object(map) => Ok(map),
    other => Err(Error::Serialization(serde::ser::Error::custom(format!(
      "expected a JSON object, got {other}"
    )))),
  }
}

pub(crate) fn from_document<R: DeserializeOwned>(doc: Document) -> Result<R> {
  Ok(serde_json::from_value(Value::Object(doc))?)
}

/// Typed CRUD over any [`DocumentStore`].
pub trait EntityStore: DocumentStore {
  /// Create a record and return it with its store-assigned id.
  fn create<R: Record>(&self, new: R::New) -> impl Future<Output = Result<R>> + Send + '_ {
    async move {
      let mut doc = to_document(&new)?;
      let id = self
        .insert(R::COLLECTION, doc.clone())
        .await
        .map_err(Error::store)?;
      doc.insert(field::ID.to_owned(), Value::from(id));
      from_document(doc)
    }
  }

  fn get<R: Record>(&self, id: R::Id) -> impl Future<Output = Result<Option<R>>> + Send + '_ {
    async move {
      self
        .fetch(R::COLLECTION, id.into())
        .await
        .map_err(Error::store)?
        .map(from_document)
        .transpose()
    }
  }

  /// Apply `patch` to the record. Returns the updated record, or
  /// [`Error::NotFound`].
  fn update<R: Record>(
    &self,
    id: R::Id,
    patch: R::Patch,
  ) -> impl Future<Output = Result<R>> + Send + '_ {
    async move {
      let mut record: R = self
        .get(id)
        .await?
        .ok_or_else(|| Error::not_found(R::COLLECTION, id))?;
      record.apply(patch);
      let doc = to_document(&record)?;
      let found = self
        .replace(R::COLLECTION, id.into(), doc)
        .await
        .map_err(Error::store)?;
      if !found {
        return Err(Error::not_found(R::COLLECTION, id));
      }
      Ok(record)
    }
  }

  /// Delete one record, or [`Error::NotFound`] if it does not exist.
  fn delete<R: Record>(&self, id: R::Id) -> impl Future<Output = Result<()>> + Send + '_ {
    async move {
      let found = self
        .remove(R::COLLECTION, id.into())
        .await
        .map_err(Error::store)?;
      if found { Ok(()) } else { Err(Error::not_found(R::COLLECTION, id)) }
    }
  }

  fn query<'a, R: Record>(
    &'a self,
    filter: &'a Filter,
  ) -> impl Future<Output = Result<Vec<R>>> + Send + 'a {
    async move {
      self
        .scan(R::COLLECTION, filter)
        .await
        .map_err(Error::store)?
        .into_iter()
        .map(from_document)
        .collect()
    }
  }

  /// The first record (lowest id) matching `filter`.
  fn find_one<'a, R: Record>(
    &'a self,
    filter: &'a Filter,
  ) -> impl Future<Output = Result<Option<R>>> + Send + 'a {
    async move { Ok(self.query::<R>(filter).await?.into_iter().next()) }
  }

  fn count<'a, R: Record>(
    &'a self,
    filter: &'a Filter,
  ) -> impl Future<Output = Result<usize>> + Send + 'a {
    async move {
      Ok(
        self
          .scan(R::COLLECTION, filter)
          .await
          .map_err(Error::store)?
          .len(),
      )
    }
  }

  /// Commit `plan`, mapping a backend failure to [`Error::PartialFailure`].
  fn run_plan(
    &self,
    operation: &'static str,
    plan: Plan,
  ) -> impl Future<Output = Result<Vec<StepOutcome>>> + Send + '_ {
    async move {
      self.commit(plan).await.map_err(|failure| {
        tracing::warn!(
          operation,
          failed_step = failure.failed_step,
          applied = failure.applied.len(),
          rolled_back = failure.rolled_back,
          error = %failure.error,
          "multi-write operation failed",
        );
        Error::PartialFailure {
          operation,
          applied: failure.applied,
          failed_step: failure.failed_step,
          rolled_back: failure.rolled_back,
          source: Box::new(failure.error),
        }
      })
    }
  }
}

impl<S: DocumentStore> EntityStore for S {}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn doc(v: Value) -> Document {
    match v {
      Value::Object(m) => m,
      _ => unreachable!(),
    }
  }

  #[test]
  fn eq_filter_compares_type_and_value() {
    let d = doc(json!({ "id": 1, "survey_id": 3, "email": "a@x.com" }));
    assert!(Filter::eq("survey_id", 3).matches(&d));
    assert!(!Filter::eq("survey_id", "3").matches(&d));
    assert!(Filter::eq("email", "a@x.com").matches(&d));
    assert!(!Filter::eq("email", "A@x.com").matches(&d));
    assert!(!Filter::eq("missing", 1).matches(&d));
  }

  #[test]
  fn and_flattens_and_drops_all() {
    let f = Filter::All
      .and(Filter::eq("a", 1))
      .and(Filter::eq("b", 2))
      .and(Filter::All);
    assert_eq!(f, Filter::And(vec![Filter::eq("a", 1), Filter::eq("b", 2)]));
  }

  #[test]
  fn invalid_field_names_are_reported() {
    assert_eq!(Filter::eq("survey_id", 1).invalid_field(), None);
    assert_eq!(
      Filter::eq("ok", 1).and(Filter::eq("x') OR 1=1 --", 1)).invalid_field(),
      Some("x') OR 1=1 --")
    );
    assert_eq!(Filter::eq("1abc", 1).invalid_field(), Some("1abc"));
  }
}
