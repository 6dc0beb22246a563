//! Translation between core documents, filters and plans, and SQL.

use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use tally_core::{
  model::{Collection, field},
  plan::{Step, StepOutcome},
  store::{Document, Filter, Scalar},
};

use crate::{Error, Result};

// ─── Documents ───────────────────────────────────────────────────────────────

/// Serialise a document for the `body` column. The id is kept in the key
/// column, not in the body.
pub fn encode_body(mut doc: Document) -> Result<String> {
  doc.remove(field::ID);
  Ok(serde_json::to_string(&doc)?)
}

pub fn decode_body(collection: Collection, id: i64, body: &str) -> Result<Document> {
  match serde_json::from_str::<Value>(body)? {
    Value::Object(mut doc) => {
      doc.insert(field::ID.to_owned(), Value::from(id));
      Ok(doc)
    }
    _ => Err(Error::CorruptDocument { collection, id }),
  }
}

// ─── Filters ─────────────────────────────────────────────────────────────────

/// A `WHERE` clause with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
  pub clause: String,
  pub params: Vec<SqlValue>,
}

impl Predicate {
  /// Compile `filter`. Field names are spliced into the SQL text, so only
  /// plain identifiers are accepted.
  pub fn compile(filter: &Filter) -> Result<Self> {
    if let Some(bad) = filter.invalid_field() {
      return Err(Error::InvalidField(bad));
    }
    let mut params = Vec::new();
    let clause = clause(filter, &mut params);
    Ok(Self { clause, params })
  }
}

fn clause(filter: &Filter, params: &mut Vec<SqlValue>) -> String {
  match filter {
    Filter::All => "1".to_owned(),
    Filter::Eq(name, value) => {
      params.push(scalar(value));
      let n = params.len();
      if *name == field::ID {
        format!("id = ?{n}")
      } else {
        // Must match the indexed expression exactly for the index to apply.
        format!("json_extract(body, '$.{name}') = ?{n}")
      }
    }
    Filter::And(parts) if parts.is_empty() => "1".to_owned(),
    Filter::And(parts) => parts
      .iter()
      .map(|p| format!("({})", clause(p, params)))
      .collect::<Vec<_>>()
      .join(" AND "),
  }
}

fn scalar(value: &Scalar) -> SqlValue {
  match value {
    Scalar::Int(i) => SqlValue::Integer(*i),
    Scalar::Text(s) => SqlValue::Text(s.clone()),
  }
}

// ─── Plans ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
  Insert,
  Delete,
}

/// One plan step, ready to run on the connection thread.
#[derive(Debug, Clone)]
pub struct Statement {
  collection: Collection,
  kind:       Kind,
  sql:        String,
  params:     Vec<SqlValue>,
}

impl Statement {
  pub fn from_step(step: Step) -> Result<Self> {
    match step {
      Step::Delete { collection, id } => Ok(Self {
        collection,
        kind: Kind::Delete,
        sql: format!("DELETE FROM {} WHERE id = ?1", collection.name()),
        params: vec![SqlValue::Integer(id)],
      }),
      Step::DeleteWhere { collection, filter } => {
        let Predicate { clause, params } = Predicate::compile(&filter)?;
        Ok(Self {
          collection,
          kind: Kind::Delete,
          sql: format!("DELETE FROM {} WHERE {clause}", collection.name()),
          params,
        })
      }
      Step::Insert { collection, body } => Ok(Self {
        collection,
        kind: Kind::Insert,
        sql: format!("INSERT INTO {} (body) VALUES (?1)", collection.name()),
        params: vec![SqlValue::Text(encode_body(body)?)],
      }),
    }
  }

  pub fn execute(&self, conn: &rusqlite::Connection) -> rusqlite::Result<StepOutcome> {
    let count = conn.execute(&self.sql, rusqlite::params_from_iter(self.params.iter()))?;
    Ok(match self.kind {
      Kind::Insert => StepOutcome::Inserted {
        collection: self.collection,
        id:         conn.last_insert_rowid(),
      },
      Kind::Delete => StepOutcome::Deleted { collection: self.collection, count },
    })
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn eq_on_a_body_field_uses_json_extract() {
    let p = Predicate::compile(&Filter::eq(field::SURVEY_ID, 3)).unwrap();
    assert_eq!(p.clause, "json_extract(body, '$.survey_id') = ?1");
    assert_eq!(p.params, vec![SqlValue::Integer(3)]);
  }

  #[test]
  fn eq_on_id_uses_the_key_column() {
    let p = Predicate::compile(&Filter::eq(field::ID, 7)).unwrap();
    assert_eq!(p.clause, "id = ?1");
  }

  #[test]
  fn conjunction_numbers_parameters_in_order() {
    let f = Filter::eq(field::SURVEY_ID, 1).and(Filter::eq(field::EMAIL, "a@x.com"));
    let p = Predicate::compile(&f).unwrap();
    assert_eq!(
      p.clause,
      "(json_extract(body, '$.survey_id') = ?1) AND (json_extract(body, '$.email') = ?2)"
    );
    assert_eq!(p.params, vec![SqlValue::Integer(1), SqlValue::Text("a@x.com".into())]);
  }

  #[test]
  fn unsafe_field_names_are_refused() {
    let err = Predicate::compile(&Filter::eq("x') OR 1=1 --", 1)).unwrap_err();
    assert!(matches!(err, Error::InvalidField(_)));
  }

  #[test]
  fn body_round_trip_moves_the_id_to_the_key_column() {
    let doc = match json!({ "id": 9, "title": "Lunch Poll" }) {
      Value::Object(m) => m,
      _ => unreachable!(),
    };
    let body = encode_body(doc).unwrap();
    assert_eq!(body, r#"{"title":"Lunch Poll"}"#);

    let decoded = decode_body(Collection::Surveys, 4, &body).unwrap();
    assert_eq!(decoded.get("id"), Some(&json!(4)));
  }

  #[test]
  fn non_object_bodies_are_corrupt() {
    let err = decode_body(Collection::Surveys, 1, "[1,2]").unwrap_err();
    assert!(matches!(err, Error::CorruptDocument { id: 1, .. }));
  }
}
