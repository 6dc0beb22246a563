//! The survey data model: entities, link rows, and their typed ids.
//!
//! Every persisted type implements [`Record`], which ties it to its
//! [`Collection`], its id newtype, the payload used to create it, and the
//! patch used to edit it. Link rows, responses and assignments are immutable
//! once written, so their patch type is [`Infallible`].

use std::{convert::Infallible, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::store::Scalar;

// ─── Collections ─────────────────────────────────────────────────────────────

/// A named collection (table) in the store.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumIter,
  EnumString,
  IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Collection {
  Surveys,
  Respondents,
  Questions,
  SurveyRespondents,
  SurveyQuestions,
  Responses,
  PublishedAssignments,
}

impl Collection {
  /// The persisted table name, e.g. `"survey_respondents"`.
  pub fn name(self) -> &'static str { self.into() }
}

/// Names of the document fields the core filters on.
pub mod field {
  pub const ID: &str = "id";
  pub const EMAIL: &str = "email";
  pub const TEXT: &str = "text";
  pub const SURVEY_ID: &str = "survey_id";
  pub const RESPONDENT_ID: &str = "respondent_id";
  pub const QUESTION_ID: &str = "question_id";
}

// ─── Ids ─────────────────────────────────────────────────────────────────────

macro_rules! entity_id {
  ($(#[$meta:meta])* $name:ident) => {
    $(#[$meta])*
    #[derive(
      Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    )]
    #[serde(transparent)]
    pub struct $name(pub i64);

    impl From<i64> for $name {
      fn from(raw: i64) -> Self { Self(raw) }
    }

    impl From<$name> for i64 {
      fn from(id: $name) -> i64 { id.0 }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
      }
    }

    impl From<$name> for Scalar {
      fn from(id: $name) -> Scalar { Scalar::Int(id.0) }
    }
  };
}

entity_id!(SurveyId);
entity_id!(RespondentId);
entity_id!(QuestionId);
entity_id!(
  /// Id of a [`SurveyRespondentLink`] row.
  SurveyRespondentLinkId
);
entity_id!(
  /// Id of a [`SurveyQuestionLink`] row.
  SurveyQuestionLinkId
);
entity_id!(ResponseId);
entity_id!(PublishedAssignmentId);

// ─── Record trait ────────────────────────────────────────────────────────────

/// A Rust type persisted as one document in one [`Collection`].
///
/// Documents are the serde JSON form of the record, including its `id`.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
  type Id: Copy + From<i64> + Into<i64> + fmt::Display + Send + Sync + 'static;
  /// Payload accepted by [`crate::store::EntityStore::create`]; serialises to
  /// the record's document minus the `id`.
  type New: Serialize + Send + Sync + 'static;
  type Patch: Send + 'static;

  const COLLECTION: Collection;

  fn id(&self) -> Self::Id;

  /// Apply an explicit edit in place.
  fn apply(&mut self, patch: Self::Patch);
}

// ─── Survey ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Survey {
  pub id:    SurveyId,
  pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSurvey {
  pub title: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SurveyPatch {
  pub title: Option<String>,
}

impl Record for Survey {
  type Id = SurveyId;
  type New = NewSurvey;
  type Patch = SurveyPatch;

  const COLLECTION: Collection = Collection::Surveys;

  fn id(&self) -> SurveyId { self.id }

  fn apply(&mut self, patch: SurveyPatch) {
    if let Some(title) = patch.title {
      self.title = title;
    }
  }
}

// ─── Respondent ──────────────────────────────────────────────────────────────

/// A person who may answer surveys. Shared across surveys; `email` is the
/// dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Respondent {
  pub id:    RespondentId,
  pub name:  String,
  pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRespondent {
  pub name:  String,
  pub email: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RespondentPatch {
  pub name:  Option<String>,
  pub email: Option<String>,
}

impl Record for Respondent {
  type Id = RespondentId;
  type New = NewRespondent;
  type Patch = RespondentPatch;

  const COLLECTION: Collection = Collection::Respondents;

  fn id(&self) -> RespondentId { self.id }

  fn apply(&mut self, patch: RespondentPatch) {
    if let Some(name) = patch.name {
      self.name = name;
    }
    if let Some(email) = patch.email {
      self.email = email;
    }
  }
}

// ─── Question ────────────────────────────────────────────────────────────────

/// A question text. Shared across surveys; `text` is the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
  pub id:   QuestionId,
  pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQuestion {
  pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuestionPatch {
  pub text: Option<String>,
}

impl Record for Question {
  type Id = QuestionId;
  type New = NewQuestion;
  type Patch = QuestionPatch;

  const COLLECTION: Collection = Collection::Questions;

  fn id(&self) -> QuestionId { self.id }

  fn apply(&mut self, patch: QuestionPatch) {
    if let Some(text) = patch.text {
      self.text = text;
    }
  }
}

// ─── Link rows ───────────────────────────────────────────────────────────────

/// Membership of a respondent in a survey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyRespondentLink {
  pub id:            SurveyRespondentLinkId,
  pub survey_id:     SurveyId,
  pub respondent_id: RespondentId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSurveyRespondentLink {
  pub survey_id:     SurveyId,
  pub respondent_id: RespondentId,
}

impl Record for SurveyRespondentLink {
  type Id = SurveyRespondentLinkId;
  type New = NewSurveyRespondentLink;
  type Patch = Infallible;

  const COLLECTION: Collection = Collection::SurveyRespondents;

  fn id(&self) -> SurveyRespondentLinkId { self.id }

  fn apply(&mut self, patch: Infallible) { match patch {} }
}

/// Membership of a question in a survey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyQuestionLink {
  pub id:          SurveyQuestionLinkId,
  pub survey_id:   SurveyId,
  pub question_id: QuestionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSurveyQuestionLink {
  pub survey_id:   SurveyId,
  pub question_id: QuestionId,
}

impl Record for SurveyQuestionLink {
  type Id = SurveyQuestionLinkId;
  type New = NewSurveyQuestionLink;
  type Patch = Infallible;

  const COLLECTION: Collection = Collection::SurveyQuestions;

  fn id(&self) -> SurveyQuestionLinkId { self.id }

  fn apply(&mut self, patch: Infallible) { match patch {} }
}

// ─── Response ────────────────────────────────────────────────────────────────

/// One answer by one respondent to one question of one survey.
/// Written once per submission, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub id:            ResponseId,
  pub survey_id:     SurveyId,
  pub respondent_id: RespondentId,
  pub question_id:   QuestionId,
  pub answer:        String,
  pub timestamp:     DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewResponse {
  pub survey_id:     SurveyId,
  pub respondent_id: RespondentId,
  pub question_id:   QuestionId,
  pub answer:        String,
  pub timestamp:     DateTime<Utc>,
}

impl Record for Response {
  type Id = ResponseId;
  type New = NewResponse;
  type Patch = Infallible;

  const COLLECTION: Collection = Collection::Responses;

  fn id(&self) -> ResponseId { self.id }

  fn apply(&mut self, patch: Infallible) { match patch {} }
}

// ─── Published assignment ────────────────────────────────────────────────────

/// One published (respondent, question) pair of a survey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedAssignment {
  pub id:            PublishedAssignmentId,
  pub survey_id:     SurveyId,
  pub respondent_id: RespondentId,
  pub question_id:   QuestionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPublishedAssignment {
  pub survey_id:     SurveyId,
  pub respondent_id: RespondentId,
  pub question_id:   QuestionId,
}

impl Record for PublishedAssignment {
  type Id = PublishedAssignmentId;
  type New = NewPublishedAssignment;
  type Patch = Infallible;

  const COLLECTION: Collection = Collection::PublishedAssignments;

  fn id(&self) -> PublishedAssignmentId { self.id }

  fn apply(&mut self, patch: Infallible) { match patch {} }
}

#[cfg(test)]
mod tests {
  use std::str::FromStr as _;

  use strum::IntoEnumIterator as _;

  use super::*;

  #[test]
  fn collection_names_round_trip() {
    for c in Collection::iter() {
      assert_eq!(Collection::from_str(c.name()).unwrap(), c);
    }
    assert_eq!(Collection::SurveyRespondents.name(), "survey_respondents");
    assert_eq!(Collection::PublishedAssignments.to_string(), "published_assignments");
  }

  #[test]
  fn ids_serialise_as_bare_integers() {
    let link = SurveyRespondentLink {
      id:            SurveyRespondentLinkId(7),
      survey_id:     SurveyId(1),
      respondent_id: RespondentId(2),
    };
    let json = serde_json::to_value(&link).unwrap();
    assert_eq!(json, serde_json::json!({ "id": 7, "survey_id": 1, "respondent_id": 2 }));
  }

  #[test]
  fn respondent_patch_applies_only_present_fields() {
    let mut r = Respondent {
      id:    RespondentId(1),
      name:  "Alice".into(),
      email: "alice@x.com".into(),
    };
    r.apply(RespondentPatch { name: None, email: Some("alice@y.com".into()) });
    assert_eq!(r.name, "Alice");
    assert_eq!(r.email, "alice@y.com");
  }
}
