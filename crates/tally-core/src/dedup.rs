//! Find-or-create for the shared entities.
//!
//! Respondents are keyed on `email` and questions on `text`. Matching is
//! exact: no case folding and no whitespace normalisation, so `"A@x.com"`
//! and `"a@x.com"` are two respondents.

use crate::{
  Result,
  context::Context,
  live::ChangeSet,
  model::{Collection, NewQuestion, NewRespondent, Question, QuestionId, Respondent, RespondentId, field},
  store::{DocumentStore, EntityStore as _, Filter},
};

/// Whether a resolve call found an existing entity or created one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<Id> {
  Existing(Id),
  Created(Id),
}

impl<Id: Copy> Resolution<Id> {
  pub fn id(&self) -> Id {
    match self {
      Self::Existing(id) | Self::Created(id) => *id,
    }
  }

  pub fn was_created(&self) -> bool { matches!(self, Self::Created(_)) }
}

pub struct DedupResolver<S> {
  ctx: Context<S>,
}

impl<S: DocumentStore> DedupResolver<S> {
  pub fn new(ctx: Context<S>) -> Self { Self { ctx } }

  /// The id of the respondent with exactly this `email`, creating one named
  /// `name` if none exists. An existing respondent keeps its stored name.
  pub async fn resolve_respondent(&self, name: &str, email: &str) -> Result<RespondentId> {
    let resolution = self.respondent(name, email).await?;
    if resolution.was_created() {
      self.ctx.notify(ChangeSet::of([Collection::Respondents]));
    }
    Ok(resolution.id())
  }

  /// The id of the question with exactly this `text`, creating it if needed.
  pub async fn resolve_question(&self, text: &str) -> Result<QuestionId> {
    let resolution = self.question(text).await?;
    if resolution.was_created() {
      self.ctx.notify(ChangeSet::of([Collection::Questions]));
    }
    Ok(resolution.id())
  }

  /// Like [`Self::resolve_respondent`] but leaves the change notification to
  /// the caller, which batches it with its own writes.
  pub(crate) async fn respondent(&self, name: &str, email: &str) -> Result<Resolution<RespondentId>> {
    let store = self.ctx.store();
    let by_email = Filter::eq(field::EMAIL, email);
    if let Some(existing) = store.find_one::<Respondent>(&by_email).await? {
      tracing::debug!(respondent_id = %existing.id, email, "reusing respondent");
      return Ok(Resolution::Existing(existing.id));
    }

    let created: Respondent = store
      .create(NewRespondent { name: name.to_owned(), email: email.to_owned() })
      .await?;
    tracing::debug!(respondent_id = %created.id, email, "created respondent");
    Ok(Resolution::Created(created.id))
  }

  pub(crate) async fn question(&self, text: &str) -> Result<Resolution<QuestionId>> {
    let store = self.ctx.store();
    let by_text = Filter::eq(field::TEXT, text);
    if let Some(existing) = store.find_one::<Question>(&by_text).await? {
      tracing::debug!(question_id = %existing.id, "reusing question");
      return Ok(Resolution::Existing(existing.id));
    }

    let created: Question = store.create(NewQuestion { text: text.to_owned() }).await?;
    tracing::debug!(question_id = %created.id, "created question");
    Ok(Resolution::Created(created.id))
  }
}
