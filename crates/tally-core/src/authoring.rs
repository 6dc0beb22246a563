//! Authoring and answering surveys.
//!
//! These are the user-facing actions: create a survey from a draft, add or
//! edit its members, submit answers, and read a survey back with its
//! responses. Entity creation always goes through [`DedupResolver`]; removals
//! belong to [`crate::cascade::CascadeManager`].

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  context::Context,
  dedup::DedupResolver,
  live::ChangeSet,
  model::{
    Collection, NewResponse, NewSurvey, NewSurveyQuestionLink, NewSurveyRespondentLink, Question,
    QuestionId, QuestionPatch, Respondent, RespondentId, RespondentPatch, Response, ResponseId,
    Survey, SurveyId, SurveyPatch, SurveyQuestionLink, SurveyRespondentLink, field,
  },
  plan::{Plan, Step, StepOutcome, inserted_ids},
  store::{DocumentStore, EntityStore as _, Filter},
};

// ─── Inputs ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespondentDraft {
  pub name:  String,
  pub email: String,
}

/// Everything needed to author a survey in one action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyDraft {
  pub title:       String,
  #[serde(default)]
  pub respondents: Vec<RespondentDraft>,
  #[serde(default)]
  pub questions:   Vec<String>,
}

/// Who is answering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RespondentChoice {
  Existing { respondent_id: RespondentId },
  New { name: String, email: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
  pub question_id: QuestionId,
  pub answer:      String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
  pub respondent: Option<RespondentChoice>,
  pub answers:    Vec<Answer>,
}

// ─── Read models ─────────────────────────────────────────────────────────────

/// One recorded answer with its respondent resolved. `respondent` is `None`
/// when that respondent no longer exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnsweredBy {
  pub response_id:   ResponseId,
  pub respondent_id: RespondentId,
  pub respondent:    Option<Respondent>,
  pub answer:        String,
  pub timestamp:     DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionResponses {
  pub question:  Question,
  pub responses: Vec<AnsweredBy>,
}

/// A survey with its linked respondents, and each linked question with the
/// answers recorded for it in this survey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyDetail {
  pub survey:      Survey,
  pub respondents: Vec<Respondent>,
  pub questions:   Vec<QuestionResponses>,
}

// ─── Validation ──────────────────────────────────────────────────────────────

fn require(value: &str, what: &str) -> Result<()> {
  if value.trim().is_empty() {
    Err(Error::Validation(format!("{what} is required")))
  } else {
    Ok(())
  }
}

impl SurveyDraft {
  pub fn validate(&self) -> Result<()> {
    require(&self.title, "survey title")?;
    if self.respondents.is_empty() {
      return Err(Error::Validation("add at least one respondent".into()));
    }
    if self.questions.is_empty() {
      return Err(Error::Validation("add at least one question".into()));
    }
    for r in &self.respondents {
      require(&r.name, "respondent name")?;
      require(&r.email, "respondent email")?;
    }
    for q in &self.questions {
      require(q, "question text")?;
    }
    Ok(())
  }
}

// ─── Service ─────────────────────────────────────────────────────────────────

pub struct Authoring<S> {
  ctx:   Context<S>,
  dedup: DedupResolver<S>,
}

impl<S: DocumentStore> Authoring<S> {
  pub fn new(ctx: Context<S>) -> Self {
    Self { dedup: DedupResolver::new(ctx.clone()), ctx }
  }

  async fn require_survey(&self, survey_id: SurveyId) -> Result<Survey> {
    self
      .ctx
      .store()
      .get::<Survey>(survey_id)
      .await?
      .ok_or_else(|| Error::not_found(Collection::Surveys, survey_id))
  }

  async fn linked_respondent_ids(&self, survey_id: SurveyId) -> Result<Vec<RespondentId>> {
    let links = self
      .ctx
      .store()
      .query::<SurveyRespondentLink>(&Filter::eq(field::SURVEY_ID, survey_id))
      .await?;
    Ok(links.into_iter().map(|l| l.respondent_id).collect())
  }

  async fn linked_question_ids(&self, survey_id: SurveyId) -> Result<Vec<QuestionId>> {
    let links = self
      .ctx
      .store()
      .query::<SurveyQuestionLink>(&Filter::eq(field::SURVEY_ID, survey_id))
      .await?;
    Ok(links.into_iter().map(|l| l.question_id).collect())
  }

  /// Link a respondent unless already linked. Returns whether a row was
  /// written.
  async fn link_respondent(&self, survey_id: SurveyId, respondent_id: RespondentId) -> Result<bool> {
    let store = self.ctx.store();
    let pair = Filter::eq(field::SURVEY_ID, survey_id)
      .and(Filter::eq(field::RESPONDENT_ID, respondent_id));
    if store.find_one::<SurveyRespondentLink>(&pair).await?.is_some() {
      return Ok(false);
    }
    store
      .create::<SurveyRespondentLink>(NewSurveyRespondentLink { survey_id, respondent_id })
      .await?;
    Ok(true)
  }

  async fn link_question(&self, survey_id: SurveyId, question_id: QuestionId) -> Result<bool> {
    let store = self.ctx.store();
    let pair = Filter::eq(field::SURVEY_ID, survey_id)
      .and(Filter::eq(field::QUESTION_ID, question_id));
    if store.find_one::<SurveyQuestionLink>(&pair).await?.is_some() {
      return Ok(false);
    }
    store
      .create::<SurveyQuestionLink>(NewSurveyQuestionLink { survey_id, question_id })
      .await?;
    Ok(true)
  }

  // ── Surveys ───────────────────────────────────────────────────────────────

  /// Create a survey with its respondents and questions.
  ///
  /// Respondents and questions that already exist (same email, same text)
  /// are reused rather than duplicated; each distinct one is linked once.
  ///
  /// If linking fails the survey row is removed again, so a retry does not
  /// leave a second copy behind. Respondents and questions created before
  /// the failure stay: they are shared, and a retry reuses them. They are
  /// what [`Error::PartialFailure`] reports as applied.
  pub async fn create_survey(&self, draft: SurveyDraft) -> Result<SurveyDetail> {
    draft.validate()?;
    let mut applied = Vec::new();
    let written = self.write_survey(&draft, &mut applied).await;
    self.ctx.notify(applied.iter().map(StepOutcome::collection).collect());
    self.survey_detail(written?).await
  }

  /// The writes behind [`Self::create_survey`]. Every write still in effect
  /// when this returns is recorded in `applied`, on failure too.
  async fn write_survey(&self, draft: &SurveyDraft, applied: &mut Vec<StepOutcome>) -> Result<SurveyId> {
    let store = self.ctx.store();

    let mut respondent_ids = Vec::new();
    for r in &draft.respondents {
      let resolution = self.dedup.respondent(&r.name, &r.email).await?;
      if resolution.was_created() {
        applied.push(StepOutcome::Inserted {
          collection: Collection::Respondents,
          id:         resolution.id().into(),
        });
      }
      if !respondent_ids.contains(&resolution.id()) {
        respondent_ids.push(resolution.id());
      }
    }

    let mut question_ids = Vec::new();
    for text in &draft.questions {
      let resolution = self.dedup.question(text).await?;
      if resolution.was_created() {
        applied.push(StepOutcome::Inserted {
          collection: Collection::Questions,
          id:         resolution.id().into(),
        });
      }
      if !question_ids.contains(&resolution.id()) {
        question_ids.push(resolution.id());
      }
    }

    let survey: Survey = store.create(NewSurvey { title: draft.title.clone() }).await?;
    let survey_row = StepOutcome::Inserted { collection: Collection::Surveys, id: survey.id.into() };

    let mut links = Plan::new();
    for &respondent_id in &respondent_ids {
      links.insert::<SurveyRespondentLink>(&NewSurveyRespondentLink {
        survey_id: survey.id,
        respondent_id,
      })?;
    }
    for &question_id in &question_ids {
      links.insert::<SurveyQuestionLink>(&NewSurveyQuestionLink {
        survey_id: survey.id,
        question_id,
      })?;
    }

    let (linked, failed_step, source) = match store.run_plan("create_survey", links).await {
      Ok(outcomes) => {
        applied.push(survey_row);
        applied.extend(outcomes);
        tracing::info!(
          survey_id = %survey.id,
          respondents = respondent_ids.len(),
          questions = question_ids.len(),
          "created survey",
        );
        return Ok(survey.id);
      }
      Err(Error::PartialFailure { applied: linked, failed_step, source, .. }) => {
        (linked, failed_step, source)
      }
      Err(other) => {
        applied.push(survey_row);
        return Err(other);
      }
    };

    let mut undo = Plan::new();
    for outcome in linked.iter().rev() {
      if let StepOutcome::Inserted { collection, id } = *outcome {
        undo.push(Step::Delete { collection, id });
      }
    }
    undo.delete::<Survey>(survey.id);

    match store.run_plan("create_survey", undo).await {
      Ok(_) => tracing::warn!(survey_id = %survey.id, "removed partially created survey"),
      Err(err) => {
        tracing::error!(survey_id = %survey.id, error = %err, "could not remove partially created survey");
        applied.push(survey_row);
        applied.extend(linked);
      }
    }

    Err(Error::PartialFailure {
      operation: "create_survey",
      applied: applied.clone(),
      failed_step,
      rolled_back: applied.is_empty(),
      source,
    })
  }

  /// All surveys in creation order.
  pub async fn list_surveys(&self) -> Result<Vec<Survey>> {
    self.ctx.store().query::<Survey>(&Filter::All).await
  }

  pub async fn survey_detail(&self, survey_id: SurveyId) -> Result<SurveyDetail> {
    let store = self.ctx.store();
    let survey = self.require_survey(survey_id).await?;

    let mut respondents = Vec::new();
    for id in self.linked_respondent_ids(survey_id).await? {
      match store.get::<Respondent>(id).await? {
        Some(r) => respondents.push(r),
        None => tracing::warn!(%survey_id, respondent_id = %id, "link to missing respondent"),
      }
    }

    let responses = store
      .query::<Response>(&Filter::eq(field::SURVEY_ID, survey_id))
      .await?;

    let mut questions = Vec::new();
    for id in self.linked_question_ids(survey_id).await? {
      let Some(question) = store.get::<Question>(id).await? else {
        tracing::warn!(%survey_id, question_id = %id, "link to missing question");
        continue;
      };
      let mut answered = Vec::new();
      for response in responses.iter().filter(|r| r.question_id == id) {
        let respondent = match respondents.iter().find(|r| r.id == response.respondent_id) {
          Some(r) => Some(r.clone()),
          None => store.get::<Respondent>(response.respondent_id).await?,
        };
        answered.push(AnsweredBy {
          response_id: response.id,
          respondent_id: response.respondent_id,
          respondent,
          answer: response.answer.clone(),
          timestamp: response.timestamp,
        });
      }
      questions.push(QuestionResponses { question, responses: answered });
    }

    Ok(SurveyDetail { survey, respondents, questions })
  }

  pub async fn rename_survey(&self, survey_id: SurveyId, title: &str) -> Result<Survey> {
    require(title, "survey title")?;
    let survey = self
      .ctx
      .store()
      .update::<Survey>(survey_id, SurveyPatch { title: Some(title.to_owned()) })
      .await?;
    self.ctx.notify(ChangeSet::of([Collection::Surveys]));
    Ok(survey)
  }

  // ── Members ───────────────────────────────────────────────────────────────

  /// Add a respondent to an existing survey, reusing a respondent with the
  /// same email if there is one.
  pub async fn add_respondent(&self, survey_id: SurveyId, name: &str, email: &str) -> Result<Respondent> {
    require(name, "respondent name")?;
    require(email, "respondent email")?;
    self.require_survey(survey_id).await?;

    let resolution = self.dedup.respondent(name, email).await?;
    let id = resolution.id();
    let mut changes = ChangeSet::new();
    if resolution.was_created() {
      changes.insert(Collection::Respondents);
    }
    let linked = self.link_respondent(survey_id, id).await;
    if matches!(linked, Ok(true)) {
      changes.insert(Collection::SurveyRespondents);
    }
    self.ctx.notify(changes);
    linked?;

    self
      .ctx
      .store()
      .get::<Respondent>(id)
      .await?
      .ok_or_else(|| Error::not_found(Collection::Respondents, id))
  }

  /// Add a question to an existing survey, reusing an identical question if
  /// there is one.
  pub async fn add_question(&self, survey_id: SurveyId, text: &str) -> Result<Question> {
    require(text, "question text")?;
    self.require_survey(survey_id).await?;

    let resolution = self.dedup.question(text).await?;
    let id = resolution.id();
    let mut changes = ChangeSet::new();
    if resolution.was_created() {
      changes.insert(Collection::Questions);
    }
    let linked = self.link_question(survey_id, id).await;
    if matches!(linked, Ok(true)) {
      changes.insert(Collection::SurveyQuestions);
    }
    self.ctx.notify(changes);
    linked?;

    self
      .ctx
      .store()
      .get::<Question>(id)
      .await?
      .ok_or_else(|| Error::not_found(Collection::Questions, id))
  }

  /// Change a respondent's name and/or email. The new email must not belong
  /// to another respondent.
  pub async fn edit_respondent(&self, id: RespondentId, patch: RespondentPatch) -> Result<Respondent> {
    if let Some(name) = &patch.name {
      require(name, "respondent name")?;
    }
    if let Some(email) = &patch.email {
      require(email, "respondent email")?;
      let holder = self
        .ctx
        .store()
        .find_one::<Respondent>(&Filter::eq(field::EMAIL, email.as_str()))
        .await?;
      if holder.is_some_and(|h| h.id != id) {
        return Err(Error::DuplicateKey {
          collection: Collection::Respondents,
          field:      field::EMAIL,
          value:      email.clone(),
        });
      }
    }
    let respondent = self.ctx.store().update::<Respondent>(id, patch).await?;
    self.ctx.notify(ChangeSet::of([Collection::Respondents]));
    Ok(respondent)
  }

  /// Change a question's text. The new text must not belong to another
  /// question.
  pub async fn edit_question(&self, id: QuestionId, text: &str) -> Result<Question> {
    require(text, "question text")?;
    let holder = self
      .ctx
      .store()
      .find_one::<Question>(&Filter::eq(field::TEXT, text))
      .await?;
    if holder.is_some_and(|h| h.id != id) {
      return Err(Error::DuplicateKey {
        collection: Collection::Questions,
        field:      field::TEXT,
        value:      text.to_owned(),
      });
    }
    let question = self
      .ctx
      .store()
      .update::<Question>(id, QuestionPatch { text: Some(text.to_owned()) })
      .await?;
    self.ctx.notify(ChangeSet::of([Collection::Questions]));
    Ok(question)
  }

  // ── Responses ─────────────────────────────────────────────────────────────

  /// Record one response per non-blank answer.
  ///
  /// The respondent is either an existing member of the survey or a new
  /// person, who is resolved by email and linked. Every answered question
  /// must belong to the survey.
  pub async fn submit_responses(&self, survey_id: SurveyId, submission: Submission) -> Result<Vec<Response>> {
    self.require_survey(survey_id).await?;

    let answers: Vec<&Answer> = submission
      .answers
      .iter()
      .filter(|a| !a.answer.trim().is_empty())
      .collect();

    let linked_questions: HashSet<QuestionId> =
      self.linked_question_ids(survey_id).await?.into_iter().collect();
    if let Some(stray) = answers.iter().find(|a| !linked_questions.contains(&a.question_id)) {
      return Err(Error::Validation(format!(
        "question {} is not part of survey {survey_id}",
        stray.question_id
      )));
    }

    // Everything below writes; all validation happens first.
    let respondent_id = match &submission.respondent {
      None => {
        return Err(Error::Validation("Please select a respondent or add a new one".into()));
      }
      Some(RespondentChoice::New { name, email }) => {
        if name.trim().is_empty() || email.trim().is_empty() {
          return Err(Error::Validation(
            "Please provide both name and email for the new respondent".into(),
          ));
        }
        if answers.is_empty() {
          return Err(Error::Validation("answer at least one question".into()));
        }
        let resolution = self.dedup.respondent(name, email).await?;
        let mut changes = ChangeSet::new();
        if resolution.was_created() {
          changes.insert(Collection::Respondents);
        }
        let linked = self.link_respondent(survey_id, resolution.id()).await;
        if matches!(linked, Ok(true)) {
          changes.insert(Collection::SurveyRespondents);
        }
        self.ctx.notify(changes);
        linked?;
        resolution.id()
      }
      Some(RespondentChoice::Existing { respondent_id }) => {
        if !self.linked_respondent_ids(survey_id).await?.contains(respondent_id) {
          return Err(Error::Validation(format!(
            "respondent {respondent_id} is not part of survey {survey_id}"
          )));
        }
        if answers.is_empty() {
          return Err(Error::Validation("answer at least one question".into()));
        }
        *respondent_id
      }
    };

    let timestamp = Utc::now();
    let mut plan = Plan::new();
    let mut news = Vec::with_capacity(answers.len());
    for a in answers {
      let new = NewResponse {
        survey_id,
        respondent_id,
        question_id: a.question_id,
        answer: a.answer.clone(),
        timestamp,
      };
      plan.insert::<Response>(&new)?;
      news.push(new);
    }

    let outcomes = self.ctx.commit("submit_responses", plan).await?;
    let responses: Vec<Response> = news
      .into_iter()
      .zip(inserted_ids(&outcomes))
      .map(|(new, id)| Response {
        id:            ResponseId(id),
        survey_id:     new.survey_id,
        respondent_id: new.respondent_id,
        question_id:   new.question_id,
        answer:        new.answer,
        timestamp:     new.timestamp,
      })
      .collect();

    tracing::info!(%survey_id, %respondent_id, answers = responses.len(), "recorded responses");
    Ok(responses)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::{cascade::CascadeManager, memory::MemoryStore};

  fn service() -> (Authoring<MemoryStore>, Context<MemoryStore>) {
    let ctx = Context::new(Arc::new(MemoryStore::new()));
    (Authoring::new(ctx.clone()), ctx)
  }

  fn draft(title: &str) -> SurveyDraft {
    SurveyDraft {
      title:       title.into(),
      respondents: vec![
        RespondentDraft { name: "Alice".into(), email: "alice@x.com".into() },
        RespondentDraft { name: "Bob".into(), email: "bob@x.com".into() },
      ],
      questions:   vec!["Pizza or tacos?".into(), "Time?".into()],
    }
  }

  fn answer(question_id: QuestionId, text: &str) -> Answer {
    Answer { question_id, answer: text.into() }
  }

  #[tokio::test]
  async fn create_survey_links_every_member() {
    let (svc, _) = service();
    let detail = svc.create_survey(draft("Lunch Poll")).await.unwrap();

    assert_eq!(detail.survey.title, "Lunch Poll");
    assert_eq!(detail.respondents.len(), 2);
    assert_eq!(detail.questions.len(), 2);
    assert!(detail.questions.iter().all(|q| q.responses.is_empty()));
  }

  #[tokio::test]
  async fn create_survey_shares_entities_across_surveys() {
    let (svc, ctx) = service();
    let lunch = svc.create_survey(draft("Lunch Poll")).await.unwrap();
    let dinner = svc.create_survey(draft("Dinner Poll")).await.unwrap();

    assert_eq!(lunch.respondents, dinner.respondents);
    assert_eq!(ctx.store().count::<Respondent>(&Filter::All).await.unwrap(), 2);
    assert_eq!(ctx.store().count::<Question>(&Filter::All).await.unwrap(), 2);
    assert_eq!(ctx.store().count::<SurveyRespondentLink>(&Filter::All).await.unwrap(), 4);
  }

  #[tokio::test]
  async fn duplicate_drafts_link_once() {
    let (svc, ctx) = service();
    let mut d = draft("Lunch Poll");
    d.respondents.push(RespondentDraft { name: "Alice again".into(), email: "alice@x.com".into() });
    d.questions.push("Time?".into());

    let detail = svc.create_survey(d).await.unwrap();
    assert_eq!(detail.respondents.len(), 2);
    assert_eq!(detail.questions.len(), 2);
    assert_eq!(ctx.store().count::<SurveyQuestionLink>(&Filter::All).await.unwrap(), 2);
  }

  #[tokio::test]
  async fn invalid_drafts_write_nothing() {
    let (svc, ctx) = service();

    let no_title = draft("  ");
    let mut no_respondents = draft("x");
    no_respondents.respondents.clear();
    let mut no_questions = draft("x");
    no_questions.questions.clear();
    let mut missing_email = draft("x");
    missing_email.respondents[1].email.clear();

    for d in [no_title, no_respondents, no_questions, missing_email] {
      assert!(matches!(svc.create_survey(d).await, Err(Error::Validation(_))));
    }
    assert_eq!(ctx.store().count::<Survey>(&Filter::All).await.unwrap(), 0);
    assert_eq!(ctx.store().count::<Respondent>(&Filter::All).await.unwrap(), 0);
  }

  #[tokio::test]
  async fn submit_responses_for_existing_respondent() {
    let (svc, _) = service();
    let detail = svc.create_survey(draft("Lunch Poll")).await.unwrap();
    let survey_id = detail.survey.id;
    let alice = detail.respondents[0].id;
    let (pizza, time) = (detail.questions[0].question.id, detail.questions[1].question.id);

    let recorded = svc
      .submit_responses(survey_id, Submission {
        respondent: Some(RespondentChoice::Existing { respondent_id: alice }),
        answers:    vec![answer(pizza, "tacos"), answer(time, "")],
      })
      .await
      .unwrap();
    assert_eq!(recorded.len(), 1);

    let detail = svc.survey_detail(survey_id).await.unwrap();
    let pizza_answers = &detail.questions[0].responses;
    assert_eq!(pizza_answers.len(), 1);
    assert_eq!(pizza_answers[0].answer, "tacos");
    assert_eq!(pizza_answers[0].respondent.as_ref().unwrap().name, "Alice");
    assert!(detail.questions[1].responses.is_empty());
  }

  #[tokio::test]
  async fn new_respondent_is_resolved_and_linked() {
    let (svc, ctx) = service();
    let detail = svc.create_survey(draft("Lunch Poll")).await.unwrap();
    let survey_id = detail.survey.id;
    let pizza = detail.questions[0].question.id;

    svc
      .submit_responses(survey_id, Submission {
        respondent: Some(RespondentChoice::New { name: "Carol".into(), email: "carol@x.com".into() }),
        answers:    vec![answer(pizza, "pizza")],
      })
      .await
      .unwrap();

    let detail = svc.survey_detail(survey_id).await.unwrap();
    assert_eq!(detail.respondents.len(), 3);
    assert_eq!(detail.respondents[2].email, "carol@x.com");
    assert_eq!(ctx.store().count::<Respondent>(&Filter::All).await.unwrap(), 3);
  }

  #[tokio::test]
  async fn submission_validation_happens_before_writes() {
    let (svc, ctx) = service();
    let detail = svc.create_survey(draft("Lunch Poll")).await.unwrap();
    let survey_id = detail.survey.id;
    let pizza = detail.questions[0].question.id;

    let cases = [
      Submission { respondent: None, answers: vec![answer(pizza, "x")] },
      Submission {
        respondent: Some(RespondentChoice::New { name: "Dan".into(), email: "".into() }),
        answers:    vec![answer(pizza, "x")],
      },
      Submission {
        respondent: Some(RespondentChoice::New { name: "Dan".into(), email: "dan@x.com".into() }),
        answers:    vec![answer(QuestionId(99), "x")],
      },
      Submission {
        respondent: Some(RespondentChoice::Existing { respondent_id: RespondentId(99) }),
        answers:    vec![answer(pizza, "x")],
      },
      Submission {
        respondent: Some(RespondentChoice::Existing { respondent_id: detail.respondents[0].id }),
        answers:    vec![answer(pizza, "   ")],
      },
    ];
    for submission in cases {
      let result = svc.submit_responses(survey_id, submission).await;
      assert!(matches!(result, Err(Error::Validation(_))), "{result:?}");
    }
    assert_eq!(ctx.store().count::<Response>(&Filter::All).await.unwrap(), 0);
    assert_eq!(ctx.store().count::<Respondent>(&Filter::All).await.unwrap(), 2);
  }

  #[tokio::test]
  async fn add_members_is_idempotent() {
    let (svc, ctx) = service();
    let detail = svc.create_survey(draft("Lunch Poll")).await.unwrap();
    let survey_id = detail.survey.id;

    let carol = svc.add_respondent(survey_id, "Carol", "carol@x.com").await.unwrap();
    let again = svc.add_respondent(survey_id, "Carol", "carol@x.com").await.unwrap();
    assert_eq!(carol.id, again.id);
    let q = svc.add_question(survey_id, "Drinks?").await.unwrap();
    svc.add_question(survey_id, "Drinks?").await.unwrap();

    let detail = svc.survey_detail(survey_id).await.unwrap();
    assert_eq!(detail.respondents.len(), 3);
    assert_eq!(detail.questions.last().unwrap().question.id, q.id);
    assert_eq!(ctx.store().count::<SurveyQuestionLink>(&Filter::All).await.unwrap(), 3);

    let err = svc.add_question(SurveyId(42), "Drinks?").await.unwrap_err();
    assert!(err.is_not_found());
  }

  #[tokio::test]
  async fn edits_reject_keys_held_by_others() {
    let (svc, _) = service();
    let detail = svc.create_survey(draft("Lunch Poll")).await.unwrap();
    let (alice, bob) = (detail.respondents[0].id, detail.respondents[1].id);
    let time = detail.questions[1].question.id;

    let err = svc
      .edit_respondent(bob, RespondentPatch { name: None, email: Some("alice@x.com".into()) })
      .await
      .unwrap_err();
    assert!(matches!(err, Error::DuplicateKey { field: "email", .. }));

    let renamed = svc
      .edit_respondent(alice, RespondentPatch { name: Some("Alice L.".into()), email: Some("alice@x.com".into()) })
      .await
      .unwrap();
    assert_eq!(renamed.name, "Alice L.");

    assert!(matches!(
      svc.edit_question(time, "Pizza or tacos?").await,
      Err(Error::DuplicateKey { field: "text", .. })
    ));
    assert_eq!(svc.edit_question(time, "When?").await.unwrap().text, "When?");

    let survey = svc.rename_survey(detail.survey.id, "Brunch Poll").await.unwrap();
    assert_eq!(survey.title, "Brunch Poll");
    assert!(svc.rename_survey(SurveyId(42), "x").await.unwrap_err().is_not_found());
  }

  #[tokio::test]
  async fn detail_reflects_scoped_removal() {
    let (svc, ctx) = service();
    let detail = svc.create_survey(draft("Lunch Poll")).await.unwrap();
    let survey_id = detail.survey.id;
    let (alice, bob) = (detail.respondents[0].id, detail.respondents[1].id);
    let pizza = detail.questions[0].question.id;

    for who in [alice, bob] {
      svc
        .submit_responses(survey_id, Submission {
          respondent: Some(RespondentChoice::Existing { respondent_id: who }),
          answers:    vec![answer(pizza, "pizza")],
        })
        .await
        .unwrap();
    }

    CascadeManager::new(ctx.clone())
      .remove_respondent_from_survey(survey_id, alice)
      .await
      .unwrap();

    let detail = svc.survey_detail(survey_id).await.unwrap();
    assert_eq!(detail.respondents.len(), 1);
    assert_eq!(detail.questions[0].responses.len(), 1);
    assert_eq!(detail.questions[0].responses[0].respondent_id, bob);
  }

  // ── Failed writes ─────────────────────────────────────────────────────────

  #[tokio::test]
  async fn failed_linking_removes_the_new_survey() {
    let (svc, ctx) = service();
    let mut rx = ctx.bus().subscribe();
    ctx.store().reject_writes_to(Collection::SurveyRespondents);

    match svc.create_survey(draft("Lunch Poll")).await.unwrap_err() {
      Error::PartialFailure { operation, applied, failed_step, rolled_back, .. } => {
        assert_eq!(operation, "create_survey");
        assert_eq!(failed_step, 0);
        assert!(!rolled_back);
        assert_eq!(applied.len(), 4);
        assert!(applied.iter().all(|o| o.collection() != Collection::Surveys));
      }
      other => panic!("expected partial failure, got {other:?}"),
    }
    assert!(svc.list_surveys().await.unwrap().is_empty());
    assert_eq!(
      rx.try_recv().unwrap(),
      ChangeSet::of([Collection::Respondents, Collection::Questions])
    );

    ctx.store().accept_writes_to(Collection::SurveyRespondents);
    let detail = svc.create_survey(draft("Lunch Poll")).await.unwrap();
    assert_eq!(detail.respondents.len(), 2);
    assert_eq!(svc.list_surveys().await.unwrap().len(), 1);
    assert_eq!(ctx.store().count::<Respondent>(&Filter::All).await.unwrap(), 2);
  }

  #[tokio::test]
  async fn failed_question_link_undoes_respondent_links() {
    let (svc, ctx) = service();
    ctx.store().reject_writes_to(Collection::SurveyQuestions);

    let err = svc.create_survey(draft("Lunch Poll")).await.unwrap_err();
    assert!(matches!(err, Error::PartialFailure { failed_step: 2, .. }));
    assert!(svc.list_surveys().await.unwrap().is_empty());
    assert_eq!(ctx.store().count::<SurveyRespondentLink>(&Filter::All).await.unwrap(), 0);
  }

  #[tokio::test]
  async fn failed_entity_write_writes_no_survey() {
    let (svc, ctx) = service();
    let mut rx = ctx.bus().subscribe();
    ctx.store().reject_writes_to(Collection::Respondents);

    let err = svc.create_survey(draft("Lunch Poll")).await.unwrap_err();
    assert!(matches!(err, Error::Store(_)));
    assert!(svc.list_surveys().await.unwrap().is_empty());
    assert!(rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn entities_created_before_a_failure_are_announced() {
    let (svc, ctx) = service();
    let mut rx = ctx.bus().subscribe();
    ctx.store().reject_writes_to(Collection::Questions);

    svc.create_survey(draft("Lunch Poll")).await.unwrap_err();

    assert!(svc.list_surveys().await.unwrap().is_empty());
    assert_eq!(ctx.store().count::<Respondent>(&Filter::All).await.unwrap(), 2);
    assert_eq!(rx.try_recv().unwrap(), ChangeSet::of([Collection::Respondents]));
  }

  #[tokio::test]
  async fn failed_link_still_announces_a_new_respondent() {
    let (svc, ctx) = service();
    let survey_id = svc.create_survey(draft("Lunch Poll")).await.unwrap().survey.id;
    let mut rx = ctx.bus().subscribe();
    ctx.store().reject_writes_to(Collection::SurveyRespondents);

    svc.add_respondent(survey_id, "Carol", "carol@x.com").await.unwrap_err();
    assert_eq!(rx.try_recv().unwrap(), ChangeSet::of([Collection::Respondents]));

    let pizza = svc.survey_detail(survey_id).await.unwrap().questions[0].question.id;
    svc
      .submit_responses(survey_id, Submission {
        respondent: Some(RespondentChoice::New { name: "Dan".into(), email: "dan@x.com".into() }),
        answers:    vec![answer(pizza, "tacos")],
      })
      .await
      .unwrap_err();
    assert_eq!(rx.try_recv().unwrap(), ChangeSet::of([Collection::Respondents]));
    assert_eq!(ctx.store().count::<Response>(&Filter::All).await.unwrap(), 0);
  }
}
