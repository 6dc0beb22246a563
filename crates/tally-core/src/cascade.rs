//! Referential integrity on deletion.
//!
//! Each operation plans every dependent delete up front and commits them as
//! one unit of work. Rows that are already gone count as zero deletions, so a
//! cascade that failed partway can simply be issued again.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
  Result,
  context::Context,
  model::{
    Collection, PublishedAssignment, QuestionId, RespondentId, Response, Survey, SurveyId,
    SurveyQuestionLink, SurveyRespondentLink, field,
  },
  plan::{Plan, StepOutcome},
  store::{DocumentStore, Filter},
};

/// Rows removed by one cascade, per collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeReport {
  pub deleted: BTreeMap<Collection, usize>,
}

impl CascadeReport {
  fn from_outcomes(outcomes: &[StepOutcome]) -> Self {
    let mut deleted = BTreeMap::new();
    for outcome in outcomes {
      if let StepOutcome::Deleted { collection, count } = *outcome {
        *deleted.entry(collection).or_insert(0) += count;
      }
    }
    Self { deleted }
  }

  pub fn deleted(&self, collection: Collection) -> usize {
    self.deleted.get(&collection).copied().unwrap_or(0)
  }

  pub fn total(&self) -> usize { self.deleted.values().sum() }
}

pub struct CascadeManager<S> {
  ctx: Context<S>,
}

impl<S: DocumentStore> CascadeManager<S> {
  pub fn new(ctx: Context<S>) -> Self { Self { ctx } }

  /// Delete a survey with its links, responses and published assignments.
  /// Shared respondents and questions are left alone.
  pub async fn delete_survey(&self, survey_id: SurveyId) -> Result<CascadeReport> {
    let of_survey = Filter::eq(field::SURVEY_ID, survey_id);

    let mut plan = Plan::new();
    plan
      .delete_where::<SurveyRespondentLink>(of_survey.clone())
      .delete_where::<SurveyQuestionLink>(of_survey.clone())
      .delete_where::<Response>(of_survey.clone())
      .delete_where::<PublishedAssignment>(of_survey)
      // Last, so a failed cascade leaves the survey listed for a retry.
      .delete::<Survey>(survey_id);

    let report = CascadeReport::from_outcomes(&self.ctx.commit("delete_survey", plan).await?);
    tracing::info!(%survey_id, deleted = report.total(), "deleted survey");
    Ok(report)
  }

  /// Unlink a respondent from one survey and drop their answers to it.
  pub async fn remove_respondent_from_survey(
    &self,
    survey_id: SurveyId,
    respondent_id: RespondentId,
  ) -> Result<CascadeReport> {
    let scope = Filter::eq(field::SURVEY_ID, survey_id)
      .and(Filter::eq(field::RESPONDENT_ID, respondent_id));

    let mut plan = Plan::new();
    plan
      .delete_where::<SurveyRespondentLink>(scope.clone())
      .delete_where::<Response>(scope);

    let report =
      CascadeReport::from_outcomes(&self.ctx.commit("remove_respondent_from_survey", plan).await?);
    tracing::info!(
      %survey_id,
      %respondent_id,
      responses = report.deleted(Collection::Responses),
      "removed respondent from survey",
    );
    Ok(report)
  }

  /// Unlink a question from one survey and drop the answers to it.
  pub async fn remove_question_from_survey(
    &self,
    survey_id: SurveyId,
    question_id: QuestionId,
  ) -> Result<CascadeReport> {
    let scope = Filter::eq(field::SURVEY_ID, survey_id)
      .and(Filter::eq(field::QUESTION_ID, question_id));

    let mut plan = Plan::new();
    plan
      .delete_where::<SurveyQuestionLink>(scope.clone())
      .delete_where::<Response>(scope);

    let report =
      CascadeReport::from_outcomes(&self.ctx.commit("remove_question_from_survey", plan).await?);
    tracing::info!(
      %survey_id,
      %question_id,
      responses = report.deleted(Collection::Responses),
      "removed question from survey",
    );
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use chrono::Utc;

  use super::*;
  use crate::{
    Error,
    memory::MemoryStore,
    model::{
      NewPublishedAssignment, NewQuestion, NewRespondent, NewResponse, NewSurvey,
      NewSurveyQuestionLink, NewSurveyRespondentLink, Question, Respondent,
    },
    store::EntityStore as _,
  };

  struct Fixture {
    ctx:         Context<MemoryStore>,
    store:       Arc<MemoryStore>,
    surveys:     Vec<SurveyId>,
    respondents: Vec<RespondentId>,
    questions:   Vec<QuestionId>,
  }

  /// Two surveys sharing two respondents and two questions, every pair
  /// linked, answered and published.
  async fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let ctx = Context::new(store.clone());
    let s = ctx.store();

    let mut surveys = vec![];
    for title in ["Lunch Poll", "Dinner Poll"] {
      let survey: Survey = s.create(NewSurvey { title: title.into() }).await.unwrap();
      surveys.push(survey.id);
    }
    let mut respondents = vec![];
    for (name, email) in [("Alice", "alice@x.com"), ("Bob", "bob@x.com")] {
      let r: Respondent = s
        .create(NewRespondent { name: name.into(), email: email.into() })
        .await
        .unwrap();
      respondents.push(r.id);
    }
    let mut questions = vec![];
    for text in ["Pizza or tacos?", "Time?"] {
      let q: Question = s.create(NewQuestion { text: text.into() }).await.unwrap();
      questions.push(q.id);
    }

    for &survey_id in &surveys {
      for &respondent_id in &respondents {
        s.create::<SurveyRespondentLink>(NewSurveyRespondentLink { survey_id, respondent_id })
          .await
          .unwrap();
      }
      for &question_id in &questions {
        s.create::<SurveyQuestionLink>(NewSurveyQuestionLink { survey_id, question_id })
          .await
          .unwrap();
      }
      for &respondent_id in &respondents {
        for &question_id in &questions {
          s.create::<Response>(NewResponse {
            survey_id,
            respondent_id,
            question_id,
            answer: "yes".into(),
            timestamp: Utc::now(),
          })
          .await
          .unwrap();
          s.create::<PublishedAssignment>(NewPublishedAssignment {
            survey_id,
            respondent_id,
            question_id,
          })
          .await
          .unwrap();
        }
      }
    }

    Fixture { ctx, store, surveys, respondents, questions }
  }

  async fn count_for<R: crate::model::Record>(f: &Fixture, survey_id: SurveyId) -> usize {
    f.store
      .count::<R>(&Filter::eq(field::SURVEY_ID, survey_id))
      .await
      .unwrap()
  }

  #[tokio::test]
  async fn delete_survey_removes_every_dependent_row() {
    let f = fixture().await;
    let cascade = CascadeManager::new(f.ctx.clone());
    let (gone, kept) = (f.surveys[0], f.surveys[1]);

    let report = cascade.delete_survey(gone).await.unwrap();

    assert_eq!(report.deleted(Collection::Surveys), 1);
    assert_eq!(report.deleted(Collection::SurveyRespondents), 2);
    assert_eq!(report.deleted(Collection::SurveyQuestions), 2);
    assert_eq!(report.deleted(Collection::Responses), 4);
    assert_eq!(report.deleted(Collection::PublishedAssignments), 4);

    assert!(f.store.get::<Survey>(gone).await.unwrap().is_none());
    assert_eq!(count_for::<SurveyRespondentLink>(&f, gone).await, 0);
    assert_eq!(count_for::<SurveyQuestionLink>(&f, gone).await, 0);
    assert_eq!(count_for::<Response>(&f, gone).await, 0);
    assert_eq!(count_for::<PublishedAssignment>(&f, gone).await, 0);

    // The other survey and the shared entities are untouched.
    assert_eq!(count_for::<Response>(&f, kept).await, 4);
    assert_eq!(f.store.count::<Respondent>(&Filter::All).await.unwrap(), 2);
    assert_eq!(f.store.count::<Question>(&Filter::All).await.unwrap(), 2);
  }

  #[tokio::test]
  async fn delete_survey_is_safe_to_repeat() {
    let f = fixture().await;
    let cascade = CascadeManager::new(f.ctx.clone());

    cascade.delete_survey(f.surveys[0]).await.unwrap();
    let again = cascade.delete_survey(f.surveys[0]).await.unwrap();
    assert_eq!(again.total(), 0);
  }

  #[tokio::test]
  async fn remove_respondent_is_scoped_to_survey_and_respondent() {
    let f = fixture().await;
    let cascade = CascadeManager::new(f.ctx.clone());
    let (survey, other_survey) = (f.surveys[0], f.surveys[1]);
    let (alice, bob) = (f.respondents[0], f.respondents[1]);

    let report = cascade.remove_respondent_from_survey(survey, alice).await.unwrap();
    assert_eq!(report.deleted(Collection::SurveyRespondents), 1);
    assert_eq!(report.deleted(Collection::Responses), 2);

    let alice_here = Filter::eq(field::SURVEY_ID, survey).and(Filter::eq(field::RESPONDENT_ID, alice));
    let bob_here = Filter::eq(field::SURVEY_ID, survey).and(Filter::eq(field::RESPONDENT_ID, bob));
    let alice_elsewhere =
      Filter::eq(field::SURVEY_ID, other_survey).and(Filter::eq(field::RESPONDENT_ID, alice));

    assert_eq!(f.store.count::<Response>(&alice_here).await.unwrap(), 0);
    assert_eq!(f.store.count::<SurveyRespondentLink>(&alice_here).await.unwrap(), 0);
    assert_eq!(f.store.count::<Response>(&bob_here).await.unwrap(), 2);
    assert_eq!(f.store.count::<Response>(&alice_elsewhere).await.unwrap(), 2);
    assert!(f.store.get::<Respondent>(alice).await.unwrap().is_some());
  }

  #[tokio::test]
  async fn remove_question_is_scoped_to_survey_and_question() {
    let f = fixture().await;
    let cascade = CascadeManager::new(f.ctx.clone());
    let survey = f.surveys[1];
    let (pizza, time) = (f.questions[0], f.questions[1]);

    let report = cascade.remove_question_from_survey(survey, time).await.unwrap();
    assert_eq!(report.deleted(Collection::SurveyQuestions), 1);
    assert_eq!(report.deleted(Collection::Responses), 2);

    let pizza_here = Filter::eq(field::SURVEY_ID, survey).and(Filter::eq(field::QUESTION_ID, pizza));
    assert_eq!(f.store.count::<Response>(&pizza_here).await.unwrap(), 2);
    assert_eq!(count_for::<Response>(&f, f.surveys[0]).await, 4);
    assert!(f.store.get::<Question>(time).await.unwrap().is_some());
  }

  #[tokio::test]
  async fn partial_failure_lists_applied_steps_and_retry_completes() {
    let f = fixture().await;
    let cascade = CascadeManager::new(f.ctx.clone());
    let survey = f.surveys[0];
    let mut rx = f.ctx.bus().subscribe();

    f.store.reject_writes_to(Collection::Responses);
    let err = cascade.delete_survey(survey).await.unwrap_err();
    match &err {
      Error::PartialFailure { operation, applied, failed_step, rolled_back, .. } => {
        assert_eq!(*operation, "delete_survey");
        assert_eq!(*failed_step, 2);
        assert!(!rolled_back);
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0].collection(), Collection::SurveyRespondents);
      }
      other => panic!("expected partial failure, got {other:?}"),
    }
    // The links that did go are announced.
    let changes = rx.try_recv().unwrap();
    assert!(changes.contains(Collection::SurveyRespondents));
    assert!(!changes.contains(Collection::Responses));
    assert!(f.store.get::<Survey>(survey).await.unwrap().is_some());

    f.store.accept_writes_to(Collection::Responses);
    let report = cascade.delete_survey(survey).await.unwrap();
    assert_eq!(report.deleted(Collection::SurveyRespondents), 0);
    assert_eq!(report.deleted(Collection::Responses), 4);
    assert_eq!(report.deleted(Collection::Surveys), 1);
  }
}
