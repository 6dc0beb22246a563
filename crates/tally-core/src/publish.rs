//! Publishing: the write side materialises respondent × question cross
//! products as flat [`PublishedAssignment`] rows; the read side groups those
//! rows back into one [`PublishedSurvey`] per survey.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  context::Context,
  model::{
    Collection, NewPublishedAssignment, PublishedAssignment, PublishedAssignmentId, Question, QuestionId,
    Respondent, RespondentId, Survey, SurveyId, field,
  },
  plan::{Plan, StepOutcome, inserted_ids},
  store::{DocumentStore, EntityStore as _, Filter},
};

/// Grouped read model of everything published for one survey.
///
/// Entities deleted after publishing do not fail the projection: a missing
/// survey leaves `survey` empty, and missing respondents or questions are
/// listed by id instead of resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedSurvey {
  pub survey_id:           SurveyId,
  pub survey:              Option<Survey>,
  pub respondents:         Vec<Respondent>,
  pub questions:           Vec<Question>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub missing_respondents: Vec<RespondentId>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub missing_questions:   Vec<QuestionId>,
}

/// Distinct members of one survey's assignments, in first-seen order.
struct Group {
  survey_id:   SurveyId,
  respondents: Vec<RespondentId>,
  questions:   Vec<QuestionId>,
  seen_r:      HashSet<RespondentId>,
  seen_q:      HashSet<QuestionId>,
}

impl Group {
  fn new(survey_id: SurveyId) -> Self {
    Self {
      survey_id,
      respondents: Vec::new(),
      questions: Vec::new(),
      seen_r: HashSet::new(),
      seen_q: HashSet::new(),
    }
  }

  fn add(&mut self, row: &PublishedAssignment) {
    if self.seen_r.insert(row.respondent_id) {
      self.respondents.push(row.respondent_id);
    }
    if self.seen_q.insert(row.question_id) {
      self.questions.push(row.question_id);
    }
  }
}

fn group_by_survey(rows: &[PublishedAssignment]) -> Vec<Group> {
  let mut groups: Vec<Group> = Vec::new();
  let mut index: HashMap<SurveyId, usize> = HashMap::new();
  for row in rows {
    let slot = *index.entry(row.survey_id).or_insert_with(|| {
      groups.push(Group::new(row.survey_id));
      groups.len() - 1
    });
    groups[slot].add(row);
  }
  groups
}

fn distinct<T: Copy + Eq + std::hash::Hash>(ids: &[T]) -> Vec<T> {
  let mut seen = HashSet::new();
  ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

pub struct PublishProjector<S> {
  ctx: Context<S>,
}

impl<S: DocumentStore> PublishProjector<S> {
  pub fn new(ctx: Context<S>) -> Self { Self { ctx } }

  /// Insert one assignment per (respondent, question) pair.
  ///
  /// Ids repeated within one call are collapsed. Pairs published by an
  /// earlier call are inserted again; [`Self::project_published`] folds such
  /// duplicates and [`Self::unpublish`] removes them all.
  pub async fn publish(
    &self,
    survey_id: SurveyId,
    respondent_ids: &[RespondentId],
    question_ids: &[QuestionId],
  ) -> Result<Vec<PublishedAssignment>> {
    if respondent_ids.is_empty() {
      return Err(Error::Validation("select at least one respondent to publish".into()));
    }
    if question_ids.is_empty() {
      return Err(Error::Validation("select at least one question to publish".into()));
    }
    self
      .ctx
      .store()
      .get::<Survey>(survey_id)
      .await?
      .ok_or_else(|| Error::not_found(Collection::Surveys, survey_id))?;

    let respondents = distinct(respondent_ids);
    let questions = distinct(question_ids);

    let mut pairs = Vec::with_capacity(respondents.len() * questions.len());
    let mut plan = Plan::new();
    for &respondent_id in &respondents {
      for &question_id in &questions {
        let new = NewPublishedAssignment { survey_id, respondent_id, question_id };
        plan.insert::<PublishedAssignment>(&new)?;
        pairs.push(new);
      }
    }

    let outcomes = self.ctx.commit("publish", plan).await?;
    let rows: Vec<PublishedAssignment> = pairs
      .into_iter()
      .zip(inserted_ids(&outcomes))
      .map(|(new, id)| PublishedAssignment {
        id:            PublishedAssignmentId(id),
        survey_id:     new.survey_id,
        respondent_id: new.respondent_id,
        question_id:   new.question_id,
      })
      .collect();

    tracing::info!(
      %survey_id,
      respondents = respondents.len(),
      questions = questions.len(),
      assignments = rows.len(),
      "published survey",
    );
    Ok(rows)
  }

  /// Remove every assignment of the survey. Returns how many were removed.
  pub async fn unpublish(&self, survey_id: SurveyId) -> Result<usize> {
    let mut plan = Plan::new();
    plan.delete_where::<PublishedAssignment>(Filter::eq(field::SURVEY_ID, survey_id));
    let outcomes = self.ctx.commit("unpublish", plan).await?;
    let removed: usize = outcomes
      .iter()
      .map(|o| match o {
        StepOutcome::Deleted { count, .. } => *count,
        StepOutcome::Inserted { .. } => 0,
      })
      .sum();
    tracing::info!(%survey_id, removed, "unpublished survey");
    Ok(removed)
  }

  /// One group per published survey, in the order surveys were first
  /// published; respondents and questions de-duplicated, first-seen order.
  pub async fn project_published(&self) -> Result<Vec<PublishedSurvey>> {
    let rows = self
      .ctx
      .store()
      .query::<PublishedAssignment>(&Filter::All)
      .await?;
    self.resolve(group_by_survey(&rows)).await
  }

  /// The projection of a single survey, or `None` if nothing is published.
  pub async fn project_survey(&self, survey_id: SurveyId) -> Result<Option<PublishedSurvey>> {
    let rows = self
      .ctx
      .store()
      .query::<PublishedAssignment>(&Filter::eq(field::SURVEY_ID, survey_id))
      .await?;
    Ok(self.resolve(group_by_survey(&rows)).await?.into_iter().next())
  }

  async fn resolve(&self, groups: Vec<Group>) -> Result<Vec<PublishedSurvey>> {
    let store = self.ctx.store();
    let mut respondent_cache: HashMap<RespondentId, Option<Respondent>> = HashMap::new();
    let mut question_cache: HashMap<QuestionId, Option<Question>> = HashMap::new();
    let mut projected = Vec::with_capacity(groups.len());

    for group in groups {
      let survey = store.get::<Survey>(group.survey_id).await?;
      if survey.is_none() {
        tracing::warn!(survey_id = %group.survey_id, "published survey no longer exists");
      }

      let mut out = PublishedSurvey {
        survey_id: group.survey_id,
        survey,
        respondents: Vec::new(),
        questions: Vec::new(),
        missing_respondents: Vec::new(),
        missing_questions: Vec::new(),
      };

      for id in group.respondents {
        let found = match respondent_cache.get(&id) {
          Some(cached) => cached.clone(),
          None => {
            let fetched = store.get::<Respondent>(id).await?;
            respondent_cache.insert(id, fetched.clone());
            fetched
          }
        };
        match found {
          Some(r) => out.respondents.push(r),
          None => out.missing_respondents.push(id),
        }
      }

      for id in group.questions {
        let found = match question_cache.get(&id) {
          Some(cached) => cached.clone(),
          None => {
            let fetched = store.get::<Question>(id).await?;
            question_cache.insert(id, fetched.clone());
            fetched
          }
        };
        match found {
          Some(q) => out.questions.push(q),
          None => out.missing_questions.push(id),
        }
      }

      projected.push(out);
    }

    Ok(projected)
  }
}
