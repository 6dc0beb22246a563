//! Handlers for the respondents and questions of a survey, and for editing
//! the shared entities themselves.

use axum::{
  Json,
  extract::State,
  http::StatusCode,
  response::IntoResponse,
};
use serde::Deserialize;
use tally_core::{
  authoring::RespondentDraft,
  cascade::CascadeReport,
  model::{Question, QuestionId, Respondent, RespondentId, RespondentPatch, SurveyId},
  store::DocumentStore,
};

use crate::{
  AppState,
  error::ApiError,
  extract::{JsonBody, PathParams},
};

// ─── Respondents ─────────────────────────────────────────────────────────────

/// `POST /surveys/{id}/respondents`, body: `{"name":"...","email":"..."}`
pub async fn add_respondent<S: DocumentStore>(
  State(services): State<AppState<S>>,
  PathParams(id): PathParams<SurveyId>,
  JsonBody(body): JsonBody<RespondentDraft>,
) -> Result<impl IntoResponse, ApiError> {
  let respondent = services
    .authoring
    .add_respondent(id, &body.name, &body.email)
    .await?;
  Ok((StatusCode::CREATED, Json(respondent)))
}

/// `DELETE /surveys/{id}/respondents/{respondent_id}`
pub async fn remove_respondent<S: DocumentStore>(
  State(services): State<AppState<S>>,
  PathParams((id, respondent_id)): PathParams<(SurveyId, RespondentId)>,
) -> Result<Json<CascadeReport>, ApiError> {
  let report = services
    .cascade
    .remove_respondent_from_survey(id, respondent_id)
    .await?;
  Ok(Json(report))
}

/// `PATCH /respondents/{id}`, body: `{"name":"..."}` and/or `{"email":"..."}`
pub async fn edit_respondent<S: DocumentStore>(
  State(services): State<AppState<S>>,
  PathParams(id): PathParams<RespondentId>,
  JsonBody(patch): JsonBody<RespondentPatch>,
) -> Result<Json<Respondent>, ApiError> {
  Ok(Json(services.authoring.edit_respondent(id, patch).await?))
}

// ─── Questions ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct QuestionBody {
  pub text: String,
}

/// `POST /surveys/{id}/questions`
pub async fn add_question<S: DocumentStore>(
  State(services): State<AppState<S>>,
  PathParams(id): PathParams<SurveyId>,
  JsonBody(body): JsonBody<QuestionBody>,
) -> Result<impl IntoResponse, ApiError> {
  let question = services.authoring.add_question(id, &body.text).await?;
  Ok((StatusCode::CREATED, Json(question)))
}

/// `DELETE /surveys/{id}/questions/{question_id}`
pub async fn remove_question<S: DocumentStore>(
  State(services): State<AppState<S>>,
  PathParams((id, question_id)): PathParams<(SurveyId, QuestionId)>,
) -> Result<Json<CascadeReport>, ApiError> {
  let report = services
    .cascade
    .remove_question_from_survey(id, question_id)
    .await?;
  Ok(Json(report))
}

/// `PATCH /questions/{id}`
pub async fn edit_question<S: DocumentStore>(
  State(services): State<AppState<S>>,
  PathParams(id): PathParams<QuestionId>,
  JsonBody(body): JsonBody<QuestionBody>,
) -> Result<Json<Question>, ApiError> {
  Ok(Json(services.authoring.edit_question(id, &body.text).await?))
}
