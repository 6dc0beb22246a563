//! Handlers for publishing surveys and reading the published projection.

use axum::{
  Json,
  extract::State,
  http::StatusCode,
  response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tally_core::{
  model::{QuestionId, RespondentId, SurveyId},
  publish::PublishedSurvey,
  store::DocumentStore,
};

use crate::{
  AppState,
  error::ApiError,
  extract::{JsonBody, PathParams},
};

#[derive(Debug, Deserialize)]
pub struct PublishBody {
  pub respondent_ids: Vec<RespondentId>,
  pub question_ids:   Vec<QuestionId>,
}

/// `POST /surveys/{id}/publish`; returns the assignments created.
pub async fn publish_one<S: DocumentStore>(
  State(services): State<AppState<S>>,
  PathParams(id): PathParams<SurveyId>,
  JsonBody(body): JsonBody<PublishBody>,
) -> Result<impl IntoResponse, ApiError> {
  let rows = services
    .publisher
    .publish(id, &body.respondent_ids, &body.question_ids)
    .await?;
  Ok((StatusCode::CREATED, Json(rows)))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Unpublished {
  pub removed: usize,
}

/// `DELETE /surveys/{id}/publish`
pub async fn unpublish_one<S: DocumentStore>(
  State(services): State<AppState<S>>,
  PathParams(id): PathParams<SurveyId>,
) -> Result<Json<Unpublished>, ApiError> {
  let removed = services.publisher.unpublish(id).await?;
  Ok(Json(Unpublished { removed }))
}

/// `GET /surveys/{id}/published`; 404 when the survey has no assignments.
pub async fn get_one<S: DocumentStore>(
  State(services): State<AppState<S>>,
  PathParams(id): PathParams<SurveyId>,
) -> Result<Json<PublishedSurvey>, ApiError> {
  services
    .publisher
    .project_survey(id)
    .await?
    .map(Json)
    .ok_or_else(|| ApiError::NotFound(format!("survey {id} is not published")))
}

/// `GET /published`
pub async fn list<S: DocumentStore>(
  State(services): State<AppState<S>>,
) -> Result<Json<Vec<PublishedSurvey>>, ApiError> {
  Ok(Json(services.publisher.project_published().await?))
}
