//! Handlers for `/surveys` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/surveys` | Creation order |
//! | `POST`   | `/surveys` | Body: a survey draft; 201 |
//! | `GET`    | `/surveys/{id}` | Detail with responses; 404 if absent |
//! | `PATCH`  | `/surveys/{id}` | Body: `{"title":"..."}` |
//! | `DELETE` | `/surveys/{id}` | Cascades; returns the per-collection counts |
//! | `POST`   | `/surveys/{id}/responses` | Body: a submission; 201 |

use axum::{
  Json,
  extract::State,
  http::StatusCode,
  response::IntoResponse,
};
use serde::Deserialize;
use tally_core::{
  authoring::{Submission, SurveyDetail, SurveyDraft},
  cascade::CascadeReport,
  model::{Survey, SurveyId},
  store::DocumentStore,
};

use crate::{
  AppState,
  error::ApiError,
  extract::{JsonBody, PathParams},
};

/// `GET /surveys`
pub async fn list<S: DocumentStore>(
  State(services): State<AppState<S>>,
) -> Result<Json<Vec<Survey>>, ApiError> {
  Ok(Json(services.authoring.list_surveys().await?))
}

/// `POST /surveys`
pub async fn create<S: DocumentStore>(
  State(services): State<AppState<S>>,
  JsonBody(draft): JsonBody<SurveyDraft>,
) -> Result<impl IntoResponse, ApiError> {
  let detail = services.authoring.create_survey(draft).await?;
  Ok((StatusCode::CREATED, Json(detail)))
}

/// `GET /surveys/{id}`
pub async fn get_one<S: DocumentStore>(
  State(services): State<AppState<S>>,
  PathParams(id): PathParams<SurveyId>,
) -> Result<Json<SurveyDetail>, ApiError> {
  Ok(Json(services.authoring.survey_detail(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct RenameBody {
  pub title: String,
}

/// `PATCH /surveys/{id}`
pub async fn rename<S: DocumentStore>(
  State(services): State<AppState<S>>,
  PathParams(id): PathParams<SurveyId>,
  JsonBody(body): JsonBody<RenameBody>,
) -> Result<Json<Survey>, ApiError> {
  Ok(Json(services.authoring.rename_survey(id, &body.title).await?))
}

/// `DELETE /surveys/{id}`
pub async fn delete_one<S: DocumentStore>(
  State(services): State<AppState<S>>,
  PathParams(id): PathParams<SurveyId>,
) -> Result<Json<CascadeReport>, ApiError> {
  Ok(Json(services.cascade.delete_survey(id).await?))
}

/// `POST /surveys/{id}/responses`
pub async fn respond<S: DocumentStore>(
  State(services): State<AppState<S>>,
  PathParams(id): PathParams<SurveyId>,
  JsonBody(submission): JsonBody<Submission>,
) -> Result<impl IntoResponse, ApiError> {
  let responses = services.authoring.submit_responses(id, submission).await?;
  Ok((StatusCode::CREATED, Json(responses)))
}
