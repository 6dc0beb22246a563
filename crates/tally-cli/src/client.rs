//! Async HTTP client wrapping the Tally JSON API.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use tally_core::{
  authoring::{Submission, SurveyDetail, SurveyDraft},
  cascade::CascadeReport,
  model::{
    PublishedAssignment, Question, QuestionId, Respondent, RespondentId, Response, Survey,
    SurveyId,
  },
  publish::PublishedSurvey,
};

/// Connection settings for the Tally API.
#[derive(Debug, Clone)]
pub struct ApiConfig {
  pub base_url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
  error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Unpublished {
  pub removed: usize,
}

/// Async HTTP client for the Tally JSON REST API.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct ApiClient {
  client: Client,
  config: ApiConfig,
}

impl ApiClient {
  pub fn new(config: ApiConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self { client, config })
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
  }

  /// Send `req` and decode a successful JSON body. Failures carry the
  /// server's `{"error": ...}` message when there is one.
  async fn send<T: DeserializeOwned>(&self, req: RequestBuilder, what: &str) -> Result<T> {
    tracing::debug!(what, "sending request");
    let resp = req.send().await.with_context(|| format!("{what} failed"))?;

    let status = resp.status();
    if !status.is_success() {
      let message = resp
        .json::<ErrorBody>()
        .await
        .map(|b| b.error)
        .unwrap_or_default();
      return Err(anyhow!("{what} → {status}: {message}"));
    }
    resp
      .json()
      .await
      .with_context(|| format!("deserialising response to {what}"))
  }

  // ── Surveys ───────────────────────────────────────────────────────────────

  /// `GET /surveys`
  pub async fn list_surveys(&self) -> Result<Vec<Survey>> {
    self.send(self.client.get(self.url("/surveys")), "GET /surveys").await
  }

  /// `GET /surveys/{id}`
  pub async fn survey_detail(&self, id: SurveyId) -> Result<SurveyDetail> {
    let path = format!("/surveys/{id}");
    self.send(self.client.get(self.url(&path)), &format!("GET {path}")).await
  }

  /// `POST /surveys`
  pub async fn create_survey(&self, draft: &SurveyDraft) -> Result<SurveyDetail> {
    self
      .send(self.client.post(self.url("/surveys")).json(draft), "POST /surveys")
      .await
  }

  /// `DELETE /surveys/{id}`
  pub async fn delete_survey(&self, id: SurveyId) -> Result<CascadeReport> {
    let path = format!("/surveys/{id}");
    self.send(self.client.delete(self.url(&path)), &format!("DELETE {path}")).await
  }

  // ── Members ───────────────────────────────────────────────────────────────

  /// `POST /surveys/{id}/respondents`
  pub async fn add_respondent(&self, id: SurveyId, name: &str, email: &str) -> Result<Respondent> {
    let path = format!("/surveys/{id}/respondents");
    let body = json!({ "name": name, "email": email });
    self
      .send(self.client.post(self.url(&path)).json(&body), &format!("POST {path}"))
      .await
  }

  /// `POST /surveys/{id}/questions`
  pub async fn add_question(&self, id: SurveyId, text: &str) -> Result<Question> {
    let path = format!("/surveys/{id}/questions");
    let body = json!({ "text": text });
    self
      .send(self.client.post(self.url(&path)).json(&body), &format!("POST {path}"))
      .await
  }

  /// `DELETE /surveys/{id}/respondents/{respondent_id}`
  pub async fn remove_respondent(
    &self,
    id: SurveyId,
    respondent_id: RespondentId,
  ) -> Result<CascadeReport> {
    let path = format!("/surveys/{id}/respondents/{respondent_id}");
    self.send(self.client.delete(self.url(&path)), &format!("DELETE {path}")).await
  }

  /// `DELETE /surveys/{id}/questions/{question_id}`
  pub async fn remove_question(&self, id: SurveyId, question_id: QuestionId) -> Result<CascadeReport> {
    let path = format!("/surveys/{id}/questions/{question_id}");
    self.send(self.client.delete(self.url(&path)), &format!("DELETE {path}")).await
  }

  // ── Responses ─────────────────────────────────────────────────────────────

  /// `POST /surveys/{id}/responses`
  pub async fn respond(&self, id: SurveyId, submission: &Submission) -> Result<Vec<Response>> {
    let path = format!("/surveys/{id}/responses");
    self
      .send(self.client.post(self.url(&path)).json(submission), &format!("POST {path}"))
      .await
  }

  // ── Publishing ────────────────────────────────────────────────────────────

  /// `POST /surveys/{id}/publish`
  pub async fn publish(
    &self,
    id: SurveyId,
    respondent_ids: &[RespondentId],
    question_ids: &[QuestionId],
  ) -> Result<Vec<PublishedAssignment>> {
    let path = format!("/surveys/{id}/publish");
    let body = json!({ "respondent_ids": respondent_ids, "question_ids": question_ids });
    self
      .send(self.client.post(self.url(&path)).json(&body), &format!("POST {path}"))
      .await
  }

  /// `DELETE /surveys/{id}/publish`
  pub async fn unpublish(&self, id: SurveyId) -> Result<Unpublished> {
    let path = format!("/surveys/{id}/publish");
    self.send(self.client.delete(self.url(&path)), &format!("DELETE {path}")).await
  }

  /// `GET /published`
  pub async fn published(&self) -> Result<Vec<PublishedSurvey>> {
    self.send(self.client.get(self.url("/published")), "GET /published").await
  }

  /// `GET /surveys/{id}/published`
  pub async fn published_survey(&self, id: SurveyId) -> Result<PublishedSurvey> {
    let path = format!("/surveys/{id}/published");
    self.send(self.client.get(self.url(&path)), &format!("GET {path}")).await
  }
}
