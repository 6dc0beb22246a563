//! JSON REST API for Tally.
//!
//! Exposes an axum [`Router`] backed by any [`DocumentStore`]. TLS and
//! transport concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .merge(tally_api::api_router(ctx.clone()))
//! ```

pub mod error;
pub mod extract;
pub mod members;
pub mod publish;
pub mod surveys;

use std::sync::Arc;

use axum::{
  Router,
  routing::{delete, get, patch, post},
};
use tally_core::{
  Context, authoring::Authoring, cascade::CascadeManager, publish::PublishProjector,
  store::DocumentStore,
};

pub use error::ApiError;

/// The services every handler draws on, built once per router.
pub struct Services<S> {
  pub authoring: Authoring<S>,
  pub cascade:   CascadeManager<S>,
  pub publisher: PublishProjector<S>,
}

impl<S: DocumentStore> Services<S> {
  pub fn new(ctx: Context<S>) -> Self {
    Self {
      authoring: Authoring::new(ctx.clone()),
      cascade:   CascadeManager::new(ctx.clone()),
      publisher: PublishProjector::new(ctx),
    }
  }
}

pub type AppState<S> = Arc<Services<S>>;

/// Build a fully-materialised API router over `ctx`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(ctx: Context<S>) -> Router<()>
where
  S: DocumentStore + 'static,
{
  Router::new()
    // Surveys
    .route("/surveys", get(surveys::list::<S>).post(surveys::create::<S>))
    .route(
      "/surveys/{id}",
      get(surveys::get_one::<S>)
        .patch(surveys::rename::<S>)
        .delete(surveys::delete_one::<S>),
    )
    .route("/surveys/{id}/responses", post(surveys::respond::<S>))
    // Members
    .route("/surveys/{id}/respondents", post(members::add_respondent::<S>))
    .route(
      "/surveys/{id}/respondents/{respondent_id}",
      delete(members::remove_respondent::<S>),
    )
    .route("/surveys/{id}/questions", post(members::add_question::<S>))
    .route(
      "/surveys/{id}/questions/{question_id}",
      delete(members::remove_question::<S>),
    )
    .route("/respondents/{id}", patch(members::edit_respondent::<S>))
    .route("/questions/{id}", patch(members::edit_question::<S>))
    // Publishing
    .route(
      "/surveys/{id}/publish",
      post(publish::publish_one::<S>).delete(publish::unpublish_one::<S>),
    )
    .route("/surveys/{id}/published", get(publish::get_one::<S>))
    .route("/published", get(publish::list::<S>))
    .with_state(Arc::new(Services::new(ctx)))
}
