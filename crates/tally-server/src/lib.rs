//! HTTP server for Tally.
//!
//! Wires the JSON API to a store, adds request tracing, and runs the
//! background watchers that log store activity.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use axum::Router;
use serde::Deserialize;
use tally_core::{
  Context,
  live::LiveQuery,
  model::Collection,
  publish::PublishProjector,
  store::DocumentStore,
};
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tower_http::trace::TraceLayer;

// ─── Configuration ────────────────────────────────────────────────────────────

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5232;
pub const DEFAULT_STORE_PATH: &str = "~/.local/share/tally/tally.db";

/// Runtime server configuration, deserialised from `config.toml` and
/// `TALLY_*` environment variables.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerConfig {
  pub host:       String,
  pub port:       u16,
  pub store_path: PathBuf,
}

impl ServerConfig {
  /// Layer the optional file at `path` under the environment, over the
  /// built-in defaults.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .set_default("host", DEFAULT_HOST)?
      .set_default("port", i64::from(DEFAULT_PORT))?
      .set_default("store_path", DEFAULT_STORE_PATH)?
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("TALLY"))
      .build()
      .context("failed to read config file")?;

    let mut cfg: ServerConfig = settings
      .try_deserialize()
      .context("failed to deserialise ServerConfig")?;
    cfg.store_path = expand_tilde(&cfg.store_path);
    Ok(cfg)
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// The API router with request tracing.
pub fn router<S>(ctx: Context<S>) -> Router
where
  S: DocumentStore + 'static,
{
  tally_api::api_router(ctx).layer(TraceLayer::new_for_http())
}

// ─── Watchers ─────────────────────────────────────────────────────────────────

/// Log every change set announced on the bus.
pub fn spawn_change_log<S>(ctx: &Context<S>) -> JoinHandle<()>
where
  S: DocumentStore + 'static,
{
  let mut rx = ctx.bus().subscribe();
  tokio::spawn(async move {
    loop {
      match rx.recv().await {
        Ok(changes) => {
          let collections: Vec<&str> = changes.iter().map(Collection::name).collect();
          tracing::debug!(?collections, "store changed");
        }
        Err(RecvError::Lagged(skipped)) => tracing::debug!(skipped, "change log lagged"),
        Err(RecvError::Closed) => break,
      }
    }
  })
}

/// Keep a live view of the published surveys and log its size whenever it
/// changes.
pub fn spawn_published_watch<S>(ctx: &Context<S>) -> JoinHandle<()>
where
  S: DocumentStore + 'static,
{
  let publisher = Arc::new(PublishProjector::new(ctx.clone()));
  let mut live = LiveQuery::new(
    ctx.bus(),
    [
      Collection::PublishedAssignments,
      Collection::Surveys,
      Collection::Respondents,
      Collection::Questions,
    ],
    move || {
      let publisher = publisher.clone();
      async move { publisher.project_published().await }
    },
  );

  tokio::spawn(async move {
    while let Some(result) = live.changed().await {
      match result {
        Ok(published) => {
          let respondents: usize = published.iter().map(|p| p.respondents.len()).sum();
          tracing::info!(surveys = published.len(), respondents, "published view refreshed");
        }
        Err(e) => tracing::warn!(error = %e, "published view refresh failed"),
      }
    }
  })
}
