//! HTTP surface for moodplan.
//!
//! Exposes an axum [`Router`] with the submission and retrieval entry points,
//! backed by any [`PlanStore`] that can also hold the durable
//! [`IngestionBuffer`].

pub mod auth;
pub mod error;
pub mod handlers;
pub mod jwt;

pub use error::Error;

use std::{path::PathBuf, sync::Arc};

use axum::{
  Router,
  routing::{get, post},
};
use moodplan_core::store::{PlanStore, SubmissionQueue};
use moodplan_pipeline::{IngestionBuffer, PipelineConfig, secrets::SecretCache};
use serde::Deserialize;
use tower_http::{services::ServeDir, trace::TraceLayer};

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `MOODPLAN_*` environment variables.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
  pub host:               String,
  pub port:               u16,
  pub store_path:         PathBuf,
  /// Root directory of the artifact store.
  pub artifact_dir:       PathBuf,
  /// Public prefix for artifact URIs, normally `<server>/artifacts`.
  pub artifact_base_url:  String,
  /// JSON secrets file. Secrets come from the environment when unset.
  pub secrets_path:       Option<PathBuf>,
  pub secret_ttl_secs:    u64,
  /// Remote cognition endpoint. The fallback planner is used when unset.
  pub cognition_endpoint: Option<String>,
  pub pipeline:           PipelineConfig,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:               "127.0.0.1".into(),
      port:               3000,
      store_path:         PathBuf::from("moodplan.db"),
      artifact_dir:       PathBuf::from("artifacts"),
      artifact_base_url:  "http://127.0.0.1:3000/artifacts".into(),
      secrets_path:       None,
      secret_ttl_secs:    300,
      cognition_endpoint: None,
      pipeline:           PipelineConfig::default(),
    }
  }
}

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
#[derive(Clone)]
pub struct AppState<S: PlanStore> {
  pub store:   Arc<S>,
  pub buffer:  IngestionBuffer<S>,
  pub secrets: Arc<SecretCache>,
  pub config:  Arc<ServerConfig>,
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the axum [`Router`] for the service.
pub fn router<S>(state: AppState<S>) -> Router
where
  S: PlanStore + SubmissionQueue + Clone + 'static,
{
  let artifacts = ServeDir::new(&state.config.artifact_dir);

  Router::new()
    .route("/health", get(handlers::health))
    .route("/analyze", post(handlers::analyze::submit::<S>))
    .route("/plan/{user_id}", get(handlers::plans::list::<S>))
    .nest_service("/artifacts", artifacts)
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

// ─── Integration tests ────────────────────────────────────────────────────────
