//! moodplan server binary.
//!
//! Reads `config.toml` (or the path given with `--config`) and `MOODPLAN_*`
//! environment variables, opens the SQLite store, starts the orchestrator and
//! visualization pools, and serves the HTTP API until Ctrl-C.
//!
//! # Helper modes
//!
//! ```text
//! server --issue-token user1 --token-hours 24   # print a signed bearer token
//! server --dead-letters 20                      # print recent dead letters
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use anyhow::Context as _;
use chrono::Utc;
use clap::Parser;
use moodplan_core::store::{DeadLetterSink, SubmissionQueue};
use moodplan_pipeline::{
  IngestionBuffer, Orchestrator, VisualizationWorker,
  artifacts::FsArtifactStore,
  ascii::AsciiClassifier,
  cognition::Cognition,
  orchestrator::spawn_consumers,
  secrets::{SecretCache, SecretSource},
  worker::spawn_workers,
};
use moodplan_server::{AppState, ServerConfig, jwt};
use moodplan_store_sqlite::SqliteStore;
use tokio::{net::TcpListener, sync::watch};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "moodplan server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Print a bearer token for USER signed with the configured secret and exit.
  #[arg(long, value_name = "USER")]
  issue_token: Option<String>,

  /// Lifetime of the token printed by `--issue-token`.
  #[arg(long, default_value_t = 24)]
  token_hours: i64,

  /// Print the N most recent dead letters as JSON lines and exit.
  #[arg(long, value_name = "N")]
  dead_letters: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config.clone()).required(false))
    .add_source(
      config::Environment::with_prefix("MOODPLAN")
        .prefix_separator("_")
        .separator("__"),
    )
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  // Secrets are required; refuse to start without them.
  let source = match &server_cfg.secrets_path {
    Some(path) => SecretSource::File(expand_tilde(path)),
    None => SecretSource::Env,
  };
  let secrets = Arc::new(
    SecretCache::new(source, Duration::from_secs(server_cfg.secret_ttl_secs))
      .await
      .context("failed to load secrets")?,
  );

  if let Some(user) = cli.issue_token {
    let jwt_secret = secrets.get().await?.jwt_secret;
    let claims = jwt::Claims::new(user, Utc::now(), chrono::Duration::hours(cli.token_hours));
    let token = jwt::encode(&claims, jwt_secret.as_bytes())
      .map_err(|e| anyhow::anyhow!("failed to sign token: {e}"))?;
    println!("{token}");
    return Ok(());
  }

  let store_path = expand_tilde(&server_cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  if let Some(limit) = cli.dead_letters {
    for letter in store.list_dead_letters(limit).await? {
      println!("{}", serde_json::to_string(&letter)?);
    }
    return Ok(());
  }

  let artifact_dir = expand_tilde(&server_cfg.artifact_dir);
  tokio::fs::create_dir_all(&artifact_dir)
    .await
    .with_context(|| format!("failed to create artifact dir {artifact_dir:?}"))?;

  let pipeline_cfg = server_cfg.pipeline.clone();
  let cognition = Cognition::from_endpoint(
    server_cfg.cognition_endpoint.as_deref(),
    pipeline_cfg.cognition_timeout(),
    secrets.clone(),
  )
  .context("failed to build cognition client")?;
  if matches!(cognition, Cognition::Fallback(_)) {
    tracing::warn!("no cognition_endpoint configured; plans come from the fallback planner");
  }

  // Pipeline pools.
  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  let buffer = IngestionBuffer::new(store.clone(), pipeline_cfg.ingest_capacity);
  let carried = store.backlog().await?;
  if carried > 0 {
    tracing::info!(carried, "resuming submissions accepted before the last shutdown");
  }

  let orchestrator = Arc::new(Orchestrator::new(
    store.clone(),
    store.clone(),
    cognition,
    pipeline_cfg.clone(),
  ));
  let worker = Arc::new(VisualizationWorker::new(
    store.clone(),
    store.clone(),
    AsciiClassifier,
    FsArtifactStore::new(&artifact_dir, server_cfg.artifact_base_url.clone()),
    pipeline_cfg.clone(),
  ));

  let mut tasks = spawn_consumers(
    orchestrator,
    pipeline_cfg.orchestrator_workers,
    buffer.clone(),
    shutdown_rx.clone(),
  );
  tasks.extend(spawn_workers(worker, pipeline_cfg.visual_workers, shutdown_rx));

  // HTTP.
  let mut config = server_cfg.clone();
  config.artifact_dir = artifact_dir;
  let state = AppState {
    store:   Arc::new(store),
    buffer:  buffer.clone(),
    secrets,
    config:  Arc::new(config),
  };

  let app = moodplan_server::router(state);
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
      }
      tracing::info!("shutting down");
    })
    .await
    .context("server error")?;

  // Unsettled submissions stay in the store and resume on the next start.
  buffer.close();
  let _ = shutdown_tx.send(true);
  for task in tasks {
    if let Err(e) = task.await {
      tracing::warn!(error = %e, "pipeline task ended abnormally");
    }
  }
  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
