//! Error type for `moodplan-pipeline`.

use std::time::Duration;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
  /// The submission itself is unusable; retrying will not help.
  #[error("invalid submission: {0}")]
  Validation(#[from] moodplan_core::Error),

  /// The cognition service or classifier failed or answered nonsense.
  #[error("upstream service error: {0}")]
  Upstream(String),

  #[error("persistence error: {0}")]
  Persistence(#[source] BoxError),

  #[error("queue error: {0}")]
  Queue(#[source] BoxError),

  #[error("visualization error: {0}")]
  Visualization(#[source] BoxError),

  #[error("{operation} timed out after {after:?}")]
  Timeout {
    operation: &'static str,
    after:     Duration,
  },

  #[error("secret store error: {0}")]
  Secrets(String),

  #[error("invalid artifact key: {0:?}")]
  InvalidKey(String),

  #[error("ingestion buffer is closed")]
  BufferClosed,

  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
}

impl Error {
  /// Whether redelivering the same unit of work could succeed.
  pub fn is_retryable(&self) -> bool { !matches!(self, Self::Validation(_) | Self::InvalidKey(_)) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
