//! Error types for `moodplan-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("submission text is empty")]
  EmptyText,

  #[error("submission user id is missing")]
  MissingUserId,

  #[error("malformed analysis: {0}")]
  MalformedAnalysis(String),

  #[error("unknown visualization status: {0:?}")]
  UnknownStatus(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
