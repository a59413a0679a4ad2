//! Contracts for the external collaborators the pipeline calls: the
//! cognition service, the image classifier and the artifact store.

use std::future::Future;

use uuid::Uuid;

use crate::plan::Analysis;

/// Turns raw text into an emotion, a sentiment score and a weekly plan.
///
/// Implementations must have no side effects when they fail.
pub trait CognitionService: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn analyze<'a>(
    &'a self,
    text: &'a str,
  ) -> impl Future<Output = Result<Analysis, Self::Error>> + Send + 'a;
}

/// A rendered visualization, ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
  pub content_type: String,
  pub body:         Vec<u8>,
}

/// Maps an emotion label to an artifact.
pub trait ImageClassifier: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn render<'a>(
    &'a self,
    emotion: &'a str,
    record_id: Uuid,
  ) -> impl Future<Output = Result<Artifact, Self::Error>> + Send + 'a;
}

/// Path-addressable blob storage.
pub trait ArtifactStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Durably write `artifact` under `key` and return a URI it can be
  /// fetched from. Writing the same key twice replaces the blob.
  fn put<'a>(
    &'a self,
    key: &'a str,
    artifact: &'a Artifact,
  ) -> impl Future<Output = Result<String, Self::Error>> + Send + 'a;
}
