//! Secret resolution with a time-bounded cache.
//!
//! The JWT signing secret and the cognition API key come from a
//! [`SecretSource`]. [`SecretCache`] resolves them once at startup (the
//! server refuses to start without them) and re-fetches when the cached copy
//! is older than its TTL. If a re-fetch fails the stale copy keeps serving.

use std::{
  fmt,
  path::PathBuf,
  time::{Duration, Instant},
};

use serde::Deserialize;
use tokio::sync::RwLock;

use crate::{Error, Result};

pub const JWT_SECRET_ENV: &str = "MOODPLAN_JWT_SECRET";
pub const COGNITION_API_KEY_ENV: &str = "MOODPLAN_COGNITION_API_KEY";

#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Secrets {
  #[serde(rename = "JWT_SECRET")]
  pub jwt_secret:        String,
  #[serde(rename = "COGNITION_API_KEY", default)]
  pub cognition_api_key: Option<String>,
}

impl fmt::Debug for Secrets {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Secrets")
      .field("jwt_secret", &"<redacted>")
      .field("cognition_api_key", &self.cognition_api_key.as_ref().map(|_| "<redacted>"))
      .finish()
  }
}

/// Where secrets are read from.
#[derive(Debug, Clone)]
pub enum SecretSource {
  /// A JSON document `{"JWT_SECRET": …, "COGNITION_API_KEY": …}`.
  File(PathBuf),
  /// `MOODPLAN_JWT_SECRET` and `MOODPLAN_COGNITION_API_KEY`.
  Env,
  Static(Secrets),
}

impl SecretSource {
  pub async fn fetch(&self) -> Result<Secrets> {
    let secrets = match self {
      Self::File(path) => {
        let raw = tokio::fs::read_to_string(path)
          .await
          .map_err(|e| Error::Secrets(format!("reading {}: {e}", path.display())))?;
        serde_json::from_str::<Secrets>(&raw)
          .map_err(|e| Error::Secrets(format!("parsing {}: {e}", path.display())))?
      }
      Self::Env => Secrets {
        jwt_secret:        std::env::var(JWT_SECRET_ENV)
          .map_err(|_| Error::Secrets(format!("{JWT_SECRET_ENV} is not set")))?,
        cognition_api_key: std::env::var(COGNITION_API_KEY_ENV).ok(),
      },
      Self::Static(s) => s.clone(),
    };

    if secrets.jwt_secret.is_empty() {
      return Err(Error::Secrets("JWT_SECRET is empty".into()));
    }
    Ok(secrets)
  }
}

pub struct SecretCache {
  source: SecretSource,
  ttl:    Duration,
  cached: RwLock<Option<(Secrets, Instant)>>,
}

impl SecretCache {
  /// Resolve the secrets once. Fails if the source cannot produce them.
  pub async fn new(source: SecretSource, ttl: Duration) -> Result<Self> {
    let secrets = source.fetch().await?;
    tracing::info!(?source, "secrets loaded");
    Ok(Self { source, ttl, cached: RwLock::new(Some((secrets, Instant::now()))) })
  }

  /// Current secrets, re-fetched if the cached copy has expired.
  pub async fn get(&self) -> Result<Secrets> {
    {
      let guard = self.cached.read().await;
      if let Some((secrets, at)) = guard.as_ref()
        && at.elapsed() < self.ttl
      {
        return Ok(secrets.clone());
      }
    }

    let mut guard = self.cached.write().await;
    // Another caller may have refreshed while this one waited for the lock.
    if let Some((secrets, at)) = guard.as_ref()
      && at.elapsed() < self.ttl
    {
      return Ok(secrets.clone());
    }
    self.fetch_into(&mut guard).await
  }

  /// Re-fetch from the source now. On failure, a previously cached value is
  /// returned instead of the error.
  pub async fn refresh(&self) -> Result<Secrets> {
    let mut guard = self.cached.write().await;
    self.fetch_into(&mut guard).await
  }

  /// A failed fetch restamps the stale entry, so an outage costs one fetch
  /// per `ttl` rather than one per caller.
  async fn fetch_into(&self, cached: &mut Option<(Secrets, Instant)>) -> Result<Secrets> {
    match self.source.fetch().await {
      Ok(fresh) => {
        *cached = Some((fresh.clone(), Instant::now()));
        Ok(fresh)
      }
      Err(e) => match cached.as_mut() {
        Some((stale, at)) => {
          tracing::warn!(error = %e, ttl = ?self.ttl, "secret refresh failed; serving cached secrets");
          *at = Instant::now();
          Ok(stale.clone())
        }
        None => Err(e),
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn write_secrets(file: &mut tempfile::NamedTempFile, jwt: &str) {
    let body = format!(r#"{{"JWT_SECRET": "{jwt}", "COGNITION_API_KEY": "key-1"}}"#);
    std::fs::write(file.path(), body).unwrap();
  }

  #[tokio::test]
  async fn file_source_reads_json() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write_secrets(&mut file, "s3cret");

    let secrets = SecretSource::File(file.path().into()).fetch().await.unwrap();
    assert_eq!(secrets.jwt_secret, "s3cret");
    assert_eq!(secrets.cognition_api_key.as_deref(), Some("key-1"));
  }

  #[tokio::test]
  async fn missing_file_is_an_error() {
    let source = SecretSource::File("/nonexistent/secrets.json".into());
    assert!(matches!(SecretCache::new(source, Duration::from_secs(60)).await, Err(Error::Secrets(_))));
  }

  #[tokio::test]
  async fn empty_jwt_secret_is_rejected() {
    let source = SecretSource::Static(Secrets { jwt_secret: String::new(), cognition_api_key: None });
    assert!(source.fetch().await.is_err());
  }

  #[tokio::test]
  async fn cache_refetches_after_ttl() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write_secrets(&mut file, "first");
    let cache = SecretCache::new(SecretSource::File(file.path().into()), Duration::ZERO)
      .await
      .unwrap();

    write_secrets(&mut file, "second");
    assert_eq!(cache.get().await.unwrap().jwt_secret, "second");
  }

  #[tokio::test]
  async fn cache_serves_within_ttl_without_refetch() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write_secrets(&mut file, "first");
    let cache = SecretCache::new(SecretSource::File(file.path().into()), Duration::from_secs(3600))
      .await
      .unwrap();

    write_secrets(&mut file, "second");
    assert_eq!(cache.get().await.unwrap().jwt_secret, "first");
  }

  #[tokio::test]
  async fn stale_secrets_survive_a_failed_refresh() {
    let dir  = tempfile::tempdir().unwrap();
    let path = dir.path().join("secrets.json");
    std::fs::write(&path, r#"{"JWT_SECRET": "kept"}"#).unwrap();
    let cache = SecretCache::new(SecretSource::File(path.clone()), Duration::ZERO)
      .await
      .unwrap();

    std::fs::remove_file(&path).unwrap();
    assert_eq!(cache.get().await.unwrap().jwt_secret, "kept");
  }

  #[tokio::test]
  async fn failed_refresh_waits_a_full_ttl_before_fetching_again() {
    let dir  = tempfile::tempdir().unwrap();
    let path = dir.path().join("secrets.json");
    std::fs::write(&path, r#"{"JWT_SECRET": "kept"}"#).unwrap();
    let ttl   = Duration::from_millis(200);
    let cache = SecretCache::new(SecretSource::File(path.clone()), ttl).await.unwrap();

    std::fs::remove_file(&path).unwrap();
    tokio::time::sleep(ttl + Duration::from_millis(20)).await;
    assert_eq!(cache.get().await.unwrap().jwt_secret, "kept");

    // The source is back, but the restamped entry is still fresh.
    std::fs::write(&path, r#"{"JWT_SECRET": "rotated"}"#).unwrap();
    assert_eq!(cache.get().await.unwrap().jwt_secret, "kept");

    tokio::time::sleep(ttl + Duration::from_millis(20)).await;
    assert_eq!(cache.get().await.unwrap().jwt_secret, "rotated");
  }

  #[test]
  fn debug_output_is_redacted() {
    let s = Secrets { jwt_secret: "hunter2".into(), cognition_api_key: Some("abc".into()) };
    let out = format!("{s:?}");
    assert!(!out.contains("hunter2"));
    assert!(!out.contains("abc"));
  }
}
