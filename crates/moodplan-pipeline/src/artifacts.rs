//! Filesystem-backed artifact store.
//!
//! Blobs live under `root` at their key. Writes go to a temporary sibling
//! file that is synced and then renamed over the target, so a reader never
//! sees a partial artifact and a crash leaves either the old blob or the new
//! one.

use std::path::{Component, Path, PathBuf};

use moodplan_core::service::{Artifact, ArtifactStore};
use tokio::io::AsyncWriteExt as _;
use uuid::Uuid;

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct FsArtifactStore {
  root:     PathBuf,
  base_url: String,
}

impl FsArtifactStore {
  pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
    Self { root: root.into(), base_url: base_url.into() }
  }

  pub fn root(&self) -> &Path { &self.root }

  /// Resolve `key` under the root, refusing anything that could escape it.
  fn path_for(&self, key: &str) -> Result<PathBuf> {
    let rel = Path::new(key);
    let clean = !key.is_empty()
      && rel.components().all(|c| matches!(c, Component::Normal(_)));
    if !clean {
      return Err(Error::InvalidKey(key.to_owned()));
    }
    Ok(self.root.join(rel))
  }

  pub fn uri_for(&self, key: &str) -> String {
    format!("{}/{}", self.base_url.trim_end_matches('/'), key)
  }

  async fn write(&self, key: &str, artifact: &Artifact) -> Result<String> {
    let path = self.path_for(key)?;
    let dir  = path.parent().unwrap_or(&self.root);
    tokio::fs::create_dir_all(dir).await?;

    let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4().simple()));
    let mut file = tokio::fs::File::create(&tmp).await?;
    let written = async {
      file.write_all(&artifact.body).await?;
      file.sync_all().await
    }
    .await;
    drop(file);

    if let Err(e) = written {
      let _ = tokio::fs::remove_file(&tmp).await;
      return Err(e.into());
    }
    tokio::fs::rename(&tmp, &path).await?;

    Ok(self.uri_for(key))
  }
}

impl ArtifactStore for FsArtifactStore {
  type Error = Error;

  async fn put<'a>(&'a self, key: &'a str, artifact: &'a Artifact) -> Result<String> {
    self.write(key, artifact).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn artifact(body: &str) -> Artifact {
    Artifact { content_type: "text/plain".into(), body: body.as_bytes().to_vec() }
  }

  #[tokio::test]
  async fn put_writes_file_and_returns_uri() {
    let dir   = tempfile::tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path(), "http://localhost:3000/artifacts/");

    let uri = store
      .put("ascii-art/user1/2025/01/02/abc.txt", &artifact("hello"))
      .await
      .unwrap();
    assert_eq!(uri, "http://localhost:3000/artifacts/ascii-art/user1/2025/01/02/abc.txt");

    let on_disk = std::fs::read_to_string(dir.path().join("ascii-art/user1/2025/01/02/abc.txt")).unwrap();
    assert_eq!(on_disk, "hello");
  }

  #[tokio::test]
  async fn rewriting_a_key_replaces_the_blob() {
    let dir   = tempfile::tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path(), "http://x");

    store.put("a/b.txt", &artifact("one")).await.unwrap();
    store.put("a/b.txt", &artifact("two")).await.unwrap();

    assert_eq!(std::fs::read_to_string(dir.path().join("a/b.txt")).unwrap(), "two");
    let entries = std::fs::read_dir(dir.path().join("a")).unwrap().count();
    assert_eq!(entries, 1, "temporary files left behind");
  }

  #[tokio::test]
  async fn keys_cannot_escape_the_root() {
    let dir   = tempfile::tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path(), "http://x");

    for key in ["../evil.txt", "/etc/passwd", "a/../../b", "", "./a.txt"] {
      let err = store.put(key, &artifact("x")).await.unwrap_err();
      assert!(matches!(err, Error::InvalidKey(_)), "{key:?} accepted");
      assert!(!err.is_retryable());
    }
  }
}
