//! Tunables for the pipeline. Every field has a default so a config file
//! only needs to mention what it changes.

use std::time::Duration;

use serde::Deserialize;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  /// Unsettled submissions the ingestion buffer holds before publishers wait.
  pub ingest_capacity:       usize,
  pub orchestrator_workers:  usize,
  pub visual_workers:        usize,

  /// Deliveries of one submission before it is dead-lettered.
  pub max_attempts:          u32,
  /// Claims of one visualization job before the record is marked failed.
  pub visual_max_attempts:   u32,
  pub backoff_base_ms:       u64,
  pub backoff_max_ms:        u64,

  pub cognition_timeout_ms:  u64,
  pub store_timeout_ms:      u64,
  pub classifier_timeout_ms: u64,
  pub artifact_timeout_ms:   u64,

  /// How long a consumer owns a delivery before it is redelivered. Must
  /// outlast a cognition call plus the store writes that follow it.
  pub ingest_lease_secs:     u64,
  pub job_lease_secs:        u64,
  /// How long an idle consumer or worker sleeps between empty polls.
  pub poll_interval_ms:      u64,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      ingest_capacity:       256,
      orchestrator_workers:  4,
      visual_workers:        2,
      max_attempts:          3,
      visual_max_attempts:   3,
      backoff_base_ms:       200,
      backoff_max_ms:        5_000,
      cognition_timeout_ms:  30_000,
      store_timeout_ms:      5_000,
      classifier_timeout_ms: 10_000,
      artifact_timeout_ms:   10_000,
      ingest_lease_secs:     120,
      job_lease_secs:        60,
      poll_interval_ms:      1_000,
    }
  }
}

impl PipelineConfig {
  pub fn ingest_retry(&self) -> RetryPolicy {
    RetryPolicy::new(self.max_attempts, self.backoff_base(), self.backoff_max())
  }

  pub fn visual_retry(&self) -> RetryPolicy {
    RetryPolicy::new(self.visual_max_attempts, self.backoff_base(), self.backoff_max())
  }

  fn backoff_base(&self) -> Duration { Duration::from_millis(self.backoff_base_ms) }

  fn backoff_max(&self) -> Duration { Duration::from_millis(self.backoff_max_ms) }

  pub fn cognition_timeout(&self) -> Duration { Duration::from_millis(self.cognition_timeout_ms) }

  pub fn store_timeout(&self) -> Duration { Duration::from_millis(self.store_timeout_ms) }

  pub fn classifier_timeout(&self) -> Duration {
    Duration::from_millis(self.classifier_timeout_ms)
  }

  pub fn artifact_timeout(&self) -> Duration { Duration::from_millis(self.artifact_timeout_ms) }

  pub fn ingest_lease(&self) -> Duration { Duration::from_secs(self.ingest_lease_secs) }

  pub fn job_lease(&self) -> Duration { Duration::from_secs(self.job_lease_secs) }

  pub fn poll_interval(&self) -> Duration { Duration::from_millis(self.poll_interval_ms) }
}
