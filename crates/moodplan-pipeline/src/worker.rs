//! The visualization worker: drains the job queue, renders an artifact for
//! each record's emotion, stores it and resolves the record's visualization
//! sub-state.
//!
//! Ordering per job is fixed: render, store the artifact durably, update the
//! record, then ack. A job is acked only after the record update lands, so a
//! crash anywhere in between leaves the job leased and it comes back once
//! the lease runs out.

use std::{sync::Arc, time::Duration};

use moodplan_core::{
  plan::{PlanRecord, VisualizationOutcome, VisualizationStatus, VisualizationUpdate},
  service::{ArtifactStore, ImageClassifier},
  store::{ClaimedJob, DeadLetterSink, DeadLetterStage, JobQueue, NewDeadLetter, PlanStore, VisualizationJob},
};
use sha2::{Digest, Sha256};
use tokio::{sync::watch, task::JoinHandle};

use crate::{Error, PipelineConfig, Result, retry::timed};

/// How a claimed job was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
  Completed { artifact_ref: String },
  /// Released back to the queue for another attempt.
  Retrying { attempt: u32, delay: Duration },
  /// Retry budget exhausted; the record is marked `failed`.
  Failed { reason: String },
  /// The record was resolved by an earlier run; nothing changed.
  AlreadyResolved(VisualizationStatus),
  /// The job pointed at a record that does not exist.
  Orphaned,
  /// The record could not be read within the retry budget; the job was
  /// dead-lettered and the record left as it is.
  Abandoned { reason: String },
  /// The record update failed; the job stays leased and will be redelivered.
  Stranded,
}

pub struct VisualizationWorker<S, Q, I, A> {
  store:      S,
  queue:      Q,
  classifier: I,
  artifacts:  A,
  config:     PipelineConfig,
}

/// Path- and URL-safe directory name for a user: a hex prefix of the
/// SHA-256 of the user id.
pub fn user_segment(user_id: &str) -> String {
  let digest = hex::encode(Sha256::digest(user_id.as_bytes()));
  digest[..16].to_owned()
}

/// Blob key for a record's artifact. Deterministic, so re-running a job
/// overwrites the same blob.
pub fn artifact_key(record: &PlanRecord) -> String {
  format!(
    "ascii-art/{}/{}/{}.txt",
    user_segment(&record.user_id),
    record.timestamp.format("%Y/%m/%d"),
    record.record_id
  )
}

impl<S, Q, I, A> VisualizationWorker<S, Q, I, A>
where
  S: PlanStore + DeadLetterSink,
  Q: JobQueue,
  I: ImageClassifier,
  A: ArtifactStore,
{
  pub fn new(store: S, queue: Q, classifier: I, artifacts: A, config: PipelineConfig) -> Self {
    Self { store, queue, classifier, artifacts, config }
  }

  /// Claim and settle one job. `Ok(None)` when the queue has nothing
  /// available.
  pub async fn poll_once(&self) -> Result<Option<JobOutcome>> {
    let claimed = timed("job claim", self.config.store_timeout(), self.queue.claim(self.config.job_lease()))
      .await?
      .map_err(|e| Error::Queue(Box::new(e)))?;

    match claimed {
      Some(job) => Ok(Some(self.process(job).await)),
      None => Ok(None),
    }
  }

  pub async fn process(&self, claimed: ClaimedJob) -> JobOutcome {
    let ClaimedJob { job, attempts } = claimed;
    let policy = self.config.visual_retry();

    let lookup = timed("plan lookup", self.config.store_timeout(), self.store.get_plan(job.record_id))
      .await
      .and_then(|r| r.map_err(|e| Error::Persistence(Box::new(e))));

    let record = match lookup {
      Ok(Some(record)) => record,
      Ok(None) => return self.orphan(&job, attempts).await,
      Err(e) if policy.should_retry(attempts) => {
        tracing::warn!(record_id = %job.record_id, attempts, error = %e, "plan lookup failed");
        return self.retry_later(&job, attempts, policy.delay_for(attempts)).await;
      }
      Err(e) => {
        let reason = format!("plan lookup failed: {e}");
        tracing::warn!(record_id = %job.record_id, attempts, %reason, "giving up on job");
        self.abandon(&job, attempts, reason.clone()).await;
        return JobOutcome::Abandoned { reason };
      }
    };

    if !record.visualization.is_pending() {
      self.ack(&job).await;
      return JobOutcome::AlreadyResolved(record.visualization.status);
    }

    match self.render_and_store(&job, &record).await {
      Ok(artifact_ref) => {
        let outcome = VisualizationOutcome::Completed { artifact_ref: artifact_ref.clone() };
        self
          .resolve(&job, attempts, outcome, JobOutcome::Completed { artifact_ref })
          .await
      }
      Err(e) if policy.should_retry(attempts) => {
        tracing::warn!(record_id = %job.record_id, attempts, error = %e, "visualization attempt failed");
        self.retry_later(&job, attempts, policy.delay_for(attempts)).await
      }
      Err(e) => {
        let reason = e.to_string();
        tracing::warn!(record_id = %job.record_id, attempts, %reason, "visualization failed permanently");
        let outcome = VisualizationOutcome::Failed { reason: reason.clone() };
        self.resolve(&job, attempts, outcome, JobOutcome::Failed { reason }).await
      }
    }
  }

  async fn render_and_store(&self, job: &VisualizationJob, record: &PlanRecord) -> Result<String> {
    let artifact = timed(
      "classifier call",
      self.config.classifier_timeout(),
      self.classifier.render(&job.emotion, job.record_id),
    )
    .await?
    .map_err(|e| Error::Visualization(Box::new(e)))?;

    let key = artifact_key(record);
    let uri = timed(
      "artifact write",
      self.config.artifact_timeout(),
      self.artifacts.put(&key, &artifact),
    )
    .await?
    .map_err(|e| Error::Visualization(Box::new(e)))?;

    tracing::debug!(record_id = %job.record_id, %uri, "artifact stored");
    Ok(uri)
  }

  /// Apply the record update and, once it has landed, drop the job.
  async fn resolve(
    &self,
    job: &VisualizationJob,
    attempts: u32,
    outcome: VisualizationOutcome,
    settled: JobOutcome,
  ) -> JobOutcome {
    let update = timed(
      "plan update",
      self.config.store_timeout(),
      self.store.resolve_visualization(job.record_id, outcome),
    )
    .await
    .and_then(|r| r.map_err(|e| Error::Persistence(Box::new(e))));

    match update {
      Ok(VisualizationUpdate::Applied) => {
        self.ack(job).await;
        tracing::info!(record_id = %job.record_id, ?settled, "visualization resolved");
        settled
      }
      Ok(VisualizationUpdate::AlreadyResolved(status)) => {
        self.ack(job).await;
        JobOutcome::AlreadyResolved(status)
      }
      Ok(VisualizationUpdate::NotFound) => self.orphan(job, attempts).await,
      Err(e) => {
        tracing::error!(
          record_id = %job.record_id,
          error = %e,
          "plan update failed; job left leased for redelivery"
        );
        JobOutcome::Stranded
      }
    }
  }

  async fn retry_later(&self, job: &VisualizationJob, attempts: u32, delay: Duration) -> JobOutcome {
    let released = timed(
      "job release",
      self.config.store_timeout(),
      self.queue.release(job.record_id, delay),
    )
    .await
    .and_then(|r| r.map_err(|e| Error::Queue(Box::new(e))));

    if let Err(e) = released {
      // The lease still expires on its own; the job is not lost.
      tracing::warn!(record_id = %job.record_id, error = %e, "job release failed");
    }
    JobOutcome::Retrying { attempt: attempts, delay }
  }

  async fn orphan(&self, job: &VisualizationJob, attempts: u32) -> JobOutcome {
    self.abandon(job, attempts, format!("record {} not found", job.record_id)).await;
    JobOutcome::Orphaned
  }

  /// Dead-letter a job and drop it from the queue. If the dead letter
  /// cannot be written the job stays leased and comes back.
  async fn abandon(&self, job: &VisualizationJob, attempts: u32, reason: String) {
    let payload = serde_json::to_value(job).unwrap_or(serde_json::Value::Null);
    let letter  = NewDeadLetter { stage: DeadLetterStage::Visualization, payload, reason, attempts };
    let written = timed("dead-letter write", self.config.store_timeout(), self.store.dead_letter(letter))
      .await
      .and_then(|r| r.map_err(|e| Error::Persistence(Box::new(e))));

    match written {
      Ok(_) => self.ack(job).await,
      Err(e) => tracing::error!(record_id = %job.record_id, error = %e, "dead-letter write failed"),
    }
  }

  async fn ack(&self, job: &VisualizationJob) {
    let acked = timed("job ack", self.config.store_timeout(), self.queue.ack(job.record_id))
      .await
      .and_then(|r| r.map_err(|e| Error::Queue(Box::new(e))));
    if let Err(e) = acked {
      // Harmless: the record is resolved, so a redelivered job is acked as
      // already resolved.
      tracing::warn!(record_id = %job.record_id, error = %e, "job ack failed");
    }
  }
}

/// Spawn `workers` polling tasks. Each sleeps `poll_interval` when the
/// queue is empty or unreachable, and exits once `shutdown` flips to `true`.
pub fn spawn_workers<S, Q, I, A>(
  worker: Arc<VisualizationWorker<S, Q, I, A>>,
  workers: usize,
  shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>>
where
  S: PlanStore + DeadLetterSink + 'static,
  Q: JobQueue + 'static,
  I: ImageClassifier + 'static,
  A: ArtifactStore + 'static,
{
  (0..workers.max(1))
    .map(|id| {
      let worker       = worker.clone();
      let mut shutdown = shutdown.clone();

      tokio::spawn(async move {
        tracing::debug!(worker = id, "visualization worker started");
        let idle = worker.config.poll_interval();
        loop {
          if *shutdown.borrow() {
            break;
          }
          match worker.poll_once().await {
            Ok(Some(outcome)) => {
              tracing::debug!(worker = id, ?outcome, "job settled");
              continue;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(worker = id, error = %e, "job queue poll failed"),
          }
          tokio::select! {
            changed = shutdown.changed() => {
              if changed.is_err() {
                break;
              }
            }
            _ = tokio::time::sleep(idle) => {}
          }
        }
        tracing::debug!(worker = id, "visualization worker stopped");
      })
    })
    .collect()
}
