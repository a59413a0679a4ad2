//! Storage traits: the canonical plan store, the durable submission queue,
//! the visualization job queue and the dead-letter sink.
//!
//! The traits are implemented by storage backends (e.g.
//! `moodplan-store-sqlite`). The pipeline and server crates depend on this
//! abstraction, not on any concrete backend.

use std::{future::Future, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  plan::{NewPlanRecord, PlanRecord, VisualizationOutcome, VisualizationUpdate},
  submission::Submission,
};

// ─── Plan creation ───────────────────────────────────────────────────────────

/// Result of [`PlanStore::create_plan`].
#[derive(Debug, Clone)]
pub enum CreateOutcome {
  /// A new record was written.
  Created(PlanRecord),
  /// A record for the same `(user_id, request_id)` already existed and was
  /// left untouched.
  Existing(PlanRecord),
}

impl CreateOutcome {
  pub fn record(&self) -> &PlanRecord {
    match self {
      Self::Created(r) | Self::Existing(r) => r,
    }
  }

  pub fn into_record(self) -> PlanRecord {
    match self {
      Self::Created(r) | Self::Existing(r) => r,
    }
  }

  pub fn is_created(&self) -> bool { matches!(self, Self::Created(_)) }
}

// ─── Jobs ────────────────────────────────────────────────────────────────────

/// Work item for the visualization worker. Keyed by `record_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualizationJob {
  pub record_id: Uuid,
  pub user_id:   String,
  pub emotion:   String,
}

impl VisualizationJob {
  pub fn for_record(record: &PlanRecord) -> Self {
    Self {
      record_id: record.record_id,
      user_id:   record.user_id.clone(),
      emotion:   record.emotion.clone(),
    }
  }
}

/// A job leased to one worker.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
  pub job:      VisualizationJob,
  /// Number of times this job has been claimed, including this one.
  pub attempts: u32,
}

/// A submission leased to one orchestrator consumer.
#[derive(Debug, Clone)]
pub struct ClaimedSubmission {
  pub submission: Submission,
  /// Number of times this submission has been claimed, including this one.
  pub attempts:   u32,
}

// ─── Dead letters ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeadLetterStage {
  Ingestion,
  Visualization,
}

impl DeadLetterStage {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Ingestion => "ingestion",
      Self::Visualization => "visualization",
    }
  }
}

#[derive(Debug, Clone)]
pub struct NewDeadLetter {
  pub stage:    DeadLetterStage,
  pub payload:  serde_json::Value,
  pub reason:   String,
  pub attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
  pub dead_letter_id: Uuid,
  pub stage:          DeadLetterStage,
  pub payload:        serde_json::Value,
  pub reason:         String,
  pub attempts:       u32,
  pub recorded_at:    DateTime<Utc>,
}

// ─── Traits ──────────────────────────────────────────────────────────────────

/// The canonical store of [`PlanRecord`]s.
///
/// Plan content is append-only. The visualization sub-state is the only
/// field ever updated, and only out of `pending`.
pub trait PlanStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Create a record unless one already exists for
  /// `(new.user_id, new.request_id)`. Never overwrites.
  ///
  /// The store assigns `record_id` and a `timestamp` strictly greater than
  /// any existing timestamp for the same user.
  fn create_plan(
    &self,
    new: NewPlanRecord,
  ) -> impl Future<Output = Result<CreateOutcome, Self::Error>> + Send + '_;

  /// Look up the record created for a given submission, if any.
  fn find_by_request<'a>(
    &'a self,
    user_id: &'a str,
    request_id: &'a str,
  ) -> impl Future<Output = Result<Option<PlanRecord>, Self::Error>> + Send + 'a;

  fn get_plan(
    &self,
    record_id: Uuid,
  ) -> impl Future<Output = Result<Option<PlanRecord>, Self::Error>> + Send + '_;

  /// All records for `user_id`, most recent first, at most `limit`.
  fn list_plans<'a>(
    &'a self,
    user_id: &'a str,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<PlanRecord>, Self::Error>> + Send + 'a;

  /// Move a record's visualization out of `pending`. A record that is
  /// already resolved is left as is.
  fn resolve_visualization(
    &self,
    record_id: Uuid,
    outcome: VisualizationOutcome,
  ) -> impl Future<Output = Result<VisualizationUpdate, Self::Error>> + Send + '_;
}

/// Durable queue of accepted [`Submission`]s, keyed by
/// `(user_id, request_id)`.
///
/// Same lease semantics as [`JobQueue`]: a claimed submission stays stored
/// until [`SubmissionQueue::ack_submission`], so neither a restart nor a crash loses an
/// acknowledged submission.
pub trait SubmissionQueue: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Store a submission. Returns `false` when the same
  /// `(user_id, request_id)` is already queued.
  fn push(
    &self,
    submission: Submission,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Lease the oldest available submission for `lease`.
  fn claim_submission(
    &self,
    lease: Duration,
  ) -> impl Future<Output = Result<Option<ClaimedSubmission>, Self::Error>> + Send + '_;

  /// Remove a submission for good.
  fn ack_submission<'a>(
    &'a self,
    user_id: &'a str,
    request_id: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Give a leased submission back, visible again after `delay`.
  fn release_submission<'a>(
    &'a self,
    user_id: &'a str,
    request_id: &'a str,
    delay: Duration,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Submissions stored, leased or not.
  fn backlog(&self) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;
}

/// Durable queue of [`VisualizationJob`]s with lease semantics.
///
/// A claimed job stays in the queue, invisible until its lease runs out,
/// and is removed only by [`JobQueue::ack`].
pub trait JobQueue: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Add a job. Enqueueing a `record_id` that is already queued is a no-op.
  fn enqueue(
    &self,
    job: VisualizationJob,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Lease the oldest available job for `lease`.
  fn claim(
    &self,
    lease: Duration,
  ) -> impl Future<Output = Result<Option<ClaimedJob>, Self::Error>> + Send + '_;

  /// Remove a job for good.
  fn ack(
    &self,
    record_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Give a leased job back, visible again after `delay`.
  fn release(
    &self,
    record_id: Uuid,
    delay: Duration,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Number of jobs in the queue, leased or not.
  fn depth(&self) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;
}

/// Terminal destination for work that exhausted its retry budget.
pub trait DeadLetterSink: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn dead_letter(
    &self,
    letter: NewDeadLetter,
  ) -> impl Future<Output = Result<DeadLetter, Self::Error>> + Send + '_;

  /// Most recent first.
  fn list_dead_letters(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<DeadLetter>, Self::Error>> + Send + '_;
}
