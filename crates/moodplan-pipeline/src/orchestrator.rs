//! The orchestrator: consumes submissions, calls the cognition service,
//! persists a plan record and hands off a visualization job.
//!
//! Processing is idempotent per `(user_id, request_id)`. A redelivered
//! submission whose record already exists skips the cognition call and only
//! makes sure its visualization job is queued; concurrent redeliveries that
//! both reach the insert converge on the first record written.

use std::{sync::Arc, time::Duration};

use moodplan_core::{
  plan::{NewPlanRecord, PlanRecord},
  service::CognitionService,
  store::{
    DeadLetterSink, DeadLetterStage, JobQueue, NewDeadLetter, PlanStore, SubmissionQueue,
    VisualizationJob,
  },
  submission::Submission,
};
use tokio::{sync::watch, task::JoinHandle};
use uuid::Uuid;

use crate::{
  Error, PipelineConfig, Result,
  buffer::{Delivery, IngestionBuffer},
  retry::timed,
};

/// What processing a submission produced.
#[derive(Debug, Clone)]
pub struct Processed {
  pub record:   PlanRecord,
  /// `false` when the record already existed for this request.
  pub created:  bool,
  /// Whether a visualization job was (re)queued for the record.
  pub enqueued: bool,
}

/// How a delivery was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
  Created { record_id: Uuid, enqueued: bool },
  Duplicate { record_id: Uuid, enqueued: bool },
  Retrying { attempt: u32, delay: Duration },
  DeadLettered { reason: String },
  /// The dead-letter write failed; the delivery stays queued.
  Unsettled { reason: String },
}

pub struct Orchestrator<S, Q, C> {
  store:     S,
  queue:     Q,
  cognition: C,
  config:    PipelineConfig,
}

impl<S, Q, C> Orchestrator<S, Q, C>
where
  S: PlanStore + DeadLetterSink,
  Q: JobQueue,
  C: CognitionService,
{
  pub fn new(store: S, queue: Q, cognition: C, config: PipelineConfig) -> Self {
    Self { store, queue, cognition, config }
  }

  /// Analyse and persist one submission.
  ///
  /// Validation happens before any external call. A failure to enqueue the
  /// visualization job is logged and reported through
  /// [`Processed::enqueued`]; it never fails the submission.
  pub async fn process(&self, submission: &Submission) -> Result<Processed> {
    submission.validate()?;

    let existing = timed(
      "plan lookup",
      self.config.store_timeout(),
      self.store.find_by_request(&submission.user_id, &submission.request_id),
    )
    .await?
    .map_err(|e| Error::Persistence(Box::new(e)))?;

    if let Some(record) = existing {
      tracing::info!(
        record_id = %record.record_id,
        request_id = %submission.request_id,
        "submission already processed; skipping analysis"
      );
      let enqueued = record.visualization.is_pending() && self.enqueue(&record).await;
      return Ok(Processed { record, created: false, enqueued });
    }

    let analysis = timed(
      "cognition call",
      self.config.cognition_timeout(),
      self.cognition.analyze(&submission.text),
    )
    .await?
    .map_err(|e| Error::Upstream(e.to_string()))?;

    tracing::info!(
      request_id = %submission.request_id,
      emotion = %analysis.emotion,
      score = analysis.sentiment_score,
      fallback = analysis.is_fallback,
      "analysis complete"
    );

    let new = NewPlanRecord::new(
      &submission.user_id,
      &submission.request_id,
      &submission.text,
      analysis,
    );
    let outcome = timed(
      "plan write",
      self.config.store_timeout(),
      self.store.create_plan(new),
    )
    .await?
    .map_err(|e| Error::Persistence(Box::new(e)))?;

    let created = outcome.is_created();
    let record  = outcome.into_record();
    let enqueued = record.visualization.is_pending() && self.enqueue(&record).await;

    Ok(Processed { record, created, enqueued })
  }

  /// Best-effort hand-off to the visualization queue.
  async fn enqueue(&self, record: &PlanRecord) -> bool {
    let job = VisualizationJob::for_record(record);
    match timed("job enqueue", self.config.store_timeout(), self.queue.enqueue(job)).await {
      Ok(Ok(())) => true,
      Ok(Err(e)) => {
        tracing::warn!(
          record_id = %record.record_id,
          error = %e,
          "visualization enqueue failed; record stays pending"
        );
        false
      }
      Err(e) => {
        tracing::warn!(
          record_id = %record.record_id,
          error = %e,
          "visualization enqueue timed out; record stays pending"
        );
        false
      }
    }
  }

  /// Process a delivery and settle it: done, scheduled for redelivery, or
  /// dead-lettered. Never drops a submission silently.
  ///
  /// A delivery is acked only once its record exists or its dead letter is
  /// written. If settling fails the lease is left to lapse, which brings the
  /// delivery back.
  pub async fn handle<B>(&self, delivery: Delivery, buffer: &IngestionBuffer<B>) -> Outcome
  where
    B: SubmissionQueue,
  {
    let policy = self.config.ingest_retry();

    let outcome = match self.process(&delivery.submission).await {
      Ok(p) if p.created => Outcome::Created { record_id: p.record.record_id, enqueued: p.enqueued },
      Ok(p) => Outcome::Duplicate { record_id: p.record.record_id, enqueued: p.enqueued },
      Err(e) if e.is_retryable() && policy.should_retry(delivery.attempt) => {
        let delay = policy.delay_for(delivery.attempt);
        tracing::warn!(
          request_id = %delivery.submission.request_id,
          attempt = delivery.attempt,
          ?delay,
          error = %e,
          "submission failed; scheduling redelivery"
        );
        if let Err(e) = buffer.retry_after(&delivery, delay).await {
          tracing::warn!(
            request_id = %delivery.submission.request_id,
            error = %e,
            "could not reschedule delivery; it returns when its lease lapses"
          );
        }
        return Outcome::Retrying { attempt: delivery.attempt, delay };
      }
      Err(e) => {
        let reason = e.to_string();
        if !self.dead_letter(&delivery, &reason).await {
          return Outcome::Unsettled { reason };
        }
        Outcome::DeadLettered { reason }
      }
    };

    if let Err(e) = buffer.ack(&delivery).await {
      tracing::warn!(
        request_id = %delivery.submission.request_id,
        error = %e,
        "delivery ack failed; it will be redelivered"
      );
    }
    outcome
  }

  /// Whether the dead letter was written.
  async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> bool {
    let payload = match serde_json::to_value(&delivery.submission) {
      Ok(v) => v,
      Err(e) => serde_json::json!({ "unserializable": e.to_string() }),
    };
    let letter = NewDeadLetter {
      stage:    DeadLetterStage::Ingestion,
      payload:  payload.clone(),
      reason:   reason.to_owned(),
      attempts: delivery.attempt,
    };

    let written = timed(
      "dead-letter write",
      self.config.store_timeout(),
      self.store.dead_letter(letter),
    )
    .await;
    match written {
      Ok(Ok(_)) => true,
      Ok(Err(e)) => {
        tracing::error!(%payload, error = %e, reason, "dead-letter write failed");
        false
      }
      Err(e) => {
        tracing::error!(%payload, error = %e, reason, "dead-letter write timed out");
        false
      }
    }
  }
}

/// Spawn `workers` consumer tasks leasing deliveries from `buffer` until
/// `shutdown` flips to `true`.
///
/// A consumer finishes the delivery in hand before it stops. Anything still
/// queued stays in the buffer's store for the next start.
pub fn spawn_consumers<S, Q, C, B>(
  orchestrator: Arc<Orchestrator<S, Q, C>>,
  workers: usize,
  buffer: IngestionBuffer<B>,
  shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>>
where
  S: PlanStore + DeadLetterSink + 'static,
  Q: JobQueue + 'static,
  C: CognitionService + 'static,
  B: SubmissionQueue + Clone + 'static,
{
  let lease = orchestrator.config.ingest_lease();
  let idle  = orchestrator.config.poll_interval();

  (0..workers.max(1))
    .map(|worker| {
      let orchestrator = orchestrator.clone();
      let buffer       = buffer.clone();
      let mut shutdown = shutdown.clone();

      tokio::spawn(async move {
        tracing::debug!(worker, "orchestrator consumer started");
        loop {
          if *shutdown.borrow() {
            break;
          }

          let wait = match buffer.next(lease).await {
            Ok(Some(delivery)) => {
              let outcome = orchestrator.handle(delivery, &buffer).await;
              tracing::debug!(worker, ?outcome, "delivery settled");
              continue;
            }
            Ok(None) => buffer.wait_for_work(idle),
            Err(e) => {
              tracing::warn!(worker, error = %e, "ingestion claim failed");
              buffer.wait_for_work(idle)
            }
          };

          tokio::select! {
            changed = shutdown.changed() => {
              if changed.is_err() {
                break;
              }
            }
            _ = wait => {}
          }
        }
        tracing::debug!(worker, "orchestrator consumer stopped");
      })
    })
    .collect()
}
