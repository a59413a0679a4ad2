//! The ingestion buffer: admission's hand-off to the orchestrator pool.
//!
//! Accepted submissions are written to a durable [`SubmissionQueue`] before
//! admission answers `202`, so a restart or crash never loses one. Consumers
//! lease deliveries out of the queue and settle each one with
//! [`IngestionBuffer::ack`] or [`IngestionBuffer::retry_after`]; a consumer
//! that dies mid-delivery lets the lease lapse and the delivery comes back.
//!
//! Publishing waits while `capacity` submissions are stored, so bursts push
//! back on the HTTP handlers instead of growing the backlog without bound.

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};

use moodplan_core::{store::SubmissionQueue, submission::Submission};
use serde::Serialize;
use tokio::sync::Notify;

use crate::{Error, Result};

/// Publishers blocked on a full buffer re-check at least this often.
const RECHECK: Duration = Duration::from_millis(50);

/// One delivery of a submission. `attempt` starts at 1.
#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
  pub submission: Submission,
  pub attempt:    u32,
}

#[derive(Default)]
struct Signals {
  arrived: Notify,
  drained: Notify,
  closed:  AtomicBool,
}

/// Cheap to clone; clones share the queue and the wake-up signals.
#[derive(Clone)]
pub struct IngestionBuffer<Q> {
  queue:    Q,
  capacity: usize,
  signals:  Arc<Signals>,
}

fn queue_err(e: impl std::error::Error + Send + Sync + 'static) -> Error {
  Error::Queue(Box::new(e))
}

impl<Q: SubmissionQueue> IngestionBuffer<Q> {
  pub fn new(queue: Q, capacity: usize) -> Self {
    Self { queue, capacity: capacity.max(1), signals: Arc::default() }
  }

  /// Durably accept a submission for processing.
  ///
  /// Publishing a `(user_id, request_id)` that is still queued is a no-op.
  pub async fn publish(&self, submission: Submission) -> Result<()> {
    loop {
      if self.is_closed() {
        return Err(Error::BufferClosed);
      }
      if self.backlog().await? < self.capacity {
        break;
      }
      let _ = tokio::time::timeout(RECHECK, self.signals.drained.notified()).await;
    }

    let request_id = submission.request_id.clone();
    let fresh = self.queue.push(submission).await.map_err(queue_err)?;
    if fresh {
      self.signals.arrived.notify_one();
    } else {
      tracing::debug!(%request_id, "submission already queued");
    }
    Ok(())
  }

  /// Lease the next available delivery for `lease`.
  pub async fn next(&self, lease: Duration) -> Result<Option<Delivery>> {
    let claimed = self.queue.claim_submission(lease).await.map_err(queue_err)?;
    Ok(claimed.map(|c| Delivery { submission: c.submission, attempt: c.attempts }))
  }

  /// Settle a delivery for good: its plan exists or it was dead-lettered.
  pub async fn ack(&self, delivery: &Delivery) -> Result<()> {
    let s = &delivery.submission;
    self.queue.ack_submission(&s.user_id, &s.request_id).await.map_err(queue_err)?;
    self.signals.drained.notify_waiters();
    Ok(())
  }

  /// Make a delivery available again after `delay`, as its next attempt.
  pub async fn retry_after(&self, delivery: &Delivery, delay: Duration) -> Result<()> {
    let s = &delivery.submission;
    self
      .queue
      .release_submission(&s.user_id, &s.request_id, delay)
      .await
      .map_err(queue_err)
  }

  /// Wait until something is published, at most `max`.
  pub async fn wait_for_work(&self, max: Duration) {
    let _ = tokio::time::timeout(max, self.signals.arrived.notified()).await;
  }

  /// Stop accepting submissions. Stored ones stay queued for the next start.
  pub fn close(&self) {
    self.signals.closed.store(true, Ordering::SeqCst);
    self.signals.drained.notify_waiters();
    self.signals.arrived.notify_waiters();
  }

  pub fn is_closed(&self) -> bool { self.signals.closed.load(Ordering::SeqCst) }

  /// Submissions stored and not yet settled, leased or not.
  pub async fn backlog(&self) -> Result<usize> { self.queue.backlog().await.map_err(queue_err) }
}

#[cfg(test)]
mod tests {
  use moodplan_store_sqlite::SqliteStore;

  use super::*;

  const LEASE: Duration = Duration::from_secs(60);

  fn submission(request_id: &str, text: &str) -> Submission {
    Submission::new(request_id.into(), "user1".into(), text.into())
  }

  async fn buffer(capacity: usize) -> IngestionBuffer<SqliteStore> {
    IngestionBuffer::new(SqliteStore::open_in_memory().await.unwrap(), capacity)
  }

  #[tokio::test]
  async fn deliveries_arrive_in_order_with_attempt_one() {
    let buffer = buffer(4).await;
    buffer.publish(submission("a", "first")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;
    buffer.publish(submission("b", "second")).await.unwrap();
    assert_eq!(buffer.backlog().await.unwrap(), 2);

    let a = buffer.next(LEASE).await.unwrap().unwrap();
    let b = buffer.next(LEASE).await.unwrap().unwrap();
    assert_eq!((a.submission.text.as_str(), a.attempt), ("first", 1));
    assert_eq!(b.submission.text, "second");
    assert!(buffer.next(LEASE).await.unwrap().is_none());

    buffer.ack(&a).await.unwrap();
    buffer.ack(&b).await.unwrap();
    assert_eq!(buffer.backlog().await.unwrap(), 0);
  }

  #[tokio::test]
  async fn retry_bumps_attempt() {
    let buffer = buffer(4).await;
    buffer.publish(submission("a", "first")).await.unwrap();
    let first = buffer.next(LEASE).await.unwrap().unwrap();

    buffer.retry_after(&first, Duration::ZERO).await.unwrap();
    let second = buffer.next(LEASE).await.unwrap().unwrap();
    assert_eq!(second.attempt, 2);
    assert_eq!(second.submission.text, "first");
  }

  #[tokio::test]
  async fn full_buffer_holds_publisher_until_drained() {
    let buffer = buffer(1).await;
    buffer.publish(submission("a", "first")).await.unwrap();

    let blocked = {
      let buffer = buffer.clone();
      tokio::spawn(async move { buffer.publish(submission("b", "second")).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!blocked.is_finished());

    let a = buffer.next(LEASE).await.unwrap().unwrap();
    buffer.ack(&a).await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), blocked)
      .await
      .unwrap()
      .unwrap()
      .unwrap();
    assert_eq!(buffer.backlog().await.unwrap(), 1);
  }

  #[tokio::test]
  async fn publish_after_close_fails_and_keeps_backlog() {
    let buffer = buffer(4).await;
    buffer.publish(submission("a", "first")).await.unwrap();
    buffer.close();

    assert!(matches!(buffer.publish(submission("b", "second")).await, Err(Error::BufferClosed)));
    assert_eq!(buffer.backlog().await.unwrap(), 1);
  }
}
