//! Integration tests for `SqliteStore` against an in-memory database.

use std::time::Duration;

use moodplan_core::{
  plan::{
    Analysis, DayPlan, NewPlanRecord, VisualizationOutcome, VisualizationStatus,
    VisualizationUpdate,
  },
  store::{
    DeadLetterSink, DeadLetterStage, JobQueue, NewDeadLetter, PlanStore, SubmissionQueue,
    VisualizationJob,
  },
  submission::Submission,
};
use uuid::Uuid;

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn five_day_plan() -> Vec<DayPlan> {
  ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday"]
    .iter()
    .map(|day| DayPlan {
      day:       day.to_string(),
      tasks:     vec![format!("{day} deep work"), "Stretch".into()],
      focus:     Some("Deadlines".into()),
      self_care: Some("Evening walk".into()),
    })
    .collect()
}

fn new_plan(user: &str, request: &str) -> NewPlanRecord {
  NewPlanRecord::new(
    user,
    request,
    "I am stressed about deadlines",
    Analysis {
      emotion:         "stressed".into(),
      sentiment_score: 35,
      weekly_plan:     five_day_plan(),
      is_fallback:     false,
    },
  )
}

// ─── Plans ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_and_get_plan_roundtrip() {
  let s = store().await;

  let outcome = s.create_plan(new_plan("user1", "req-1")).await.unwrap();
  assert!(outcome.is_created());
  let created = outcome.into_record();
  assert_eq!(created.visualization.status, VisualizationStatus::Pending);
  assert!(created.visualization.artifact_ref.is_none());

  let fetched = s.get_plan(created.record_id).await.unwrap().unwrap();
  assert_eq!(fetched.emotion, "stressed");
  assert_eq!(fetched.sentiment_score, 35);
  assert_eq!(fetched.weekly_plan, five_day_plan());
  assert_eq!(fetched.timestamp, created.timestamp);
}

#[tokio::test]
async fn get_plan_missing_returns_none() {
  let s = store().await;
  assert!(s.get_plan(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn create_is_idempotent_per_request() {
  let s = store().await;

  let first  = s.create_plan(new_plan("user1", "req-1")).await.unwrap();
  let second = s.create_plan(new_plan("user1", "req-1")).await.unwrap();

  assert!(first.is_created());
  assert!(!second.is_created());
  assert_eq!(first.record().record_id, second.record().record_id);
  assert_eq!(s.list_plans("user1", 50).await.unwrap().len(), 1);
}

#[tokio::test]
async fn same_request_id_for_different_users_is_distinct() {
  let s = store().await;
  s.create_plan(new_plan("alice", "req-1")).await.unwrap();
  let bob = s.create_plan(new_plan("bob", "req-1")).await.unwrap();
  assert!(bob.is_created());
}

#[tokio::test]
async fn find_by_request() {
  let s = store().await;
  let created = s.create_plan(new_plan("user1", "req-1")).await.unwrap().into_record();

  let found = s.find_by_request("user1", "req-1").await.unwrap().unwrap();
  assert_eq!(found.record_id, created.record_id);
  assert!(s.find_by_request("user1", "req-2").await.unwrap().is_none());
  assert!(s.find_by_request("user2", "req-1").await.unwrap().is_none());
}

#[tokio::test]
async fn timestamps_are_strictly_increasing_per_user() {
  let s = store().await;
  let mut last = None;
  for i in 0..20 {
    let r = s
      .create_plan(new_plan("user1", &format!("req-{i}")))
      .await
      .unwrap()
      .into_record();
    if let Some(prev) = last {
      assert!(r.timestamp > prev, "timestamp did not advance");
    }
    last = Some(r.timestamp);
  }
}

#[tokio::test]
async fn list_plans_most_recent_first_with_limit() {
  let s = store().await;
  for i in 0..5 {
    s.create_plan(new_plan("user1", &format!("req-{i}"))).await.unwrap();
  }
  s.create_plan(new_plan("someone-else", "req-0")).await.unwrap();

  let all = s.list_plans("user1", 50).await.unwrap();
  assert_eq!(all.len(), 5);
  assert!(all.windows(2).all(|w| w[0].timestamp > w[1].timestamp));
  assert_eq!(all[0].request_id, "req-4");

  let two = s.list_plans("user1", 2).await.unwrap();
  assert_eq!(two.len(), 2);
  assert_eq!(two[0].record_id, all[0].record_id);

  assert!(s.list_plans("nobody", 10).await.unwrap().is_empty());
}

// ─── Visualization sub-state ─────────────────────────────────────────────────

#[tokio::test]
async fn resolve_completed_sets_artifact_ref() {
  let s = store().await;
  let r = s.create_plan(new_plan("user1", "req-1")).await.unwrap().into_record();

  let update = s
    .resolve_visualization(
      r.record_id,
      VisualizationOutcome::Completed { artifact_ref: "file:///a.txt".into() },
    )
    .await
    .unwrap();
  assert_eq!(update, VisualizationUpdate::Applied);

  let fetched = s.get_plan(r.record_id).await.unwrap().unwrap();
  assert_eq!(fetched.visualization.status, VisualizationStatus::Completed);
  assert_eq!(fetched.visualization.artifact_ref.as_deref(), Some("file:///a.txt"));
  assert!(fetched.visualization.resolved_at.is_some());
  assert_eq!(fetched.weekly_plan, r.weekly_plan);
}

#[tokio::test]
async fn visualization_is_resolved_at_most_once() {
  let s = store().await;
  let r = s.create_plan(new_plan("user1", "req-1")).await.unwrap().into_record();

  s.resolve_visualization(r.record_id, VisualizationOutcome::Failed { reason: "boom".into() })
    .await
    .unwrap();
  let second = s
    .resolve_visualization(
      r.record_id,
      VisualizationOutcome::Completed { artifact_ref: "file:///late.txt".into() },
    )
    .await
    .unwrap();
  assert_eq!(second, VisualizationUpdate::AlreadyResolved(VisualizationStatus::Failed));

  let fetched = s.get_plan(r.record_id).await.unwrap().unwrap();
  assert_eq!(fetched.visualization.status, VisualizationStatus::Failed);
  assert_eq!(fetched.visualization.error.as_deref(), Some("boom"));
  assert!(fetched.visualization.artifact_ref.is_none());
}

#[tokio::test]
async fn resolve_missing_record_is_not_found() {
  let s = store().await;
  let update = s
    .resolve_visualization(Uuid::new_v4(), VisualizationOutcome::Failed { reason: "x".into() })
    .await
    .unwrap();
  assert_eq!(update, VisualizationUpdate::NotFound);
}

// ─── Job queue ───────────────────────────────────────────────────────────────

fn job(record_id: Uuid) -> VisualizationJob {
  VisualizationJob { record_id, user_id: "user1".into(), emotion: "sad".into() }
}

#[tokio::test]
async fn enqueue_is_idempotent() {
  let s  = store().await;
  let id = Uuid::new_v4();
  s.enqueue(job(id)).await.unwrap();
  s.enqueue(job(id)).await.unwrap();
  assert_eq!(s.depth().await.unwrap(), 1);
}

#[tokio::test]
async fn claimed_job_is_invisible_until_lease_expires() {
  let s  = store().await;
  let id = Uuid::new_v4();
  s.enqueue(job(id)).await.unwrap();

  let claimed = s.claim(Duration::from_secs(60)).await.unwrap().unwrap();
  assert_eq!(claimed.job.record_id, id);
  assert_eq!(claimed.attempts, 1);

  assert!(s.claim(Duration::from_secs(60)).await.unwrap().is_none());
  assert_eq!(s.depth().await.unwrap(), 1, "claimed job stays queued until ack");
}

#[tokio::test]
async fn expired_lease_is_redelivered_with_higher_attempt() {
  let s  = store().await;
  let id = Uuid::new_v4();
  s.enqueue(job(id)).await.unwrap();

  s.claim(Duration::ZERO).await.unwrap().unwrap();
  let again = s.claim(Duration::ZERO).await.unwrap().unwrap();
  assert_eq!(again.job.record_id, id);
  assert_eq!(again.attempts, 2);
}

#[tokio::test]
async fn release_and_ack() {
  let s  = store().await;
  let id = Uuid::new_v4();
  s.enqueue(job(id)).await.unwrap();

  s.claim(Duration::from_secs(60)).await.unwrap().unwrap();
  s.release(id, Duration::ZERO).await.unwrap();
  let again = s.claim(Duration::from_secs(60)).await.unwrap().unwrap();
  assert_eq!(again.attempts, 2);

  s.ack(id).await.unwrap();
  assert_eq!(s.depth().await.unwrap(), 0);
  assert!(s.claim(Duration::ZERO).await.unwrap().is_none());
}

#[tokio::test]
async fn jobs_are_claimed_oldest_first() {
  let s = store().await;
  let first  = Uuid::new_v4();
  let second = Uuid::new_v4();
  s.enqueue(job(first)).await.unwrap();
  tokio::time::sleep(Duration::from_millis(2)).await;
  s.enqueue(job(second)).await.unwrap();

  let a = s.claim(Duration::from_secs(60)).await.unwrap().unwrap();
  let b = s.claim(Duration::from_secs(60)).await.unwrap().unwrap();
  assert_eq!(a.job.record_id, first);
  assert_eq!(b.job.record_id, second);
}

// ─── Submission queue ────────────────────────────────────────────────────────

fn accepted(request_id: &str) -> Submission {
  Submission::new(request_id.into(), "user1".into(), "feeling anxious".into())
}

#[tokio::test]
async fn push_is_idempotent_per_request() {
  let s = store().await;
  assert!(s.push(accepted("req-1")).await.unwrap());
  assert!(!s.push(accepted("req-1")).await.unwrap());
  assert!(s.push(Submission::new("req-1".into(), "user2".into(), "hi".into())).await.unwrap());
  assert_eq!(s.backlog().await.unwrap(), 2);
}

#[tokio::test]
async fn claimed_submission_keeps_its_content_and_stays_stored() {
  let s = store().await;
  let sub = accepted("req-1");
  s.push(sub.clone()).await.unwrap();

  let claimed = s.claim_submission(Duration::from_secs(60)).await.unwrap().unwrap();
  assert_eq!(claimed.attempts, 1);
  assert_eq!(claimed.submission.request_id, sub.request_id);
  assert_eq!(claimed.submission.text, sub.text);
  assert_eq!(
    claimed.submission.submitted_at.timestamp_micros(),
    sub.submitted_at.timestamp_micros()
  );

  assert!(s.claim_submission(Duration::from_secs(60)).await.unwrap().is_none());
  assert_eq!(s.backlog().await.unwrap(), 1, "claimed submission stays until ack");
}

#[tokio::test]
async fn released_submission_comes_back_after_delay() {
  let s = store().await;
  s.push(accepted("req-1")).await.unwrap();
  s.claim_submission(Duration::from_secs(60)).await.unwrap().unwrap();

  s.release_submission("user1", "req-1", Duration::from_secs(60)).await.unwrap();
  assert!(s.claim_submission(Duration::from_secs(60)).await.unwrap().is_none());

  s.release_submission("user1", "req-1", Duration::ZERO).await.unwrap();
  let again = s.claim_submission(Duration::from_secs(60)).await.unwrap().unwrap();
  assert_eq!(again.attempts, 2);

  s.ack_submission("user1", "req-1").await.unwrap();
  assert_eq!(s.backlog().await.unwrap(), 0);
}

#[tokio::test]
async fn queued_submissions_survive_reopen() {
  let dir  = tempfile::tempdir().unwrap();
  let path = dir.path().join("moodplan.db");

  {
    let s = SqliteStore::open(&path).await.unwrap();
    s.push(accepted("req-1")).await.unwrap();
    s.push(accepted("req-2")).await.unwrap();
    // Leased but never settled, as if the process died mid-call.
    s.claim_submission(Duration::ZERO).await.unwrap().unwrap();
  }

  let reopened = SqliteStore::open(&path).await.unwrap();
  assert_eq!(reopened.backlog().await.unwrap(), 2);
  let first = reopened.claim_submission(Duration::from_secs(60)).await.unwrap().unwrap();
  let second = reopened.claim_submission(Duration::from_secs(60)).await.unwrap().unwrap();
  let mut ids = [first.submission.request_id, second.submission.request_id];
  ids.sort();
  assert_eq!(ids, ["req-1".to_owned(), "req-2".to_owned()]);
}

// ─── Dead letters ────────────────────────────────────────────────────────────

#[tokio::test]
async fn dead_letters_roundtrip() {
  let s = store().await;
  s.dead_letter(NewDeadLetter {
    stage:    DeadLetterStage::Ingestion,
    payload:  serde_json::json!({ "user_id": "user1", "text": "hi" }),
    reason:   "cognition service unavailable".into(),
    attempts: 3,
  })
  .await
  .unwrap();

  let letters = s.list_dead_letters(10).await.unwrap();
  assert_eq!(letters.len(), 1);
  assert_eq!(letters[0].stage, DeadLetterStage::Ingestion);
  assert_eq!(letters[0].attempts, 3);
  assert_eq!(letters[0].payload["user_id"], "user1");
}
