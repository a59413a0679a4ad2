//! [`SqliteStore`]: the SQLite implementation of [`PlanStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use moodplan_core::{
  plan::{NewPlanRecord, PlanRecord, VisualizationOutcome, VisualizationStatus, VisualizationUpdate},
  store::{CreateOutcome, PlanStore},
};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use crate::{
  Result,
  encode::{PLAN_COLUMNS, RawPlan, decode_dt, encode_dt, encode_plan, encode_uuid},
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// Plans, queued submissions, visualization jobs and dead letters backed by
/// a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

/// The next sort key for a user: `now`, or one microsecond past the newest
/// existing key when the clock has not moved forward.
fn next_timestamp(
  now: DateTime<Utc>,
  last: Option<&str>,
) -> std::result::Result<DateTime<Utc>, crate::Error> {
  let Some(last) = last else { return Ok(now) };
  let last = decode_dt(last)?;
  let floor = last + chrono::Duration::microseconds(1);
  Ok(now.max(floor))
}

// ─── PlanStore impl ──────────────────────────────────────────────────────────

impl PlanStore for SqliteStore {
  type Error = crate::Error;

  async fn create_plan(&self, new: NewPlanRecord) -> Result<CreateOutcome> {
    let record_id_str = encode_uuid(Uuid::new_v4());
    let plan_json     = encode_plan(&new.analysis.weekly_plan)?;
    let now           = Utc::now();

    let (inserted, raw): (bool, RawPlan) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let last: Option<String> = tx.query_row(
          "SELECT MAX(ts) FROM plans WHERE user_id = ?1",
          rusqlite::params![new.user_id],
          |r| r.get(0),
        )?;
        let ts = next_timestamp(now, last.as_deref())
          .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;

        let changed = tx.execute(
          "INSERT INTO plans (
             record_id, user_id, ts, request_id, user_text, emotion,
             sentiment_score, weekly_plan, is_fallback, created_at, viz_status
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'pending')
           ON CONFLICT (user_id, request_id) DO NOTHING",
          rusqlite::params![
            record_id_str,
            new.user_id,
            encode_dt(ts),
            new.request_id,
            new.user_text,
            new.analysis.emotion,
            new.analysis.sentiment_score,
            plan_json,
            new.analysis.is_fallback,
            encode_dt(now),
          ],
        )?;

        let raw = tx.query_row(
          &format!(
            "SELECT {PLAN_COLUMNS} FROM plans WHERE user_id = ?1 AND request_id = ?2"
          ),
          rusqlite::params![new.user_id, new.request_id],
          RawPlan::from_row,
        )?;

        tx.commit()?;
        Ok((changed == 1, raw))
      })
      .await?;

    let record = raw.into_record()?;
    if inserted {
      tracing::debug!(record_id = %record.record_id, user_id = %record.user_id, "plan created");
      Ok(CreateOutcome::Created(record))
    } else {
      tracing::debug!(record_id = %record.record_id, "plan already exists for request");
      Ok(CreateOutcome::Existing(record))
    }
  }

  async fn find_by_request<'a>(
    &'a self,
    user_id: &'a str,
    request_id: &'a str,
  ) -> Result<Option<PlanRecord>> {
    let user_id    = user_id.to_owned();
    let request_id = request_id.to_owned();

    let raw: Option<RawPlan> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {PLAN_COLUMNS} FROM plans WHERE user_id = ?1 AND request_id = ?2"
              ),
              rusqlite::params![user_id, request_id],
              RawPlan::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawPlan::into_record).transpose()
  }

  async fn get_plan(&self, record_id: Uuid) -> Result<Option<PlanRecord>> {
    let id_str = encode_uuid(record_id);

    let raw: Option<RawPlan> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {PLAN_COLUMNS} FROM plans WHERE record_id = ?1"),
              rusqlite::params![id_str],
              RawPlan::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawPlan::into_record).transpose()
  }

  async fn list_plans<'a>(&'a self, user_id: &'a str, limit: usize) -> Result<Vec<PlanRecord>> {
    let user_id   = user_id.to_owned();
    let limit_val = i64::try_from(limit).unwrap_or(i64::MAX);

    let raws: Vec<RawPlan> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {PLAN_COLUMNS} FROM plans
           WHERE user_id = ?1
           ORDER BY ts DESC
           LIMIT ?2"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![user_id, limit_val], RawPlan::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawPlan::into_record).collect()
  }

  async fn resolve_visualization(
    &self,
    record_id: Uuid,
    outcome: VisualizationOutcome,
  ) -> Result<VisualizationUpdate> {
    let id_str = encode_uuid(record_id);
    let at_str = encode_dt(Utc::now());
    let (status, artifact_ref, error) = match outcome {
      VisualizationOutcome::Completed { artifact_ref } => {
        (VisualizationStatus::Completed, Some(artifact_ref), None)
      }
      VisualizationOutcome::Failed { reason } => (VisualizationStatus::Failed, None, Some(reason)),
    };
    let status_str = status.as_str();

    let (changed, current): (usize, Option<String>) = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "UPDATE plans
           SET viz_status = ?2, viz_artifact_ref = ?3, viz_error = ?4, viz_resolved_at = ?5
           WHERE record_id = ?1 AND viz_status = 'pending'",
          rusqlite::params![id_str, status_str, artifact_ref, error, at_str],
        )?;
        if changed > 0 {
          return Ok((changed, None));
        }
        let current: Option<String> = conn
          .query_row(
            "SELECT viz_status FROM plans WHERE record_id = ?1",
            rusqlite::params![id_str],
            |r| r.get(0),
          )
          .optional()?;
        Ok((changed, current))
      })
      .await?;

    if changed > 0 {
      return Ok(VisualizationUpdate::Applied);
    }
    match current {
      Some(s) => Ok(VisualizationUpdate::AlreadyResolved(VisualizationStatus::parse(&s)?)),
      None => Ok(VisualizationUpdate::NotFound),
    }
  }
}
