//! [`SubmissionQueue`], [`JobQueue`] and [`DeadLetterSink`] on top of
//! [`SqliteStore`].
//!
//! Both queues are leased rather than popped: a claim pushes `available_at`
//! into the future, so a consumer that dies mid-item simply lets the lease
//! run out and the item becomes claimable again. A backoff is the same
//! thing with a chosen delay.

use std::time::Duration;

use chrono::Utc;
use moodplan_core::{
  store::{
    ClaimedJob, ClaimedSubmission, DeadLetter, DeadLetterSink, JobQueue, NewDeadLetter,
    SubmissionQueue, VisualizationJob,
  },
  submission::Submission,
};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use crate::{
  Error, Result, SqliteStore,
  encode::{RawDeadLetter, add_std, decode_dt, decode_uuid, encode_dt, encode_uuid},
};

fn claim_count(stored: i64) -> Result<u32> {
  u32::try_from(stored + 1).map_err(|_| Error::Decode(format!("bad attempt count: {stored}")))
}

// ─── SubmissionQueue impl ────────────────────────────────────────────────────

impl SubmissionQueue for SqliteStore {
  type Error = Error;

  async fn push(&self, submission: Submission) -> Result<bool> {
    let submitted = encode_dt(submission.submitted_at);
    let now       = encode_dt(Utc::now());

    let inserted = self
      .conn
      .call(move |conn| {
        let n = conn.execute(
          "INSERT INTO ingest_queue
             (user_id, request_id, user_text, submitted_at, attempts, available_at, enqueued_at)
           VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)
           ON CONFLICT (user_id, request_id) DO NOTHING",
          rusqlite::params![
            submission.user_id,
            submission.request_id,
            submission.text,
            submitted,
            now
          ],
        )?;
        Ok(n)
      })
      .await?;
    Ok(inserted == 1)
  }

  async fn claim_submission(&self, lease: Duration) -> Result<Option<ClaimedSubmission>> {
    let now       = Utc::now();
    let now_str   = encode_dt(now);
    let until_str = encode_dt(add_std(now, lease));

    let row: Option<(String, String, String, String, i64)> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let row: Option<(String, String, String, String, i64)> = tx
          .query_row(
            "SELECT user_id, request_id, user_text, submitted_at, attempts
             FROM ingest_queue
             WHERE available_at <= ?1
             ORDER BY available_at, enqueued_at
             LIMIT 1",
            rusqlite::params![now_str],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
          )
          .optional()?;

        if let Some((user_id, request_id, ..)) = &row {
          tx.execute(
            "UPDATE ingest_queue
             SET attempts = attempts + 1, available_at = ?3
             WHERE user_id = ?1 AND request_id = ?2",
            rusqlite::params![user_id, request_id, until_str],
          )?;
        }
        tx.commit()?;
        Ok(row)
      })
      .await?;

    let Some((user_id, request_id, text, submitted_at, attempts)) = row else {
      return Ok(None);
    };

    Ok(Some(ClaimedSubmission {
      submission: Submission {
        request_id,
        user_id,
        text,
        submitted_at: decode_dt(&submitted_at)?,
      },
      attempts:   claim_count(attempts)?,
    }))
  }

  async fn ack_submission(&self, user_id: &str, request_id: &str) -> Result<()> {
    let (user_id, request_id) = (user_id.to_owned(), request_id.to_owned());
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM ingest_queue WHERE user_id = ?1 AND request_id = ?2",
          rusqlite::params![user_id, request_id],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn release_submission(
    &self,
    user_id: &str,
    request_id: &str,
    delay: Duration,
  ) -> Result<()> {
    let (user_id, request_id) = (user_id.to_owned(), request_id.to_owned());
    let until_str = encode_dt(add_std(Utc::now(), delay));
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE ingest_queue SET available_at = ?3 WHERE user_id = ?1 AND request_id = ?2",
          rusqlite::params![user_id, request_id, until_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn backlog(&self) -> Result<usize> {
    let count: i64 = self
      .conn
      .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM ingest_queue", [], |r| r.get(0))?))
      .await?;
    Ok(usize::try_from(count).unwrap_or(0))
  }
}

// ─── JobQueue impl ───────────────────────────────────────────────────────────

impl JobQueue for SqliteStore {
  type Error = Error;

  async fn enqueue(&self, job: VisualizationJob) -> Result<()> {
    let id_str = encode_uuid(job.record_id);
    let now    = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO visualization_jobs
             (record_id, user_id, emotion, attempts, available_at, enqueued_at)
           VALUES (?1, ?2, ?3, 0, ?4, ?4)
           ON CONFLICT (record_id) DO NOTHING",
          rusqlite::params![id_str, job.user_id, job.emotion, now],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn claim(&self, lease: Duration) -> Result<Option<ClaimedJob>> {
    let now       = Utc::now();
    let now_str   = encode_dt(now);
    let until_str = encode_dt(add_std(now, lease));

    let row: Option<(String, String, String, i64)> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let row: Option<(String, String, String, i64)> = tx
          .query_row(
            "SELECT record_id, user_id, emotion, attempts
             FROM visualization_jobs
             WHERE available_at <= ?1
             ORDER BY available_at, enqueued_at
             LIMIT 1",
            rusqlite::params![now_str],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
          )
          .optional()?;

        if let Some((record_id, ..)) = &row {
          tx.execute(
            "UPDATE visualization_jobs
             SET attempts = attempts + 1, available_at = ?2
             WHERE record_id = ?1",
            rusqlite::params![record_id, until_str],
          )?;
        }
        tx.commit()?;
        Ok(row)
      })
      .await?;

    let Some((record_id, user_id, emotion, attempts)) = row else {
      return Ok(None);
    };

    Ok(Some(ClaimedJob {
      job:      VisualizationJob { record_id: decode_uuid(&record_id)?, user_id, emotion },
      attempts: claim_count(attempts)?,
    }))
  }

  async fn ack(&self, record_id: Uuid) -> Result<()> {
    let id_str = encode_uuid(record_id);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM visualization_jobs WHERE record_id = ?1",
          rusqlite::params![id_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn release(&self, record_id: Uuid, delay: Duration) -> Result<()> {
    let id_str    = encode_uuid(record_id);
    let until_str = encode_dt(add_std(Utc::now(), delay));
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE visualization_jobs SET available_at = ?2 WHERE record_id = ?1",
          rusqlite::params![id_str, until_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn depth(&self) -> Result<usize> {
    let count: i64 = self
      .conn
      .call(|conn| {
        Ok(conn.query_row("SELECT COUNT(*) FROM visualization_jobs", [], |r| r.get(0))?)
      })
      .await?;
    Ok(usize::try_from(count).unwrap_or(0))
  }
}

// ─── DeadLetterSink impl ─────────────────────────────────────────────────────

impl DeadLetterSink for SqliteStore {
  type Error = Error;

  async fn dead_letter(&self, letter: NewDeadLetter) -> Result<DeadLetter> {
    let dead = DeadLetter {
      dead_letter_id: Uuid::new_v4(),
      stage:          letter.stage,
      payload:        letter.payload,
      reason:         letter.reason,
      attempts:       letter.attempts,
      recorded_at:    Utc::now(),
    };

    let id_str      = encode_uuid(dead.dead_letter_id);
    let stage_str   = dead.stage.as_str();
    let payload_str = serde_json::to_string(&dead.payload)?;
    let reason      = dead.reason.clone();
    let attempts    = dead.attempts;
    let at_str      = encode_dt(dead.recorded_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO dead_letters
             (dead_letter_id, stage, payload, reason, attempts, recorded_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![id_str, stage_str, payload_str, reason, attempts, at_str],
        )?;
        Ok(())
      })
      .await?;

    tracing::warn!(
      dead_letter_id = %dead.dead_letter_id,
      stage = stage_str,
      attempts,
      reason = %dead.reason,
      "work item dead-lettered"
    );
    Ok(dead)
  }

  async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
    let limit_val = i64::try_from(limit).unwrap_or(i64::MAX);

    let raws: Vec<RawDeadLetter> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT dead_letter_id, stage, payload, reason, attempts, recorded_at
           FROM dead_letters
           ORDER BY recorded_at DESC
           LIMIT ?1",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![limit_val], |row| {
            Ok(RawDeadLetter {
              dead_letter_id: row.get(0)?,
              stage:          row.get(1)?,
              payload:        row.get(2)?,
              reason:         row.get(3)?,
              attempts:       row.get(4)?,
              recorded_at:    row.get(5)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawDeadLetter::into_dead_letter).collect()
  }
}
