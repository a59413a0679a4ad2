//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings with exactly six fractional
//! digits and a `Z` suffix, so string order equals time order. UUIDs are
//! stored as hyphenated lowercase strings. The weekly plan and dead-letter
//! payloads are compact JSON.

use chrono::{DateTime, SecondsFormat, Utc};
use moodplan_core::{
  plan::{DayPlan, PlanRecord, Visualization, VisualizationStatus},
  store::{DeadLetter, DeadLetterStage},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Decode(format!("bad timestamp {s:?}: {e}")))
}

/// `dt` shifted by `d`, saturating instead of overflowing.
pub fn add_std(dt: DateTime<Utc>, d: std::time::Duration) -> DateTime<Utc> {
  chrono::Duration::from_std(d)
    .ok()
    .and_then(|delta| dt.checked_add_signed(delta))
    .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ─── Weekly plan ─────────────────────────────────────────────────────────────

pub fn encode_plan(plan: &[DayPlan]) -> Result<String> {
  Ok(serde_json::to_string(plan)?)
}

pub fn decode_plan(s: &str) -> Result<Vec<DayPlan>> { Ok(serde_json::from_str(s)?) }

// ─── Dead-letter stage ───────────────────────────────────────────────────────

pub fn decode_stage(s: &str) -> Result<DeadLetterStage> {
  match s {
    "ingestion" => Ok(DeadLetterStage::Ingestion),
    "visualization" => Ok(DeadLetterStage::Visualization),
    other => Err(Error::Decode(format!("unknown dead-letter stage: {other:?}"))),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list matching [`RawPlan::from_row`].
pub const PLAN_COLUMNS: &str = "record_id, user_id, ts, request_id, user_text, emotion,
  sentiment_score, weekly_plan, is_fallback, created_at,
  viz_status, viz_artifact_ref, viz_error, viz_resolved_at";

/// Raw values read directly from a `plans` row.
pub struct RawPlan {
  pub record_id:        String,
  pub user_id:          String,
  pub ts:               String,
  pub request_id:       String,
  pub user_text:        String,
  pub emotion:          String,
  pub sentiment_score:  i64,
  pub weekly_plan:      String,
  pub is_fallback:      bool,
  pub created_at:       String,
  pub viz_status:       String,
  pub viz_artifact_ref: Option<String>,
  pub viz_error:        Option<String>,
  pub viz_resolved_at:  Option<String>,
}

impl RawPlan {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      record_id:        row.get(0)?,
      user_id:          row.get(1)?,
      ts:               row.get(2)?,
      request_id:       row.get(3)?,
      user_text:        row.get(4)?,
      emotion:          row.get(5)?,
      sentiment_score:  row.get(6)?,
      weekly_plan:      row.get(7)?,
      is_fallback:      row.get(8)?,
      created_at:       row.get(9)?,
      viz_status:       row.get(10)?,
      viz_artifact_ref: row.get(11)?,
      viz_error:        row.get(12)?,
      viz_resolved_at:  row.get(13)?,
    })
  }

  pub fn into_record(self) -> Result<PlanRecord> {
    let sentiment_score = u8::try_from(self.sentiment_score).map_err(|_| {
      Error::Decode(format!("sentiment score out of range: {}", self.sentiment_score))
    })?;

    let visualization = Visualization {
      status:       VisualizationStatus::parse(&self.viz_status)?,
      artifact_ref: self.viz_artifact_ref,
      error:        self.viz_error,
      resolved_at:  self.viz_resolved_at.as_deref().map(decode_dt).transpose()?,
    };

    Ok(PlanRecord {
      record_id: decode_uuid(&self.record_id)?,
      user_id: self.user_id,
      timestamp: decode_dt(&self.ts)?,
      request_id: self.request_id,
      user_text: self.user_text,
      emotion: self.emotion,
      sentiment_score,
      weekly_plan: decode_plan(&self.weekly_plan)?,
      is_fallback: self.is_fallback,
      visualization,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

/// Raw values read directly from a `dead_letters` row.
pub struct RawDeadLetter {
  pub dead_letter_id: String,
  pub stage:          String,
  pub payload:        String,
  pub reason:         String,
  pub attempts:       i64,
  pub recorded_at:    String,
}

impl RawDeadLetter {
  pub fn into_dead_letter(self) -> Result<DeadLetter> {
    Ok(DeadLetter {
      dead_letter_id: decode_uuid(&self.dead_letter_id)?,
      stage:          decode_stage(&self.stage)?,
      payload:        serde_json::from_str(&self.payload)?,
      reason:         self.reason,
      attempts:       u32::try_from(self.attempts)
        .map_err(|_| Error::Decode(format!("bad attempt count: {}", self.attempts)))?,
      recorded_at:    decode_dt(&self.recorded_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn encoded_timestamps_sort_lexically() {
    let a = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let b = a + chrono::Duration::microseconds(1);
    let c = a + chrono::Duration::seconds(10);
    let (ea, eb, ec) = (encode_dt(a), encode_dt(b), encode_dt(c));
    assert_eq!(ea.len(), eb.len());
    assert!(ea < eb && eb < ec);
    assert_eq!(decode_dt(&eb).unwrap(), b);
  }

  #[test]
  fn unknown_stage_is_a_decode_error() {
    assert!(matches!(decode_stage("orchestration"), Err(Error::Decode(_))));
  }
}
