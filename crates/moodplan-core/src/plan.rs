//! Plan records: the canonical outcome of analysing one submission.
//!
//! A record's plan content is written once at creation and never touched
//! again. The only mutable part is the [`Visualization`] sub-state, which is
//! resolved at most once by the visualization worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, emotion};

// ─── Weekly plan ─────────────────────────────────────────────────────────────

/// One day of a generated weekly plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayPlan {
  pub day:       String,
  #[serde(default)]
  pub tasks:     Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub focus:     Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub self_care: Option<String>,
}

// ─── Analysis ────────────────────────────────────────────────────────────────

/// What a cognition service returns, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAnalysis {
  pub emotion:         String,
  #[serde(alias = "sentimentScore")]
  pub sentiment_score: f64,
  #[serde(alias = "weeklyPlan")]
  pub weekly_plan:     Vec<DayPlan>,
}

/// A validated analysis: emotion folded onto the label set, score clamped.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
  pub emotion:         String,
  pub sentiment_score: u8,
  pub weekly_plan:     Vec<DayPlan>,
  /// `true` when the plan came from the built-in fallback planner rather
  /// than a cognition service.
  pub is_fallback:     bool,
}

impl RawAnalysis {
  /// Validate and normalise. An empty plan, or a day without a label, is a
  /// malformed response.
  pub fn validate(self) -> Result<Analysis> {
    if self.weekly_plan.is_empty() {
      return Err(Error::MalformedAnalysis("weekly plan is empty".into()));
    }
    if let Some(idx) = self.weekly_plan.iter().position(|d| d.day.trim().is_empty()) {
      return Err(Error::MalformedAnalysis(format!(
        "weekly plan entry {idx} has no day label"
      )));
    }

    Ok(Analysis {
      emotion:         emotion::normalize_label(&self.emotion).to_owned(),
      sentiment_score: emotion::clamp_score(self.sentiment_score)?,
      weekly_plan:     self.weekly_plan,
      is_fallback:     false,
    })
  }
}

// ─── Visualization sub-state ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualizationStatus {
  Pending,
  Completed,
  Failed,
}

impl VisualizationStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Completed => "completed",
      Self::Failed => "failed",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "pending" => Ok(Self::Pending),
      "completed" => Ok(Self::Completed),
      "failed" => Ok(Self::Failed),
      other => Err(Error::UnknownStatus(other.to_owned())),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visualization {
  pub status:       VisualizationStatus,
  pub artifact_ref: Option<String>,
  /// Why the visualization failed, when it did.
  pub error:        Option<String>,
  pub resolved_at:  Option<DateTime<Utc>>,
}

impl Visualization {
  pub fn pending() -> Self {
    Self {
      status:       VisualizationStatus::Pending,
      artifact_ref: None,
      error:        None,
      resolved_at:  None,
    }
  }

  pub fn is_pending(&self) -> bool { self.status == VisualizationStatus::Pending }
}

/// The single mutation the visualization worker may apply to a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisualizationOutcome {
  Completed { artifact_ref: String },
  Failed { reason: String },
}

/// Result of attempting a [`VisualizationOutcome`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisualizationUpdate {
  /// The record moved out of `pending`.
  Applied,
  /// The record was already `completed` or `failed`; nothing was written.
  AlreadyResolved(VisualizationStatus),
  NotFound,
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// Input for [`PlanStore::create_plan`](crate::store::PlanStore::create_plan).
#[derive(Debug, Clone)]
pub struct NewPlanRecord {
  pub user_id:    String,
  /// Idempotency key of the originating submission.
  pub request_id: String,
  pub user_text:  String,
  pub analysis:   Analysis,
}

/// Upper bound on stored submission text, in characters.
pub const MAX_STORED_TEXT: usize = 10_000;

impl NewPlanRecord {
  pub fn new(user_id: &str, request_id: &str, text: &str, analysis: Analysis) -> Self {
    Self {
      user_id:    user_id.to_owned(),
      request_id: request_id.to_owned(),
      user_text:  text.chars().take(MAX_STORED_TEXT).collect(),
      analysis,
    }
  }
}

/// The durable unit of truth for one submission's outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRecord {
  pub record_id:       Uuid,
  pub user_id:         String,
  /// Sort key; strictly increasing per user.
  pub timestamp:       DateTime<Utc>,
  pub request_id:      String,
  pub user_text:       String,
  pub emotion:         String,
  pub sentiment_score: u8,
  pub weekly_plan:     Vec<DayPlan>,
  pub is_fallback:     bool,
  pub visualization:   Visualization,
  pub created_at:      DateTime<Utc>,
}
