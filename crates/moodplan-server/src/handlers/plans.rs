//! `GET /plan/{userId}[?limit=N]`: the retrieval entry point.
//!
//! A pure read of the canonical store. Each plan is reported with its
//! visualization sub-state as stored; nothing here waits on or calls the
//! visualization side, so plans are served while it is slow or down.

use axum::{
  Json,
  extract::{Path, Query, State},
};
use chrono::{DateTime, SecondsFormat, Utc};
use moodplan_core::{
  plan::{DayPlan, PlanRecord, VisualizationStatus},
  store::PlanStore,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppState, auth::Principal, error::Error};

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanList {
  pub user_id:    String,
  pub plan_count: usize,
  pub plans:      Vec<PlanView>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub notice:     Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanView {
  pub record_id:       Uuid,
  pub created_at:      String,
  pub emotion:         String,
  pub sentiment_score: u8,
  pub weekly_plan:     Vec<DayPlan>,
  pub ascii:           AsciiView,
  pub is_fallback:     bool,
}

#[derive(Debug, Serialize)]
pub struct AsciiView {
  pub status:  VisualizationStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub url:     Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub warning: Option<String>,
}

fn rfc3339(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Millis, true) }

impl From<PlanRecord> for PlanView {
  fn from(r: PlanRecord) -> Self {
    let viz = r.visualization;
    let warning = match (viz.status, &viz.artifact_ref) {
      (VisualizationStatus::Pending, _) => Some("Visualization is still being generated".to_owned()),
      (VisualizationStatus::Failed, _) => Some(match viz.error {
        Some(reason) => format!("Visualization failed: {reason}"),
        None => "Visualization failed".to_owned(),
      }),
      (VisualizationStatus::Completed, None) => Some("No visualization available".to_owned()),
      (VisualizationStatus::Completed, Some(_)) => None,
    };

    Self {
      record_id:       r.record_id,
      created_at:      rfc3339(r.created_at),
      emotion:         r.emotion,
      sentiment_score: r.sentiment_score,
      weekly_plan:     r.weekly_plan,
      ascii:           AsciiView { status: viz.status, url: viz.artifact_ref, warning },
      is_fallback:     r.is_fallback,
    }
  }
}

pub fn clamp_limit(limit: Option<usize>) -> usize {
  limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// `GET /plan/{user_id}`
pub async fn list<S>(
  State(state): State<AppState<S>>,
  principal: Principal,
  Path(user_id): Path<String>,
  Query(params): Query<ListParams>,
) -> Result<Json<PlanList>, Error>
where
  S: PlanStore + Clone + 'static,
{
  principal.authorize(&user_id)?;

  let records = state
    .store
    .list_plans(&user_id, clamp_limit(params.limit))
    .await
    .map_err(|e| Error::Store(Box::new(e)))?;

  if records.is_empty() {
    return Err(Error::NotFound(format!("no plans for user {user_id:?}")));
  }

  let pending = records.iter().filter(|r| r.visualization.is_pending()).count();
  let notice  = (pending > 0).then(|| {
    format!("{pending} visualization(s) still being generated; check back shortly")
  });
  let plans: Vec<PlanView> = records.into_iter().map(PlanView::from).collect();

  Ok(Json(PlanList { user_id, plan_count: plans.len(), plans, notice }))
}
