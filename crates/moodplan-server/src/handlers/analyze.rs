//! `POST /analyze`: the submission entry point.
//!
//! Body: `{"text": "...", "userId": "..."}`. The submission is stored in
//! the ingestion buffer before the `202` goes out; the plan shows up in
//! `GET /plan/{userId}` once the orchestrator has processed it.

use axum::{
  Json,
  extract::State,
  http::{HeaderMap, StatusCode},
  response::IntoResponse,
};
use moodplan_core::{
  store::{PlanStore, SubmissionQueue},
  submission::Submission,
};
use moodplan_pipeline::Error as PipelineError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{AppState, auth::Principal, error::Error};

pub const IDEMPOTENCY_KEY: &str = "idempotency-key";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeBody {
  #[serde(default)]
  pub text:    String,
  #[serde(default)]
  pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Accepted {
  pub message:    String,
  pub request_id: String,
}

/// Request id for a submission. A client-supplied idempotency key maps onto
/// the same id every time, so retried POSTs collapse onto one record.
pub fn request_id(user_id: &str, idempotency_key: Option<&str>) -> String {
  match idempotency_key.map(str::trim).filter(|k| !k.is_empty()) {
    Some(key) => {
      let mut hasher = Sha256::new();
      hasher.update(user_id.as_bytes());
      hasher.update([0u8]);
      hasher.update(key.as_bytes());
      let digest = hex::encode(hasher.finalize());
      digest[..32].to_owned()
    }
    None => Uuid::new_v4().to_string(),
  }
}

pub async fn submit<S>(
  State(state): State<AppState<S>>,
  principal: Principal,
  headers: HeaderMap,
  Json(body): Json<AnalyzeBody>,
) -> Result<impl IntoResponse, Error>
where
  S: PlanStore + SubmissionQueue + Clone + 'static,
{
  let user_id = body
    .user_id
    .filter(|u| !u.trim().is_empty())
    .ok_or_else(|| Error::BadRequest("userId is required".into()))?;
  principal.authorize(&user_id)?;

  let key = headers.get(IDEMPOTENCY_KEY).and_then(|v| v.to_str().ok());
  let submission = Submission::new(request_id(&user_id, key), user_id, body.text);
  submission
    .validate()
    .map_err(|e| Error::BadRequest(e.to_string()))?;

  let request_id = submission.request_id.clone();
  state.buffer.publish(submission).await.map_err(|e| match e {
    PipelineError::BufferClosed => Error::Unavailable("ingestion is shut down".into()),
    other => Error::Unavailable(other.to_string()),
  })?;

  tracing::info!(%request_id, user_id = %principal.user_id, "submission accepted");
  Ok((
    StatusCode::ACCEPTED,
    Json(Accepted { message: "Accepted for processing".into(), request_id }),
  ))
}
