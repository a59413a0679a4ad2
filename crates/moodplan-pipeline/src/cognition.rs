//! Cognition service clients.
//!
//! [`HttpCognition`] posts the submission text to a remote analysis endpoint.
//! [`FallbackCognition`] answers locally with a neutral, generic week and is
//! used when no endpoint is configured. [`Cognition`] lets the server pick
//! one at startup without making the pipeline generic over the choice.

use std::{sync::Arc, time::Duration};

use moodplan_core::{
  emotion::NEUTRAL,
  plan::{Analysis, DayPlan, RawAnalysis},
  service::CognitionService,
};
use reqwest::Client;
use serde::Serialize;

use crate::{Error, Result, secrets::SecretCache};

// ─── HTTP ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
  text: &'a str,
}

/// Client for a remote cognition endpoint.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct HttpCognition {
  client:   Client,
  endpoint: String,
  secrets:  Arc<SecretCache>,
}

impl HttpCognition {
  pub fn new(endpoint: impl Into<String>, timeout: Duration, secrets: Arc<SecretCache>) -> Result<Self> {
    let client = Client::builder().timeout(timeout).build()?;
    Ok(Self { client, endpoint: endpoint.into(), secrets })
  }

  async fn call(&self, text: &str) -> Result<Analysis> {
    let mut req = self.client.post(&self.endpoint).json(&AnalyzeRequest { text });
    if let Some(key) = self.secrets.get().await?.cognition_api_key {
      req = req.bearer_auth(key);
    }

    let resp = req
      .send()
      .await
      .map_err(|e| Error::Upstream(format!("POST {} failed: {e}", self.endpoint)))?;

    let status = resp.status();
    if !status.is_success() {
      return Err(Error::Upstream(format!("POST {} → {status}", self.endpoint)));
    }

    let raw: RawAnalysis = resp
      .json()
      .await
      .map_err(|e| Error::Upstream(format!("unreadable analysis: {e}")))?;

    // A bad answer from the service is the service's fault, not the
    // submission's, so it stays retryable.
    raw.validate().map_err(|e| Error::Upstream(e.to_string()))
  }
}

impl CognitionService for HttpCognition {
  type Error = Error;

  async fn analyze<'a>(&'a self, text: &'a str) -> Result<Analysis> { self.call(text).await }
}

// ─── Fallback ────────────────────────────────────────────────────────────────

/// Local stand-in that always returns the same balanced week.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackCognition;

const FALLBACK_WEEK: &[(&str, &[&str], &str, &str)] = &[
  (
    "Monday",
    &["Set three goals for the week", "Clear your desk", "Block out focus time"],
    "Getting organised",
    "A short walk after lunch",
  ),
  (
    "Tuesday",
    &["Tackle the most important task first", "Answer waiting messages", "Note what got done"],
    "Steady progress",
    "Five minutes of slow breathing",
  ),
  (
    "Wednesday",
    &["Check in on the week's goals", "Drop or move what no longer fits", "Reach out to a colleague"],
    "Adjusting course",
    "Eat lunch away from the screen",
  ),
  (
    "Thursday",
    &["Push the main task forward", "Line up loose ends for Friday", "Read something new"],
    "Momentum",
    "Put on music you like",
  ),
  (
    "Friday",
    &["Close out the week's tasks", "List what went well", "Sketch next week"],
    "Wrapping up",
    "Mark one small win",
  ),
  (
    "Saturday",
    &["Rest", "Spend time on a hobby", "See friends or family"],
    "Personal time",
    "Sleep without an alarm",
  ),
  (
    "Sunday",
    &["Light preparation for Monday", "Cook something for the week", "Unwind"],
    "Recharging",
    "Write down three things you are grateful for",
  ),
];

impl FallbackCognition {
  pub fn analysis() -> Analysis {
    let weekly_plan = FALLBACK_WEEK
      .iter()
      .map(|(day, tasks, focus, self_care)| DayPlan {
        day:       (*day).to_owned(),
        tasks:     tasks.iter().map(|t| (*t).to_owned()).collect(),
        focus:     Some((*focus).to_owned()),
        self_care: Some((*self_care).to_owned()),
      })
      .collect();

    Analysis {
      emotion: NEUTRAL.to_owned(),
      sentiment_score: 50,
      weekly_plan,
      is_fallback: true,
    }
  }
}

impl CognitionService for FallbackCognition {
  type Error = std::convert::Infallible;

  async fn analyze<'a>(&'a self, _text: &'a str) -> Result<Analysis, Self::Error> {
    tracing::warn!("no cognition endpoint configured; using fallback plan");
    Ok(Self::analysis())
  }
}

// ─── Selection ───────────────────────────────────────────────────────────────

/// The cognition backend chosen at startup.
#[derive(Clone)]
pub enum Cognition {
  Http(HttpCognition),
  Fallback(FallbackCognition),
}

impl Cognition {
  /// HTTP when an endpoint is given, the fallback planner otherwise.
  pub fn from_endpoint(
    endpoint: Option<&str>,
    timeout: Duration,
    secrets: Arc<SecretCache>,
  ) -> Result<Self> {
    match endpoint {
      Some(url) if !url.trim().is_empty() => Ok(Self::Http(HttpCognition::new(url, timeout, secrets)?)),
      _ => Ok(Self::Fallback(FallbackCognition)),
    }
  }
}

impl CognitionService for Cognition {
  type Error = Error;

  async fn analyze<'a>(&'a self, text: &'a str) -> Result<Analysis> {
    match self {
      Self::Http(c) => c.call(text).await,
      Self::Fallback(_) => Ok(FallbackCognition::analysis()),
    }
  }
}
