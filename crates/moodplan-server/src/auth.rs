//! Bearer-token admission gate.
//!
//! [`Principal`] is an axum extractor: a handler that takes one only runs for
//! requests carrying a valid, unexpired HS256 token signed with the current
//! `JWT_SECRET`.

use axum::{
  extract::FromRequestParts,
  http::{HeaderMap, header, request::Parts},
};
use chrono::{DateTime, Utc};
use moodplan_core::store::PlanStore;

use crate::{AppState, error::Error, jwt};

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
  pub user_id:    String,
  pub email:      Option<String>,
  pub expires_at: Option<DateTime<Utc>>,
}

impl Principal {
  /// Callers may only act on their own records.
  pub fn authorize(&self, user_id: &str) -> Result<(), Error> {
    if self.user_id == user_id {
      Ok(())
    } else {
      tracing::warn!(principal = %self.user_id, requested = %user_id, "user id mismatch");
      Err(Error::Forbidden(format!("token does not grant access to user {user_id:?}")))
    }
  }
}

fn bearer(headers: &HeaderMap) -> Result<&str, Error> {
  let value = headers
    .get(header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .ok_or_else(|| Error::Unauthorized("missing bearer token".into()))?;

  value
    .strip_prefix("Bearer ")
    .or_else(|| value.strip_prefix("bearer "))
    .map(str::trim)
    .filter(|t| !t.is_empty())
    .ok_or_else(|| Error::Unauthorized("missing bearer token".into()))
}

/// Verify the bearer token in `headers` against `secret`.
pub fn verify(headers: &HeaderMap, secret: &[u8], now: DateTime<Utc>) -> Result<Principal, Error> {
  let token  = bearer(headers)?;
  let claims = jwt::decode(token, secret, now)?;
  Ok(Principal {
    expires_at: claims.expires_at(),
    user_id:    claims.sub,
    email:      claims.email,
  })
}

impl<S> FromRequestParts<AppState<S>> for Principal
where
  S: PlanStore + Clone + 'static,
{
  type Rejection = Error;

  async fn from_request_parts(parts: &mut Parts, state: &AppState<S>) -> Result<Self, Self::Rejection> {
    let secrets = state
      .secrets
      .get()
      .await
      .map_err(|e| Error::Unavailable(e.to_string()))?;

    verify(&parts.headers, secrets.jwt_secret.as_bytes(), Utc::now()).inspect_err(|e| {
      tracing::debug!(error = %e, "request rejected at admission");
    })
  }
}
