//! Minimal HS256 JSON Web Tokens.
//!
//! Only what the admission gate needs: compact serialization, HMAC-SHA256
//! signatures, a required `sub` and `exp`, and no clock leeway.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD as B64};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "HS256";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JwtError {
  #[error("token is malformed")]
  Malformed,
  #[error("unsupported algorithm {0:?}")]
  UnsupportedAlgorithm(String),
  #[error("signature does not match")]
  BadSignature,
  #[error("token has expired")]
  Expired,
  #[error("token has no subject")]
  MissingSubject,
  #[error("signing key rejected")]
  InvalidKey,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
  alg: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  typ: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
  pub sub:   String,
  /// Expiry, seconds since the Unix epoch.
  pub exp:   i64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub iat:   Option<i64>,
}

impl Claims {
  pub fn new(sub: impl Into<String>, issued: DateTime<Utc>, ttl: chrono::Duration) -> Self {
    Self {
      sub:   sub.into(),
      exp:   (issued + ttl).timestamp(),
      email: None,
      iat:   Some(issued.timestamp()),
    }
  }

  pub fn expires_at(&self) -> Option<DateTime<Utc>> { DateTime::from_timestamp(self.exp, 0) }
}

fn mac(secret: &[u8]) -> Result<HmacSha256, JwtError> {
  HmacSha256::new_from_slice(secret).map_err(|_| JwtError::InvalidKey)
}

/// Sign `claims` with `secret`.
pub fn encode(claims: &Claims, secret: &[u8]) -> Result<String, JwtError> {
  let header = Header { alg: ALGORITHM.into(), typ: Some("JWT".into()) };
  let header = serde_json::to_vec(&header).map_err(|_| JwtError::Malformed)?;
  let body   = serde_json::to_vec(claims).map_err(|_| JwtError::Malformed)?;

  let signing_input = format!("{}.{}", B64.encode(header), B64.encode(body));
  let mut mac = mac(secret)?;
  mac.update(signing_input.as_bytes());
  let signature = B64.encode(mac.finalize().into_bytes());

  Ok(format!("{signing_input}.{signature}"))
}

/// Verify `token` and return its claims.
///
/// The signature is checked before the payload is parsed, and a token whose
/// `exp` is at or before `now` is rejected.
pub fn decode(token: &str, secret: &[u8], now: DateTime<Utc>) -> Result<Claims, JwtError> {
  let mut parts = token.split('.');
  let (Some(header_b64), Some(body_b64), Some(sig_b64), None) =
    (parts.next(), parts.next(), parts.next(), parts.next())
  else {
    return Err(JwtError::Malformed);
  };

  let header: Header = B64
    .decode(header_b64)
    .ok()
    .and_then(|raw| serde_json::from_slice(&raw).ok())
    .ok_or(JwtError::Malformed)?;
  if header.alg != ALGORITHM {
    return Err(JwtError::UnsupportedAlgorithm(header.alg));
  }

  let signature = B64.decode(sig_b64).map_err(|_| JwtError::Malformed)?;
  let mut mac = mac(secret)?;
  mac.update(header_b64.as_bytes());
  mac.update(b".");
  mac.update(body_b64.as_bytes());
  mac.verify_slice(&signature).map_err(|_| JwtError::BadSignature)?;

  let claims: Claims = B64
    .decode(body_b64)
    .ok()
    .and_then(|raw| serde_json::from_slice(&raw).ok())
    .ok_or(JwtError::Malformed)?;

  if claims.sub.trim().is_empty() {
    return Err(JwtError::MissingSubject);
  }
  if claims.exp <= now.timestamp() {
    return Err(JwtError::Expired);
  }
  Ok(claims)
}
