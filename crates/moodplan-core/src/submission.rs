//! Submissions: one user's raw text, as it travels through the ingestion
//! buffer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
  /// Assigned at admission. Redeliveries of the same submission share it.
  pub request_id:   String,
  pub user_id:      String,
  pub text:         String,
  pub submitted_at: DateTime<Utc>,
}

impl Submission {
  pub fn new(request_id: String, user_id: String, text: String) -> Self {
    Self { request_id, user_id, text, submitted_at: Utc::now() }
  }

  /// Reject blank text or a blank user id.
  pub fn validate(&self) -> Result<()> {
    if self.user_id.trim().is_empty() {
      return Err(Error::MissingUserId);
    }
    if self.text.trim().is_empty() {
      return Err(Error::EmptyText);
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn blank_fields_are_rejected() {
    let ok = Submission::new("r".into(), "user1".into(), "hello".into());
    assert!(ok.validate().is_ok());

    let no_user = Submission::new("r".into(), " ".into(), "hello".into());
    assert!(matches!(no_user.validate(), Err(Error::MissingUserId)));

    let no_text = Submission::new("r".into(), "user1".into(), "\n\t".into());
    assert!(matches!(no_text.validate(), Err(Error::EmptyText)));
  }
}
