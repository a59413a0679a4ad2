//! Bounded retry budgets and timeouts for external calls.

use std::{future::Future, time::Duration};

use crate::{Error, Result};

/// Exponential backoff with a cap and an attempt budget.
///
/// Attempt numbers are 1-based: the first delivery is attempt 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub base_delay:   Duration,
  pub max_delay:    Duration,
}

impl RetryPolicy {
  pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
    Self { max_attempts: max_attempts.max(1), base_delay, max_delay }
  }

  /// Whether another attempt is allowed after `attempt` failed.
  pub fn should_retry(&self, attempt: u32) -> bool { attempt < self.max_attempts }

  /// Delay before the attempt that follows `attempt`:
  /// `base * 2^(attempt - 1)`, capped at `max_delay`.
  pub fn delay_for(&self, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    self.base_delay.saturating_mul(1_u32 << exp).min(self.max_delay)
  }
}

/// Run `fut`, failing with [`Error::Timeout`] if it takes longer than
/// `after`. The inner result is returned untouched.
pub async fn timed<F: Future>(
  operation: &'static str,
  after: Duration,
  fut: F,
) -> Result<F::Output> {
  tokio::time::timeout(after, fut)
    .await
    .map_err(|_| Error::Timeout { operation, after })
}
