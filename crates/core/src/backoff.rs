//! Retry with exponential backoff for rate-limited calls.
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::LiveError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(1000);
pub const DEFAULT_HINT_JITTER: Duration = Duration::from_millis(250);

/// How [`execute`] retries.
///
/// The delay after failed attempt `n` (1-based) is the error's suggested delay
/// plus up to `hint_jitter` when one exists, otherwise
/// `base_delay * 2^(n-1)` plus up to `max_jitter`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
    pub hint_jitter: Duration,
    pub is_retryable: fn(&LiveError) -> bool,
    pub suggested_delay: fn(&LiveError) -> Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_jitter: DEFAULT_MAX_JITTER,
            hint_jitter: DEFAULT_HINT_JITTER,
            is_retryable: LiveError::is_rate_limited,
            suggested_delay: LiveError::retry_after,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_jitter(mut self, max_jitter: Duration, hint_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self.hint_jitter = hint_jitter;
        self
    }

    /// Delay to wait after `attempt` failed with `error`.
    pub fn delay_for(&self, attempt: u32, error: &LiveError) -> Duration {
        match (self.suggested_delay)(error) {
            Some(hint) => hint + jitter(self.hint_jitter),
            None => {
                let exponent = attempt.saturating_sub(1).min(16);
                self.base_delay.saturating_mul(1 << exponent) + jitter(self.max_jitter)
            }
        }
    }
}

fn jitter(bound: Duration) -> Duration {
    let bound = bound.as_millis() as u64;
    if bound == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=bound))
}

/// Runs `call` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` calls have been made. The last error is returned unchanged.
pub async fn execute<T, F, Fut>(policy: &RetryPolicy, mut call: F) -> Result<T, LiveError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LiveError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts && (policy.is_retryable)(&err) => {
                let delay = policy.delay_for(attempt, &err);
                warn!(
                    "Attempt {}/{} failed ({}), retrying in {}ms",
                    attempt,
                    max_attempts,
                    err,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if (policy.is_retryable)(&err) {
                    warn!("Giving up after {} attempts: {}", attempt, err);
                } else {
                    debug!("Not retrying: {}", err);
                }
                return Err(err);
            }
        }
    }
}
