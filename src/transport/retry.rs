//! Retry policy helpers.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::duration_ms;
use crate::error::ApiError;

/// Retry decision result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after a delay.
    RetryAfter(Duration),
    /// Do not retry.
    DoNotRetry,
}

/// Bounded exponential backoff with jitter.
///
/// A server-supplied hint on a 429 replaces the computed delay, capped at
/// `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each one after.
    #[serde(default = "default_base_delay", with = "duration_ms")]
    pub base_delay: Duration,
    #[serde(default = "default_max_delay", with = "duration_ms")]
    pub max_delay: Duration,
    /// Upper bound of the random amount added to each computed delay.
    #[serde(default = "default_max_jitter", with = "duration_ms")]
    pub max_jitter: Duration,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_max_jitter() -> Duration {
    Duration::from_millis(250)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            max_jitter: default_max_jitter(),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn never() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Decide whether to retry after `attempt` (1-based) failed with `error`.
    #[must_use]
    pub fn decide(&self, error: &ApiError, attempt: u32) -> RetryDecision {
        if attempt >= self.max_attempts || !error.is_retryable() {
            return RetryDecision::DoNotRetry;
        }
        match error.retry_after() {
            Some(hint) => RetryDecision::RetryAfter(hint.min(self.max_delay)),
            None => RetryDecision::RetryAfter(self.backoff(attempt)),
        }
    }

    /// Computed delay after `attempt` failures: `base * 2^(attempt-1)`, capped,
    /// plus jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = 2_u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(exp).min(self.max_delay);

        let jitter_max = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_max > 0 {
            rand::thread_rng().gen_range(0..=jitter_max)
        } else {
            0
        };
        delay + Duration::from_millis(jitter)
    }
}
