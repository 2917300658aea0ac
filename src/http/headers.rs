//! Rate-limit header parsing.
//!
//! The remote API reports throttling through the standard `Retry-After`
//! header and its own `x-ratelimit-*` family. Header names are matched
//! case-insensitively by [`HeaderMap`].

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};

/// Seconds until the current rate-limit window resets.
pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// Requests left in the current window.
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Extracts a backoff hint.
///
/// `Retry-After` wins; `x-ratelimit-reset` is the fallback. Only
/// delta-seconds are understood (integer or fractional); HTTP-date values are
/// ignored.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    seconds(headers, RETRY_AFTER.as_str()).or_else(|| seconds(headers, RATE_LIMIT_RESET))
}

pub fn rate_limit_remaining(headers: &HeaderMap) -> Option<u32> {
    headers
        .get(RATE_LIMIT_REMAINING)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn seconds(headers: &HeaderMap, name: &str) -> Option<Duration> {
    let value = headers.get(name)?.to_str().ok()?.trim();
    let secs: f64 = value.parse().ok()?;
    match Duration::try_from_secs_f64(secs) {
        Ok(duration) => Some(duration),
        // Past `Duration::MAX` but still a real delta: saturate, the retry
        // policy caps it.
        Err(_) if secs.is_finite() && secs > 0.0 => Some(Duration::MAX),
        Err(_) => None,
    }
}
