//! Executes one call, normalizes its outcome, and retries transient failures.
//!
//! The [`Sender`] trait is the seam between the retry loop and the wire:
//! [`HttpSender`] speaks HTTP through reqwest, while tests substitute a
//! scripted sender.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, instrument, warn};

use crate::error::{ApiError, ApiResult};
use crate::http::{ApiRequest, Envelope, RawResponse};

mod http;
mod retry;

pub use http::HttpSender;
pub use retry::{RetryDecision, RetryPolicy};

/// Failure to obtain any HTTP response at all.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct SendError {
    pub message: String,
    pub timeout: bool,
}

impl SendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timeout: false,
        }
    }
}

/// Performs one raw HTTP exchange.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, SendError>;
}

/// Retrying executor on top of a [`Sender`].
#[derive(Debug)]
pub struct Transport<S> {
    sender: S,
    retry: RetryPolicy,
    attempt_timeout: Duration,
}

impl<S: Sender> Transport<S> {
    pub fn new(sender: S, retry: RetryPolicy, attempt_timeout: Duration) -> Self {
        Self {
            sender,
            retry,
            attempt_timeout,
        }
    }

    pub fn sender(&self) -> &S {
        &self.sender
    }

    /// Executes `request`, retrying per the policy.
    ///
    /// # Errors
    ///
    /// The last attempt's error, with its kind unchanged and
    /// [`attempts`](ApiError::attempts) set to the number of attempts made.
    #[instrument(skip_all, fields(endpoint = %request.endpoint()))]
    pub async fn execute(&self, request: &ApiRequest) -> ApiResult<Envelope> {
        let mut attempt = 1;
        loop {
            debug!(attempt, "sending request");
            let err = match self.attempt(request).await {
                Ok(envelope) => return Ok(envelope),
                Err(err) => err,
            };

            match self.retry.decide(&err, attempt) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying request"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::DoNotRetry => return Err(err.with_attempts(attempt)),
            }
        }
    }

    async fn attempt(&self, request: &ApiRequest) -> ApiResult<Envelope> {
        let endpoint = request.endpoint();
        let raw = match timeout(self.attempt_timeout, self.sender.send(request)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(err)) => {
                return Err(ApiError::Network {
                    endpoint,
                    message: err.message,
                    timeout: err.timeout,
                    attempts: 1,
                });
            }
            Err(_) => {
                return Err(ApiError::Network {
                    endpoint,
                    message: format!("no response within {:?}", self.attempt_timeout),
                    timeout: true,
                    attempts: 1,
                });
            }
        };
        interpret(endpoint, raw)
    }
}

/// Maps a raw response onto an envelope or an error kind.
fn interpret(endpoint: String, raw: RawResponse) -> ApiResult<Envelope> {
    if let Some(remaining) = raw.rate_limit_remaining {
        debug!(remaining, "rate limit budget");
    }

    let status = raw.status;
    if status == 429 {
        return Err(ApiError::RateLimited {
            endpoint,
            retry_after: raw.retry_after,
            attempts: 1,
        });
    }

    if raw.is_success() && raw.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Envelope::ok(serde_json::Value::Null));
    }

    let envelope = Envelope::parse(&raw.body);
    let message = || match &envelope {
        Ok(envelope) => envelope.message(),
        Err(_) => truncate_body(&raw.body),
    };

    match status {
        500..=599 => Err(ApiError::Server {
            endpoint,
            status,
            message: message(),
            attempts: 1,
        }),
        400..=499 => Err(ApiError::Client {
            endpoint,
            status,
            message: message(),
            attempts: 1,
        }),
        200..=299 => match envelope {
            Ok(envelope) if envelope.success => Ok(envelope),
            Ok(envelope) => Err(ApiError::Domain {
                endpoint,
                status,
                message: envelope.message(),
                code: envelope.code(),
                attempts: 1,
            }),
            Err(err) => Err(ApiError::Decode {
                endpoint,
                message: format!("response is not an API envelope: {err}"),
            }),
        },
        _ => Err(ApiError::Decode {
            endpoint,
            message: format!("unexpected HTTP status {status}"),
        }),
    }
}

fn truncate_body(bytes: &[u8]) -> String {
    const MAX_LEN: usize = 1024;
    let mut body = String::from_utf8_lossy(bytes).into_owned();
    if body.len() > MAX_LEN {
        let mut cut = MAX_LEN;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push('…');
    }
    body
}
