//! Error taxonomy for every facade call.
//!
//! Each variant carries the endpoint (`METHOD /path`) it came from so that
//! callers in the tool layer can surface failures without threading request
//! context through their own code.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the dispatch core.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Connection-level failure or a transport timeout.
    #[error("{endpoint}: network error after {attempts} attempt(s): {message}")]
    Network {
        endpoint: String,
        message: String,
        timeout: bool,
        attempts: u32,
    },

    /// HTTP 429.
    #[error("{endpoint}: rate limited after {attempts} attempt(s)")]
    RateLimited {
        endpoint: String,
        retry_after: Option<Duration>,
        attempts: u32,
    },

    /// HTTP 5xx.
    #[error("{endpoint}: server error {status} after {attempts} attempt(s): {message}")]
    Server {
        endpoint: String,
        status: u16,
        message: String,
        attempts: u32,
    },

    /// Any 4xx other than 429.
    #[error("{endpoint}: client error {status}: {message}")]
    Client {
        endpoint: String,
        status: u16,
        message: String,
        attempts: u32,
    },

    /// The envelope reported `success: false`.
    #[error("{endpoint}: API error: {message}")]
    Domain {
        endpoint: String,
        status: u16,
        message: String,
        code: Option<String>,
        attempts: u32,
    },

    /// The request's deadline elapsed before the scheduler admitted it.
    #[error("{endpoint}: timed out after {waited:?} waiting for admission")]
    SchedulerTimeout { endpoint: String, waited: Duration },

    /// The response body could not be interpreted.
    #[error("{endpoint}: malformed response: {message}")]
    Decode { endpoint: String, message: String },

    /// The client could not be constructed from its configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ApiError {
    /// Returns `true` for the kinds the transport retries.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::RateLimited { .. } | Self::Server { .. }
        )
    }

    /// Server-supplied backoff hint, if the remote sent one.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// HTTP status associated with the failure, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::Server { status, .. }
            | Self::Client { status, .. }
            | Self::Domain { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Number of transport attempts made before this error was surfaced.
    ///
    /// Scheduler timeouts never reach the transport, so they report zero.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Network { attempts, .. }
            | Self::RateLimited { attempts, .. }
            | Self::Server { attempts, .. }
            | Self::Client { attempts, .. }
            | Self::Domain { attempts, .. } => *attempts,
            _ => 0,
        }
    }

    /// The `METHOD /path` the failure belongs to.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Self::Network { endpoint, .. }
            | Self::RateLimited { endpoint, .. }
            | Self::Server { endpoint, .. }
            | Self::Client { endpoint, .. }
            | Self::Domain { endpoint, .. }
            | Self::SchedulerTimeout { endpoint, .. }
            | Self::Decode { endpoint, .. } => Some(endpoint),
            Self::Config(_) => None,
        }
    }

    pub(crate) fn with_attempts(mut self, count: u32) -> Self {
        match &mut self {
            Self::Network { attempts, .. }
            | Self::RateLimited { attempts, .. }
            | Self::Server { attempts, .. }
            | Self::Client { attempts, .. }
            | Self::Domain { attempts, .. } => *attempts = count,
            _ => {}
        }
        self
    }
}

/// Result alias used throughout the crate.
pub type ApiResult<T> = Result<T, ApiError>;
