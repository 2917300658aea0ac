//! Client configuration.
//!
//! Every field has a serde default so a partial document (or an empty one)
//! deserializes into a working configuration. [`ClientConfig::from_env`]
//! overlays the `PIPEDRIVE_*` environment variables on top of the defaults.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::transport::RetryPolicy;

/// Opaque credential attached to every outbound call.
///
/// Acquisition and refresh happen elsewhere.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum Credential {
    /// Sent as the `api_token` query parameter.
    ApiToken(String),
    /// Sent as `Authorization: Bearer <token>`.
    Bearer(String),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiToken(_) => f.write_str("ApiToken(<redacted>)"),
            Self::Bearer(_) => f.write_str("Bearer(<redacted>)"),
        }
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL the request path is appended to.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default, skip_serializing)]
    pub credential: Option<Credential>,

    /// Per-attempt transport timeout.
    #[serde(default = "default_request_timeout", with = "duration_ms")]
    pub request_timeout: Duration,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_base_url() -> String {
    "https://api.pipedrive.com".into()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    format!("pipedrive-dispatch/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            credential: None,
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
            scheduler: SchedulerConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with `PIPEDRIVE_BASE_URL`, `PIPEDRIVE_API_TOKEN`,
    /// `PIPEDRIVE_TIMEOUT_MS` and `PIPEDRIVE_MAX_CONCURRENT`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] if a numeric variable does not parse or the
    /// resulting configuration fails [`validate`](Self::validate).
    pub fn from_env() -> ApiResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ApiResult<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("PIPEDRIVE_BASE_URL") {
            config.base_url = url;
        }
        if let Some(token) = lookup("PIPEDRIVE_API_TOKEN") {
            config.credential = Some(Credential::ApiToken(token));
        }
        if let Some(ms) = lookup("PIPEDRIVE_TIMEOUT_MS") {
            let ms: u64 = ms
                .parse()
                .map_err(|_| ApiError::Config(format!("PIPEDRIVE_TIMEOUT_MS: invalid value {ms:?}")))?;
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = lookup("PIPEDRIVE_MAX_CONCURRENT") {
            config.scheduler.concurrency_limit = n.parse().map_err(|_| {
                ApiError::Config(format!("PIPEDRIVE_MAX_CONCURRENT: invalid value {n:?}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns [`ApiError::Config`] for a zero concurrency limit, zero retry
    /// attempts, or a base URL that does not parse.
    pub fn validate(&self) -> ApiResult<()> {
        if self.scheduler.concurrency_limit == 0 {
            return Err(ApiError::Config("concurrency_limit must be at least 1".into()));
        }
        if self.scheduler.requests_per_window == Some(0) {
            return Err(ApiError::Config("requests_per_window must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ApiError::Config("retry.max_attempts must be at least 1".into()));
        }
        reqwest::Url::parse(&self.base_url)
            .map_err(|e| ApiError::Config(format!("base_url {:?}: {e}", self.base_url)))?;
        Ok(())
    }
}

/// Admission control settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum requests executing at once.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Requests admitted per `window`; `None` disables the rate gate.
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: Option<u32>,

    #[serde(default = "default_window", with = "duration_ms")]
    pub window: Duration,

    /// Deadline applied to requests that do not carry their own.
    #[serde(default, with = "option_duration_ms")]
    pub queue_timeout: Option<Duration>,
}

fn default_concurrency_limit() -> usize {
    10
}

fn default_requests_per_window() -> Option<u32> {
    Some(80)
}

fn default_window() -> Duration {
    Duration::from_secs(2)
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            requests_per_window: default_requests_per_window(),
            window: default_window(),
            queue_timeout: None,
        }
    }
}

impl SchedulerConfig {
    /// Concurrency cap only, no rate gate and no queue timeout.
    pub fn unthrottled(concurrency_limit: usize) -> Self {
        Self {
            concurrency_limit,
            requests_per_window: None,
            window: default_window(),
            queue_timeout: None,
        }
    }
}

pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

pub(crate) mod option_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = Option::<u64>::deserialize(deserializer)?;
        Ok(ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: ClientConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config.base_url, "https://api.pipedrive.com");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.scheduler.concurrency_limit, 10);
        assert_eq!(config.scheduler.requests_per_window, Some(80));
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.credential.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn durations_are_milliseconds() {
        let config: ClientConfig = serde_json::from_value(json!({
            "request_timeout": 1500,
            "scheduler": { "window": 1000, "queue_timeout": 250, "requests_per_window": null }
        }))
        .unwrap();
        assert_eq!(config.request_timeout, Duration::from_millis(1500));
        assert_eq!(config.scheduler.window, Duration::from_secs(1));
        assert_eq!(config.scheduler.queue_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.scheduler.requests_per_window, None);
    }

    #[test]
    fn env_overlay() {
        let vars: HashMap<&str, &str> = [
            ("PIPEDRIVE_API_TOKEN", "secret"),
            ("PIPEDRIVE_BASE_URL", "https://acme.pipedrive.com"),
            ("PIPEDRIVE_MAX_CONCURRENT", "4"),
        ]
        .into_iter()
        .collect();
        let config = ClientConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_owned())).unwrap();

        assert_eq!(config.credential, Some(Credential::ApiToken("secret".into())));
        assert_eq!(config.base_url, "https://acme.pipedrive.com");
        assert_eq!(config.scheduler.concurrency_limit, 4);
    }

    #[test]
    fn env_overlay_rejects_bad_numbers() {
        let err = ClientConfig::from_lookup(|k| {
            (k == "PIPEDRIVE_TIMEOUT_MS").then(|| "soon".to_owned())
        })
        .unwrap_err();
        assert!(matches!(err, ApiError::Config(msg) if msg.contains("PIPEDRIVE_TIMEOUT_MS")));
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = ClientConfig::default();
        config.scheduler.concurrency_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn credential_debug_is_redacted() {
        let rendered = format!("{:?}", Credential::Bearer("top-secret".into()));
        assert!(!rendered.contains("top-secret"));
    }
}
