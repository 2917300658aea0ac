//! Response envelope and raw HTTP outcome.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The wrapper present on every remote response.
///
/// ```json
/// { "success": true, "data": [...], "additional_data": { "pagination": { ... } } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_data: Option<AdditionalData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_info: Option<String>,
    /// Remote error code; the API sends both strings and numbers here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,
}

impl Envelope {
    /// A successful envelope around `data`, without metadata.
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            additional_data: None,
            error: None,
            error_info: None,
            code: None,
        }
    }

    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Best human-readable description of a failed envelope.
    pub fn message(&self) -> String {
        match (&self.error, &self.error_info) {
            (Some(error), Some(info)) => format!("{error} ({info})"),
            (Some(error), None) => error.clone(),
            (None, Some(info)) => info.clone(),
            (None, None) => "request was not successful".to_owned(),
        }
    }

    /// Remote error code rendered as a string.
    pub fn code(&self) -> Option<String> {
        match self.code.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// Metadata attached to a successful response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdditionalData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<OffsetPagination>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    /// Anything else the endpoint returns (related objects, summaries).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Offset-style pagination block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetPagination {
    #[serde(default)]
    pub start: u64,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub more_items_in_collection: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_start: Option<u64>,
}

/// One raw HTTP exchange as returned by a [`Sender`](crate::transport::Sender).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    /// Parsed `Retry-After` hint.
    pub retry_after: Option<Duration>,
    /// Parsed `x-ratelimit-remaining`.
    pub rate_limit_remaining: Option<u32>,
    pub body: Bytes,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            retry_after: None,
            rate_limit_remaining: None,
            body: body.into(),
        }
    }

    /// Response whose body is the serialized `value`.
    pub fn json(status: u16, value: &Value) -> Self {
        Self::new(status, value.to_string())
    }

    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
