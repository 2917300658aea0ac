//! Outbound request description.
//!
//! An [`ApiRequest`] is an opaque method/path/params/body tuple; the core
//! never inspects it beyond what scheduling, caching and transport need.

use bytes::Bytes;
use serde_json::Value;
use tokio::time::Instant;

use super::Method;

/// Ordered list of query parameters.
///
/// Insertion order is preserved on the wire, while [`normalized`](Self::normalized)
/// gives the order-independent view used for cache keys. Repeated names are
/// allowed (`ids=1&ids=2`).
///
/// # Examples
///
/// ```
/// use pipedrive_dispatch::http::QueryParams;
///
/// let a = QueryParams::new().with("status", "open").with("limit", "50");
/// let b = QueryParams::new().with("limit", "50").with("status", "open");
/// assert_eq!(a.normalized(), b.normalized());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    /// Creates an empty parameter list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(name, value);
        self
    }

    /// Appends a parameter. Existing parameters with the same name are kept.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((name.into(), value.into()));
    }

    /// Replaces every parameter called `name` with a single `name=value`.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.pairs.retain(|(k, _)| k != name);
        self.pairs.push((name.to_owned(), value.into()));
    }

    /// Returns the first value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Iterates pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Pairs sorted by name, then value.
    pub fn normalized(&self) -> Vec<(&str, &str)> {
        let mut sorted: Vec<_> = self.iter().collect();
        sorted.sort_unstable();
        sorted
    }
}

impl<K, V> FromIterator<(K, V)> for QueryParams
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A file to send as the `file` part of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl FileUpload {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            bytes: bytes.into(),
        }
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Request payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    /// A file plus text metadata fields, sent as `multipart/form-data`.
    Multipart {
        file: FileUpload,
        fields: Vec<(String, String)>,
    },
}

/// One outbound call as seen by the scheduler and the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: QueryParams,
    pub body: RequestBody,
    /// Latest instant at which the scheduler may still admit the request.
    pub deadline: Option<Instant>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: QueryParams::new(),
            body: RequestBody::Empty,
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_query(mut self, query: QueryParams) -> Self {
        self.query = query;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// Sets a JSON body; `None` leaves the request without one.
    #[must_use]
    pub fn with_json(self, body: Option<Value>) -> Self {
        match body {
            Some(value) => self.with_body(RequestBody::Json(value)),
            None => self,
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// `METHOD /path`, used in logs and errors.
    pub fn endpoint(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_ignores_insertion_order() {
        let a: QueryParams = [("b", "2"), ("a", "1"), ("a", "0")].into_iter().collect();
        let b: QueryParams = [("a", "0"), ("b", "2"), ("a", "1")].into_iter().collect();
        assert_eq!(a.normalized(), b.normalized());
        assert_eq!(a.normalized(), vec![("a", "0"), ("a", "1"), ("b", "2")]);
    }

    #[test]
    fn set_replaces_all_values() {
        let mut params = QueryParams::new().with("start", "0").with("start", "10");
        params.set("start", "20");
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("start"), Some("20"));
    }

    #[test]
    fn with_json_none_keeps_empty_body() {
        let req = ApiRequest::new(Method::Delete, "/v1/deals/1").with_json(None);
        assert_eq!(req.body, RequestBody::Empty);
        assert_eq!(req.endpoint(), "DELETE /v1/deals/1");
    }
}
