//! Request and response primitives shared by every layer of the core.
//!
//! This module provides [`Method`], the outbound [`ApiRequest`] with its
//! [`QueryParams`] and [`RequestBody`], the wire [`Envelope`], and the
//! header parsing helpers used by the HTTP sender.

use std::fmt;

pub mod headers;
pub mod request;
pub mod response;

pub use request::{ApiRequest, FileUpload, QueryParams, RequestBody};
pub use response::{AdditionalData, Envelope, OffsetPagination, RawResponse};

/// An outbound HTTP method.
///
/// Only the verbs the remote API accepts are represented.
///
/// # Examples
///
/// ```
/// use pipedrive_dispatch::http::Method;
///
/// assert_eq!(Method::Get.as_str(), "GET");
/// assert!(Method::Get.is_read());
/// assert!(!Method::Post.is_read());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Reads a resource or collection. The only cacheable method.
    Get,
    /// Creates a resource.
    Post,
    /// Replaces or updates a resource.
    Put,
    /// Partially updates a resource.
    Patch,
    /// Removes a resource.
    Delete,
}

impl Method {
    /// Returns the method as a string slice.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Returns `true` for methods that never mutate remote state.
    pub const fn is_read(self) -> bool {
        matches!(self, Self::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => Self::GET,
            Method::Post => Self::POST,
            Method::Put => Self::PUT,
            Method::Patch => Self::PATCH,
            Method::Delete => Self::DELETE,
        }
    }
}
