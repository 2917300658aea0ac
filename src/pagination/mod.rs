//! Lazy iteration over paginated collections.
//!
//! The remote API pages collections in two ways:
//!
//! | Style  | Request            | Response metadata                                         |
//! |--------|--------------------|-----------------------------------------------------------|
//! | offset | `start`, `limit`   | `pagination.more_items_in_collection`, `pagination.next_start` |
//! | cursor | `cursor`, `limit`  | `next_cursor`                                             |
//!
//! Both are reduced to a single question, answered by [`Page::next_marker`]:
//! "is there a next page, and where does it start?". Everything above that,
//! [`Paginator`] and [`PageIter`], is shape-agnostic.
//!
//! A sequence ends when the metadata reports no further pages, when a page
//! comes back empty, or when the metadata points back at the page just
//! fetched.

use std::collections::VecDeque;
use std::future::Future;
use std::marker::PhantomData;

use futures::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::http::{AdditionalData, Envelope, QueryParams};

/// Where the next page starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageMarker {
    Offset(u64),
    Cursor(String),
}

/// Parameters for fetching one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub start: u64,
    pub limit: u32,
    pub cursor: Option<String>,
}

impl PageRequest {
    /// The first page of a sequence.
    pub fn first(limit: u32) -> Self {
        Self::offset(0, limit)
    }

    pub fn offset(start: u64, limit: u32) -> Self {
        Self {
            start,
            limit,
            cursor: None,
        }
    }

    /// The request for the page `marker` points at. Only the marker comes
    /// from the response; the page size stays the caller's.
    pub fn follow(&self, marker: PageMarker) -> Self {
        match marker {
            PageMarker::Offset(start) => Self::offset(start, self.limit),
            PageMarker::Cursor(cursor) => Self {
                start: self.start,
                limit: self.limit,
                cursor: Some(cursor),
            },
        }
    }

    /// Writes `cursor`+`limit` or `start`+`limit` into `params`.
    pub fn apply_to(&self, params: &mut QueryParams) {
        match &self.cursor {
            Some(cursor) => params.set("cursor", cursor.clone()),
            None => params.set("start", self.start.to_string()),
        }
        params.set("limit", self.limit.to_string());
    }
}

/// One fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<PageMarker>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next: Option<PageMarker>) -> Self {
        Self { items, next }
    }

    /// `Some` iff the remote says another page follows.
    pub fn next_marker(&self) -> Option<&PageMarker> {
        self.next.as_ref()
    }

    pub fn is_last(&self) -> bool {
        self.next.is_none()
    }
}

impl<T: DeserializeOwned> Page<T> {
    /// Builds a page from a list envelope fetched with `request`.
    ///
    /// # Errors
    ///
    /// [`ApiError::Decode`] if `data` is neither an array nor `null`, or an
    /// item does not deserialize into `T`.
    pub fn from_envelope(envelope: Envelope, request: &PageRequest, endpoint: &str) -> ApiResult<Self> {
        let decode = |message: String| ApiError::Decode {
            endpoint: endpoint.to_owned(),
            message,
        };

        let items = match envelope.data {
            Value::Array(items) => items
                .into_iter()
                .map(serde_json::from_value)
                .collect::<Result<Vec<T>, _>>()
                .map_err(|e| decode(format!("page item: {e}")))?,
            Value::Null => Vec::new(),
            other => {
                return Err(decode(format!(
                    "expected a list of items, got {}",
                    json_kind(&other)
                )));
            }
        };

        let next = next_marker(envelope.additional_data.as_ref(), request);
        Ok(Self::new(items, next))
    }
}

fn next_marker(additional: Option<&AdditionalData>, request: &PageRequest) -> Option<PageMarker> {
    let additional = additional?;

    if let Some(cursor) = additional.next_cursor.as_deref().filter(|c| !c.is_empty()) {
        return Some(PageMarker::Cursor(cursor.to_owned()));
    }

    let pagination = additional.pagination.as_ref()?;
    if !pagination.more_items_in_collection {
        return None;
    }
    let next_start = pagination
        .next_start
        .unwrap_or_else(|| request.start.saturating_add(u64::from(request.limit)));
    Some(PageMarker::Offset(next_start))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Uniform access to a paginated collection behind a page-fetch function.
///
/// # Examples
///
/// ```
/// use pipedrive_dispatch::pagination::{Page, PageMarker, PageRequest, Paginator};
///
/// # tokio_test_block(async {
/// let paginator = Paginator::new(|req: PageRequest| async move {
///     let items: Vec<u64> = (req.start..(req.start + u64::from(req.limit)).min(5)).collect();
///     let next = (req.start + u64::from(req.limit) < 5)
///         .then(|| PageMarker::Offset(req.start + u64::from(req.limit)));
///     Ok(Page::new(items, next))
/// });
///
/// let all = paginator.fetch_all(2, None).await.unwrap();
/// assert_eq!(all, vec![0, 1, 2, 3, 4]);
/// # });
/// # fn tokio_test_block(f: impl std::future::Future<Output = ()>) {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
pub struct Paginator<T, F> {
    fetch: F,
    _items: PhantomData<fn() -> T>,
}

impl<T, F, Fut> Paginator<T, F>
where
    F: Fn(PageRequest) -> Fut,
    Fut: Future<Output = ApiResult<Page<T>>>,
{
    pub fn new(fetch: F) -> Self {
        Self {
            fetch,
            _items: PhantomData,
        }
    }

    /// Starts a fresh, lazy sequence. Nothing is fetched until the first pull.
    pub fn iterate(&self, page_size: u32) -> PageIter<'_, T, F> {
        PageIter {
            paginator: self,
            buffer: VecDeque::new(),
            next_request: Some(PageRequest::first(page_size.max(1))),
            pages_fetched: 0,
        }
    }

    /// Drains the sequence, stopping as soon as `max_items` have been
    /// collected. The page that satisfies the cap is the last one fetched.
    ///
    /// # Errors
    ///
    /// The first page-fetch error; items collected so far are discarded.
    pub async fn fetch_all(&self, page_size: u32, max_items: Option<usize>) -> ApiResult<Vec<T>> {
        let mut out = Vec::new();
        if max_items == Some(0) {
            return Ok(out);
        }

        let mut pages = self.iterate(page_size);
        while let Some(page) = pages.next_page().await {
            let page = page?;
            match max_items {
                Some(max) => {
                    out.extend(page.into_iter().take(max - out.len()));
                    if out.len() >= max {
                        break;
                    }
                }
                None => out.extend(page),
            }
        }

        debug!(items = out.len(), pages = pages.pages_fetched(), "collected paginated items");
        Ok(out)
    }

    /// Fetches a single page outside of any sequence.
    ///
    /// # Errors
    ///
    /// Whatever the page-fetch function returns.
    pub async fn fetch_page(&self, start: u64, limit: u32) -> ApiResult<Page<T>> {
        (self.fetch)(PageRequest::offset(start, limit)).await
    }
}

/// A single pass over a paginated collection. Not restartable.
pub struct PageIter<'a, T, F> {
    paginator: &'a Paginator<T, F>,
    buffer: VecDeque<T>,
    /// `None` once the sequence has ended or failed.
    next_request: Option<PageRequest>,
    pages_fetched: usize,
}

impl<'a, T, F, Fut> PageIter<'a, T, F>
where
    F: Fn(PageRequest) -> Fut,
    Fut: Future<Output = ApiResult<Page<T>>>,
{
    /// Next item, fetching the next page only when the buffer is empty.
    pub async fn next(&mut self) -> Option<ApiResult<T>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(Ok(item));
            }
            match self.fetch_next().await? {
                Ok(items) => self.buffer.extend(items),
                Err(err) => return Some(Err(err)),
            }
        }
    }

    /// The rest of the current page if any is buffered, otherwise the next
    /// fetched page.
    pub async fn next_page(&mut self) -> Option<ApiResult<Vec<T>>> {
        if !self.buffer.is_empty() {
            return Some(Ok(self.buffer.drain(..).collect()));
        }
        self.fetch_next().await
    }

    /// Pages fetched so far by this sequence.
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Adapts the sequence to a [`Stream`] of items.
    pub fn into_stream(self) -> impl Stream<Item = ApiResult<T>> + 'a
    where
        T: 'a,
        F: 'a,
        Fut: 'a,
    {
        futures::stream::unfold(self, |mut iter| async move {
            let item = iter.next().await?;
            Some((item, iter))
        })
    }

    /// Performs one fetch. Returns `None` once the sequence is over; a page
    /// returned from here is never empty.
    async fn fetch_next(&mut self) -> Option<ApiResult<Vec<T>>> {
        let request = self.next_request.take()?;
        self.pages_fetched += 1;

        let page = match (self.paginator.fetch)(request.clone()).await {
            Ok(page) => page,
            Err(err) => return Some(Err(err)),
        };
        if page.items.is_empty() {
            return None;
        }

        self.next_request = page
            .next
            .map(|marker| request.follow(marker))
            .filter(|next| *next != request);
        Some(Ok(page.items))
    }
}
