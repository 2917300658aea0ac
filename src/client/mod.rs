//! The client facade.
//!
//! [`Client`] composes the cache, the scheduler and the transport:
//!
//! ```text
//! get ──► cache hit? ──yes──► data
//!              │ no
//!              ▼
//!         scheduler ──► transport (retries) ──► cache write-back ──► data
//!
//! post/put/patch/delete ──► scheduler ──► transport ──► invalidate path ──► data
//! ```

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::cache::{CacheKey, CacheOptions, CacheStats, Clock, ResponseCache, SystemClock};
use crate::config::ClientConfig;
use crate::error::ApiResult;
use crate::http::{ApiRequest, Envelope, FileUpload, Method, QueryParams, RequestBody};
use crate::pagination::{Page, PageRequest, Paginator};
use crate::scheduler::{RequestScheduler, SchedulerStats};
use crate::transport::{HttpSender, Sender, Transport};

/// Dispatch client for the remote API.
///
/// Cloning is cheap; clones share one cache and one scheduler, so limits
/// hold across every clone.
///
/// # Examples
///
/// ```no_run
/// use pipedrive_dispatch::{CacheOptions, Client, ClientConfig, QueryParams};
///
/// # async fn run() -> pipedrive_dispatch::ApiResult<()> {
/// let client = Client::new(ClientConfig::from_env()?)?;
///
/// let deals = client
///     .get("/v1/deals", QueryParams::new().with("status", "open"), CacheOptions::enabled_ms(60_000))
///     .await?;
/// println!("{deals}");
/// # Ok(())
/// # }
/// ```
pub struct Client<S = HttpSender> {
    inner: Arc<Inner<S>>,
}

struct Inner<S> {
    transport: Transport<S>,
    scheduler: RequestScheduler,
    cache: ResponseCache,
}

impl<S> Clone for Client<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> std::fmt::Debug for Client<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("scheduler", &self.inner.scheduler)
            .field("cache", &self.inner.cache)
            .finish_non_exhaustive()
    }
}

impl Client<HttpSender> {
    /// Builds a client that talks HTTP to `config.base_url`.
    ///
    /// # Errors
    ///
    /// [`ApiError::Config`](crate::ApiError::Config) if `config` is invalid or
    /// the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> ApiResult<Self> {
        config.validate()?;
        let sender = HttpSender::new(&config)?;
        Ok(Self::with_sender(&config, sender))
    }

    /// [`Client::new`] with configuration read from the environment.
    ///
    /// # Errors
    ///
    /// See [`ClientConfig::from_env`] and [`Client::new`].
    pub fn from_env() -> ApiResult<Self> {
        Self::new(ClientConfig::from_env()?)
    }
}

impl<S: Sender> Client<S> {
    /// Builds a client over an arbitrary [`Sender`].
    pub fn with_sender(config: &ClientConfig, sender: S) -> Self {
        Self::with_clock(config, sender, Arc::new(SystemClock))
    }

    /// Like [`Client::with_sender`], with the cache reading time from `clock`.
    pub fn with_clock(config: &ClientConfig, sender: S, clock: Arc<dyn Clock>) -> Self {
        let transport = Transport::new(sender, config.retry.clone(), config.request_timeout);
        Self {
            inner: Arc::new(Inner {
                transport,
                scheduler: RequestScheduler::new(&config.scheduler),
                cache: ResponseCache::with_clock(clock),
            }),
        }
    }

    pub fn sender(&self) -> &S {
        self.inner.transport.sender()
    }

    /// GET `path` and return the envelope's `data`.
    ///
    /// # Errors
    ///
    /// Any [`ApiError`](crate::ApiError) raised by scheduling or transport.
    pub async fn get(&self, path: &str, params: QueryParams, cache: CacheOptions) -> ApiResult<Value> {
        Ok(self.get_envelope(path, params, cache).await?.data)
    }

    /// GET `path` and return the whole envelope, pagination metadata included.
    ///
    /// # Errors
    ///
    /// Any [`ApiError`](crate::ApiError) raised by scheduling or transport.
    pub async fn get_envelope(
        &self,
        path: &str,
        params: QueryParams,
        cache: CacheOptions,
    ) -> ApiResult<Envelope> {
        let request = ApiRequest::new(Method::Get, path).with_query(params);
        self.execute(request, cache).await
    }

    /// # Errors
    ///
    /// Any [`ApiError`](crate::ApiError) raised by scheduling or transport.
    pub async fn post(&self, path: &str, body: Option<Value>) -> ApiResult<Value> {
        self.mutate(Method::Post, path, body).await
    }

    /// # Errors
    ///
    /// Any [`ApiError`](crate::ApiError) raised by scheduling or transport.
    pub async fn put(&self, path: &str, body: Option<Value>) -> ApiResult<Value> {
        self.mutate(Method::Put, path, body).await
    }

    /// # Errors
    ///
    /// Any [`ApiError`](crate::ApiError) raised by scheduling or transport.
    pub async fn patch(&self, path: &str, body: Option<Value>) -> ApiResult<Value> {
        self.mutate(Method::Patch, path, body).await
    }

    /// # Errors
    ///
    /// Any [`ApiError`](crate::ApiError) raised by scheduling or transport.
    pub async fn delete(&self, path: &str, body: Option<Value>) -> ApiResult<Value> {
        self.mutate(Method::Delete, path, body).await
    }

    /// POST `file` as `multipart/form-data`: one `file` part plus one text part
    /// per `metadata` entry.
    ///
    /// # Errors
    ///
    /// Any [`ApiError`](crate::ApiError) raised by scheduling or transport.
    pub async fn upload_file<I, K, V>(&self, path: &str, file: FileUpload, metadata: I) -> ApiResult<Value>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let fields = metadata
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        let request = ApiRequest::new(Method::Post, path).with_body(RequestBody::Multipart { file, fields });
        Ok(self.execute(request, CacheOptions::disabled()).await?.data)
    }

    /// Dispatches a prepared request.
    ///
    /// Reads consult and populate the cache when `cache.enabled`; every other
    /// method ignores `cache` and drops cached reads of the same path once it
    /// settles, whether it succeeded or not.
    ///
    /// # Errors
    ///
    /// [`ApiError::SchedulerTimeout`](crate::ApiError::SchedulerTimeout) if
    /// `request.deadline` passes while queued, otherwise the transport's error.
    pub async fn execute(&self, request: ApiRequest, cache: CacheOptions) -> ApiResult<Envelope> {
        let inner = &*self.inner;
        let key = (request.method.is_read() && cache.enabled).then(|| CacheKey::for_request(&request));

        // Captured before dispatch: a mutation of this path settling while the
        // read is in flight must keep its result out of the cache.
        let generation = key.as_ref().map(|_| inner.cache.generation(&request.path));
        if let Some(key) = &key {
            if let Some(hit) = inner.cache.get(key) {
                debug!(%key, "cache hit");
                return Ok(hit);
            }
        }

        let result = inner
            .scheduler
            .submit(&request, || inner.transport.execute(&request))
            .await;

        match (key, generation, &result) {
            (Some(key), Some(generation), Ok(envelope)) => {
                inner.cache.set_if_current(
                    key,
                    &request.path,
                    envelope.clone(),
                    cache.ttl,
                    generation,
                );
            }
            _ if !request.method.is_read() => {
                let removed = inner.cache.invalidate_path(&request.path);
                if removed > 0 {
                    debug!(path = %request.path, removed, "invalidated cached reads");
                }
            }
            _ => {}
        }

        result
    }

    /// Wraps a page-fetch function in a [`Paginator`].
    pub fn create_paginator<T, F, Fut>(&self, fetch: F) -> Paginator<T, F>
    where
        F: Fn(PageRequest) -> Fut,
        Fut: Future<Output = ApiResult<Page<T>>>,
    {
        Paginator::new(fetch)
    }

    /// A paginator over the list endpoint at `path`. Each page is a GET with
    /// `params` plus `start`/`limit` (or `cursor`/`limit`), subject to the
    /// same cache, scheduler and retries as [`Client::get`].
    pub fn paginate<T>(
        &self,
        path: &str,
        params: QueryParams,
        cache: CacheOptions,
    ) -> Paginator<T, impl Fn(PageRequest) -> BoxFuture<'static, ApiResult<Page<T>>> + use<T, S>>
    where
        T: DeserializeOwned + Send + 'static,
        S: 'static,
    {
        let client = self.clone();
        let path = path.to_owned();
        Paginator::new(move |page: PageRequest| {
            let client = client.clone();
            let mut query = params.clone();
            page.apply_to(&mut query);
            let request = ApiRequest::new(Method::Get, path.clone()).with_query(query);

            async move {
                let endpoint = request.endpoint();
                let envelope = client.execute(request, cache).await?;
                Page::from_envelope(envelope, &page, &endpoint)
            }
            .boxed()
        })
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Per-state request counts.
    pub fn rate_limiter_stats(&self) -> SchedulerStats {
        self.inner.scheduler.stats()
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    async fn mutate(&self, method: Method, path: &str, body: Option<Value>) -> ApiResult<Value> {
        let request = ApiRequest::new(method, path).with_json(body);
        Ok(self.execute(request, CacheOptions::disabled()).await?.data)
    }
}
