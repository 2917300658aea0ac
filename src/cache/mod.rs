//! Response cache for GET results.
//!
//! Entries are keyed by a canonical form of method, path and normalized query
//! parameters, so two logically identical requests always share an entry no
//! matter how their parameters were ordered. Expiry is checked lazily on
//! read; nothing sweeps the map in the background.
//!
//! Caching is opt-in per call through [`CacheOptions`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::http::{ApiRequest, Envelope, Method, QueryParams};

mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

/// TTL used by [`CacheOptions::default`] when a caller enables caching without
/// choosing one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Per-call cache behavior. Caching is off unless a caller asks for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    pub enabled: bool,
    pub ttl: Duration,
}

impl CacheOptions {
    pub const fn enabled(ttl: Duration) -> Self {
        Self { enabled: true, ttl }
    }

    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            ttl: DEFAULT_TTL,
        }
    }

    /// `ttl` given in milliseconds, as the tool layer passes it.
    pub const fn enabled_ms(ttl_ms: u64) -> Self {
        Self::enabled(Duration::from_millis(ttl_ms))
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Canonical identity of a cacheable request.
///
/// The credential is never part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(method: Method, path: &str, params: &QueryParams) -> Self {
        // JSON encoding keeps names and values containing '&' or '=' unambiguous.
        let params = serde_json::to_string(&params.normalized()).unwrap_or_default();
        Self(format!("{method} {path} {params}"))
    }

    pub fn for_request(request: &ApiRequest) -> Self {
        Self::new(request.method, &request.path, &request.query)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    path: String,
    value: Envelope,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        match self.inserted_at.checked_add(self.ttl) {
            Some(expires_at) => now < expires_at,
            None => true,
        }
    }
}

/// Snapshot returned by [`ResponseCache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Entries currently stored, including expired ones not yet read.
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Invalidation counter of one path, read by [`ResponseCache::generation`].
///
/// A read captures the generation before it is dispatched and writes back
/// with [`ResponseCache::set_if_current`]; a mutation of the path settling in
/// between makes that write a no-op.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Generation(u64);

#[derive(Default)]
struct Store {
    entries: HashMap<CacheKey, CacheEntry>,
    generations: HashMap<String, u64>,
}

impl Store {
    fn generation(&self, path: &str) -> Generation {
        Generation(self.generations.get(path).copied().unwrap_or_default())
    }
}

/// TTL-keyed store for successful GET envelopes.
pub struct ResponseCache {
    store: Mutex<Store>,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCache")
            .field("stats", &self.stats())
            .field("clock", &self.clock)
            .finish()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Mutex::new(Store::default()),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the cached value if it has not expired. An expired entry is
    /// dropped by the read that finds it.
    pub fn get(&self, key: &CacheKey) -> Option<Envelope> {
        let now = self.clock.now();
        let mut store = self.store.lock();
        let entries = &mut store.entries;

        let hit = match entries.get(key).map(|entry| entry.is_fresh(now)) {
            Some(true) => entries.get(key).map(|entry| entry.value.clone()),
            Some(false) => {
                entries.remove(key);
                debug!(key = %key, "cache entry expired");
                None
            }
            None => None,
        };
        drop(store);

        match hit {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores `value` under `key`. A zero TTL stores nothing.
    pub fn set(&self, key: CacheKey, path: &str, value: Envelope, ttl: Duration) {
        let mut store = self.store.lock();
        self.insert(&mut store, key, path, value, ttl);
    }

    /// Current invalidation generation of `path`.
    pub fn generation(&self, path: &str) -> Generation {
        self.store.lock().generation(path)
    }

    /// Like [`set`](Self::set), unless `path` has been invalidated since
    /// `observed` was read. Returns whether the value was stored.
    pub fn set_if_current(
        &self,
        key: CacheKey,
        path: &str,
        value: Envelope,
        ttl: Duration,
        observed: Generation,
    ) -> bool {
        let mut store = self.store.lock();
        if store.generation(path) != observed {
            debug!(key = %key, "discarding read that raced an invalidation");
            return false;
        }
        self.insert(&mut store, key, path, value, ttl)
    }

    fn insert(&self, store: &mut Store, key: CacheKey, path: &str, value: Envelope, ttl: Duration) -> bool {
        if ttl.is_zero() {
            return false;
        }
        let entry = CacheEntry {
            path: path.to_owned(),
            value,
            inserted_at: self.clock.now(),
            ttl,
        };
        store.entries.insert(key, entry);
        true
    }

    /// Drops every entry whose request path is exactly `path` and bumps the
    /// path's generation. Returns how many entries were removed.
    pub fn invalidate_path(&self, path: &str) -> usize {
        let mut store = self.store.lock();
        *store.generations.entry(path.to_owned()).or_default() += 1;
        let entries = &mut store.entries;
        let before = entries.len();
        entries.retain(|_, entry| entry.path != path);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(path, removed, "invalidated cached responses");
        }
        removed
    }

    /// Drops expired entries now instead of waiting for them to be read.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut store = self.store.lock();
        let before = store.entries.len();
        store.entries.retain(|_, entry| entry.is_fresh(now));
        before - store.entries.len()
    }

    /// Drops every entry. Generations survive so in-flight reads stay
    /// fenced.
    pub fn clear(&self) {
        self.store.lock().entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.store.lock().entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn cache_with_clock() -> (ResponseCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (ResponseCache::with_clock(clock.clone()), clock)
    }

    fn key(path: &str) -> CacheKey {
        CacheKey::new(Method::Get, path, &QueryParams::new())
    }

    #[test]
    fn key_ignores_param_order() {
        let orderings = [
            vec![("status", "open"), ("limit", "10"), ("user_id", "3")],
            vec![("user_id", "3"), ("status", "open"), ("limit", "10")],
            vec![("limit", "10"), ("user_id", "3"), ("status", "open")],
        ];
        let keys: Vec<_> = orderings
            .into_iter()
            .map(|pairs| {
                let params: QueryParams = pairs.into_iter().collect();
                CacheKey::new(Method::Get, "/v1/deals", &params)
            })
            .collect();
        assert!(keys.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn key_distinguishes_method_path_and_values() {
        let params = QueryParams::new().with("status", "open");
        let base = CacheKey::new(Method::Get, "/v1/deals", &params);

        assert_ne!(base, CacheKey::new(Method::Post, "/v1/deals", &params));
        assert_ne!(base, CacheKey::new(Method::Get, "/v1/persons", &params));
        assert_ne!(
            base,
            CacheKey::new(
                Method::Get,
                "/v1/deals",
                &QueryParams::new().with("status", "won")
            )
        );
    }

    #[test]
    fn key_is_unambiguous_for_separators() {
        let a = QueryParams::new().with("a", "1&b=2");
        let b = QueryParams::new().with("a", "1").with("b", "2");
        assert_ne!(
            CacheKey::new(Method::Get, "/x", &a),
            CacheKey::new(Method::Get, "/x", &b)
        );
    }

    #[test]
    fn entry_expires_after_ttl() {
        let (cache, clock) = cache_with_clock();
        let ttl = Duration::from_secs(60);
        cache.set(key("/v1/deals"), "/v1/deals", Envelope::ok(json!([1])), ttl);

        clock.advance(ttl - Duration::from_millis(1));
        assert!(cache.get(&key("/v1/deals")).is_some());

        clock.advance(Duration::from_millis(2));
        assert!(cache.get(&key("/v1/deals")).is_none());
        assert_eq!(cache.stats().size, 0, "expired entry is dropped on read");
    }

    #[test]
    fn entry_is_stale_exactly_at_ttl() {
        let (cache, clock) = cache_with_clock();
        cache.set(
            key("/v1/users/me"),
            "/v1/users/me",
            Envelope::ok(json!({})),
            Duration::from_secs(1),
        );
        clock.advance(Duration::from_secs(1));
        assert!(cache.get(&key("/v1/users/me")).is_none());
    }

    #[test]
    fn zero_ttl_is_not_stored() {
        let cache = ResponseCache::new();
        cache.set(key("/v1/deals"), "/v1/deals", Envelope::ok(json!([])), Duration::ZERO);
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn invalidate_path_is_exact() {
        let cache = ResponseCache::new();
        let ttl = Duration::from_secs(60);
        for path in ["/v1/deals/1", "/v1/deals/10", "/v1/deals"] {
            cache.set(key(path), path, Envelope::ok(json!(path)), ttl);
        }
        let filtered = CacheKey::new(
            Method::Get,
            "/v1/deals/1",
            &QueryParams::new().with("include", "notes"),
        );
        cache.set(filtered.clone(), "/v1/deals/1", Envelope::ok(json!(1)), ttl);

        assert_eq!(cache.invalidate_path("/v1/deals/1"), 2);
        assert!(cache.get(&filtered).is_none());
        assert!(cache.get(&key("/v1/deals/10")).is_some());
        assert!(cache.get(&key("/v1/deals")).is_some());
    }

    #[test]
    fn write_back_after_invalidation_is_discarded() {
        let cache = ResponseCache::new();
        let ttl = Duration::from_secs(60);
        let observed = cache.generation("/v1/deals/7");

        // Nothing is cached yet; the generation still moves.
        assert_eq!(cache.invalidate_path("/v1/deals/7"), 0);
        assert!(!cache.set_if_current(
            key("/v1/deals/7"),
            "/v1/deals/7",
            Envelope::ok(json!("stale")),
            ttl,
            observed,
        ));
        assert!(cache.get(&key("/v1/deals/7")).is_none());

        let fresh = cache.generation("/v1/deals/7");
        assert!(cache.set_if_current(
            key("/v1/deals/7"),
            "/v1/deals/7",
            Envelope::ok(json!("fresh")),
            ttl,
            fresh,
        ));
    }

    #[test]
    fn generations_are_per_path_and_survive_clear() {
        let cache = ResponseCache::new();
        let other = cache.generation("/v1/persons/1");
        let before = cache.generation("/v1/deals/7");

        cache.invalidate_path("/v1/deals/7");
        cache.clear();

        assert_eq!(cache.generation("/v1/persons/1"), other);
        assert!(cache.generation("/v1/deals/7") > before);
    }

    #[test]
    fn purge_expired_only_drops_stale_entries() {
        let (cache, clock) = cache_with_clock();
        cache.set(key("/a"), "/a", Envelope::ok(json!(1)), Duration::from_secs(1));
        cache.set(key("/b"), "/b", Envelope::ok(json!(2)), Duration::from_secs(10));
        clock.advance(Duration::from_secs(2));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.stats().size, 1);
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let cache = ResponseCache::new();
        cache.set(key("/a"), "/a", Envelope::ok(json!(1)), Duration::from_secs(60));

        assert!(cache.get(&key("/a")).is_some());
        assert!(cache.get(&key("/b")).is_none());

        let stats = cache.stats();
        assert_eq!(stats, CacheStats { size: 1, hits: 1, misses: 1 });

        cache.clear();
        assert_eq!(cache.stats().size, 0);
    }
}
