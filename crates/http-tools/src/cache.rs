//! A TTL + LRU response cache.
//!
//! Entries expire `ttl` after insertion. When the cache is full, expired entries are purged first
//! and then the least recently used entry is evicted. A capacity of zero disables caching.

use crate::request::OutboundRequest;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_TTL_SECS: u64 = 300;
pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL_SECS,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.capacity > 0 && self.ttl_secs > 0
    }
}

/// Request headers that never contribute to a cache key.
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "x-api-key",
    "x-amz-security-token",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Fingerprint a request.
    ///
    /// The key covers method, URL path, query pairs (order-insensitive) and non-sensitive headers
    /// and cookies. Credential values are excluded; `credential_scope` stands in for them so
    /// responses fetched with different credentials do not collide.
    #[must_use]
    pub fn for_request(
        request: &OutboundRequest,
        credential_scope: &str,
        sensitive_names: &[String],
    ) -> Self {
        let is_sensitive = |name: &str| {
            SENSITIVE_HEADERS.iter().any(|s| s.eq_ignore_ascii_case(name))
                || sensitive_names.iter().any(|s| s.eq_ignore_ascii_case(name))
        };

        let mut query: Vec<(&str, &str)> = request
            .query
            .iter()
            .filter(|p| !is_sensitive(&p.key))
            .map(|p| (p.key.as_str(), p.value.as_str()))
            .collect();
        query.sort_unstable();

        let mut headers: Vec<(String, &str)> = request
            .headers
            .iter()
            .filter(|(k, _)| !is_sensitive(k))
            .map(|(k, v)| (k.to_ascii_lowercase(), v.as_str()))
            .collect();
        headers.sort_unstable();

        let mut cookies: Vec<(&str, &str)> = request
            .cookies
            .iter()
            .filter(|(k, _)| !is_sensitive(k))
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        cookies.sort_unstable();

        let mut h = Sha256::new();
        let mut field = |tag: &str, value: &str| {
            h.update(tag.as_bytes());
            h.update([0x1f]);
            h.update(value.as_bytes());
            h.update([0x1e]);
        };
        field("m", request.method.as_str());
        field("u", request.url.as_str());
        for (k, v) in query {
            field("q", &format!("{k}={v}"));
        }
        for (k, v) in headers {
            field("h", &format!("{k}:{v}"));
        }
        for (k, v) in cookies {
            field("c", &format!("{k}={v}"));
        }
        field("s", credential_scope);

        Self(hex::encode(h.finalize()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone)]
pub struct ResponseCache<V: Clone> {
    config: CacheConfig,
    inner: Arc<Mutex<State<V>>>,
}

struct State<V> {
    entries: HashMap<CacheKey, Slot<V>>,
    /// Recency order: the smallest stamp is the least recently used entry.
    order: BTreeMap<u64, CacheKey>,
    next_stamp: u64,
}

struct Slot<V> {
    value: V,
    expires_at: Instant,
    stamp: u64,
}

impl<V> State<V> {
    fn touch(&mut self, key: &CacheKey) {
        let stamp = self.next_stamp;
        if let Some(slot) = self.entries.get_mut(key) {
            self.order.remove(&slot.stamp);
            slot.stamp = stamp;
            self.order.insert(stamp, key.clone());
            self.next_stamp += 1;
        }
    }

    fn remove(&mut self, key: &CacheKey) -> Option<Slot<V>> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.stamp);
        Some(slot)
    }

    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, s)| s.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for k in expired {
            self.remove(&k);
        }
    }
}

impl<V: Clone> ResponseCache<V> {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(State {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_stamp: 0,
            })),
        }
    }

    #[must_use]
    pub fn config(&self) -> CacheConfig {
        self.config
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled()
    }

    /// A live entry for `key`, marking it most recently used.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        if !self.is_enabled() {
            return None;
        }
        let mut state = self.inner.lock();
        let expired = state.entries.get(key)?.expires_at <= Instant::now();
        if expired {
            state.remove(key);
            return None;
        }
        state.touch(key);
        state.entries.get(key).map(|s| s.value.clone())
    }

    /// Insert with the configured TTL.
    pub fn put(&self, key: CacheKey, value: V) {
        self.put_with_ttl(key, value, self.config.ttl());
    }

    pub fn put_with_ttl(&self, key: CacheKey, value: V, ttl: Duration) {
        if !self.is_enabled() || ttl.is_zero() {
            return;
        }
        let now = Instant::now();
        let mut state = self.inner.lock();
        state.remove(&key);

        if state.entries.len() >= self.config.capacity {
            state.purge_expired(now);
        }
        while state.entries.len() >= self.config.capacity {
            let Some((_, lru)) = state.order.pop_first() else {
                break;
            };
            state.entries.remove(&lru);
        }

        let stamp = state.next_stamp;
        state.next_stamp += 1;
        state.order.insert(stamp, key.clone());
        state.entries.insert(
            key,
            Slot {
                value,
                expires_at: now + ttl,
                stamp,
            },
        );
    }

    pub fn invalidate(&self, key: &CacheKey) {
        self.inner.lock().remove(key);
    }

    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.entries.clear();
        state.order.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::QueryPair;
    use reqwest::Method;
    use url::Url;

    fn key(s: &str) -> CacheKey {
        CacheKey(s.to_string())
    }

    fn cache(capacity: usize, ttl_secs: u64) -> ResponseCache<String> {
        ResponseCache::new(CacheConfig { ttl_secs, capacity })
    }

    #[test]
    fn evicts_least_recently_used() {
        let c = cache(2, 60);
        c.put(key("a"), "A".to_string());
        c.put(key("b"), "B".to_string());
        // Touch `a` so `b` becomes the eviction candidate.
        assert_eq!(c.get(&key("a")).as_deref(), Some("A"));
        c.put(key("c"), "C".to_string());

        assert_eq!(c.len(), 2);
        assert!(c.get(&key("b")).is_none());
        assert_eq!(c.get(&key("a")).as_deref(), Some("A"));
        assert_eq!(c.get(&key("c")).as_deref(), Some("C"));
    }

    #[test]
    fn expired_entries_are_not_served() {
        let c = cache(10, 60);
        c.put_with_ttl(key("a"), "A".to_string(), Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(c.get(&key("a")).is_none());
        assert!(c.is_empty());
    }

    #[test]
    fn expired_entries_are_purged_before_lru_eviction() {
        let c = cache(2, 60);
        c.put(key("live"), "L".to_string());
        c.put_with_ttl(key("stale"), "S".to_string(), Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        c.put(key("new"), "N".to_string());

        assert_eq!(c.get(&key("live")).as_deref(), Some("L"));
        assert_eq!(c.get(&key("new")).as_deref(), Some("N"));
    }

    #[test]
    fn zero_capacity_disables_cache() {
        let c = cache(0, 60);
        c.put(key("a"), "A".to_string());
        assert!(c.get(&key("a")).is_none());
        assert!(!c.is_enabled());
    }

    #[test]
    fn reinserting_replaces_value() {
        let c = cache(2, 60);
        c.put(key("a"), "1".to_string());
        c.put(key("a"), "2".to_string());
        assert_eq!(c.len(), 1);
        assert_eq!(c.get(&key("a")).as_deref(), Some("2"));
    }

    fn request() -> OutboundRequest {
        OutboundRequest::new(
            Method::GET,
            Url::parse("https://api.example.com/pets").expect("url"),
        )
    }

    #[test]
    fn key_ignores_query_order() {
        let mut a = request();
        a.query.push(QueryPair::new("x", "1"));
        a.query.push(QueryPair::new("y", "2"));
        let mut b = request();
        b.query.push(QueryPair::new("y", "2"));
        b.query.push(QueryPair::new("x", "1"));
        assert_eq!(
            CacheKey::for_request(&a, "none", &[]),
            CacheKey::for_request(&b, "none", &[])
        );
    }

    #[test]
    fn key_excludes_credentials_but_honors_scope() {
        let mut a = request();
        a.set_header("Authorization", "Bearer one");
        let mut b = request();
        b.set_header("Authorization", "Bearer two");
        assert_eq!(
            CacheKey::for_request(&a, "scope", &[]),
            CacheKey::for_request(&b, "scope", &[])
        );
        assert_ne!(
            CacheKey::for_request(&a, "scope-1", &[]),
            CacheKey::for_request(&a, "scope-2", &[])
        );
    }

    #[test]
    fn key_excludes_configured_sensitive_query_names() {
        let mut a = request();
        a.set_query("api_key", "k1");
        let mut b = request();
        b.set_query("api_key", "k2");
        let sensitive = vec!["api_key".to_string()];
        assert_eq!(
            CacheKey::for_request(&a, "s", &sensitive),
            CacheKey::for_request(&b, "s", &sensitive)
        );
    }

    #[test]
    fn key_distinguishes_methods_and_headers() {
        let a = request();
        let mut b = request();
        b.method = Method::HEAD;
        let mut c = request();
        c.set_header("Accept-Language", "de");
        let ka = CacheKey::for_request(&a, "", &[]);
        assert_ne!(ka, CacheKey::for_request(&b, "", &[]));
        assert_ne!(ka, CacheKey::for_request(&c, "", &[]));
    }
}
