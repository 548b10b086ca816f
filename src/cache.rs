//! TTL cache for successful GET responses on routes that opt in.

use crate::clock::{Clock, MonotonicClock};
use crate::message::{GatewayResponse, OutboundRequest};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Entry {
    response: GatewayResponse,
    expires_at: u64,
}

/// Responses keyed by [`ResponseCache::key_for`], each with its own expiry.
#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(Arc::new(MonotonicClock::default()))
    }
}

impl ResponseCache {
    /// Empty cache reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { entries: DashMap::new(), clock }
    }

    /// Cache key for `request` to `service` on behalf of `principal`.
    ///
    /// Responses are never shared across services, methods or principals.
    pub fn key_for(service: &str, request: &OutboundRequest, principal: Option<&str>) -> String {
        let principal = principal.map(|p| format!("@{p}")).unwrap_or_default();
        format!("{service}|{}|{principal}|{}", request.method, request.path_and_query())
    }

    /// Live entry for `key`. Expired entries are removed on access.
    pub fn get(&self, key: &str) -> Option<GatewayResponse> {
        let now = self.clock.now_millis();
        let hit = self.entries.get(key).and_then(|e| (e.expires_at > now).then(|| e.response.clone()));
        if hit.is_none() {
            self.entries.remove_if(key, |_, e| e.expires_at <= now);
        }
        hit
    }

    /// Store `response` for `ttl`. Only 2xx responses are kept.
    pub fn put(&self, key: impl Into<String>, response: &GatewayResponse, ttl: Duration) -> bool {
        if !response.status.is_success() || ttl.is_zero() {
            return false;
        }
        let ttl_millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let expires_at = self.clock.now_millis().saturating_add(ttl_millis);
        self.entries.insert(key.into(), Entry { response: response.clone(), expires_at });
        true
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use http::StatusCode;

    #[test]
    fn entries_expire_after_ttl() {
        let clock = ManualClock::starting_at(1_000);
        let cache = ResponseCache::new(Arc::new(clock.clone()));
        let ok = GatewayResponse::new(StatusCode::OK).with_body("catalog");

        assert!(cache.put("/products?page=1", &ok, Duration::from_secs(30)));
        assert_eq!(cache.get("/products?page=1"), Some(ok));
        assert_eq!(cache.get("/products?page=2"), None);

        clock.advance_secs(30);
        assert_eq!(cache.get("/products?page=1"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn keys_separate_services_and_principals() {
        let request = OutboundRequest {
            method: http::Method::GET,
            path: "/items".into(),
            query: Some("page=2".into()),
            headers: http::HeaderMap::new(),
            body: bytes::Bytes::new(),
        };
        let anonymous = ResponseCache::key_for("svc-a", &request, None);
        assert_eq!(anonymous, "svc-a|GET||/items?page=2");
        assert_ne!(anonymous, ResponseCache::key_for("svc-b", &request, None));
        assert_eq!(ResponseCache::key_for("svc-a", &request, Some("alice")), "svc-a|GET|@alice|/items?page=2");
        assert_ne!(
            ResponseCache::key_for("svc-a", &request, Some("alice")),
            ResponseCache::key_for("svc-a", &request, Some("bob"))
        );
    }

    #[test]
    fn non_success_is_not_cached() {
        let cache = ResponseCache::default();
        let failed = GatewayResponse::new(StatusCode::BAD_GATEWAY);
        assert!(!cache.put("/products", &failed, Duration::from_secs(30)));
        assert!(cache.is_empty());
    }

    #[test]
    fn purge_removes_only_expired() {
        let clock = ManualClock::starting_at(0);
        let cache = ResponseCache::new(Arc::new(clock.clone()));
        let ok = GatewayResponse::new(StatusCode::OK);
        cache.put("/short", &ok, Duration::from_secs(1));
        cache.put("/long", &ok, Duration::from_secs(60));

        clock.advance_secs(5);
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("/long").is_some());
    }
}
