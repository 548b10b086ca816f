//! Route registration and matching.
//!
//! Routes are scanned in registration order and the first match wins, so overlapping
//! patterns resolve to whichever was registered first. A pattern is one of:
//!
//! - an exact path (`/health`);
//! - a suffix wildcard (`/api/v1/users/*`), matching the prefix itself and anything
//!   below it on a segment boundary;
//! - a parameterized template (`/api/v1/users/{id}`), matching the same number of
//!   segments with `{name}` standing in for any non-empty segment.
//!
//! Reads never lock: the table is an `ArcSwap` snapshot replaced on registration.

use crate::error::GatewayError;
use arc_swap::ArcSwap;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Method;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default per-attempt backend timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Verbs a route accepts when none are given.
pub fn default_methods() -> Vec<Method> {
    vec![
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::DELETE,
        Method::HEAD,
        Method::OPTIONS,
    ]
}

/// Errors from building a route.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// The pattern was empty or did not start with `/`.
    #[error("route pattern must start with '/' (got {0:?})")]
    InvalidPattern(String),
    /// A static header name was not a valid HTTP header name.
    #[error("invalid header name {0:?}")]
    InvalidHeaderName(String),
    /// A static header value contained forbidden bytes.
    #[error("invalid value for header {0:?}")]
    InvalidHeaderValue(String),
}

/// One registered route.
#[derive(Debug, Clone)]
pub struct RouteConfig {
    /// Pattern matched against inbound paths. Unique within a table.
    pub path_pattern: String,
    /// Logical backend service name handed to the locator.
    pub service_name: String,
    /// Backend path; defaults to the inbound path.
    pub target_path: Option<String>,
    /// Accepted verbs.
    pub methods: Vec<Method>,
    /// Static headers added to every outbound request.
    pub headers: HeaderMap,
    /// Convenience per-minute limit for this route.
    pub rate_limit: Option<u32>,
    /// Reject callers without a principal.
    pub auth_required: bool,
    /// Per-attempt backend timeout.
    pub timeout: Duration,
    /// Extra attempts on transport failure.
    pub retries: u32,
    /// Cache successful GET responses for this long.
    pub cache_ttl: Option<Duration>,
    /// Reserved for weighted routing; not used by matching.
    pub weight: u32,
}

impl RouteConfig {
    /// Route forwarding `path_pattern` to `service_name` with defaults everywhere else.
    pub fn new(path_pattern: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            path_pattern: path_pattern.into(),
            service_name: service_name.into(),
            target_path: None,
            methods: default_methods(),
            headers: HeaderMap::new(),
            rate_limit: None,
            auth_required: false,
            timeout: DEFAULT_TIMEOUT,
            retries: 0,
            cache_ttl: None,
            weight: 1,
        }
    }

    /// Rewrite the backend path.
    pub fn target_path(mut self, path: impl Into<String>) -> Self {
        self.target_path = Some(path.into());
        self
    }

    /// Restrict accepted verbs.
    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    /// Add a static outbound header.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, RouteError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| RouteError::InvalidHeaderName(name.to_string()))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| RouteError::InvalidHeaderValue(name.to_string()))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Limit this route to `per_minute` requests per caller.
    pub fn rate_limit(mut self, per_minute: u32) -> Self {
        self.rate_limit = Some(per_minute);
        self
    }

    /// Require an authenticated principal.
    pub fn require_auth(mut self) -> Self {
        self.auth_required = true;
        self
    }

    /// Per-attempt backend timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Extra attempts on transport failure.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Cache successful GET responses.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Routing weight.
    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Reject malformed patterns.
    pub fn validate(&self) -> Result<(), RouteError> {
        if !self.path_pattern.starts_with('/') {
            return Err(RouteError::InvalidPattern(self.path_pattern.clone()));
        }
        Ok(())
    }

    /// Whether `method` is accepted.
    pub fn allows(&self, method: &Method) -> bool {
        self.methods.iter().any(|m| m == method)
    }

    /// The literal prefix of a `/*` pattern.
    pub fn wildcard_prefix(&self) -> Option<&str> {
        self.path_pattern.strip_suffix("/*")
    }
}

/// Captured `{name}` segments.
pub type PathParams = Vec<(String, String)>;

/// Match `path` against `pattern`, returning captured parameters on success.
pub fn match_pattern(pattern: &str, path: &str) -> Option<PathParams> {
    if pattern == path {
        return Some(Vec::new());
    }

    if let Some(prefix) = pattern.strip_suffix("/*") {
        let rest = path.strip_prefix(prefix)?;
        return (rest.is_empty() || rest.starts_with('/')).then(Vec::new);
    }

    if pattern.contains('{') && pattern.contains('}') {
        let pattern_segments: Vec<&str> = pattern.split('/').collect();
        let path_segments: Vec<&str> = path.split('/').collect();
        if pattern_segments.len() != path_segments.len() {
            return None;
        }
        let mut params = Vec::new();
        for (expected, actual) in pattern_segments.iter().zip(&path_segments) {
            match expected.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => {
                    if actual.is_empty() {
                        return None;
                    }
                    params.push((name.to_string(), (*actual).to_string()));
                }
                None if expected == actual => {}
                None => return None,
            }
        }
        return Some(params);
    }

    None
}

/// Result of a successful lookup.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// The winning route.
    pub route: Arc<RouteConfig>,
    /// Values captured by `{name}` segments.
    pub params: PathParams,
}

impl RouteMatch {
    /// Captured parameter by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

/// Ordered set of routes.
#[derive(Debug)]
pub struct RouteTable {
    routes: ArcSwap<Vec<Arc<RouteConfig>>>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self { routes: ArcSwap::from_pointee(Vec::new()) }
    }
}

impl RouteTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a route, replacing an existing one with the same pattern in place.
    ///
    /// Returns the replaced route, if any.
    pub fn register(&self, route: RouteConfig) -> Option<Arc<RouteConfig>> {
        let route = Arc::new(route);
        let previous = self.routes.rcu(|current| {
            let mut next: Vec<Arc<RouteConfig>> = current.as_ref().clone();
            match next.iter_mut().find(|r| r.path_pattern == route.path_pattern) {
                Some(slot) => *slot = route.clone(),
                None => next.push(route.clone()),
            }
            next
        });
        let replaced = previous.iter().find(|r| r.path_pattern == route.path_pattern).cloned();
        if replaced.is_some() {
            warn!(target: "switchyard::route", pattern = %route.path_pattern, "route pattern replaced; last registration wins");
        } else {
            debug!(target: "switchyard::route", pattern = %route.path_pattern, service = %route.service_name, "route registered");
        }
        replaced
    }

    /// First route accepting `method` whose pattern matches `path`.
    pub fn match_route(&self, method: &Method, path: &str) -> Result<RouteMatch, GatewayError> {
        let snapshot = self.routes.load();
        snapshot
            .iter()
            .filter(|route| route.allows(method))
            .find_map(|route| {
                match_pattern(&route.path_pattern, path)
                    .map(|params| RouteMatch { route: route.clone(), params })
            })
            .ok_or_else(|| GatewayError::RouteNotFound { method: method.clone(), path: path.into() })
    }

    /// Snapshot of registered routes in scan order.
    pub fn routes(&self) -> Vec<Arc<RouteConfig>> {
        self.routes.load().as_ref().clone()
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.load().len()
    }

    /// Whether no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(routes: Vec<RouteConfig>) -> RouteTable {
        let table = RouteTable::new();
        for r in routes {
            table.register(r);
        }
        table
    }

    #[test]
    fn wildcard_matches_descendants_only_on_segment_boundary() {
        let t = table(vec![RouteConfig::new("/api/v1/users/*", "users")]);
        assert!(t.match_route(&Method::GET, "/api/v1/users/42/roles").is_ok());
        assert!(t.match_route(&Method::GET, "/api/v1/users").is_ok());
        assert!(t.match_route(&Method::GET, "/api/v1/usersx").is_err());
    }

    #[test]
    fn parameterized_requires_equal_segment_count() {
        let t = table(vec![RouteConfig::new("/api/v1/users/{id}", "users")]);
        let m = t.match_route(&Method::GET, "/api/v1/users/42").unwrap();
        assert_eq!(m.param("id"), Some("42"));
        assert!(t.match_route(&Method::GET, "/api/v1/users/42/roles").is_err());
        assert!(t.match_route(&Method::GET, "/api/v1/users/").is_err());
    }

    #[test]
    fn first_registered_wins_on_overlap() {
        let t = table(vec![
            RouteConfig::new("/api/v1/users/*", "wild"),
            RouteConfig::new("/api/v1/users/{id}", "param"),
        ]);
        let m = t.match_route(&Method::GET, "/api/v1/users/42").unwrap();
        assert_eq!(m.route.service_name, "wild");
    }

    #[test]
    fn reregistering_keeps_one_route_with_latest_config() {
        let t = table(vec![
            RouteConfig::new("/orders/*", "orders-v1"),
            RouteConfig::new("/payments/*", "payments"),
        ]);
        let replaced = t.register(RouteConfig::new("/orders/*", "orders-v2"));
        assert_eq!(replaced.unwrap().service_name, "orders-v1");
        assert_eq!(t.len(), 2);
        let m = t.match_route(&Method::POST, "/orders/9").unwrap();
        assert_eq!(m.route.service_name, "orders-v2");
        assert_eq!(t.routes()[0].path_pattern, "/orders/*");
    }

    #[test]
    fn method_filter_applies_before_pattern() {
        let t = table(vec![
            RouteConfig::new("/reports/*", "reports-read").methods([Method::GET]),
            RouteConfig::new("/reports/{id}", "reports-write").methods([Method::POST]),
        ]);
        assert_eq!(t.match_route(&Method::GET, "/reports/1").unwrap().route.service_name, "reports-read");
        assert_eq!(
            t.match_route(&Method::POST, "/reports/1").unwrap().route.service_name,
            "reports-write"
        );
        let err = t.match_route(&Method::DELETE, "/reports/1").unwrap_err();
        assert!(matches!(err, GatewayError::RouteNotFound { .. }));
    }

    #[test]
    fn exact_pattern_only_matches_itself() {
        assert_eq!(match_pattern("/health", "/health"), Some(vec![]));
        assert!(match_pattern("/health", "/health/db").is_none());
        assert!(match_pattern("/*", "/anything/at/all").is_some());
    }

    #[test]
    fn header_validation_rejects_bad_names() {
        let err = RouteConfig::new("/x", "svc").header("bad header", "v").unwrap_err();
        assert!(matches!(err, RouteError::InvalidHeaderName(_)));
        let ok = RouteConfig::new("/x", "svc").header("X-Tenant", "acme").unwrap();
        assert_eq!(ok.headers.get("x-tenant").unwrap(), "acme");
        assert!(RouteConfig::new("x", "svc").validate().is_err());
    }
}
