//! The request orchestrator.
//!
//! Every request walks the same stages:
//!
//! ```text
//! Received → RouteResolved → RateChecked → PreHooksRun → Transformed
//!          → Forwarded → ResponseTransformed → PostHooksRun → Sent
//! ```
//!
//! A failure at any stage short-circuits to `Sent` with a structured JSON error body.
//! [`Gateway::handle`] never fails: every [`GatewayError`] becomes a response here.

use crate::cache::ResponseCache;
use crate::clock::{Clock, MonotonicClock};
use crate::config::{ConfigError, GatewayConfig, DEFAULT_KEY_TTL_SECS, DEFAULT_SWEEP_INTERVAL_SECS};
use crate::context::{generate_correlation_id, CorrelationContext, Stage};
use crate::error::GatewayError;
use crate::forward::{BackendLocator, ServiceForwarder};
use crate::hooks::{HookPipeline, PostResponseHook, PreRequestHook};
use crate::message::{GatewayResponse, InboundRequest};
use crate::rate_limit::{Admission, KeyScope, RateLimitRule, RateLimiter};
use crate::retry::RetryPolicy;
use crate::route::{RouteConfig, RouteError, RouteTable};
use crate::telemetry::{emit_best_effort, GatewayEvent, NullSink, TelemetrySink};
use crate::transform::{RequestTransformer, ResponseTransformer};
use futures::future::BoxFuture;
use http::header::{HeaderValue, RETRY_AFTER};
use http::Method;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

/// Point-in-time counters for health endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    /// Registered routes.
    pub routes: usize,
    /// Configured rate-limit rules (route convenience limits excluded).
    pub rate_limit_rules: usize,
    /// Limiter keys currently holding state.
    pub tracked_keys: usize,
    /// Pre-request hooks.
    pub pre_hooks: usize,
    /// Post-response hooks.
    pub post_hooks: usize,
    /// Requests handled since start.
    pub requests_total: u64,
    /// Requests answered with a gateway error.
    pub requests_rejected: u64,
}

struct Inner<S> {
    routes: RouteTable,
    limiter: RateLimiter,
    hooks: HookPipeline,
    forwarder: ServiceForwarder,
    cache: ResponseCache,
    sink: S,
    requests_total: AtomicU64,
    requests_rejected: AtomicU64,
    closed: AtomicBool,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<S> Inner<S> {
    fn stop_sweeper(&self) {
        if let Some(handle) = self.sweeper.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}

impl<S> Drop for Inner<S> {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

/// In-process API gateway. Cheap to clone; clones share all state.
pub struct Gateway<S = NullSink> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for Gateway<S> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<S> std::fmt::Debug for Gateway<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("routes", &self.inner.routes.len())
            .field("hooks", &self.inner.hooks)
            .finish_non_exhaustive()
    }
}

struct Processed {
    response: GatewayResponse,
    cache_hit: bool,
}

impl Gateway {
    /// Start building a gateway.
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }
}

impl<S> Gateway<S>
where
    S: TelemetrySink + Sync,
    S::Future: Send,
{
    /// Handle one request end to end. Always produces a response.
    pub async fn handle(&self, mut request: InboundRequest) -> GatewayResponse {
        let inner = &self.inner;
        inner.requests_total.fetch_add(1, Ordering::Relaxed);

        let correlation_id = request
            .correlation_id()
            .map(str::to_owned)
            .unwrap_or_else(|| generate_correlation_id(request.client_addr));
        let mut ctx = CorrelationContext::new(correlation_id, request.caller_identifier());
        let span = info_span!(
            target: "switchyard::gateway",
            "request",
            correlation_id = %ctx.correlation_id,
            method = %request.method,
            path = %request.path,
        );

        let (mut response, cache_hit) =
            match self.process(&mut request, &mut ctx).instrument(span.clone()).await {
                Ok(Processed { response, cache_hit }) => (response, cache_hit),
                Err(err) => {
                    inner.requests_rejected.fetch_add(1, Ordering::Relaxed);
                    span.in_scope(|| self.record_failure(&err, &ctx));
                    if let Some(event) = failure_event(&err, &ctx) {
                        emit_best_effort(inner.sink.clone(), event).await;
                    }
                    (error_response(&err, &ctx), false)
                }
            };

        ResponseTransformer.stamp_timing(&mut response, ctx.elapsed());
        ctx.mark(Stage::Sent);
        debug!(
            target: "switchyard::gateway",
            correlation_id = %ctx.correlation_id,
            status = response.status.as_u16(),
            elapsed_us = ctx.elapsed().as_micros() as u64,
            "request completed"
        );
        emit_best_effort(
            inner.sink.clone(),
            GatewayEvent::RequestCompleted {
                route: ctx.route_pattern.clone(),
                status: response.status.as_u16(),
                duration: ctx.elapsed(),
                cache_hit,
            },
        )
        .await;
        response
    }

    async fn process(
        &self,
        request: &mut InboundRequest,
        ctx: &mut CorrelationContext,
    ) -> Result<Processed, GatewayError> {
        let inner = &self.inner;

        let route = inner.routes.match_route(&request.method, &request.path)?.route;
        ctx.resolve(&route.path_pattern, &route.service_name);

        if route.auth_required && request.principal.is_none() {
            return Err(GatewayError::Unauthenticated { route: route.path_pattern.clone() });
        }

        let admission = self.check_limits(&route, request)?;
        ctx.mark(Stage::RateChecked);

        inner.hooks.run_pre(request, &route).await?;
        ctx.mark(Stage::PreHooksRun);

        let outbound = RequestTransformer.transform(request, &route, ctx)?;
        ctx.mark(Stage::Transformed);

        let cache_key = (route.cache_ttl.is_some() && outbound.method == Method::GET)
            .then(|| ResponseCache::key_for(&route.service_name, &outbound, request.principal.as_deref()));
        let cached = cache_key.as_deref().and_then(|key| inner.cache.get(key));
        let cache_hit = cached.is_some();
        let mut response = match cached {
            Some(hit) => hit,
            None => {
                let response = inner.forwarder.forward(&outbound, &route).await?;
                if let (Some(key), Some(ttl)) = (&cache_key, route.cache_ttl) {
                    inner.cache.put(key.clone(), &response, ttl);
                }
                response
            }
        };
        if cache_key.is_some() {
            let marker = if cache_hit { "HIT" } else { "MISS" };
            response.headers.insert("x-cache", HeaderValue::from_static(marker));
        }
        if response.status.is_client_error() || response.status.is_server_error() {
            debug!(target: "switchyard::gateway", service = %route.service_name, status = response.status.as_u16(), "passing backend error through");
            emit_best_effort(
                inner.sink.clone(),
                GatewayEvent::BackendError {
                    service: route.service_name.clone(),
                    status: response.status.as_u16(),
                },
            )
            .await;
        }
        ctx.mark(Stage::Forwarded);

        ResponseTransformer.transform(&mut response, ctx);
        if let Some(Admission { limit, remaining }) = admission {
            response.headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
            response.headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
        }
        ctx.mark(Stage::ResponseTransformed);

        inner.hooks.run_post(request, &mut response, &route).await?;
        ctx.mark(Stage::PostHooksRun);

        Ok(Processed { response, cache_hit })
    }

    /// The route's own per-minute limit first, then every configured rule covering the path.
    fn check_limits(
        &self,
        route: &RouteConfig,
        request: &InboundRequest,
    ) -> Result<Option<Admission>, GatewayError> {
        let route_rule = route.rate_limit.map(|per_minute| {
            RateLimitRule::per_minute(route.path_pattern.as_str(), per_minute).keyed_by(KeyScope::Route)
        });
        let limiter = &self.inner.limiter;
        limiter
            .check_request(route_rule.iter().chain(limiter.rules_for(&request.path)), request)
            .map_err(|rejection| GatewayError::RateLimited {
                key: rejection.key,
                reason: rejection.reason,
                retry_after: rejection.retry_after,
            })
    }

    fn record_failure(&self, err: &GatewayError, ctx: &CorrelationContext) {
        let route = ctx.route_pattern.as_deref().unwrap_or("-");
        match err {
            GatewayError::RouteNotFound { .. } => {
                debug!(target: "switchyard::gateway", error = %err, "no route")
            }
            GatewayError::Unauthenticated { .. } | GatewayError::RateLimited { .. } => {
                debug!(target: "switchyard::gateway", route, error = %err, "request rejected")
            }
            GatewayError::BackendUnavailable { .. } | GatewayError::HookFailure { .. } => {
                warn!(target: "switchyard::gateway", route, error = %err, "request failed")
            }
            GatewayError::Internal(_) => {
                warn!(target: "switchyard::gateway", route, error = %err, "internal error")
            }
        }
    }

    /// Register or replace a route at runtime.
    pub fn register(&self, route: RouteConfig) -> Result<Option<Arc<RouteConfig>>, RouteError> {
        route.validate()?;
        Ok(self.inner.routes.register(route))
    }

    /// Current counters.
    pub fn stats(&self) -> GatewayStats {
        let inner = &self.inner;
        GatewayStats {
            routes: inner.routes.len(),
            rate_limit_rules: inner.limiter.rules().len(),
            tracked_keys: inner.limiter.tracked_keys(),
            pre_hooks: inner.hooks.pre_len(),
            post_hooks: inner.hooks.post_len(),
            requests_total: inner.requests_total.load(Ordering::Relaxed),
            requests_rejected: inner.requests_rejected.load(Ordering::Relaxed),
        }
    }

    /// Stop the background sweeper and close the backend locator. Later calls do nothing.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.stop_sweeper();
        self.inner.forwarder.shutdown().await;
        info!(target: "switchyard::gateway", "gateway shut down");
    }

    /// Route table.
    pub fn routes(&self) -> &RouteTable {
        &self.inner.routes
    }

    /// Rate limiter.
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    /// Response cache.
    pub fn cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    /// Telemetry sink.
    pub fn sink(&self) -> &S {
        &self.inner.sink
    }
}

fn failure_event(err: &GatewayError, ctx: &CorrelationContext) -> Option<GatewayEvent> {
    match err {
        GatewayError::RouteNotFound { method, path } => {
            Some(GatewayEvent::RouteMiss { method: method.to_string(), path: path.clone() })
        }
        GatewayError::RateLimited { key, retry_after, .. } => Some(GatewayEvent::RateLimited {
            key: key.clone(),
            route: ctx.route_pattern.clone().unwrap_or_default(),
            retry_after: *retry_after,
        }),
        GatewayError::BackendUnavailable { service, reason } => Some(GatewayEvent::BackendUnavailable {
            service: service.clone(),
            reason: reason.clone(),
        }),
        GatewayError::HookFailure { hook, stage, .. } => {
            Some(GatewayEvent::HookFailed { hook: hook.clone(), stage: *stage })
        }
        _ => None,
    }
}

fn error_response(err: &GatewayError, ctx: &CorrelationContext) -> GatewayResponse {
    let mut response = GatewayResponse::json(err.status(), &err.to_body(Some(&ctx.correlation_id)));
    if let Some(secs) = err.retry_after_secs() {
        response.headers.insert(RETRY_AFTER, HeaderValue::from(secs));
    }
    ResponseTransformer.transform(&mut response, ctx);
    response
}

impl<S> tower::Service<InboundRequest> for Gateway<S>
where
    S: TelemetrySink + Sync,
    S::Future: Send,
{
    type Response = GatewayResponse;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<GatewayResponse, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: InboundRequest) -> Self::Future {
        let gateway = self.clone();
        Box::pin(async move { Ok(gateway.handle(request).await) })
    }
}

/// Builder for [`Gateway`].
pub struct GatewayBuilder<S = NullSink> {
    routes: Vec<RouteConfig>,
    rules: Vec<RateLimitRule>,
    hooks: HookPipeline,
    clock: Arc<dyn Clock>,
    locator: Option<Arc<dyn BackendLocator>>,
    retry: RetryPolicy,
    sink: S,
    key_ttl: Duration,
    sweep_interval: Option<Duration>,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayBuilder {
    /// Empty builder: no routes, no rules, no hooks, events discarded.
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            rules: Vec::new(),
            hooks: HookPipeline::new(),
            clock: Arc::new(MonotonicClock::default()),
            locator: None,
            retry: RetryPolicy::default(),
            sink: NullSink,
            key_ttl: Duration::from_secs(DEFAULT_KEY_TTL_SECS),
            sweep_interval: Some(Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS)),
        }
    }
}

impl<S> GatewayBuilder<S> {
    /// Add a route. Later routes with the same pattern replace earlier ones.
    pub fn route(mut self, route: RouteConfig) -> Self {
        self.routes.push(route);
        self
    }

    /// Add a rate-limit rule.
    pub fn rule(mut self, rule: RateLimitRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Append a pre-request hook.
    pub fn pre_hook(mut self, hook: impl PreRequestHook + 'static) -> Self {
        self.hooks.add_pre(Arc::new(hook));
        self
    }

    /// Append a post-response hook.
    pub fn post_hook(mut self, hook: impl PostResponseHook + 'static) -> Self {
        self.hooks.add_post(Arc::new(hook));
        self
    }

    /// Backend discovery and transport. Required.
    pub fn locator(mut self, locator: Arc<dyn BackendLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Clock for rate-limit windows and cache expiry.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Backoff, jitter and sleeper between backend attempts.
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Idle time after which limiter keys are dropped.
    pub fn key_ttl(mut self, ttl: Duration) -> Self {
        self.key_ttl = ttl;
        self
    }

    /// Pause between background sweeps.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Do not start the background sweeper.
    pub fn without_sweeper(mut self) -> Self {
        self.sweep_interval = None;
        self
    }

    /// Add the routes, rules and sweep settings of a loaded config.
    pub fn config(mut self, config: &GatewayConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        self.routes.extend(config.route_configs()?);
        self.rules.extend(config.rate_limit_rules()?);
        self.key_ttl = config.key_ttl();
        self.sweep_interval = Some(config.sweep_interval());
        info!(target: "switchyard::gateway", version = %config.version, routes = config.routes.len(), rules = config.rules.len(), "configuration loaded");
        Ok(self)
    }

    /// Send gateway events to `sink`.
    pub fn telemetry<T>(self, sink: T) -> GatewayBuilder<T> {
        GatewayBuilder {
            routes: self.routes,
            rules: self.rules,
            hooks: self.hooks,
            clock: self.clock,
            locator: self.locator,
            retry: self.retry,
            sink,
            key_ttl: self.key_ttl,
            sweep_interval: self.sweep_interval,
        }
    }
}

impl<S> GatewayBuilder<S>
where
    S: TelemetrySink + Sync,
    S::Future: Send,
{
    /// Validate routes and assemble the gateway.
    ///
    /// The idle-key sweeper is spawned only when called inside a tokio runtime.
    pub fn build(self) -> Result<Gateway<S>, ConfigError> {
        let locator = self.locator.ok_or(ConfigError::MissingLocator)?;

        let routes = RouteTable::new();
        for route in self.routes {
            route
                .validate()
                .map_err(|source| ConfigError::Route { pattern: route.path_pattern.clone(), source })?;
            routes.register(route);
        }

        let mut limiter = RateLimiter::new().with_shared_clock(self.clock.clone());
        for rule in self.rules {
            limiter.add_rule(rule);
        }

        let inner = Arc::new(Inner {
            routes,
            limiter,
            hooks: self.hooks,
            forwarder: ServiceForwarder::new(locator).with_retry(self.retry),
            cache: ResponseCache::new(self.clock),
            sink: self.sink,
            requests_total: AtomicU64::new(0),
            requests_rejected: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            sweeper: Mutex::new(None),
        });

        if let (Some(interval), Ok(runtime)) =
            (self.sweep_interval, tokio::runtime::Handle::try_current())
        {
            let handle = runtime.spawn(sweep(Arc::downgrade(&inner), interval, self.key_ttl));
            *inner.sweeper.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        }

        Ok(Gateway { inner })
    }
}

async fn sweep<S>(inner: Weak<Inner<S>>, interval: Duration, key_ttl: Duration)
where
    S: Send + Sync + 'static,
{
    let interval = interval.max(Duration::from_millis(1));
    loop {
        tokio::time::sleep(interval).await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let keys = inner.limiter.evict_idle(key_ttl);
        let cached = inner.cache.purge_expired();
        if keys > 0 || cached > 0 {
            debug!(target: "switchyard::gateway", keys, cached, "sweep removed stale state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::forward::ForwardError;
    use crate::message::OutboundRequest;
    use async_trait::async_trait;
    use http::StatusCode;

    #[derive(Debug, Default)]
    struct Echo;

    #[async_trait]
    impl BackendLocator for Echo {
        async fn resolve(&self, service: &str) -> Result<String, ForwardError> {
            Ok(service.to_owned())
        }

        async fn call(
            &self,
            address: &str,
            request: &OutboundRequest,
            _timeout: Duration,
        ) -> Result<GatewayResponse, ForwardError> {
            Ok(GatewayResponse::new(StatusCode::OK).with_body(format!("{address}{}", request.path)))
        }
    }

    fn gateway() -> Gateway {
        Gateway::builder()
            .route(RouteConfig::new("/orders", "sales").rate_limit(1))
            .locator(Arc::new(Echo))
            .clock(ManualClock::starting_at(0))
            .without_sweeper()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn stages_and_headers_on_success() {
        let gw = gateway();
        let response = gw.handle(InboundRequest::new(Method::GET, "/orders")).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(&response.body[..], b"sales/orders");
        assert_eq!(response.header("x-ratelimit-limit"), Some("1"));
        assert_eq!(response.header("x-ratelimit-remaining"), Some("0"));
        assert!(response.header("x-gateway-time").is_some());
    }

    #[tokio::test]
    async fn route_limit_rejects_with_retry_after() {
        let gw = gateway();
        gw.handle(InboundRequest::new(Method::GET, "/orders")).await;
        let response = gw.handle(InboundRequest::new(Method::GET, "/orders")).await;
        assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.header("retry-after"), Some("60"));
        assert_eq!(response.header("content-type"), Some("application/json"));

        let stats = gw.stats();
        assert_eq!((stats.requests_total, stats.requests_rejected), (2, 1));
        assert_eq!(stats.tracked_keys, 1);
    }

    #[test]
    fn build_requires_a_locator() {
        let err = Gateway::builder().without_sweeper().build().unwrap_err();
        assert!(matches!(err, ConfigError::MissingLocator));
    }

    #[tokio::test]
    async fn register_rejects_bad_patterns() {
        let gw = gateway();
        assert!(gw.register(RouteConfig::new("orders", "sales")).is_err());
        assert!(gw.register(RouteConfig::new("/invoices", "billing")).unwrap().is_none());
        assert_eq!(gw.stats().routes, 2);
    }

    #[tokio::test]
    async fn shutdown_stops_the_sweeper() {
        let gw = Gateway::builder()
            .locator(Arc::new(Echo))
            .sweep_interval(Duration::from_secs(1))
            .build()
            .unwrap();
        assert!(gw.inner.sweeper.lock().unwrap().is_some());
        gw.shutdown().await;
        assert!(gw.inner.sweeper.lock().unwrap().is_none());
        gw.shutdown().await;
    }
}
