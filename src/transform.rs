//! Request normalization and response decoration.

use crate::context::CorrelationContext;
use crate::error::GatewayError;
use crate::message::{GatewayResponse, InboundRequest, OutboundRequest, CORRELATION_HEADER};
use crate::route::RouteConfig;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Header carrying the chain of client addresses.
pub const FORWARDED_FOR: &str = "x-forwarded-for";
/// Header carrying the wall-clock time the gateway received the request.
pub const REQUEST_START: &str = "x-request-start";

const SECURITY_HEADERS: [(&str, &str); 5] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("x-xss-protection", "1; mode=block"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    ("content-security-policy", "default-src 'self'"),
];

/// Builds the outbound request for a matched route.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestTransformer;

impl RequestTransformer {
    /// Merge headers, resolve the backend path and pass method, query and body through.
    ///
    /// Route static headers replace inbound values for the names they set; everything
    /// else the caller sent is kept.
    pub fn transform(
        &self,
        request: &InboundRequest,
        route: &RouteConfig,
        ctx: &CorrelationContext,
    ) -> Result<OutboundRequest, GatewayError> {
        let mut headers = request.headers.clone();
        for name in route.headers.keys() {
            headers.remove(name);
        }
        for (name, value) in &route.headers {
            headers.append(name, value.clone());
        }
        headers.insert(CORRELATION_HEADER, header_value(&ctx.correlation_id)?);

        if let Some(addr) = request.client_addr {
            let chain = match request.headers.get(FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                Some(prior) if !prior.trim().is_empty() => format!("{prior}, {addr}"),
                _ => addr.to_string(),
            };
            headers.insert(FORWARDED_FOR, header_value(&chain)?);
        }
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        headers.insert(REQUEST_START, header_value(&format!("t={}", now.as_millis()))?);

        Ok(OutboundRequest {
            method: request.method.clone(),
            path: target_path(route, &request.path),
            query: request.query.clone(),
            headers,
            body: request.body.clone(),
        })
    }
}

/// `target_path` if set, else the inbound path. For a `/*` route the part of the path
/// below the prefix is appended to `target_path`.
fn target_path(route: &RouteConfig, path: &str) -> String {
    let Some(target) = &route.target_path else {
        return path.to_owned();
    };
    match route.wildcard_prefix().and_then(|prefix| path.strip_prefix(prefix)) {
        Some(rest) if !rest.is_empty() => format!("{}{}", target.trim_end_matches('/'), rest),
        _ => target.clone(),
    }
}

fn header_value(value: &str) -> Result<HeaderValue, GatewayError> {
    HeaderValue::from_str(value).map_err(|_| GatewayError::Internal(format!("invalid header value {value:?}")))
}

/// Attaches gateway headers to every response.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseTransformer;

impl ResponseTransformer {
    /// Security headers always; route-identifying headers once a route resolved.
    pub fn transform(&self, response: &mut GatewayResponse, ctx: &CorrelationContext) {
        for (name, value) in SECURITY_HEADERS {
            response.headers.insert(name, HeaderValue::from_static(value));
        }
        if let Some(service) = &ctx.service {
            set_lossy(&mut response.headers, "x-gateway-service", service);
        }
        if let Some(pattern) = &ctx.route_pattern {
            set_lossy(&mut response.headers, "x-gateway-route", pattern);
        }
        if ctx.route_pattern.is_some() {
            set_lossy(&mut response.headers, CORRELATION_HEADER, &ctx.correlation_id);
        }
    }

    /// Processing time in milliseconds and the gateway version.
    pub fn stamp_timing(&self, response: &mut GatewayResponse, elapsed: Duration) {
        let millis = format!("{:.3}", elapsed.as_secs_f64() * 1000.0);
        set_lossy(&mut response.headers, "x-gateway-time", &millis);
        response
            .headers
            .insert("x-gateway-version", HeaderValue::from_static(env!("CARGO_PKG_VERSION")));
    }
}

fn set_lossy(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}
