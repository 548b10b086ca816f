//! Request and response values flowing through the gateway.

use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, IntoHeaderName, CONTENT_TYPE};
use http::{Method, StatusCode};
use serde::Serialize;
use std::net::IpAddr;

/// Inbound correlation header.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Request as handed to the gateway by the accepting HTTP server.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    /// HTTP verb.
    pub method: Method,
    /// Path without the query string.
    pub path: String,
    /// Raw query string, without the leading `?`.
    pub query: Option<String>,
    /// Inbound headers.
    pub headers: HeaderMap,
    /// Request body (empty for GET and friends).
    pub body: Bytes,
    /// Peer address as seen by the server.
    pub client_addr: Option<IpAddr>,
    /// Authenticated principal, set by the identity layer in front of the gateway.
    pub principal: Option<String>,
}

impl InboundRequest {
    /// Create a request with no headers, body, or caller information.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            client_addr: None,
            principal: None,
        }
    }

    /// Set a header, replacing any previous value.
    pub fn with_header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the query string.
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the peer address.
    pub fn from_client(mut self, addr: IpAddr) -> Self {
        self.client_addr = Some(addr);
        self
    }

    /// Mark the request as authenticated.
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// Caller-supplied correlation id, if present and non-empty.
    pub fn correlation_id(&self) -> Option<&str> {
        self.headers
            .get(CORRELATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Identity used for rate limiting: principal if authenticated, else client IP.
    pub fn caller_identifier(&self) -> String {
        match (&self.principal, self.client_addr) {
            (Some(principal), _) => principal.clone(),
            (None, Some(addr)) => addr.to_string(),
            (None, None) => "anonymous".to_string(),
        }
    }
}

/// Normalized request sent to a backend.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// HTTP verb, passed through.
    pub method: Method,
    /// Resolved backend path.
    pub path: String,
    /// Query string, passed through.
    pub query: Option<String>,
    /// Merged headers.
    pub headers: HeaderMap,
    /// Body, passed through.
    pub body: Bytes,
}

impl OutboundRequest {
    /// `path?query` as it goes on the wire.
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(q) if !q.is_empty() => format!("{}?{}", self.path, q),
            _ => self.path.clone(),
        }
    }
}

/// Response returned to the caller. Backends answer with the same shape.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    /// Status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
}

/// What a [`crate::BackendLocator`] returns.
pub type BackendResponse = GatewayResponse;

impl GatewayResponse {
    /// Empty response with the given status.
    pub fn new(status: StatusCode) -> Self {
        Self { status, headers: HeaderMap::new(), body: Bytes::new() }
    }

    /// Replace the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a header, replacing any previous value.
    pub fn with_header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// JSON response; falls back to an empty body if serialization fails.
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_default();
        Self::new(status)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .with_body(body)
    }

    /// Header value as a string, if present and valid ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn caller_identifier_prefers_principal() {
        let ip = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5));
        let anon = InboundRequest::new(Method::GET, "/").from_client(ip);
        assert_eq!(anon.caller_identifier(), "203.0.113.5");
        let authed = anon.with_principal("user-7");
        assert_eq!(authed.caller_identifier(), "user-7");
        assert_eq!(InboundRequest::new(Method::GET, "/").caller_identifier(), "anonymous");
    }

    #[test]
    fn blank_correlation_header_is_ignored() {
        let req = InboundRequest::new(Method::GET, "/")
            .with_header(CORRELATION_HEADER, HeaderValue::from_static("  "));
        assert!(req.correlation_id().is_none());
        let req = req.with_header(CORRELATION_HEADER, HeaderValue::from_static("abc-1"));
        assert_eq!(req.correlation_id(), Some("abc-1"));
    }

    #[test]
    fn path_and_query_skips_empty_query() {
        let mut out = OutboundRequest {
            method: Method::GET,
            path: "/v1/invoices".into(),
            query: Some(String::new()),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };
        assert_eq!(out.path_and_query(), "/v1/invoices");
        out.query = Some("page=2".into());
        assert_eq!(out.path_and_query(), "/v1/invoices?page=2");
    }
}
