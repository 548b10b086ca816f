//! Gateway error taxonomy and the structured body every error response carries.

use crate::hooks::HookStage;
use crate::rate_limit::DenyReason;
use http::{Method, StatusCode};
use serde::Serialize;
use std::time::Duration;

/// Everything that can stop a request before a backend response is returned.
///
/// All variants are converted into a response at the gateway boundary; none of them
/// escape to the transport layer. Backend application errors (a well-formed 4xx/5xx
/// from the service) are not represented here, they are passed through untouched.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum GatewayError {
    /// No registered route matched the method and path.
    #[error("no route matches {method} {path}")]
    RouteNotFound {
        /// Request method.
        method: Method,
        /// Request path.
        path: String,
    },
    /// The route requires an authenticated principal and none was supplied.
    #[error("route {route} requires an authenticated caller")]
    Unauthenticated {
        /// Pattern of the matched route.
        route: String,
    },
    /// A rate-limit rule denied the request.
    #[error("rate limit exceeded for {key}: {reason}")]
    RateLimited {
        /// Resolved limiter key.
        key: String,
        /// Which tier or bucket refused.
        reason: DenyReason,
        /// How long the caller should wait.
        retry_after: Duration,
    },
    /// The backend timed out or could not be reached.
    #[error("service {service} unavailable: {reason}")]
    BackendUnavailable {
        /// Logical service name.
        service: String,
        /// Last transport failure.
        reason: String,
    },
    /// A pre-request or post-response hook returned an error.
    #[error("{stage} hook {hook} failed: {message}")]
    HookFailure {
        /// Name reported by the hook.
        hook: String,
        /// Pipeline the hook belongs to.
        stage: HookStage,
        /// Hook-supplied detail.
        message: String,
    },
    /// Anything else (bad header produced by a hook, etc.).
    #[error("internal gateway error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status for the error response.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::HookFailure { .. } | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RouteNotFound { .. } => "route_not_found",
            Self::Unauthenticated { .. } => "unauthenticated",
            Self::RateLimited { .. } => "rate_limited",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::HookFailure { .. } => "hook_failure",
            Self::Internal(_) => "internal_error",
        }
    }

    /// `Retry-After` value in whole seconds, rounded up and never below 1.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(ceil_secs(*retry_after)),
            _ => None,
        }
    }

    /// Check if this error is a rate-limit rejection.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Build the JSON body sent to the caller.
    pub fn to_body(&self, correlation_id: Option<&str>) -> ErrorBody {
        ErrorBody {
            status: self.status().as_u16(),
            error: self.code(),
            detail: self.to_string(),
            correlation_id: correlation_id.map(str::to_owned),
        }
    }
}

pub(crate) fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}

/// Structured error payload. Never a stack trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    /// Numeric HTTP status.
    pub status: u16,
    /// Error code from [`GatewayError::code`].
    pub error: &'static str,
    /// Human-readable detail.
    pub detail: String,
    /// Correlation id of the failed request, when one was assigned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}
