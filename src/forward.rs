//! Backend forwarding with per-attempt deadlines and bounded retries.
//!
//! The gateway never talks to a transport directly. A [`BackendLocator`] resolves a
//! logical service name to an address and performs the call; the forwarder wraps every
//! attempt in a [`TimeoutPolicy`] and retries transport failures with backoff.
//!
//! Any response the backend produces, whatever its status, is returned unchanged.
//! Only transport failures and timeouts count as errors.

use crate::error::GatewayError;
use crate::message::{BackendResponse, OutboundRequest};
use crate::retry::RetryPolicy;
use crate::route::RouteConfig;
use crate::timeout::{TimeoutError, TimeoutPolicy};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Transport-level failure talking to a backend.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ForwardError {
    /// The service name could not be resolved to an address.
    #[error("cannot resolve service {service}: {message}")]
    Resolve {
        /// Logical service name.
        service: String,
        /// Locator-supplied detail.
        message: String,
    },
    /// The backend could not be reached or dropped the connection.
    #[error("connection to {address} failed: {message}")]
    Connect {
        /// Resolved address.
        address: String,
        /// Transport-supplied detail.
        message: String,
    },
    /// The attempt did not complete within the route timeout.
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
}

impl ForwardError {
    /// Resolution failures are not retried; nothing changes between attempts.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ForwardError::Resolve { .. })
    }
}

/// Service discovery and transport, supplied by the embedding application.
#[async_trait]
pub trait BackendLocator: Send + Sync {
    /// Resolve a logical service name to an address.
    async fn resolve(&self, service: &str) -> Result<String, ForwardError>;

    /// Perform one call. `timeout` is advisory; the forwarder enforces it regardless.
    async fn call(
        &self,
        address: &str,
        request: &OutboundRequest,
        timeout: Duration,
    ) -> Result<BackendResponse, ForwardError>;

    /// Release pooled connections. Called once from `Gateway::shutdown`.
    async fn shutdown(&self) {}
}

/// Calls backends through a locator under the route's timeout and retry budget.
#[derive(Clone)]
pub struct ServiceForwarder {
    locator: Arc<dyn BackendLocator>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ServiceForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceForwarder").field("retry", &self.retry).finish_non_exhaustive()
    }
}

impl ServiceForwarder {
    /// Forwarder with the default retry schedule.
    pub fn new(locator: Arc<dyn BackendLocator>) -> Self {
        Self { locator, retry: RetryPolicy::default() }
    }

    /// Override the backoff/jitter/sleeper used between attempts.
    ///
    /// The attempt budget is always taken from the route.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The locator this forwarder calls through.
    pub fn locator(&self) -> &Arc<dyn BackendLocator> {
        &self.locator
    }

    /// Forward `request` to the route's service.
    ///
    /// Makes up to `route.retries + 1` attempts. Each attempt, resolution included, is
    /// bounded by `route.timeout`.
    pub async fn forward(
        &self,
        request: &OutboundRequest,
        route: &RouteConfig,
    ) -> Result<BackendResponse, GatewayError> {
        let service = route.service_name.as_str();
        let timeout = TimeoutPolicy::new(route.timeout);
        let policy = self.retry.clone().max_attempts(route.retries.saturating_add(1));

        let result = policy
            .execute(
                |attempt| {
                    let attempt_fut = async move {
                        let address = self.locator.resolve(service).await?;
                        debug!(target: "switchyard::forward", service, %address, attempt, "calling backend");
                        self.locator.call(&address, request, timeout.duration()).await
                    };
                    // Resolution and the call share one deadline.
                    async move { timeout.run(attempt_fut).await? }
                },
                ForwardError::is_transient,
            )
            .await;

        result.map_err(|e| {
            warn!(target: "switchyard::forward", service, error = %e, "backend unavailable");
            GatewayError::BackendUnavailable { service: service.to_owned(), reason: e.to_string() }
        })
    }

    /// Close the locator's resources.
    pub async fn shutdown(&self) {
        self.locator.shutdown().await;
    }
}
