#![forbid(unsafe_code)]

//! # switchyard
//!
//! In-process API gateway core: route matching, multi-tier rate limiting,
//! request/response transformation, ordered hooks, and backend forwarding with
//! per-attempt timeouts and retries.
//!
//! ## Features
//!
//! - **Route table** with exact, `/*` wildcard and `{param}` patterns, lock-free reads
//! - **Rate limiting** with sliding window, fixed window and token bucket algorithms
//! - **Hooks** run in registration order before forwarding and after the response
//! - **Forwarding** through a pluggable [`BackendLocator`] with timeout and backoff
//! - **Response cache** for GET routes that opt in
//! - **Telemetry** as a `tower::Service<GatewayEvent>` sink
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use async_trait::async_trait;
//! use http::{Method, StatusCode};
//! use switchyard::{
//!     BackendLocator, ForwardError, Gateway, GatewayResponse, InboundRequest, OutboundRequest,
//!     RouteConfig,
//! };
//!
//! struct Static;
//!
//! #[async_trait]
//! impl BackendLocator for Static {
//!     async fn resolve(&self, service: &str) -> Result<String, ForwardError> {
//!         Ok(format!("http://{service}.svc"))
//!     }
//!
//!     async fn call(
//!         &self,
//!         _address: &str,
//!         _request: &OutboundRequest,
//!         _timeout: Duration,
//!     ) -> Result<GatewayResponse, ForwardError> {
//!         Ok(GatewayResponse::new(StatusCode::OK).with_body("[]"))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let gateway = Gateway::builder()
//!         .route(RouteConfig::new("/api/v1/invoices/*", "billing-service").rate_limit(2))
//!         .locator(Arc::new(Static))
//!         .build()
//!         .unwrap();
//!
//!     let response = gateway.handle(InboundRequest::new(Method::GET, "/api/v1/invoices/7")).await;
//!     assert_eq!(response.status, StatusCode::OK);
//!     gateway.shutdown().await;
//! }
//! ```

pub mod backoff;
pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod forward;
pub mod gateway;
pub mod hooks;
pub mod message;
pub mod prelude;
pub mod rate_limit;
pub mod retry;
pub mod route;
pub mod sleeper;
pub mod telemetry;
pub mod timeout;
pub mod transform;

// Re-exports
pub use backoff::{Backoff, Jitter};
pub use cache::ResponseCache;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{ConfigError, GatewayConfig, RouteSpec, RuleSpec};
pub use context::{CorrelationContext, Stage};
pub use error::{ErrorBody, GatewayError};
pub use forward::{BackendLocator, ForwardError, ServiceForwarder};
pub use gateway::{Gateway, GatewayBuilder, GatewayStats};
pub use hooks::{HookError, HookPipeline, HookStage, PostResponseHook, PreRequestHook};
pub use message::{BackendResponse, GatewayResponse, InboundRequest, OutboundRequest};
pub use rate_limit::{Decision, DenyReason, KeyScope, RateLimitRule, RateLimiter, Strategy};
pub use retry::RetryPolicy;
pub use route::{RouteConfig, RouteMatch, RouteTable};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use timeout::TimeoutPolicy;
