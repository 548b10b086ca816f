//! Convenient re-exports for embedding the gateway.
pub use crate::{
    backoff::{Backoff, Jitter},
    clock::{Clock, ManualClock},
    config::GatewayConfig,
    error::GatewayError,
    forward::{BackendLocator, ForwardError},
    gateway::{Gateway, GatewayBuilder, GatewayStats},
    hooks::{HookError, PostResponseHook, PreRequestHook},
    message::{GatewayResponse, InboundRequest, OutboundRequest},
    rate_limit::{KeyScope, RateLimitRule, Strategy},
    retry::RetryPolicy,
    route::RouteConfig,
    telemetry::{GatewayEvent, LogSink, MemorySink, NullSink},
};
