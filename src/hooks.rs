//! Ordered pre-request and post-response callbacks.
//!
//! Hooks run one at a time in registration order. The first hook to fail aborts its
//! pipeline and the failure surfaces as [`GatewayError::HookFailure`]; a hook that
//! panics is reported the same way. The pipeline is
//! frozen once the gateway is built, so reads need no locking.

use crate::error::GatewayError;
use crate::message::{GatewayResponse, InboundRequest};
use crate::route::RouteConfig;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, trace};

/// Which pipeline a hook belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStage {
    /// Runs after rate limiting, before the request is transformed.
    PreRequest,
    /// Runs after the response is transformed, before it is sent.
    PostResponse,
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookStage::PreRequest => write!(f, "pre-request"),
            HookStage::PostResponse => write!(f, "post-response"),
        }
    }
}

/// Error returned by a hook.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    /// Build from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Callback run before the request is forwarded. May rewrite the request.
#[async_trait]
pub trait PreRequestHook: Send + Sync {
    /// Identity used in logs and in [`GatewayError::HookFailure`].
    fn name(&self) -> &str;

    /// Inspect or modify `request` for the matched `route`.
    async fn before(&self, request: &mut InboundRequest, route: &RouteConfig) -> Result<(), HookError>;
}

/// Callback run after the backend responded. May rewrite the response.
#[async_trait]
pub trait PostResponseHook: Send + Sync {
    /// Identity used in logs and in [`GatewayError::HookFailure`].
    fn name(&self) -> &str;

    /// Inspect or modify `response` produced for `request` on `route`.
    async fn after(
        &self,
        request: &InboundRequest,
        response: &mut GatewayResponse,
        route: &RouteConfig,
    ) -> Result<(), HookError>;
}

/// Both hook lists, in registration order.
#[derive(Clone, Default)]
pub struct HookPipeline {
    pre: Vec<Arc<dyn PreRequestHook>>,
    post: Vec<Arc<dyn PostResponseHook>>,
}

impl fmt::Debug for HookPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookPipeline")
            .field("pre", &self.pre.iter().map(|h| h.name()).collect::<Vec<_>>())
            .field("post", &self.post.iter().map(|h| h.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl HookPipeline {
    /// Empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pre-request hook.
    pub fn add_pre(&mut self, hook: Arc<dyn PreRequestHook>) {
        self.pre.push(hook);
    }

    /// Append a post-response hook.
    pub fn add_post(&mut self, hook: Arc<dyn PostResponseHook>) {
        self.post.push(hook);
    }

    /// Number of pre-request hooks.
    pub fn pre_len(&self) -> usize {
        self.pre.len()
    }

    /// Number of post-response hooks.
    pub fn post_len(&self) -> usize {
        self.post.len()
    }

    /// Run every pre-request hook, stopping at the first failure.
    pub async fn run_pre(
        &self,
        request: &mut InboundRequest,
        route: &RouteConfig,
    ) -> Result<(), GatewayError> {
        for hook in &self.pre {
            trace!(target: "switchyard::hooks", hook = hook.name(), route = %route.path_pattern, "pre-request hook");
            let outcome = AssertUnwindSafe(hook.before(request, route)).catch_unwind().await;
            settle(hook.name(), HookStage::PreRequest, outcome)?;
        }
        Ok(())
    }

    /// Run every post-response hook, stopping at the first failure.
    pub async fn run_post(
        &self,
        request: &InboundRequest,
        response: &mut GatewayResponse,
        route: &RouteConfig,
    ) -> Result<(), GatewayError> {
        for hook in &self.post {
            trace!(target: "switchyard::hooks", hook = hook.name(), route = %route.path_pattern, "post-response hook");
            let outcome = AssertUnwindSafe(hook.after(request, response, route)).catch_unwind().await;
            settle(hook.name(), HookStage::PostResponse, outcome)?;
        }
        Ok(())
    }
}

fn settle(
    hook: &str,
    stage: HookStage,
    outcome: Result<Result<(), HookError>, Box<dyn Any + Send>>,
) -> Result<(), GatewayError> {
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(failure(hook, stage, err)),
        Err(panic) => Err(failure(hook, stage, HookError(format!("panicked: {}", panic_message(&*panic))))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown payload")
}

fn failure(hook: &str, stage: HookStage, err: HookError) -> GatewayError {
    error!(target: "switchyard::hooks", hook, %stage, error = %err, "hook failed");
    GatewayError::HookFailure { hook: hook.to_owned(), stage, message: err.0 }
}
