//! Per-request bookkeeping: correlation id, resolved route and the stage trail.

use sha2::{Digest, Sha256};
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use tracing::trace;

/// Lifecycle stages of one request, in the order they are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// Request accepted by the gateway.
    Received,
    /// A route matched.
    RouteResolved,
    /// Every applicable rate-limit rule admitted the request.
    RateChecked,
    /// Pre-request hooks finished.
    PreHooksRun,
    /// Outbound request built.
    Transformed,
    /// Backend (or cache) produced a response.
    Forwarded,
    /// Gateway headers attached.
    ResponseTransformed,
    /// Post-response hooks finished.
    PostHooksRun,
    /// Response handed back to the caller.
    Sent,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::RouteResolved => "route_resolved",
            Stage::RateChecked => "rate_checked",
            Stage::PreHooksRun => "pre_hooks_run",
            Stage::Transformed => "transformed",
            Stage::Forwarded => "forwarded",
            Stage::ResponseTransformed => "response_transformed",
            Stage::PostHooksRun => "post_hooks_run",
            Stage::Sent => "sent",
        };
        f.write_str(name)
    }
}

/// State carried through a single request.
#[derive(Debug, Clone)]
pub struct CorrelationContext {
    /// Reused from the caller or freshly generated.
    pub correlation_id: String,
    /// Pattern of the matched route, once resolved.
    pub route_pattern: Option<String>,
    /// Backend service of the matched route, once resolved.
    pub service: Option<String>,
    /// Caller identity used for rate limiting.
    pub identifier: String,
    started: Instant,
    stages: Vec<(Stage, Duration)>,
}

impl CorrelationContext {
    /// Start a context in [`Stage::Received`].
    pub fn new(correlation_id: impl Into<String>, identifier: impl Into<String>) -> Self {
        let mut ctx = Self {
            correlation_id: correlation_id.into(),
            route_pattern: None,
            service: None,
            identifier: identifier.into(),
            started: Instant::now(),
            stages: Vec::with_capacity(9),
        };
        ctx.mark(Stage::Received);
        ctx
    }

    /// Record the route that matched.
    pub fn resolve(&mut self, pattern: &str, service: &str) {
        self.route_pattern = Some(pattern.to_owned());
        self.service = Some(service.to_owned());
        self.mark(Stage::RouteResolved);
    }

    /// Record entry into `stage`. Stages already visited are ignored.
    pub fn mark(&mut self, stage: Stage) {
        if self.stages.iter().any(|(s, _)| *s == stage) {
            return;
        }
        let at = self.started.elapsed();
        trace!(target: "switchyard::gateway", correlation_id = %self.correlation_id, %stage, elapsed_us = at.as_micros() as u64, "stage");
        self.stages.push((stage, at));
    }

    /// Stages visited so far, in order.
    pub fn stages(&self) -> Vec<Stage> {
        self.stages.iter().map(|(s, _)| *s).collect()
    }

    /// Time since the request was received.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// New 32-hex-char id from wall-clock nanos, caller address and a process counter.
pub fn generate_correlation_id(caller: Option<IpAddr>) -> String {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let caller = caller.map(|a| a.to_string()).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(nanos.to_be_bytes());
    hasher.update(caller.as_bytes());
    hasher.update(seq.to_be_bytes());
    hex::encode(&hasher.finalize()[..16])
}
