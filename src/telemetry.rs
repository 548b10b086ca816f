//! Structured gateway events and the sinks that consume them.
//!
//! Events flow through a [`TelemetrySink`], which is any cloneable
//! `tower::Service<GatewayEvent>`. The gateway emits with [`emit_best_effort`]: a sink
//! that is not ready or fails simply loses the event, it never affects the request.
//!
//! ```rust
//! use switchyard::telemetry::{GatewayEvent, MemorySink};
//! use tower::Service;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut sink = MemorySink::new();
//! sink.call(GatewayEvent::RouteMiss { method: "GET".into(), path: "/nope".into() })
//!     .await
//!     .unwrap();
//! assert_eq!(sink.len(), 1);
//! # }
//! ```

use std::convert::Infallible;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;

use crate::hooks::HookStage;

/// A sink for gateway events.
pub trait TelemetrySink:
    tower::Service<GatewayEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + 'static;
}

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
pub async fn emit_best_effort<S>(sink: S, event: GatewayEvent)
where
    S: tower::Service<GatewayEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

/// Something noteworthy that happened while handling a request.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// No route matched.
    RouteMiss {
        /// Request method.
        method: String,
        /// Request path.
        path: String,
    },
    /// A rate-limit rule refused the request.
    RateLimited {
        /// Resolved limiter key.
        key: String,
        /// Matched route pattern.
        route: String,
        /// Hint returned to the caller.
        retry_after: Duration,
    },
    /// The backend timed out or could not be reached.
    BackendUnavailable {
        /// Logical service name.
        service: String,
        /// Last transport failure.
        reason: String,
    },
    /// The backend answered with an error status, passed through to the caller.
    BackendError {
        /// Logical service name.
        service: String,
        /// Status returned by the backend.
        status: u16,
    },
    /// A hook aborted the request.
    HookFailed {
        /// Hook name.
        hook: String,
        /// Pipeline it ran in.
        stage: HookStage,
    },
    /// A response was sent.
    RequestCompleted {
        /// Matched route pattern, if any.
        route: Option<String>,
        /// Final status.
        status: u16,
        /// Time from receipt to send.
        duration: Duration,
        /// Served from the response cache.
        cache_hit: bool,
    },
}

impl fmt::Display for GatewayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayEvent::RouteMiss { method, path } => write!(f, "RouteMiss({method} {path})"),
            GatewayEvent::RateLimited { key, route, retry_after } => {
                write!(f, "RateLimited(key={key}, route={route}, retry_after={retry_after:?})")
            }
            GatewayEvent::BackendUnavailable { service, reason } => {
                write!(f, "BackendUnavailable({service}: {reason})")
            }
            GatewayEvent::BackendError { service, status } => {
                write!(f, "BackendError({service}, status={status})")
            }
            GatewayEvent::HookFailed { hook, stage } => write!(f, "HookFailed({stage} {hook})"),
            GatewayEvent::RequestCompleted { route, status, duration, cache_hit } => write!(
                f,
                "RequestCompleted(route={}, status={status}, duration={duration:?}, cache_hit={cache_hit})",
                route.as_deref().unwrap_or("-")
            ),
        }
    }
}

type SinkFuture = Pin<Box<dyn std::future::Future<Output = Result<(), Infallible>> + Send>>;

/// Discards every event.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<GatewayEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: GatewayEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// Logs every event through `tracing` at INFO.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<GatewayEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GatewayEvent) -> Self::Future {
        tracing::info!(target: "switchyard::gateway", event = %event, "gateway_event");
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// Keeps events in memory, evicting the oldest past `capacity`.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<GatewayEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Bounded sink holding at most 10,000 events.
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    /// Bounded sink with explicit capacity (at least 1).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<GatewayEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of stored events, oldest first.
    pub fn events(&self) -> Vec<GatewayEvent> {
        self.lock().clone()
    }

    /// Drop everything stored.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of stored events.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no events are stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Events dropped to stay within capacity.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<GatewayEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GatewayEvent) -> Self::Future {
        let mut guard = self.lock();
        if guard.len() >= self.capacity {
            guard.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push(event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}
