#![allow(dead_code)]

use async_trait::async_trait;
use http::StatusCode;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchyard::{BackendLocator, ForwardError, GatewayResponse, OutboundRequest};

/// How the mock backend answers for one service.
#[derive(Clone, Debug)]
pub enum Behavior {
    Respond(GatewayResponse),
    Refuse,
    Hang(Duration),
    /// Answer 200 with the value of the named request header as the body.
    EchoHeader(&'static str),
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(gauge: &'a AtomicUsize) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        Self(gauge)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Scriptable backend recording every call it receives.
#[derive(Default)]
pub struct MockLocator {
    behaviors: Mutex<HashMap<String, Behavior>>,
    calls: Mutex<Vec<(String, OutboundRequest)>>,
    attempts: AtomicUsize,
    in_flight: AtomicUsize,
    closed: AtomicBool,
}

impl MockLocator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(self: &Arc<Self>, service: &str, behavior: Behavior) -> Arc<Self> {
        self.behaviors.lock().unwrap().insert(service.to_owned(), behavior);
        self.clone()
    }

    pub fn ok(self: &Arc<Self>, service: &str, body: &'static str) -> Arc<Self> {
        self.on(service, Behavior::Respond(GatewayResponse::new(StatusCode::OK).with_body(body)))
    }

    pub fn calls(&self) -> Vec<(String, OutboundRequest)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Calls started but neither finished nor dropped.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendLocator for MockLocator {
    async fn resolve(&self, service: &str) -> Result<String, ForwardError> {
        if self.behaviors.lock().unwrap().contains_key(service) {
            Ok(service.to_owned())
        } else {
            Err(ForwardError::Resolve { service: service.to_owned(), message: "unknown service".into() })
        }
    }

    async fn call(
        &self,
        address: &str,
        request: &OutboundRequest,
        _timeout: Duration,
    ) -> Result<GatewayResponse, ForwardError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.in_flight);
        let behavior = self.behaviors.lock().unwrap().get(address).cloned();
        match behavior {
            Some(Behavior::Respond(response)) => {
                self.calls.lock().unwrap().push((address.to_owned(), request.clone()));
                Ok(response)
            }
            Some(Behavior::EchoHeader(name)) => {
                self.calls.lock().unwrap().push((address.to_owned(), request.clone()));
                let echoed = request
                    .headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_owned();
                Ok(GatewayResponse::new(StatusCode::OK).with_body(echoed))
            }
            Some(Behavior::Hang(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(GatewayResponse::new(StatusCode::OK))
            }
            Some(Behavior::Refuse) | None => Err(ForwardError::Connect {
                address: address.to_owned(),
                message: "connection refused".into(),
            }),
        }
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Route gateway logs to the test harness output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
