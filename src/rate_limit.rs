//! Per-key rate limiting.
//!
//! This module provides the building blocks for admission control:
//! - [`RateLimitRule`]: thresholds, algorithm, and key scope for a path pattern.
//! - [`RateLimiter`]: applies rules against sharded, lock-per-key state.
//! - [`Decision`]: the result of a check (Allowed/Denied).
//!
//! # Algorithms
//!
//! - **Sliding window**: accepted timestamps checked against minute, hour, and day
//!   tiers, tightest tier first.
//! - **Fixed window**: one counter per minute-long window.
//! - **Token bucket**: continuous refill up to a burst size.
//!
//! Rejected requests never consume capacity. State for idle keys is dropped by
//! [`RateLimiter::evict_idle`].

use crate::clock::{Clock, MonotonicClock};
use crate::message::InboundRequest;
use crate::route::match_pattern;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub mod key;
pub mod store;
pub(crate) mod strategies;

pub use key::KeyScope;
pub use store::{InMemoryStateStore, WindowState};

/// The decision returned by a rate limiter.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The request is allowed to proceed.
    Allowed {
        /// Requests left in the tightest tier after this one.
        /// Useful for `X-RateLimit-Remaining` headers.
        remaining: u32,
        /// Advertised limit (per-minute threshold or bucket size).
        limit: u32,
    },
    /// The request is denied.
    Denied {
        /// How long the caller should wait before retrying.
        /// Useful for `Retry-After` headers.
        retry_after: Duration,
        /// Which tier or bucket refused.
        reason: DenyReason,
    },
}

impl Decision {
    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Why a request was refused.
#[derive(Debug, Clone, PartialEq)]
pub enum DenyReason {
    /// Per-minute threshold reached.
    MinuteLimit {
        /// Configured threshold.
        limit: u32,
    },
    /// Per-hour threshold reached.
    HourLimit {
        /// Configured threshold.
        limit: u32,
    },
    /// Per-day threshold reached.
    DayLimit {
        /// Configured threshold.
        limit: u32,
    },
    /// Not enough tokens for the request cost.
    TokensExhausted {
        /// Tokens left in the bucket after refill.
        tokens_remaining: f64,
    },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::MinuteLimit { limit } => write!(f, "limit of {} requests per minute reached", limit),
            DenyReason::HourLimit { limit } => write!(f, "limit of {} requests per hour reached", limit),
            DenyReason::DayLimit { limit } => write!(f, "limit of {} requests per day reached", limit),
            DenyReason::TokensExhausted { tokens_remaining } => {
                write!(f, "token bucket exhausted ({:.2} tokens remaining)", tokens_remaining)
            }
        }
    }
}

/// Admission algorithm for a rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Moving minute/hour/day windows.
    #[default]
    SlidingWindow,
    /// Discrete one-minute windows.
    FixedWindow,
    /// Continuous refill with bursts.
    TokenBucket,
}

impl Strategy {
    fn code(self) -> &'static str {
        match self {
            Strategy::SlidingWindow => "sliding",
            Strategy::FixedWindow => "fixed",
            Strategy::TokenBucket => "bucket",
        }
    }
}

/// A rate-limit rule bound to a path pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitRule {
    /// Pattern selecting the requests this rule applies to (route syntax).
    pub path_pattern: String,
    /// How the caller identifier becomes a limiter key.
    pub key: KeyScope,
    /// Requests per minute; also the token-bucket refill rate.
    pub per_minute: u32,
    /// Requests per hour (sliding window only).
    pub per_hour: Option<u32>,
    /// Requests per day (sliding window only).
    pub per_day: Option<u32>,
    /// Algorithm.
    pub strategy: Strategy,
    /// Token-bucket capacity; defaults to `per_minute`.
    pub burst_size: Option<u32>,
    /// Tokens a request consumes (token bucket only).
    pub request_cost: u32,
}

impl RateLimitRule {
    /// Sliding-window rule keyed by caller IP with only a per-minute tier.
    pub fn per_minute(path_pattern: impl Into<String>, per_minute: u32) -> Self {
        Self {
            path_pattern: path_pattern.into(),
            key: KeyScope::Ip,
            per_minute,
            per_hour: None,
            per_day: None,
            strategy: Strategy::SlidingWindow,
            burst_size: None,
            request_cost: 1,
        }
    }

    /// Add an hourly tier.
    pub fn per_hour(mut self, limit: u32) -> Self {
        self.per_hour = Some(limit);
        self
    }

    /// Add a daily tier.
    pub fn per_day(mut self, limit: u32) -> Self {
        self.per_day = Some(limit);
        self
    }

    /// Choose the algorithm.
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Token-bucket capacity.
    pub fn burst(mut self, burst: u32) -> Self {
        self.burst_size = Some(burst);
        self
    }

    /// Tokens consumed per request.
    pub fn cost(mut self, cost: u32) -> Self {
        self.request_cost = cost;
        self
    }

    /// Key scope.
    pub fn keyed_by(mut self, key: KeyScope) -> Self {
        self.key = key;
        self
    }

    /// Whether the rule covers `path`.
    pub fn applies_to(&self, path: &str) -> bool {
        match_pattern(&self.path_pattern, path).is_some()
    }

    /// Identity of the rule inside limiter keys: pattern, algorithm and thresholds.
    ///
    /// Rules that differ in any of these never share state.
    pub fn tag(&self) -> String {
        let mut tag = format!("{}|{}|{}/m", self.path_pattern, self.strategy.code(), self.per_minute);
        match self.strategy {
            Strategy::SlidingWindow => {
                if let Some(limit) = self.per_hour {
                    tag.push_str(&format!(",{limit}/h"));
                }
                if let Some(limit) = self.per_day {
                    tag.push_str(&format!(",{limit}/d"));
                }
            }
            Strategy::FixedWindow => {}
            Strategy::TokenBucket => {
                tag.push_str(&format!(",burst={},cost={}", self.bucket_capacity(), self.request_cost));
            }
        }
        tag
    }

    /// Limiter key for `identifier`.
    pub fn key_for(&self, identifier: &str) -> String {
        self.key.render(&self.tag(), identifier)
    }

    /// Limiter key for `request`, using the identifier the rule's scope selects.
    pub fn key_for_request(&self, request: &InboundRequest) -> String {
        self.key_for(&self.key.identifier(request))
    }

    pub(crate) fn bucket_capacity(&self) -> f64 {
        f64::from(self.burst_size.unwrap_or(self.per_minute))
    }
}

/// Outcome of running every applicable rule for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Limit of the rule with the fewest requests left.
    pub limit: u32,
    /// Requests left under that rule.
    pub remaining: u32,
}

/// Denial from [`RateLimiter::check_all`].
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    /// Key that ran out.
    pub key: String,
    /// How long to wait.
    pub retry_after: Duration,
    /// Which tier refused.
    pub reason: DenyReason,
}

/// Applies rules to callers. Safe to share across tasks.
#[derive(Debug)]
pub struct RateLimiter {
    store: InMemoryStateStore,
    rules: Vec<RateLimitRule>,
    clock: Arc<dyn Clock>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    /// Limiter with no configured rules and a monotonic clock.
    pub fn new() -> Self {
        Self {
            store: InMemoryStateStore::new(),
            rules: Vec::new(),
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Use a clock already shared with other components.
    pub fn with_shared_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Add a configured rule. Rules are evaluated in insertion order.
    pub fn add_rule(&mut self, rule: RateLimitRule) {
        self.rules.push(rule);
    }

    /// Configured rules.
    pub fn rules(&self) -> &[RateLimitRule] {
        &self.rules
    }

    /// Configured rules whose pattern covers `path`.
    pub fn rules_for<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a RateLimitRule> + 'a {
        self.rules.iter().filter(move |rule| rule.applies_to(path))
    }

    /// Check one rule for `identifier`, recording the request if admitted.
    pub fn check(&self, rule: &RateLimitRule, identifier: &str) -> Decision {
        self.check_key(rule, &rule.key_for(identifier))
    }

    fn check_key(&self, rule: &RateLimitRule, key: &str) -> Decision {
        let now = self.clock.now_millis();
        let decision = match rule.strategy {
            Strategy::SlidingWindow => self.store.update(key, now, strategies::sliding_init, |state| {
                strategies::sliding_window(state, rule, now)
            }),
            Strategy::FixedWindow => self.store.update(
                key,
                now,
                || strategies::fixed_init(now),
                |state| strategies::fixed_window(state, rule, now),
            ),
            Strategy::TokenBucket => self.store.update(
                key,
                now,
                || strategies::bucket_init(rule, now),
                |state| strategies::token_bucket(state, rule, now),
            ),
        };
        if let Decision::Denied { retry_after, reason } = &decision {
            debug!(target: "switchyard::rate_limit", key = %key, reason = %reason, retry_after_ms = retry_after.as_millis() as u64, "request denied");
        }
        decision
    }

    /// Check `rules` in order for one `identifier`; the first denial wins.
    ///
    /// Returns the tightest admission (or `None` if no rule applied).
    pub fn check_all<'a, I>(&self, rules: I, identifier: &str) -> Result<Option<Admission>, Rejection>
    where
        I: IntoIterator<Item = &'a RateLimitRule>,
    {
        self.check_each(rules, |rule| rule.key_for(identifier))
    }

    /// Check `rules` in order for `request`, each rule keyed by its own scope.
    pub fn check_request<'a, I>(
        &self,
        rules: I,
        request: &InboundRequest,
    ) -> Result<Option<Admission>, Rejection>
    where
        I: IntoIterator<Item = &'a RateLimitRule>,
    {
        self.check_each(rules, |rule| rule.key_for_request(request))
    }

    // A key is charged at most once per call, so duplicate rules do not double count.
    fn check_each<'a, I, K>(&self, rules: I, key_of: K) -> Result<Option<Admission>, Rejection>
    where
        I: IntoIterator<Item = &'a RateLimitRule>,
        K: Fn(&RateLimitRule) -> String,
    {
        let mut seen = HashSet::new();
        let mut tightest: Option<Admission> = None;
        for rule in rules {
            let key = key_of(rule);
            if !seen.insert(key.clone()) {
                continue;
            }
            match self.check_key(rule, &key) {
                Decision::Allowed { remaining, limit } => {
                    if tightest.map_or(true, |t| remaining < t.remaining) {
                        tightest = Some(Admission { limit, remaining });
                    }
                }
                Decision::Denied { retry_after, reason } => {
                    return Err(Rejection { key, retry_after, reason });
                }
            }
        }
        Ok(tightest)
    }

    /// State currently held for `key`.
    pub fn state(&self, key: &str) -> Option<WindowState> {
        self.store.get(key)
    }

    /// Number of keys with live state.
    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }

    /// Drop state for keys idle longer than `ttl`. Returns how many were removed.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let ttl_millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let removed = self.store.evict_idle(self.clock.now_millis(), ttl_millis);
        if removed > 0 {
            debug!(target: "switchyard::rate_limit", removed, "evicted idle rate-limit keys");
        }
        removed
    }
}
