//! JSON gateway configuration.
//!
//! ```json
//! {
//!   "version": "1",
//!   "routes": [
//!     { "path_pattern": "/api/v1/invoices/*", "service_name": "billing-service",
//!       "target_path": "/invoices", "rate_limit": 120, "timeout_ms": 5000, "retries": 2 }
//!   ],
//!   "rules": [
//!     { "path_pattern": "/api/v1/*", "per_minute": 600, "per_hour": 10000,
//!       "key": "user", "strategy": "sliding_window" }
//!   ]
//! }
//! ```
//!
//! Parsing only checks shape; [`GatewayConfig::route_configs`] and
//! [`GatewayConfig::rate_limit_rules`] turn the specs into validated runtime values.

use crate::rate_limit::{KeyScope, RateLimitRule, Strategy};
use crate::route::{RouteConfig, RouteError, DEFAULT_TIMEOUT};
use http::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Idle keys live one day plus a minute, so a full day window is never cut short.
pub const DEFAULT_KEY_TTL_SECS: u64 = 24 * 60 * 60 + 60;
/// Default pause between sweeps of idle limiter keys and expired cache entries.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Errors loading or validating configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The document is not valid JSON for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    /// A route could not be built.
    #[error("route {pattern}: {source}")]
    Route {
        /// Offending route pattern.
        pattern: String,
        /// What was wrong.
        source: RouteError,
    },
    /// A method name was not a valid HTTP token.
    #[error("route {pattern}: unknown method {method:?}")]
    UnknownMethod {
        /// Offending route pattern.
        pattern: String,
        /// The rejected name.
        method: String,
    },
    /// A limit was zero.
    #[error("{pattern}: {field} must be greater than zero")]
    ZeroThreshold {
        /// Offending route or rule pattern.
        pattern: String,
        /// Which threshold.
        field: &'static str,
    },
    /// The sweep interval was zero.
    #[error("sweep_interval_secs must be greater than zero")]
    ZeroSweepInterval,
    /// The gateway was built without a backend locator.
    #[error("a backend locator is required")]
    MissingLocator,
}

fn default_version() -> String {
    "1".to_string()
}

fn default_key_ttl() -> u64 {
    DEFAULT_KEY_TTL_SECS
}

fn default_sweep_interval() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

fn default_weight() -> u32 {
    1
}

fn default_cost() -> u32 {
    1
}

/// Top-level document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Free-form configuration version, logged at startup.
    #[serde(default = "default_version")]
    pub version: String,
    /// Routes in registration order.
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
    /// Rate-limit rules in evaluation order.
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
    /// Idle time after which limiter keys are evicted.
    #[serde(default = "default_key_ttl")]
    pub key_ttl_secs: u64,
    /// Pause between background sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            routes: Vec::new(),
            rules: Vec::new(),
            key_ttl_secs: DEFAULT_KEY_TTL_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

/// One route as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteSpec {
    /// Route pattern.
    pub path_pattern: String,
    /// Backend service name.
    pub service_name: String,
    /// Backend path override.
    #[serde(default)]
    pub target_path: Option<String>,
    /// Accepted verbs; all common verbs when omitted.
    #[serde(default)]
    pub methods: Option<Vec<String>>,
    /// Static outbound headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Per-minute convenience limit.
    #[serde(default)]
    pub rate_limit: Option<u32>,
    /// Require an authenticated caller.
    #[serde(default)]
    pub auth_required: bool,
    /// Per-attempt timeout in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Extra attempts on transport failure.
    #[serde(default)]
    pub retries: u32,
    /// Response cache lifetime in seconds.
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
    /// Routing weight.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

/// One rate-limit rule as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    /// Pattern the rule applies to.
    pub path_pattern: String,
    /// Key scope.
    #[serde(default)]
    pub key: KeyScope,
    /// Requests per minute.
    pub per_minute: u32,
    /// Requests per hour.
    #[serde(default)]
    pub per_hour: Option<u32>,
    /// Requests per day.
    #[serde(default)]
    pub per_day: Option<u32>,
    /// Algorithm.
    #[serde(default)]
    pub strategy: Strategy,
    /// Token-bucket capacity.
    #[serde(default)]
    pub burst_size: Option<u32>,
    /// Tokens per request.
    #[serde(default = "default_cost")]
    pub request_cost: u32,
}

impl GatewayConfig {
    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_json_str(&raw)
    }

    /// Check every route and rule without building anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::ZeroSweepInterval);
        }
        self.route_configs()?;
        self.rate_limit_rules()?;
        Ok(())
    }

    /// Runtime routes in file order.
    pub fn route_configs(&self) -> Result<Vec<RouteConfig>, ConfigError> {
        self.routes.iter().map(RouteSpec::build).collect()
    }

    /// Runtime rules in file order.
    pub fn rate_limit_rules(&self) -> Result<Vec<RateLimitRule>, ConfigError> {
        self.rules.iter().map(RuleSpec::build).collect()
    }

    /// Idle TTL for limiter keys.
    pub fn key_ttl(&self) -> Duration {
        Duration::from_secs(self.key_ttl_secs)
    }

    /// Pause between sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl RouteSpec {
    fn build(&self) -> Result<RouteConfig, ConfigError> {
        let pattern = &self.path_pattern;
        let route_err = |source| ConfigError::Route { pattern: pattern.clone(), source };

        let mut route = RouteConfig::new(pattern.as_str(), self.service_name.as_str())
            .timeout(self.timeout_ms.map_or(DEFAULT_TIMEOUT, Duration::from_millis))
            .retries(self.retries)
            .weight(self.weight);
        route.validate().map_err(route_err)?;

        if let Some(target) = &self.target_path {
            route = route.target_path(target.as_str());
        }
        if let Some(methods) = &self.methods {
            let parsed = methods
                .iter()
                .map(|m| {
                    Method::from_bytes(m.to_ascii_uppercase().as_bytes()).map_err(|_| {
                        ConfigError::UnknownMethod { pattern: pattern.clone(), method: m.clone() }
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            route = route.methods(parsed);
        }
        for (name, value) in &self.headers {
            route = route.header(name, value).map_err(route_err)?;
        }
        if let Some(limit) = self.rate_limit {
            if limit == 0 {
                return Err(ConfigError::ZeroThreshold { pattern: pattern.clone(), field: "rate_limit" });
            }
            route = route.rate_limit(limit);
        }
        if self.auth_required {
            route = route.require_auth();
        }
        if let Some(secs) = self.cache_ttl_secs {
            route = route.cache_ttl(Duration::from_secs(secs));
        }
        Ok(route)
    }
}

impl RuleSpec {
    fn build(&self) -> Result<RateLimitRule, ConfigError> {
        let zero = |field| ConfigError::ZeroThreshold { pattern: self.path_pattern.clone(), field };
        if self.per_minute == 0 {
            return Err(zero("per_minute"));
        }
        if self.per_hour == Some(0) {
            return Err(zero("per_hour"));
        }
        if self.per_day == Some(0) {
            return Err(zero("per_day"));
        }
        if self.burst_size == Some(0) {
            return Err(zero("burst_size"));
        }
        if self.request_cost == 0 {
            return Err(zero("request_cost"));
        }

        let mut rule = RateLimitRule::per_minute(self.path_pattern.as_str(), self.per_minute)
            .keyed_by(self.key.clone())
            .strategy(self.strategy)
            .cost(self.request_cost);
        rule.per_hour = self.per_hour;
        rule.per_day = self.per_day;
        rule.burst_size = self.burst_size;
        Ok(rule)
    }
}
