use crate::message::InboundRequest;
use serde::{Deserialize, Serialize};

/// How a rule turns a request into a limiter key.
///
/// Rendered keys look like `rate_limit:<scope>:<rule>:<identifier>`, where `<rule>` is
/// [`RateLimitRule::tag`](super::RateLimitRule::tag). Every rule therefore keeps its
/// own state; two requests share a budget under one rule exactly when they render to
/// the same key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyScope {
    /// One budget per client address, even for authenticated callers.
    #[default]
    Ip,
    /// One budget per principal; unauthenticated callers fall back to their address.
    User,
    /// Budget of a route's own `rate_limit`, keyed like [`KeyScope::User`].
    Route,
    /// One budget shared by every caller of the rule.
    Global,
    /// Caller-chosen namespace, keyed like [`KeyScope::User`].
    Custom(String),
}

const ANONYMOUS: &str = "anonymous";

impl KeyScope {
    fn prefix(&self) -> &str {
        match self {
            KeyScope::Ip => "ip",
            KeyScope::User => "user",
            KeyScope::Route => "route",
            KeyScope::Global => "global",
            KeyScope::Custom(prefix) => prefix,
        }
    }

    /// The part of `request` this scope counts against.
    pub fn identifier(&self, request: &InboundRequest) -> String {
        match self {
            KeyScope::Ip => request
                .client_addr
                .map_or_else(|| ANONYMOUS.to_owned(), |addr| addr.to_string()),
            KeyScope::Global => String::new(),
            KeyScope::User | KeyScope::Route | KeyScope::Custom(_) => request.caller_identifier(),
        }
    }

    /// Render the key for `identifier` under the rule tagged `rule`.
    pub fn render(&self, rule: &str, identifier: &str) -> String {
        match self {
            KeyScope::Global => format!("rate_limit:global:{rule}"),
            scope => format!("rate_limit:{}:{rule}:{identifier}", scope.prefix()),
        }
    }
}
