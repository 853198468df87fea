//! Shared request-routing types and the wire formats exchanged with the
//! foreground application.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Request category decided by the route classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Asset,
    Api,
    Page,
    Mutating,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Asset => "asset",
            Category::Api => "api",
            Category::Page => "page",
            Category::Mutating => "mutating",
        }
    }

    /// Failure code reported when a request in this category cannot reach the network.
    pub fn failure_code(&self) -> FailureCode {
        match self {
            Category::Asset => FailureCode::NetworkError,
            Category::Api | Category::Page => FailureCode::Offline,
            Category::Mutating => FailureCode::PostOffline,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classifying one request. Derived per request, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Classification {
    pub category: Category,
    pub allowed: bool,
}

/// Cache strategy applied to a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    #[serde(alias = "cache_first")]
    CacheFirst,
    #[serde(alias = "network_first")]
    NetworkFirst,
    #[serde(alias = "stale_while_revalidate")]
    StaleWhileRevalidate,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::CacheFirst => "cache-first",
            Strategy::NetworkFirst => "network-first",
            Strategy::StaleWhileRevalidate => "stale-while-revalidate",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a strategy name is not one of the known strategies.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown cache strategy: {0}")]
pub struct UnknownStrategy(pub String);

impl FromStr for Strategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "cache-first" => Ok(Strategy::CacheFirst),
            "network-first" => Ok(Strategy::NetworkFirst),
            "stale-while-revalidate" => Ok(Strategy::StaleWhileRevalidate),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}

/// Machine-readable code carried by synthesized failure responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    Timeout,
    Offline,
    NetworkError,
    PostOffline,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::Timeout => "TIMEOUT",
            FailureCode::Offline => "OFFLINE",
            FailureCode::NetworkError => "NETWORK_ERROR",
            FailureCode::PostOffline => "POST_OFFLINE",
        }
    }
}

/// JSON body of a synthesized failure response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FallbackBody {
    pub message: String,
    pub offline: bool,
    pub code: FailureCode,
}

impl FallbackBody {
    pub fn new(code: FailureCode) -> Self {
        let message = match code {
            FailureCode::Timeout => "Request timeout. Please check your connection.",
            FailureCode::Offline => "Service temporarily unavailable",
            FailureCode::NetworkError => "Unable to complete request. Please check your connection.",
            FailureCode::PostOffline => "Cannot perform this action offline",
        };
        Self { message: message.to_string(), offline: true, code }
    }
}

/// Authentication or connectivity signal derived from a response or fetch failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecoverySignal {
    CsrfExpired,
    SessionExpired { redirect_url: String },
    NetworkError,
}

impl RecoverySignal {
    /// Map an HTTP status to an authentication signal, if it carries one.
    pub fn from_status(status: u16, login_route: &str) -> Option<Self> {
        match status {
            419 => Some(RecoverySignal::CsrfExpired),
            401 | 403 => Some(RecoverySignal::SessionExpired { redirect_url: login_route.to_string() }),
            _ => None,
        }
    }
}

/// Notification payload broadcast to every open foreground client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    CsrfTokenUpdated { token: String, silent: bool },
    SessionExpired { message: String, redirect_to_login: bool, login_route: String },
    NetworkError { message: String, url: String, code: FailureCode },
}

/// Message delivered to a foreground client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "af-pwa-notification")]
    Notification(Notification),
    /// A new worker took control; the foreground reloads once on this.
    #[serde(rename = "controller-changed")]
    ControllerChanged,
}

/// Message accepted from the foreground.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundMessage {
    SkipWaiting,
    #[serde(alias = "CLEAR_CACHE")]
    CacheClear,
    CacheUrls { urls: Vec<String> },
    GetVersion,
}

/// Reply to `GET_VERSION`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename = "VERSION")]
pub struct VersionReply {
    pub version: String,
}
