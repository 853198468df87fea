//! Path patterns with trailing-wildcard support.

use serde::{Deserialize, Serialize};

/// A single route pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutePattern {
    /// Path must equal the pattern.
    Exact(String),
    /// Path must start with the prefix (pattern written as `prefix*`).
    Prefix(String),
}

impl RoutePattern {
    /// Parse a configured pattern. Everything before the first `*` is the prefix.
    pub fn parse(pattern: &str) -> Self {
        match pattern.split_once('*') {
            Some((prefix, _)) => RoutePattern::Prefix(prefix.to_string()),
            None => RoutePattern::Exact(pattern.to_string()),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            RoutePattern::Exact(exact) => path == exact,
            RoutePattern::Prefix(prefix) => path.starts_with(prefix.as_str()),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, RoutePattern::Prefix(_))
    }

    /// The literal path of an exact pattern.
    pub fn exact_path(&self) -> Option<&str> {
        match self {
            RoutePattern::Exact(path) => Some(path),
            RoutePattern::Prefix(_) => None,
        }
    }
}

/// Ordered allowlist of route patterns.
///
/// Empty means allow-all; otherwise a path must match at least one pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteAllowlist {
    patterns: Vec<RoutePattern>,
}

impl RouteAllowlist {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self { patterns: patterns.into_iter().map(|p| RoutePattern::parse(p.as_ref())).collect() }
    }

    pub fn is_allowed(&self, path: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.matches(path))
    }

    /// Exact (non-wildcard) routes, in configuration order. These are pre-warmed on install.
    pub fn exact_routes(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().filter_map(RoutePattern::exact_path)
    }

    pub fn patterns(&self) -> &[RoutePattern] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
