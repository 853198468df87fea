//! Route classification.

use std::collections::HashSet;

use url::{Origin, Url};

use super::allowlist::RouteAllowlist;
use crate::config::AppConfig;
use crate::types::{Category, Classification};

/// What the worker should do with an incoming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// Not intercepted: cross-origin, unparsable, or a method the worker never handles.
    PassThrough,
    /// Same-origin request the worker looks at.
    Intercept(Classification),
}

/// Returns true for the methods routed through the mutating path.
pub fn is_mutating_method(method: &str) -> bool {
    ["POST", "PUT", "DELETE"].iter().any(|m| m.eq_ignore_ascii_case(method))
}

/// Pure request classifier built once from configuration.
#[derive(Debug, Clone)]
pub struct Classifier {
    origin: Origin,
    allowlist: RouteAllowlist,
    cacheable_extensions: HashSet<String>,
    non_cacheable_extensions: HashSet<String>,
    asset_patterns: Vec<String>,
    api_patterns: Vec<String>,
}

impl Classifier {
    /// Build a classifier for the configured origin.
    ///
    /// An unparsable origin yields an opaque origin, which makes every
    /// request pass through. `AppConfig::validate` rejects that case up front.
    pub fn from_config(config: &AppConfig) -> Self {
        let origin = Url::parse(&config.origin).map(|u| u.origin()).unwrap_or_else(|_| Origin::new_opaque());
        Self {
            origin,
            allowlist: RouteAllowlist::new(&config.pwa_routes),
            cacheable_extensions: normalize_extensions(&config.cacheable_extensions),
            non_cacheable_extensions: normalize_extensions(&config.non_cacheable_extensions),
            asset_patterns: config.asset_patterns.clone(),
            api_patterns: config.api_patterns.clone(),
        }
    }

    pub fn allowlist(&self) -> &RouteAllowlist {
        &self.allowlist
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Same-origin check, then classification.
    pub fn route(&self, url: &str, method: &str) -> RouteDecision {
        let Ok(parsed) = Url::parse(url) else {
            tracing::debug!(url, "unparsable URL, passing through");
            return RouteDecision::PassThrough;
        };

        if parsed.origin() != self.origin {
            return RouteDecision::PassThrough;
        }

        if !method.eq_ignore_ascii_case("GET") && !is_mutating_method(method) {
            return RouteDecision::PassThrough;
        }

        RouteDecision::Intercept(self.classify(&parsed, method))
    }

    /// Classify a same-origin URL and method.
    pub fn classify(&self, url: &Url, method: &str) -> Classification {
        let path = url.path();
        let allowed = self.allowlist.is_allowed(path);

        let category = if self.is_asset(path) {
            Category::Asset
        } else if self.api_patterns.iter().any(|p| path.contains(p.as_str())) {
            Category::Api
        } else if is_mutating_method(method) {
            Category::Mutating
        } else {
            Category::Page
        };

        Classification { category, allowed }
    }

    fn is_asset(&self, path: &str) -> bool {
        let extension = extension_of(path);
        if let Some(ext) = &extension
            && self.non_cacheable_extensions.contains(ext)
        {
            return false;
        }

        extension.is_some_and(|ext| self.cacheable_extensions.contains(&ext))
            || self.asset_patterns.iter().any(|p| path.contains(p.as_str()))
    }
}

/// Lowercased extension of the last path segment, if any.
fn extension_of(path: &str) -> Option<String> {
    let segment = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = segment.rsplit_once('.')?;
    if ext.is_empty() { None } else { Some(ext.to_ascii_lowercase()) }
}

fn normalize_extensions(exts: &[String]) -> HashSet<String> {
    exts.iter()
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier(routes: &[&str]) -> Classifier {
        let config = AppConfig {
            origin: "https://app.test".into(),
            pwa_routes: routes.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        };
        Classifier::from_config(&config)
    }

    fn classify(c: &Classifier, path: &str, method: &str) -> Classification {
        match c.route(&format!("https://app.test{path}"), method) {
            RouteDecision::Intercept(classification) => classification,
            RouteDecision::PassThrough => panic!("expected {method} {path} to be intercepted"),
        }
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("/assets/x.PNG"), Some("png".into()));
        assert_eq!(extension_of("/v1.2/users"), None);
        assert_eq!(extension_of("/file."), None);
        assert_eq!(extension_of("/"), None);
    }

    #[test]
    fn test_asset_by_extension() {
        let c = classifier(&[]);
        assert_eq!(classify(&c, "/assets/x.png", "GET").category, Category::Asset);
        assert_eq!(classify(&c, "/app.css", "GET").category, Category::Asset);
    }

    #[test]
    fn test_non_cacheable_extension_overrides() {
        let c = classifier(&[]);
        assert_eq!(classify(&c, "/downloads/backup.zip", "GET").category, Category::Page);
        // An asset pattern does not rescue a non-cacheable extension.
        assert_eq!(classify(&c, "/storage/movie.mkv", "GET").category, Category::Page);
    }

    #[test]
    fn test_asset_pattern_without_extension() {
        let c = classifier(&[]);
        assert_eq!(classify(&c, "/images/avatar", "GET").category, Category::Asset);
    }

    #[test]
    fn test_api_pattern() {
        let c = classifier(&[]);
        assert_eq!(classify(&c, "/api/users", "GET").category, Category::Api);
        assert_eq!(classify(&c, "/livewire/update", "POST").category, Category::Api);
    }

    #[test]
    fn test_mutating_and_page() {
        let c = classifier(&[]);
        assert_eq!(classify(&c, "/form", "POST").category, Category::Mutating);
        assert_eq!(classify(&c, "/form", "delete").category, Category::Mutating);
        assert_eq!(classify(&c, "/reports/annual", "GET").category, Category::Page);
    }

    #[test]
    fn test_allowlist_decision() {
        let c = classifier(&["/app*"]);
        assert!(classify(&c, "/app/inbox", "GET").allowed);
        assert!(!classify(&c, "/other", "GET").allowed);
    }

    #[test]
    fn test_cross_origin_passes_through() {
        let c = classifier(&[]);
        assert_eq!(c.route("https://cdn.test/lib.js", "GET"), RouteDecision::PassThrough);
        assert_eq!(c.route("http://app.test/", "GET"), RouteDecision::PassThrough);
    }

    #[test]
    fn test_malformed_url_passes_through() {
        let c = classifier(&[]);
        assert_eq!(c.route("not a url", "GET"), RouteDecision::PassThrough);
    }

    #[test]
    fn test_other_methods_pass_through() {
        let c = classifier(&[]);
        assert_eq!(c.route("https://app.test/", "HEAD"), RouteDecision::PassThrough);
        assert_eq!(c.route("https://app.test/", "OPTIONS"), RouteDecision::PassThrough);
    }
}
