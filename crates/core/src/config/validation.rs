//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::{AppConfig, TokenRule};
use thiserror::Error;
use url::Url;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

const MIN_TIMEOUT_MS: u64 = 100;
const MAX_TIMEOUT_MS: u64 = 300_000;

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - any timeout is below 100ms or exceeds 5 minutes
    /// - `origin` is not an http(s) URL
    /// - `default_offline_page` is empty
    /// - `login_route` is not an absolute path
    /// - the token extraction rule does not compile
    ///
    /// Returns `ConfigError::Missing` if `app_name` or `cache_version` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_name.trim().is_empty() {
            return Err(ConfigError::Missing { field: "app_name".into(), hint: "set STOWAWAY_APP_NAME".into() });
        }

        if self.cache_version.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "cache_version".into(),
                hint: "set STOWAWAY_CACHE_VERSION".into(),
            });
        }

        let timeouts = [
            ("timeouts.network", self.timeouts.network),
            ("timeouts.api", self.timeouts.api),
            ("timeouts.page", self.timeouts.page),
            ("timeouts.post", self.timeouts.post),
        ];
        for (field, ms) in timeouts {
            if ms < MIN_TIMEOUT_MS {
                return Err(invalid(field, "must be at least 100ms"));
            }
            if ms > MAX_TIMEOUT_MS {
                return Err(invalid(field, "must not exceed 5 minutes (300000ms)"));
            }
        }

        match Url::parse(&self.origin) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => {}
            Ok(_) => return Err(invalid("origin", "must be an http or https URL")),
            Err(e) => return Err(invalid("origin", e.to_string())),
        }

        if self.default_offline_page.trim().is_empty() {
            return Err(invalid("default_offline_page", "must not be empty"));
        }
        if !self.error_handling.session_expired.login_route.starts_with('/') {
            return Err(invalid("error_handling.session_expired.login_route", "must be an absolute path"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        match &self.error_handling.csrf_error.token_rule {
            TokenRule::Meta { name } if name.trim().is_empty() => {
                return Err(invalid("error_handling.csrf_error.token_rule", "meta name must not be empty"));
            }
            TokenRule::Meta { .. } => {}
            TokenRule::Regex { pattern } => {
                let regex = regex::Regex::new(pattern)
                    .map_err(|e| invalid("error_handling.csrf_error.token_rule", e.to_string()))?;
                if regex.captures_len() < 2 {
                    return Err(invalid("error_handling.csrf_error.token_rule", "regex needs a capture group"));
                }
            }
        }

        if self.pwa_routes.is_empty() {
            tracing::debug!("pwa_routes is empty; every same-origin route is allowed");
        }

        if self.error_handling.csrf_error.max_retries > 1 {
            tracing::warn!(
                max_retries = self.error_handling.csrf_error.max_retries,
                "csrf_error.max_retries above 1 has no effect; a request is retried at most once"
            );
        }

        Ok(())
    }
}
