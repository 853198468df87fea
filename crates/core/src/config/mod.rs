//! Worker configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (STOWAWAY_*)
//! 2. TOML config file (if STOWAWAY_CONFIG_FILE set)
//! 3. Built-in defaults
//!
//! A host application can also hand the worker a JSON document directly via
//! [`AppConfig::from_json`]; the camelCase keys used by browser-side hosts are
//! accepted as aliases.
//!
//! The configuration is immutable for the lifetime of a worker. A new
//! configuration means a new worker generation.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{Category, Strategy};

mod validation;

pub use validation::ConfigError;

/// Worker configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (STOWAWAY_*)
/// 2. TOML config file (if STOWAWAY_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application identifier embedded in every bucket name.
    #[serde(default = "default_app_name", alias = "appName")]
    pub app_name: String,

    /// Cache generation tag. Changing it rotates every bucket on activation.
    #[serde(default = "default_cache_version", alias = "cacheVersion")]
    pub cache_version: String,

    /// Origin the worker is scoped to. Other origins are never intercepted.
    ///
    /// Set via STOWAWAY_ORIGIN environment variable.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Path to SQLite cache database.
    ///
    /// Set via STOWAWAY_DB_PATH environment variable.
    #[serde(default = "default_db_path", alias = "dbPath")]
    pub db_path: PathBuf,

    /// User-Agent string for network requests.
    #[serde(default = "default_user_agent", alias = "userAgent")]
    pub user_agent: String,

    /// Route allowlist (`/exact` or `/prefix*`). Empty allows every route.
    #[serde(default, alias = "pwaRoutes")]
    pub pwa_routes: Vec<String>,

    /// Strategy per cacheable category.
    #[serde(default, alias = "cacheStrategies")]
    pub cache_strategies: CacheStrategies,

    /// Whether each category reads from and writes to its bucket.
    #[serde(default)]
    pub cacheable: Cacheable,

    /// Network timeouts per category, in milliseconds.
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Path substrings that mark a request as a static asset.
    #[serde(default = "default_asset_patterns", alias = "assetPatterns")]
    pub asset_patterns: Vec<String>,

    /// Path substrings that mark a request as an API call.
    #[serde(default = "default_api_patterns", alias = "apiPatterns")]
    pub api_patterns: Vec<String>,

    /// File extensions treated as cacheable static assets.
    #[serde(default = "default_cacheable_extensions", alias = "cacheableExtensions")]
    pub cacheable_extensions: Vec<String>,

    /// File extensions never treated as assets, overriding `cacheable_extensions`.
    #[serde(default = "default_non_cacheable_extensions", alias = "nonCacheableExtensions")]
    pub non_cacheable_extensions: Vec<String>,

    /// Assets pre-warmed into the assets bucket on install.
    #[serde(default, alias = "staticAssets")]
    pub static_assets: Vec<String>,

    /// Offline pages by path prefix, matched in order.
    ///
    /// Either a list of rules or a `{pattern: page}` object read in document order.
    #[serde(default, alias = "offlinePages", deserialize_with = "deserialize_offline_pages")]
    pub offline_pages: Vec<OfflinePageRule>,

    /// Offline page used when no rule matches.
    #[serde(default = "default_offline_page", alias = "defaultOfflinePage")]
    pub default_offline_page: String,

    /// Recovery behavior for authentication and network failures.
    #[serde(default, alias = "errorHandling")]
    pub error_handling: ErrorHandling,

    /// How a newly installed worker takes over from an active one.
    #[serde(default)]
    pub update: UpdateConfig,
}

/// One ordered offline page rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflinePageRule {
    /// Path prefix; a trailing `*` is accepted and ignored.
    pub pattern: String,
    /// Offline page URL (path) served for matching requests.
    pub page: String,
}

fn deserialize_offline_pages<'de, D>(deserializer: D) -> Result<Vec<OfflinePageRule>, D::Error>
where
    D: Deserializer<'de>,
{
    struct OfflinePagesVisitor;

    impl<'de> Visitor<'de> for OfflinePagesVisitor {
        type Value = Vec<OfflinePageRule>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a list of {pattern, page} rules or a map of pattern to page")
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut rules = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(rule) = seq.next_element::<OfflinePageRule>()? {
                rules.push(rule);
            }
            Ok(rules)
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut rules = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((pattern, page)) = map.next_entry::<String, String>()? {
                rules.push(OfflinePageRule { pattern, page });
            }
            Ok(rules)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }
    }

    deserializer.deserialize_any(OfflinePagesVisitor)
}

/// Strategy per cacheable category. Mutating requests have no strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStrategies {
    #[serde(default = "default_assets_strategy")]
    pub assets: Strategy,
    #[serde(default = "default_network_first")]
    pub pages: Strategy,
    #[serde(default = "default_network_first")]
    pub api: Strategy,
}

impl Default for CacheStrategies {
    fn default() -> Self {
        Self { assets: default_assets_strategy(), pages: default_network_first(), api: default_network_first() }
    }
}

impl CacheStrategies {
    pub fn for_category(&self, category: Category) -> Option<Strategy> {
        match category {
            Category::Asset => Some(self.assets),
            Category::Api => Some(self.api),
            Category::Page => Some(self.pages),
            Category::Mutating => None,
        }
    }
}

/// Per-category cache participation. A non-cacheable category is network-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cacheable {
    #[serde(default = "default_true")]
    pub assets: bool,
    #[serde(default = "default_true")]
    pub pages: bool,
    #[serde(default = "default_true")]
    pub api: bool,
}

impl Default for Cacheable {
    fn default() -> Self {
        Self { assets: true, pages: true, api: true }
    }
}

impl Cacheable {
    /// Mutating requests are never cached.
    pub fn for_category(&self, category: Category) -> bool {
        match category {
            Category::Asset => self.assets,
            Category::Api => self.api,
            Category::Page => self.pages,
            Category::Mutating => false,
        }
    }
}

/// Timeouts in milliseconds. `network` applies to static assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(default = "default_network_timeout")]
    pub network: u64,
    #[serde(default = "default_api_timeout")]
    pub api: u64,
    #[serde(default = "default_page_timeout")]
    pub page: u64,
    #[serde(default = "default_post_timeout")]
    pub post: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            network: default_network_timeout(),
            api: default_api_timeout(),
            page: default_page_timeout(),
            post: default_post_timeout(),
        }
    }
}

impl Timeouts {
    /// Timeout as Duration for use with tokio.
    pub fn for_category(&self, category: Category) -> Duration {
        let ms = match category {
            Category::Asset => self.network,
            Category::Api => self.api,
            Category::Page => self.page,
            Category::Mutating => self.post,
        };
        Duration::from_millis(ms)
    }
}

/// Recovery behavior grouped by failure kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorHandling {
    #[serde(default, alias = "csrfError")]
    pub csrf_error: CsrfErrorConfig,
    #[serde(default, alias = "sessionExpired")]
    pub session_expired: SessionExpiredConfig,
    #[serde(default, alias = "networkError")]
    pub network_error: NetworkErrorConfig,
}

/// Anti-forgery token refresh on HTTP 419.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrfErrorConfig {
    /// Refresh the token and retry once. Default: true.
    #[serde(default = "default_true", alias = "autoRefresh")]
    pub auto_refresh: bool,

    /// Retry budget. The request is retried at most once; 0 disables the retry.
    #[serde(default = "default_csrf_retries", alias = "maxRetries")]
    pub max_retries: u32,

    /// Path fetched to obtain a fresh token.
    #[serde(default = "default_refresh_path", alias = "refreshPath")]
    pub refresh_path: String,

    /// Form/JSON field holding the token in mutating request bodies.
    #[serde(default = "default_token_field", alias = "tokenField")]
    pub token_field: String,

    /// Header holding the token, rewritten when present on the request.
    #[serde(default = "default_token_header", alias = "tokenHeader")]
    pub token_header: String,

    /// How the token is located in the refreshed document.
    #[serde(default, alias = "tokenRule")]
    pub token_rule: TokenRule,
}

impl Default for CsrfErrorConfig {
    fn default() -> Self {
        Self {
            auto_refresh: true,
            max_retries: default_csrf_retries(),
            refresh_path: default_refresh_path(),
            token_field: default_token_field(),
            token_header: default_token_header(),
            token_rule: TokenRule::default(),
        }
    }
}

/// Rule that extracts an anti-forgery token from an HTML document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenRule {
    /// `<meta name="{name}" content="...">`
    Meta { name: String },
    /// Regular expression whose first capture group is the token.
    Regex { pattern: String },
}

impl Default for TokenRule {
    fn default() -> Self {
        TokenRule::Meta { name: "csrf-token".into() }
    }
}

/// Session expiry (HTTP 401/403) handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionExpiredConfig {
    #[serde(default = "default_true", alias = "redirectToLogin")]
    pub redirect_to_login: bool,
    #[serde(default = "default_login_route", alias = "loginRoute")]
    pub login_route: String,
    #[serde(default = "default_true", alias = "showNotification")]
    pub show_notification: bool,
    #[serde(default = "default_session_message")]
    pub message: String,
}

impl Default for SessionExpiredConfig {
    fn default() -> Self {
        Self {
            redirect_to_login: true,
            login_route: default_login_route(),
            show_notification: true,
            message: default_session_message(),
        }
    }
}

/// Network failure handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkErrorConfig {
    /// Broadcast a `network_error` notification on fetch failure. Default: true.
    #[serde(default = "default_true")]
    pub notify: bool,
    /// Retry failed fetches before falling back. Default: false.
    #[serde(default, alias = "autoRetry")]
    pub auto_retry: bool,
    /// Extra attempts when `auto_retry` is on.
    #[serde(default = "default_network_retries", alias = "maxRetries")]
    pub max_retries: u32,
    #[serde(default = "default_network_message")]
    pub message: String,
}

impl Default for NetworkErrorConfig {
    fn default() -> Self {
        Self {
            notify: true,
            auto_retry: false,
            max_retries: default_network_retries(),
            message: default_network_message(),
        }
    }
}

/// Update propagation between worker generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Activate a new worker over an active one without waiting. Default: true.
    #[serde(default = "default_true")]
    pub silent: bool,
    /// Take control of open clients on activation. Default: true.
    #[serde(default = "default_true", alias = "claimClients")]
    pub claim_clients: bool,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self { silent: true, claim_clients: true }
    }
}

fn default_app_name() -> String {
    "app".into()
}

fn default_cache_version() -> String {
    "v1".into()
}

fn default_origin() -> String {
    "http://localhost".into()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./stowaway-cache.sqlite")
}

fn default_user_agent() -> String {
    "stowaway/0.1".into()
}

fn default_assets_strategy() -> Strategy {
    Strategy::CacheFirst
}

fn default_network_first() -> Strategy {
    Strategy::NetworkFirst
}

fn default_network_timeout() -> u64 {
    10_000
}

fn default_api_timeout() -> u64 {
    10_000
}

fn default_page_timeout() -> u64 {
    15_000
}

fn default_post_timeout() -> u64 {
    30_000
}

fn default_asset_patterns() -> Vec<String> {
    ["/assets/", "/build/", "/vendor/", "/css/", "/js/", "/images/", "/fonts/", "/media/", "/storage/", "/uploads/"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_api_patterns() -> Vec<String> {
    ["/api/", "/livewire/", "/graphql/"].into_iter().map(String::from).collect()
}

fn default_cacheable_extensions() -> Vec<String> {
    [
        "css", "js", "mjs", "ts", "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "bmp", "tiff", "woff", "woff2",
        "ttf", "otf", "eot", "pdf", "doc", "docx", "txt", "mp3", "wav", "mp4", "webm", "json", "xml", "csv",
        "manifest", "webmanifest", "html", "htm",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_non_cacheable_extensions() -> Vec<String> {
    [
        "avi", "mkv", "mov", "wmv", "flv", "flac", "aac", "m4a", "zip", "rar", "7z", "tar", "gz", "exe", "msi",
        "dmg", "deb", "rpm", "db", "sqlite", "sql",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_offline_page() -> String {
    "/offline.html".into()
}

fn default_csrf_retries() -> u32 {
    1
}

fn default_refresh_path() -> String {
    "/".into()
}

fn default_token_field() -> String {
    "_token".into()
}

fn default_token_header() -> String {
    "X-CSRF-TOKEN".into()
}

fn default_login_route() -> String {
    "/login".into()
}

fn default_session_message() -> String {
    "Your session has expired. Please log in again.".into()
}

fn default_network_retries() -> u32 {
    1
}

fn default_network_message() -> String {
    "Connection lost. Please check your internet.".into()
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            cache_version: default_cache_version(),
            origin: default_origin(),
            db_path: default_db_path(),
            user_agent: default_user_agent(),
            pwa_routes: Vec::new(),
            cache_strategies: CacheStrategies::default(),
            cacheable: Cacheable::default(),
            timeouts: Timeouts::default(),
            asset_patterns: default_asset_patterns(),
            api_patterns: default_api_patterns(),
            cacheable_extensions: default_cacheable_extensions(),
            non_cacheable_extensions: default_non_cacheable_extensions(),
            static_assets: Vec::new(),
            offline_pages: Vec::new(),
            default_offline_page: default_offline_page(),
            error_handling: ErrorHandling::default(),
            update: UpdateConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `STOWAWAY_` (nested keys split on `__`)
    /// 2. TOML file from `STOWAWAY_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed (including unknown strategy names)
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("STOWAWAY_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("STOWAWAY_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Parse a host-supplied JSON configuration document and validate it.
    ///
    /// Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::LoadFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Timeout for a category.
    pub fn timeout(&self, category: Category) -> Duration {
        self.timeouts.for_category(category)
    }

    pub fn is_cacheable(&self, category: Category) -> bool {
        self.cacheable.for_category(category)
    }
}
