//! Network access for the worker.
//!
//! ### Requests and responses
//! - Owned, cheaply clonable values (`Bytes` bodies) so a request can be
//!   replayed for background refreshes and token-refresh retries.
//! - Headers keep their original order and casing; lookups are case-insensitive.
//!
//! ### Network seam
//! - [`Network`] is the only way the worker reaches the origin server.
//! - [`HttpNetwork`] is the reqwest-backed implementation; tests substitute
//!   a scripted double.
//! - Timeouts are applied by the caller, per request category.

pub mod url;

use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, Method};
use serde::Serialize;
use stowaway_core::{CachedResponse, FailureCode};

pub use self::url::{UrlError, resolve};

/// Configuration for the HTTP network.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "stowaway/0.1")
    pub user_agent: String,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { user_agent: "stowaway/0.1".to_string(), max_redirects: 5 }
    }
}

/// An intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl Request {
    pub fn new(method: &str, url: impl Into<String>) -> Self {
        Self { method: method.to_ascii_uppercase(), url: url.into(), headers: Vec::new(), body: None }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Replace every value of `name` with `value`, appending if absent.
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }

    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Network,
    Cache,
    /// Built by the worker: failure bodies, offline pages, redirects out of the app.
    Synthesized,
}

/// A response handed back to the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub source: ResponseSource,
}

impl Response {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>, source: ResponseSource) -> Self {
        Self { status, headers, body: body.into(), source }
    }

    /// `ok` in the fetch sense: 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn from_cached(entry: CachedResponse) -> Self {
        Self::new(entry.status, entry.headers, entry.body, ResponseSource::Cache)
    }

    pub fn to_cached(&self, request: &Request) -> CachedResponse {
        CachedResponse::new(&request.method, &request.url, self.status, self.headers.clone(), self.body.to_vec())
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
}

/// Errors from a network attempt. HTTP error statuses are responses, not errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// No response within the category timeout.
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// DNS, connection or protocol failure.
    #[error("network error: {0}")]
    Network(String),
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout(_))
    }

    /// Timeouts always report `TIMEOUT`; other failures use the category's code.
    pub fn failure_code(&self, category_code: FailureCode) -> FailureCode {
        if self.is_timeout() { FailureCode::Timeout } else { category_code }
    }
}

/// Access to the origin server.
#[async_trait::async_trait]
pub trait Network: Send + Sync {
    /// Perform one request. Implementations do not apply category timeouts.
    async fn fetch(&self, request: Request) -> Result<Response, FetchError>;
}

/// reqwest-backed network.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    http: Client,
}

impl HttpNetwork {
    /// Create a new network client with the given configuration.
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| FetchError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http })
    }
}

#[async_trait::async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: Request) -> Result<Response, FetchError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| FetchError::Network(format!("invalid method {}: {e}", request.method)))?;

        let mut builder = self.http.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(format!("failed to read response: {e}")))?;

        tracing::debug!(url = %request.url, status, bytes = body.len(), "fetched");

        Ok(Response::new(status, headers, body, ResponseSource::Network))
    }
}
