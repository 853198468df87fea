//! Recovery from authentication and network failures.
//!
//! ### Expired anti-forgery token (419, mutating requests only)
//! - GET the refresh path, extract a fresh token, broadcast `csrf_token_updated`.
//! - Rewrite the request with the token and retry it exactly once.
//! - Whatever the retry returns is the answer; any failure before that returns the original 419.
//!
//! ### Expired session (401/403, mutating requests only)
//! - Never retried. Clients get `session_expired` and the original response is returned.
//!
//! ### Network failure (any category)
//! - Clients get `network_error`. Retries only when `network_error.auto_retry` is on.

pub mod token;

use stowaway_core::{Category, FailureCode, Notification, RecoverySignal};

use crate::context::SharedContext;
use crate::fetch::{Request, Response, resolve};

pub use token::{TokenExtractor, rewrite_request};

/// Recovery protocol bound to one worker generation.
#[derive(Debug, Clone)]
pub struct Recovery {
    ctx: SharedContext,
}

impl Recovery {
    pub fn new(ctx: SharedContext) -> Self {
        Self { ctx }
    }

    /// Inspect a mutating request's network response and recover if it carries an auth signal.
    pub async fn handle_response(&self, request: &Request, response: Response) -> Response {
        let login_route = &self.ctx.config.error_handling.session_expired.login_route;
        match RecoverySignal::from_status(response.status, login_route) {
            Some(RecoverySignal::CsrfExpired) => self.refresh_and_retry(request, response).await,
            Some(RecoverySignal::SessionExpired { redirect_url }) => {
                self.session_expired(&request.url, redirect_url);
                response
            }
            Some(RecoverySignal::NetworkError) | None => response,
        }
    }

    async fn refresh_and_retry(&self, request: &Request, original: Response) -> Response {
        let csrf = &self.ctx.config.error_handling.csrf_error;
        if !csrf.auto_refresh || csrf.max_retries == 0 {
            tracing::debug!(url = %request.url, "token refresh disabled, returning 419");
            return original;
        }

        tracing::info!(url = %request.url, "anti-forgery token expired, refreshing");

        let Some(token) = self.fetch_token().await else {
            return original;
        };

        self.ctx.notify(Notification::CsrfTokenUpdated { token: token.clone(), silent: true });

        let retry = rewrite_request(request, &csrf.token_field, &csrf.token_header, &token);
        let timeout = self.ctx.config.timeout(Category::Mutating);
        match tokio::time::timeout(timeout, self.ctx.network.fetch(retry)).await {
            Ok(Ok(response)) => {
                tracing::info!(url = %request.url, status = response.status, "retried with refreshed token");
                response
            }
            Ok(Err(e)) => {
                tracing::warn!(url = %request.url, "retry after token refresh failed: {e}");
                original
            }
            Err(_) => {
                tracing::warn!(url = %request.url, "retry after token refresh timed out");
                original
            }
        }
    }

    async fn fetch_token(&self) -> Option<String> {
        let csrf = &self.ctx.config.error_handling.csrf_error;
        let url = match resolve(&self.ctx.origin, &csrf.refresh_path) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("invalid token refresh path {}: {e}", csrf.refresh_path);
                return None;
            }
        };

        let timeout = self.ctx.config.timeout(Category::Page);
        let response = match tokio::time::timeout(timeout, self.ctx.network.fetch(Request::get(url.as_str()))).await {
            Ok(Ok(response)) if response.is_success() => response,
            Ok(Ok(response)) => {
                tracing::warn!(status = response.status, "token refresh page returned an error status");
                return None;
            }
            Ok(Err(e)) => {
                tracing::warn!("token refresh failed: {e}");
                return None;
            }
            Err(_) => {
                tracing::warn!("token refresh timed out");
                return None;
            }
        };

        let token = self.ctx.token_extractor.extract(&response.text());
        if token.is_none() {
            tracing::warn!(url = %url, "no anti-forgery token in refreshed document");
        }
        token
    }

    fn session_expired(&self, url: &str, redirect_url: String) {
        let session = &self.ctx.config.error_handling.session_expired;
        tracing::info!(url, "session expired");
        if session.show_notification {
            self.ctx.notify(Notification::SessionExpired {
                message: session.message.clone(),
                redirect_to_login: session.redirect_to_login,
                login_route: redirect_url,
            });
        }
    }

    /// Tell clients a foreground request could not reach the network.
    pub fn network_error(&self, url: &str, code: FailureCode) {
        let network = &self.ctx.config.error_handling.network_error;
        if network.notify {
            self.ctx.notify(Notification::NetworkError { message: network.message.clone(), url: url.to_string(), code });
        }
    }
}
