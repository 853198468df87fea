//! Cache strategy execution.
//!
//! One executor runs every strategy against the generation's buckets. It
//! always produces a [`Response`]: network failures end in a cached copy, an
//! offline page, or a synthesized JSON failure.
//!
//! | strategy | hit | miss | network failure |
//! |---|---|---|---|
//! | cache-first | cached, refresh in background | network, write-through | 503 (`TIMEOUT` or category code) |
//! | network-first | n/a | network, write-through | cached copy, else 408 on timeout / 503 |
//! | stale-while-revalidate | cached, refresh in background | network, write-through | 408 on timeout / 503 |
//!
//! Failed page requests end in an offline page instead of JSON. A category
//! configured as non-cacheable goes network-only: its bucket is never read or
//! written, and failures take the strategy's no-cache path. Mutating requests
//! never touch the cache and go through [`Recovery`].

use std::time::Duration;

use stowaway_core::{BucketKind, Category, FailureCode, Strategy};
use url::Url;

use crate::context::{SharedContext, WorkerContext};
use crate::fallback::{builtin_offline_page, failure_response, failure_status};
use crate::fetch::{FetchError, Request, Response, resolve};
use crate::recovery::Recovery;

/// Strategy executor bound to one worker generation.
#[derive(Debug, Clone)]
pub struct StrategyExecutor {
    ctx: SharedContext,
    recovery: Recovery,
}

impl StrategyExecutor {
    pub fn new(ctx: SharedContext) -> Self {
        let recovery = Recovery::new(ctx.clone());
        Self { ctx, recovery }
    }

    /// Run the configured strategy for `category`. Mutating requests take the network-only path.
    pub async fn execute(&self, request: Request, category: Category) -> Response {
        match self.ctx.config.cache_strategies.for_category(category) {
            Some(strategy) => self.run(strategy, request, category).await,
            None => self.mutating(request).await,
        }
    }

    async fn run(&self, strategy: Strategy, request: Request, category: Category) -> Response {
        tracing::debug!(url = %request.url, %category, %strategy, "executing strategy");
        if !self.ctx.config.is_cacheable(category) {
            return self.network_only(strategy, request, category).await;
        }
        match strategy {
            Strategy::CacheFirst => self.cache_first(request, category).await,
            Strategy::NetworkFirst => self.network_first(request, category).await,
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request, category).await,
        }
    }

    async fn cache_first(&self, request: Request, category: Category) -> Response {
        let bucket = self.bucket(category);
        if let Some(hit) = self.lookup(bucket, &request).await {
            self.refresh_in_background(bucket, request, category);
            return hit;
        }

        match self.fetch(&request, category).await {
            Ok(response) => self.write_through(bucket, &request, response),
            Err(e) => {
                let code = self.report(&request, category, &e);
                self.fallback(&request, category, code, false).await
            }
        }
    }

    async fn network_first(&self, request: Request, category: Category) -> Response {
        let bucket = self.bucket(category);
        match self.fetch(&request, category).await {
            Ok(response) => self.write_through(bucket, &request, response),
            Err(e) => {
                let code = self.report(&request, category, &e);
                if let Some(hit) = self.lookup(bucket, &request).await {
                    tracing::debug!(url = %request.url, "network failed, serving cached copy");
                    return hit;
                }
                self.fallback(&request, category, code, true).await
            }
        }
    }

    async fn stale_while_revalidate(&self, request: Request, category: Category) -> Response {
        let bucket = self.bucket(category);
        if let Some(hit) = self.lookup(bucket, &request).await {
            self.refresh_in_background(bucket, request, category);
            return hit;
        }

        match self.fetch(&request, category).await {
            Ok(response) => self.write_through(bucket, &request, response),
            Err(e) => {
                let code = self.report(&request, category, &e);
                self.fallback(&request, category, code, true).await
            }
        }
    }

    async fn network_only(&self, strategy: Strategy, request: Request, category: Category) -> Response {
        match self.fetch(&request, category).await {
            Ok(response) => response,
            Err(e) => {
                let code = self.report(&request, category, &e);
                let timeout_as_408 = strategy != Strategy::CacheFirst;
                self.fallback(&request, category, code, timeout_as_408).await
            }
        }
    }

    async fn mutating(&self, request: Request) -> Response {
        let timeout = self.ctx.config.timeout(Category::Mutating);
        match fetch_with_timeout(&self.ctx, &request, timeout, 0).await {
            Ok(response) => self.recovery.handle_response(&request, response).await,
            Err(e) => {
                let code = self.report(&request, Category::Mutating, &e);
                failure_response(failure_status(code, true), code)
            }
        }
    }

    fn bucket(&self, category: Category) -> &str {
        BucketKind::for_category(category).map_or(self.ctx.buckets.core(), |kind| self.ctx.buckets.get(kind))
    }

    async fn fetch(&self, request: &Request, category: Category) -> Result<Response, FetchError> {
        let network = &self.ctx.config.error_handling.network_error;
        let retries = if network.auto_retry { network.max_retries } else { 0 };
        fetch_with_timeout(&self.ctx, request, self.ctx.config.timeout(category), retries).await
    }

    /// Cache read that degrades to a miss on store errors.
    async fn lookup(&self, bucket: &str, request: &Request) -> Option<Response> {
        match self.ctx.db.match_entry(bucket, &request.method, &request.url).await {
            Ok(hit) => hit.map(Response::from_cached),
            Err(e) => {
                tracing::warn!(bucket, url = %request.url, "cache lookup failed: {e}");
                None
            }
        }
    }

    /// Store a successful GET response after it has been handed back.
    fn write_through(&self, bucket: &str, request: &Request, response: Response) -> Response {
        if response.is_success() && request.is_get() {
            let ctx = self.ctx.clone();
            let bucket = bucket.to_string();
            let entry = response.to_cached(request);
            self.ctx.background.spawn(async move {
                if let Err(e) = ctx.db.put(&bucket, &entry).await {
                    tracing::warn!(bucket, url = %entry.url, "cache write failed: {e}");
                }
            });
        }
        response
    }

    /// Refetch and overwrite the entry. Failures are ignored.
    fn refresh_in_background(&self, bucket: &str, request: Request, category: Category) {
        let ctx = self.ctx.clone();
        let bucket = bucket.to_string();
        let timeout = ctx.config.timeout(category);
        self.ctx.background.spawn(async move {
            match fetch_with_timeout(&ctx, &request, timeout, 0).await {
                Ok(response) if response.is_success() => {
                    if let Err(e) = ctx.db.put(&bucket, &response.to_cached(&request)).await {
                        tracing::debug!(bucket, url = %request.url, "background refresh write failed: {e}");
                    }
                }
                Ok(response) => {
                    tracing::debug!(url = %request.url, status = response.status, "background refresh not cacheable");
                }
                Err(e) => tracing::debug!(url = %request.url, "background refresh failed: {e}"),
            }
        });
    }

    fn report(&self, request: &Request, category: Category, error: &FetchError) -> FailureCode {
        let code = error.failure_code(category.failure_code());
        tracing::info!(url = %request.url, %category, code = code.as_str(), "network request failed: {error}");
        self.recovery.network_error(&request.url, code);
        code
    }

    async fn fallback(&self, request: &Request, category: Category, code: FailureCode, timeout_as_408: bool) -> Response {
        if category == Category::Page {
            return self.offline_page(&request.url).await;
        }
        failure_response(failure_status(code, timeout_as_408), code)
    }

    /// Most specific cached offline page, then the default one, then the built-in page.
    pub async fn offline_page(&self, url: &str) -> Response {
        let path = Url::parse(url).map(|u| u.path().to_string()).unwrap_or_else(|_| "/".to_string());
        let resolved = self.ctx.offline_pages.resolve(&path);
        let default = self.ctx.offline_pages.default_page();

        let candidates = if resolved == default { vec![resolved] } else { vec![resolved, default] };
        for page in candidates {
            let page_url = match resolve(&self.ctx.origin, page) {
                Ok(page_url) => page_url,
                Err(e) => {
                    tracing::warn!(page, "invalid offline page: {e}");
                    continue;
                }
            };
            match self.ctx.db.match_any("GET", page_url.as_str()).await {
                Ok(Some(hit)) => return Response::from_cached(hit),
                Ok(None) => tracing::debug!(page, "offline page not cached"),
                Err(e) => tracing::warn!(page, "offline page lookup failed: {e}"),
            }
        }

        builtin_offline_page(&self.ctx.config.app_name)
    }
}

/// Race the network against `timeout`, retrying up to `retries` extra times.
///
/// A timed-out attempt is dropped, which cancels the request.
pub(crate) async fn fetch_with_timeout(
    ctx: &WorkerContext, request: &Request, timeout: Duration, retries: u32,
) -> Result<Response, FetchError> {
    let mut attempt = 0;
    loop {
        let error = match tokio::time::timeout(timeout, ctx.network.fetch(request.clone())).await {
            Ok(Ok(response)) => return Ok(response),
            Ok(Err(e)) => e,
            Err(_) => FetchError::Timeout(timeout),
        };

        if attempt >= retries {
            return Err(error);
        }
        attempt += 1;
        tracing::debug!(url = %request.url, attempt, "retrying after network failure: {error}");
    }
}
