//! One worker generation and its event dispatch table.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use stowaway_core::{
    AppConfig, BucketKind, CacheDb, Category, Error, InboundMessage, RouteDecision, VersionReply, is_mutating_method,
};
use tokio::sync::{oneshot, watch};

use crate::clients::ClientRegistry;
use crate::context::{SharedContext, WorkerContext};
use crate::fallback::open_in_browser;
use crate::fetch::{Network, Request, Response};
use crate::lifecycle::{self, ActivateReport, PrewarmReport, WorkerState};
use crate::strategy::StrategyExecutor;

/// Unique identifier for a worker generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WorkerId(u64);

impl WorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Events a worker handles.
#[derive(Debug)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    Message { message: InboundMessage, port: Option<oneshot::Sender<VersionReply>> },
}

#[derive(Debug)]
pub enum EventOutcome {
    Installed(PrewarmReport),
    Activated(ActivateReport),
    Fetch(FetchOutcome),
    Message(MessageOutcome),
}

/// What happened to an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Not handled; the request goes to the network untouched.
    PassThrough,
    Respond(Response),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MessageOutcome {
    SkipWaiting { activated: bool },
    Cleared { buckets: usize },
    Cached(PrewarmReport),
    Version(VersionReply),
}

/// A worker generation: immutable configuration plus lifecycle state.
#[derive(Debug)]
pub struct Worker {
    id: WorkerId,
    ctx: SharedContext,
    executor: StrategyExecutor,
    state: watch::Sender<WorkerState>,
}

impl Worker {
    pub fn new(
        config: AppConfig, db: CacheDb, network: Arc<dyn Network>, clients: Arc<ClientRegistry>,
    ) -> Result<Self, Error> {
        let ctx = Arc::new(WorkerContext::new(config, db, network, clients)?);
        let executor = StrategyExecutor::new(ctx.clone());
        let (state, _) = watch::channel(WorkerState::Parsed);
        Ok(Self { id: WorkerId::new(), ctx, executor, state })
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn config(&self) -> &AppConfig {
        &self.ctx.config
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: WorkerState) {
        let previous = self.state.send_replace(state);
        tracing::debug!(id = %self.id, ?previous, ?state, "worker state changed");
    }

    pub(crate) fn mark_redundant(&self) {
        self.set_state(WorkerState::Redundant);
    }

    /// Wait for background refreshes and write-throughs.
    pub async fn settle(&self) -> usize {
        self.ctx.background.settle().await
    }

    /// Route an event to its handler.
    pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome, Error> {
        match event {
            WorkerEvent::Install => self.on_install().await.map(EventOutcome::Installed),
            WorkerEvent::Activate => self.on_activate().await.map(EventOutcome::Activated),
            WorkerEvent::Fetch(request) => Ok(EventOutcome::Fetch(self.on_fetch(request).await)),
            WorkerEvent::Message { message, port } => self.on_message(message, port).await.map(EventOutcome::Message),
        }
    }

    async fn on_install(&self) -> Result<PrewarmReport, Error> {
        self.set_state(WorkerState::Installing);
        match lifecycle::install(&self.ctx).await {
            Ok(report) => {
                tracing::info!(
                    id = %self.id,
                    version = %self.ctx.config.cache_version,
                    cached = report.cached.len(),
                    failed = report.failed.len(),
                    "worker installed"
                );
                self.set_state(WorkerState::Installed);
                Ok(report)
            }
            Err(e) => {
                tracing::error!(id = %self.id, "install failed: {e}");
                self.mark_redundant();
                Err(e)
            }
        }
    }

    async fn on_activate(&self) -> Result<ActivateReport, Error> {
        if self.state() != WorkerState::Installed {
            return Err(Error::WorkerState(format!("cannot activate a worker in state {:?}", self.state())));
        }
        self.set_state(WorkerState::Activating);
        match lifecycle::activate(&self.ctx).await {
            Ok(report) => {
                tracing::info!(id = %self.id, deleted = report.deleted.len(), claimed = report.claimed, "worker active");
                self.set_state(WorkerState::Active);
                Ok(report)
            }
            Err(e) => {
                tracing::error!(id = %self.id, "activation failed: {e}");
                self.set_state(WorkerState::Installed);
                Err(e)
            }
        }
    }

    async fn on_fetch(&self, request: Request) -> FetchOutcome {
        let classification = match self.ctx.classifier.route(&request.url, &request.method) {
            RouteDecision::PassThrough => return FetchOutcome::PassThrough,
            RouteDecision::Intercept(classification) => classification,
        };

        if !classification.allowed {
            if classification.category == Category::Page && request.is_get() {
                tracing::debug!(url = %request.url, "route outside the app, opening in browser");
                return FetchOutcome::Respond(open_in_browser(&request.url));
            }
            return FetchOutcome::PassThrough;
        }

        let category =
            if is_mutating_method(&request.method) { Category::Mutating } else { classification.category };
        FetchOutcome::Respond(self.executor.execute(request, category).await)
    }

    async fn on_message(
        &self, message: InboundMessage, port: Option<oneshot::Sender<VersionReply>>,
    ) -> Result<MessageOutcome, Error> {
        match message {
            InboundMessage::SkipWaiting => Ok(MessageOutcome::SkipWaiting { activated: false }),
            InboundMessage::CacheClear => {
                let buckets = self.ctx.db.clear_all().await?;
                tracing::info!(buckets, "cleared all caches");
                Ok(MessageOutcome::Cleared { buckets })
            }
            InboundMessage::CacheUrls { urls } => {
                let targets = urls.into_iter().map(|url| (BucketKind::Core, url)).collect();
                Ok(MessageOutcome::Cached(lifecycle::prewarm(&self.ctx, targets).await))
            }
            InboundMessage::GetVersion => {
                let reply = VersionReply { version: self.ctx.config.cache_version.clone() };
                if let Some(port) = port
                    && port.send(reply.clone()).is_err()
                {
                    tracing::debug!("version port closed before reply");
                }
                Ok(MessageOutcome::Version(reply))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::ResponseSource;
    use crate::testing::{Reply, ScriptedNetwork, config, url};
    use stowaway_core::CachedResponse;

    async fn active_worker(cfg: AppConfig) -> (Worker, Arc<ScriptedNetwork>) {
        let db = CacheDb::open_in_memory().await.unwrap();
        let network = ScriptedNetwork::new();
        let worker = Worker::new(cfg, db, network.clone(), Arc::new(ClientRegistry::new())).unwrap();
        worker.dispatch(WorkerEvent::Install).await.unwrap();
        worker.dispatch(WorkerEvent::Activate).await.unwrap();
        (worker, network)
    }

    async fn fetch(worker: &Worker, request: Request) -> FetchOutcome {
        match worker.dispatch(WorkerEvent::Fetch(request)).await.unwrap() {
            EventOutcome::Fetch(outcome) => outcome,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    async fn message(worker: &Worker, message: InboundMessage) -> MessageOutcome {
        match worker.dispatch(WorkerEvent::Message { message, port: None }).await.unwrap() {
            EventOutcome::Message(outcome) => outcome,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_lifecycle_states() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let worker = Worker::new(config(), db, ScriptedNetwork::new(), Arc::new(ClientRegistry::new())).unwrap();
        let states = worker.subscribe();
        assert_eq!(worker.state(), WorkerState::Parsed);

        assert!(worker.dispatch(WorkerEvent::Activate).await.is_err());
        worker.dispatch(WorkerEvent::Install).await.unwrap();
        assert_eq!(*states.borrow(), WorkerState::Installed);
        worker.dispatch(WorkerEvent::Activate).await.unwrap();
        assert_eq!(worker.state(), WorkerState::Active);
    }

    #[tokio::test]
    async fn test_disallowed_route_is_not_intercepted() {
        let mut cfg = config();
        cfg.pwa_routes = vec!["/app*".into()];
        let (worker, network) = active_worker(cfg).await;
        let calls_after_install = network.calls().len();

        let asset = fetch(&worker, Request::get(url("/other/logo.png"))).await;
        assert_eq!(asset, FetchOutcome::PassThrough);

        let page = fetch(&worker, Request::get(url("/other"))).await;
        let FetchOutcome::Respond(response) = page else { panic!("expected open-in-browser document") };
        assert_eq!(response.source, ResponseSource::Synthesized);
        assert!(response.text().contains("_system"));

        worker.settle().await;
        assert_eq!(network.calls().len(), calls_after_install);
        assert_eq!(worker.ctx.db.entry_count("app-v1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cross_origin_and_head_pass_through() {
        let (worker, network) = active_worker(config()).await;
        let calls_after_install = network.calls().len();

        assert_eq!(fetch(&worker, Request::get("https://cdn.test/lib.js")).await, FetchOutcome::PassThrough);
        assert_eq!(fetch(&worker, Request::new("HEAD", url("/"))).await, FetchOutcome::PassThrough);
        assert_eq!(network.calls().len(), calls_after_install);
    }

    #[tokio::test]
    async fn test_post_to_api_takes_mutating_path() {
        let (worker, network) = active_worker(config()).await;
        network.on("POST", &url("/api/items"), Reply::status(201, "created"));

        let FetchOutcome::Respond(response) = fetch(&worker, Request::post(url("/api/items"))).await else {
            panic!("expected a response");
        };
        worker.settle().await;
        assert_eq!(response.status, 201);
        assert_eq!(worker.ctx.db.entry_count("app-api-v1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cache_clear_is_idempotent() {
        let (worker, _network) = active_worker(config()).await;
        let entry = CachedResponse::new("GET", &url("/"), 200, Vec::new(), b"home".to_vec());
        worker.ctx.db.put("app-v1", &entry).await.unwrap();

        assert_eq!(message(&worker, InboundMessage::CacheClear).await, MessageOutcome::Cleared { buckets: 3 });
        assert_eq!(message(&worker, InboundMessage::CacheClear).await, MessageOutcome::Cleared { buckets: 0 });
        assert!(worker.ctx.db.bucket_stats().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cache_urls() {
        let (worker, network) = active_worker(config()).await;
        network.on("GET", &url("/docs"), Reply::html("docs"));

        let outcome =
            message(&worker, InboundMessage::CacheUrls { urls: vec!["/docs".into(), "/missing".into()] }).await;
        assert_eq!(
            outcome,
            MessageOutcome::Cached(PrewarmReport { cached: vec!["/docs".into()], failed: vec!["/missing".into()] })
        );
        assert!(worker.ctx.db.match_entry("app-v1", "GET", &url("/docs")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_get_version_replies_on_port() {
        let mut cfg = config();
        cfg.cache_version = "v7".into();
        let (worker, _network) = active_worker(cfg).await;

        let (tx, rx) = oneshot::channel();
        worker.dispatch(WorkerEvent::Message { message: InboundMessage::GetVersion, port: Some(tx) }).await.unwrap();
        assert_eq!(rx.await.unwrap(), VersionReply { version: "v7".into() });
    }
}
