//! Worker lifecycle: install, activate, and the registration that owns generations.
//!
//! ### States
//! `parsed → installing → installed → activating → active`, then `redundant`
//! once superseded. A failed install goes straight to `redundant`.
//!
//! ### Install
//! - Open the generation's three buckets; failing to open any is fatal.
//! - Pre-warm static assets, offline pages and exact allowlisted routes.
//!   Each URL is fetched independently; one failure only logs a warning.
//!
//! ### Activate
//! - Delete every bucket without the current version tag, then claim clients.
//!
//! ### Updates
//! - Silent (default): a new worker activates over the active one immediately.
//! - Otherwise it waits until `SKIP_WAITING`.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use stowaway_core::{AppConfig, BucketKind, BucketStats, CacheDb, Category, Error, InboundMessage, VersionReply};
use tokio::sync::{Mutex, oneshot};

use crate::clients::ClientRegistry;
use crate::context::WorkerContext;
use crate::fetch::{Network, Request, Response, resolve};
use crate::strategy::fetch_with_timeout;
use crate::worker::{EventOutcome, FetchOutcome, MessageOutcome, Worker, WorkerEvent, WorkerId};

/// Lifecycle state of one worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    #[default]
    Parsed,
    Installing,
    Installed,
    Activating,
    Active,
    Redundant,
}

/// Outcome of a best-effort pre-warm.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrewarmReport {
    pub cached: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivateReport {
    pub deleted: Vec<String>,
    pub claimed: usize,
}

/// Open buckets and pre-warm them.
pub(crate) async fn install(ctx: &WorkerContext) -> Result<PrewarmReport, Error> {
    for name in ctx.buckets.all() {
        ctx.db.open_bucket(name).await.map_err(|e| Error::InstallFailed(format!("cannot open bucket {name}: {e}")))?;
    }

    let mut targets: Vec<(BucketKind, String)> = Vec::new();
    for asset in &ctx.config.static_assets {
        targets.push((BucketKind::Assets, asset.clone()));
    }
    for page in ctx.offline_pages.pages() {
        targets.push((BucketKind::Core, page.to_string()));
    }
    for route in ctx.classifier.allowlist().exact_routes() {
        targets.push((BucketKind::Core, route.to_string()));
    }

    let mut seen = HashSet::new();
    targets.retain(|(_, path)| seen.insert(path.clone()));

    Ok(prewarm(ctx, targets).await)
}

/// Fetch and store every target independently.
pub(crate) async fn prewarm(ctx: &WorkerContext, targets: Vec<(BucketKind, String)>) -> PrewarmReport {
    let results = join_all(targets.into_iter().map(|(kind, path)| async move {
        let ok = prewarm_one(ctx, kind, &path).await;
        (path, ok)
    }))
    .await;

    let mut report = PrewarmReport::default();
    for (path, ok) in results {
        if ok { report.cached.push(path) } else { report.failed.push(path) }
    }
    report
}

async fn prewarm_one(ctx: &WorkerContext, kind: BucketKind, path: &str) -> bool {
    let url = match resolve(&ctx.origin, path) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!(path, "skipping pre-warm: {e}");
            return false;
        }
    };

    let category = if kind == BucketKind::Assets { Category::Asset } else { Category::Page };
    let request = Request::get(url.as_str());
    let response: Response = match fetch_with_timeout(ctx, &request, ctx.config.timeout(category), 0).await {
        Ok(response) if response.is_success() => response,
        Ok(response) => {
            tracing::warn!(path, status = response.status, "failed to cache");
            return false;
        }
        Err(e) => {
            tracing::warn!(path, "failed to cache: {e}");
            return false;
        }
    };

    match ctx.db.put(ctx.buckets.get(kind), &response.to_cached(&request)).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(path, "failed to store pre-warmed response: {e}");
            false
        }
    }
}

/// Delete stale generations, then take control of open clients.
pub(crate) async fn activate(ctx: &WorkerContext) -> Result<ActivateReport, Error> {
    let mut deleted = Vec::new();
    for name in ctx.db.bucket_names().await? {
        if !ctx.buckets.is_current_generation(&name) && ctx.db.delete_bucket(&name).await? {
            tracing::info!(bucket = %name, "deleted stale cache");
            deleted.push(name);
        }
    }

    let claimed = if ctx.config.update.claim_clients { ctx.clients.claim() } else { 0 };

    Ok(ActivateReport { deleted, claimed })
}

#[derive(Debug, Default)]
struct Slots {
    waiting: Option<Arc<Worker>>,
    active: Option<Arc<Worker>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerSummary {
    pub id: WorkerId,
    pub state: WorkerState,
    pub app_name: String,
    pub cache_version: String,
}

impl WorkerSummary {
    fn of(worker: &Worker) -> Self {
        Self {
            id: worker.id(),
            state: worker.state(),
            app_name: worker.config().app_name.clone(),
            cache_version: worker.config().cache_version.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationStatus {
    pub active: Option<WorkerSummary>,
    pub waiting: Option<WorkerSummary>,
    pub clients: usize,
    pub controlled: usize,
    pub buckets: Vec<BucketStats>,
}

/// The browser-owned pieces that outlive a worker generation: the cache
/// store, the client registry, and the waiting/active slots.
pub struct Registration {
    db: CacheDb,
    network: Arc<dyn Network>,
    clients: Arc<ClientRegistry>,
    slots: Mutex<Slots>,
}

impl Registration {
    pub fn new(db: CacheDb, network: Arc<dyn Network>, clients: Arc<ClientRegistry>) -> Self {
        Self { db, network, clients, slots: Mutex::new(Slots::default()) }
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    pub fn db(&self) -> &CacheDb {
        &self.db
    }

    /// Install a new generation and activate it, or park it as waiting.
    ///
    /// A failed install leaves the slots untouched.
    pub async fn register(&self, config: AppConfig) -> Result<Arc<Worker>, Error> {
        let worker =
            Arc::new(Worker::new(config, self.db.clone(), self.network.clone(), self.clients.clone())?);
        worker.dispatch(WorkerEvent::Install).await?;

        let mut slots = self.slots.lock().await;
        if slots.active.is_some() && !worker.config().update.silent {
            if let Some(previous) = slots.waiting.replace(worker.clone()) {
                previous.mark_redundant();
            }
            tracing::info!(id = %worker.id(), "installed, waiting for SKIP_WAITING");
            return Ok(worker);
        }

        if let Some(waiting) = slots.waiting.take() {
            waiting.mark_redundant();
        }
        Self::promote(&mut slots, worker.clone()).await?;
        Ok(worker)
    }

    /// Activate the waiting worker, if any. Returns whether one was activated.
    pub async fn skip_waiting(&self) -> Result<bool, Error> {
        let mut slots = self.slots.lock().await;
        let Some(worker) = slots.waiting.take() else {
            return Ok(false);
        };
        Self::promote(&mut slots, worker).await?;
        Ok(true)
    }

    async fn promote(slots: &mut Slots, worker: Arc<Worker>) -> Result<(), Error> {
        worker.dispatch(WorkerEvent::Activate).await?;
        if let Some(previous) = slots.active.replace(worker) {
            previous.mark_redundant();
        }
        Ok(())
    }

    pub async fn active(&self) -> Option<Arc<Worker>> {
        self.slots.lock().await.active.clone()
    }

    pub async fn waiting(&self) -> Option<Arc<Worker>> {
        self.slots.lock().await.waiting.clone()
    }

    /// Route a page request through the active worker. Without one, nothing is intercepted.
    pub async fn fetch(&self, request: Request) -> Result<FetchOutcome, Error> {
        let Some(worker) = self.active().await else {
            return Ok(FetchOutcome::PassThrough);
        };
        match worker.dispatch(WorkerEvent::Fetch(request)).await? {
            EventOutcome::Fetch(outcome) => Ok(outcome),
            other => Err(Error::WorkerState(format!("unexpected fetch outcome: {other:?}"))),
        }
    }

    /// Deliver a foreground message. `SKIP_WAITING` goes to the waiting worker, the rest to the active one.
    pub async fn post_message(
        &self, message: InboundMessage, port: Option<oneshot::Sender<VersionReply>>,
    ) -> Result<MessageOutcome, Error> {
        if message == InboundMessage::SkipWaiting {
            let activated = self.skip_waiting().await?;
            return Ok(MessageOutcome::SkipWaiting { activated });
        }

        let worker = self.active().await.ok_or_else(|| Error::WorkerState("no active worker".into()))?;
        match worker.dispatch(WorkerEvent::Message { message, port }).await? {
            EventOutcome::Message(outcome) => Ok(outcome),
            other => Err(Error::WorkerState(format!("unexpected message outcome: {other:?}"))),
        }
    }

    /// Wait for background work of the active worker.
    pub async fn settle(&self) -> usize {
        match self.active().await {
            Some(worker) => worker.settle().await,
            None => 0,
        }
    }

    pub async fn status(&self) -> Result<RegistrationStatus, Error> {
        let (active, waiting) = {
            let slots = self.slots.lock().await;
            (slots.active.as_deref().map(WorkerSummary::of), slots.waiting.as_deref().map(WorkerSummary::of))
        };
        Ok(RegistrationStatus {
            active,
            waiting,
            clients: self.clients.len(),
            controlled: self.clients.controlled_count(),
            buckets: self.db.bucket_stats().await?,
        })
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration").field("db", &self.db).field("clients", &self.clients.len()).finish_non_exhaustive()
    }
}
