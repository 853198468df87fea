//! State shared by one worker generation's handlers.

use std::sync::Arc;

use stowaway_core::{AppConfig, BucketNames, CacheDb, Classifier, Error, Notification, OfflinePageMap};
use url::Url;

use crate::background::BackgroundTasks;
use crate::clients::ClientRegistry;
use crate::fetch::Network;
use crate::recovery::TokenExtractor;

/// Everything a handler needs, built once from an immutable configuration.
pub struct WorkerContext {
    pub config: AppConfig,
    pub origin: Url,
    pub buckets: BucketNames,
    pub classifier: Classifier,
    pub offline_pages: OfflinePageMap,
    pub token_extractor: TokenExtractor,
    pub db: CacheDb,
    pub network: Arc<dyn Network>,
    pub clients: Arc<ClientRegistry>,
    pub background: BackgroundTasks,
}

impl WorkerContext {
    /// Validate the configuration and derive the per-generation lookup tables.
    pub fn new(
        config: AppConfig, db: CacheDb, network: Arc<dyn Network>, clients: Arc<ClientRegistry>,
    ) -> Result<Self, Error> {
        config.validate().map_err(|e| Error::InvalidInput(e.to_string()))?;

        let origin = Url::parse(&config.origin).map_err(|e| Error::InvalidUrl(format!("{}: {e}", config.origin)))?;
        let token_extractor = TokenExtractor::new(&config.error_handling.csrf_error.token_rule)?;
        let buckets = BucketNames::new(&config.app_name, &config.cache_version);
        let classifier = Classifier::from_config(&config);
        let offline_pages = OfflinePageMap::new(&config.offline_pages, config.default_offline_page.clone());

        Ok(Self {
            config,
            origin,
            buckets,
            classifier,
            offline_pages,
            token_extractor,
            db,
            network,
            clients,
            background: BackgroundTasks::new(),
        })
    }

    /// Broadcast to every client; no recipients is fine.
    pub fn notify(&self, notification: Notification) {
        let reached = self.clients.broadcast(notification);
        tracing::debug!(reached, "notified clients");
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("origin", &self.origin.as_str())
            .field("buckets", &self.buckets)
            .field("cache_version", &self.config.cache_version)
            .finish_non_exhaustive()
    }
}

/// Shared handle passed to executors and background tasks.
pub type SharedContext = Arc<WorkerContext>;
