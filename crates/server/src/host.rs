//! The process hosting one registration and the MCP caller as its single client.

use std::sync::Arc;
use std::time::Duration;

use stowaway_core::{AppConfig, CacheDb, ClientMessage, Error};
use stowaway_worker::{ClientId, ClientRegistry, Network, Registration};
use tokio::sync::{Mutex, mpsc};
use url::Url;

/// Shared state behind every tool call.
pub struct WorkerHost {
    registration: Registration,
    network: Arc<dyn Network>,
    origin: Url,
    pass_through_timeout: Duration,
    client: ClientId,
    inbox: Mutex<mpsc::UnboundedReceiver<ClientMessage>>,
}

impl WorkerHost {
    /// Connect the host as a client, then install and activate the first generation.
    pub async fn start(config: AppConfig, db: CacheDb, network: Arc<dyn Network>) -> Result<Self, Error> {
        let clients = Arc::new(ClientRegistry::new());
        let (client, inbox) = clients.connect();
        let registration = Registration::new(db, network.clone(), clients);

        let origin = Url::parse(&config.origin).map_err(|e| Error::InvalidUrl(format!("{}: {e}", config.origin)))?;
        let pass_through_timeout = Duration::from_millis(config.timeouts.network);
        let worker = registration.register(config).await?;
        tracing::info!(id = %worker.id(), %client, origin = %origin, "worker registered");

        Ok(Self { registration, network, origin, pass_through_timeout, client, inbox: Mutex::new(inbox) })
    }

    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    pub fn network(&self) -> &Arc<dyn Network> {
        &self.network
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn pass_through_timeout(&self) -> Duration {
        self.pass_through_timeout
    }

    /// Everything broadcast to the host client since the last drain.
    pub async fn drain_messages(&self) -> Vec<ClientMessage> {
        let mut inbox = self.inbox.lock().await;
        let mut messages = Vec::new();
        while let Ok(message) = inbox.try_recv() {
            messages.push(message);
        }
        messages
    }

    pub fn is_controlled(&self) -> bool {
        self.registration.clients().controlled_count() > 0
    }
}

impl Drop for WorkerHost {
    fn drop(&mut self) {
        self.registration.clients().disconnect(self.client);
    }
}

impl std::fmt::Debug for WorkerHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHost")
            .field("origin", &self.origin.as_str())
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}
