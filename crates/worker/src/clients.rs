//! Open foreground clients and message delivery.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use stowaway_core::{ClientMessage, Notification};
use tokio::sync::mpsc;

/// Identifier of a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ClientId(u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

#[derive(Debug)]
struct Client {
    tx: mpsc::UnboundedSender<ClientMessage>,
    controlled: bool,
}

/// Every window/tab of the application, controlled or not.
///
/// Owned by the registration, so it outlives individual worker generations.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Mutex<BTreeMap<ClientId, Client>>,
    next_id: AtomicU64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ClientId, Client>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connect a new, uncontrolled client. Messages arrive on the returned receiver.
    pub fn connect(&self) -> (ClientId, mpsc::UnboundedReceiver<ClientMessage>) {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().insert(id, Client { tx, controlled: false });
        tracing::debug!(%id, "client connected");
        (id, rx)
    }

    pub fn disconnect(&self, id: ClientId) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Send a notification to every client, controlled or not.
    ///
    /// Returns the number of clients reached. Clients whose receiver is gone
    /// are dropped; zero recipients is not an error.
    pub fn broadcast(&self, notification: Notification) -> usize {
        self.send_all(ClientMessage::Notification(notification))
    }

    /// Take control of every client and tell each one the controller changed.
    pub fn claim(&self) -> usize {
        let mut clients = self.lock();
        for client in clients.values_mut() {
            client.controlled = true;
        }
        drop(clients);
        let claimed = self.send_all(ClientMessage::ControllerChanged);
        tracing::info!(claimed, "claimed clients");
        claimed
    }

    fn send_all(&self, message: ClientMessage) -> usize {
        let mut clients = self.lock();
        clients.retain(|id, client| {
            let delivered = client.tx.send(message.clone()).is_ok();
            if !delivered {
                tracing::debug!(%id, "client gone, dropping");
            }
            delivered
        });
        clients.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn controlled_count(&self) -> usize {
        self.lock().values().filter(|c| c.controlled).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowaway_core::FailureCode;

    fn network_error() -> Notification {
        Notification::NetworkError { message: "offline".into(), url: "https://app.test/".into(), code: FailureCode::Offline }
    }

    #[test]
    fn test_broadcast_reaches_every_client() {
        let registry = ClientRegistry::new();
        let (_a, mut rx_a) = registry.connect();
        let (_b, mut rx_b) = registry.connect();

        assert_eq!(registry.broadcast(network_error()), 2);
        assert_eq!(rx_a.try_recv().unwrap(), ClientMessage::Notification(network_error()));
        assert_eq!(rx_b.try_recv().unwrap(), ClientMessage::Notification(network_error()));
    }

    #[test]
    fn test_broadcast_without_clients() {
        let registry = ClientRegistry::new();
        assert_eq!(registry.broadcast(network_error()), 0);
    }

    #[test]
    fn test_closed_clients_are_dropped() {
        let registry = ClientRegistry::new();
        let (_a, rx_a) = registry.connect();
        let (_b, _rx_b) = registry.connect();
        drop(rx_a);

        assert_eq!(registry.broadcast(network_error()), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_claim_controls_and_notifies() {
        let registry = ClientRegistry::new();
        let (id, mut rx) = registry.connect();
        assert_eq!(registry.controlled_count(), 0);

        assert_eq!(registry.claim(), 1);
        assert_eq!(registry.controlled_count(), 1);
        assert_eq!(rx.try_recv().unwrap(), ClientMessage::ControllerChanged);

        assert!(registry.disconnect(id));
        assert!(registry.is_empty());
    }
}
