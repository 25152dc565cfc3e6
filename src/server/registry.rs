//! Registry of the clients a listener has accepted.

use std::sync::{Arc, PoisonError, RwLock};

use crate::client::ClientTransport;

/// Ordered set of live client transports.
///
/// The accept loop appends while the aggregation and broadcast loops work
/// on snapshots, so no lock is held across an await.
#[derive(Debug, Default)]
pub(crate) struct ClientRegistry {
    clients: RwLock<Vec<Arc<ClientTransport>>>,
}

impl ClientRegistry {
    pub(crate) fn insert(&self, client: Arc<ClientTransport>) {
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(client);
    }

    /// Clients in registration order.
    pub(crate) fn snapshot(&self) -> Vec<Arc<ClientTransport>> {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove `client`. Returns `false` if it was not registered.
    pub(crate) fn remove(&self, client: &Arc<ClientTransport>) -> bool {
        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        match clients.iter().position(|c| Arc::ptr_eq(c, client)) {
            Some(index) => {
                clients.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove and return every client.
    pub(crate) fn drain(&self) -> Vec<Arc<ClientTransport>> {
        std::mem::take(&mut *self.clients.write().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn len(&self) -> usize {
        self.clients.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Arc<ClientTransport> {
        Arc::new(ClientTransport::connect_to("127.0.0.1", 9))
    }

    #[test]
    fn test_keeps_registration_order() {
        let registry = ClientRegistry::default();
        let (a, b, c) = (client(), client(), client());
        registry.insert(Arc::clone(&a));
        registry.insert(Arc::clone(&b));
        registry.insert(Arc::clone(&c));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert!(Arc::ptr_eq(&snapshot[0], &a));
        assert!(Arc::ptr_eq(&snapshot[2], &c));

        assert!(registry.remove(&b));
        assert!(!registry.remove(&b));
        let snapshot = registry.snapshot();
        assert!(Arc::ptr_eq(&snapshot[0], &a));
        assert!(Arc::ptr_eq(&snapshot[1], &c));
    }

    #[test]
    fn test_drain_empties() {
        let registry = ClientRegistry::default();
        registry.insert(client());
        registry.insert(client());

        assert_eq!(registry.drain().len(), 2);
        assert_eq!(registry.len(), 0);
        assert!(registry.snapshot().is_empty());
    }
}
