use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{GateError, Result};

/// Handle to a live client transport.
///
/// The transport itself is owned by its connection worker; the handle only
/// carries identity and a close signal the worker listens on, so another
/// connection can ask for the transport to be torn down without touching the
/// worker's state directly.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: u32,
    pub user: String,
    pub database: Option<String>,
    pub peer_addr: Option<SocketAddr>,
    closer: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(id: u32, user: impl Into<String>) -> Self {
        Self {
            id,
            user: user.into(),
            database: None,
            peer_addr: None,
            closer: CancellationToken::new(),
        }
    }

    pub fn with_database(mut self, database: Option<String>) -> Self {
        self.database = database;
        self
    }

    pub fn with_peer_addr(mut self, peer_addr: SocketAddr) -> Self {
        self.peer_addr = Some(peer_addr);
        self
    }

    /// Asks the owning worker to drop the transport.
    pub fn close(&self) {
        self.closer.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_cancelled()
    }

    /// Resolves once [`close`](Self::close) has been called on any clone of this handle.
    pub async fn closed(&self) {
        self.closer.cancelled().await
    }
}

/// Registry of live connections, keyed by connection id.
///
/// The lock is held only for the map operation itself. Closing a transport
/// happens after the entry has been removed and the lock released.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<u32, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Registers a connection. An id that is already present keeps its
    /// original handle and `false` is returned.
    pub fn register(&self, handle: ConnectionHandle) -> bool {
        let mut connections = self.connections.lock();
        if connections.contains_key(&handle.id) {
            return false;
        }
        debug!(connection_id = handle.id, "Connection registered");
        connections.insert(handle.id, handle);
        true
    }

    pub fn unregister(&self, id: u32) -> Option<ConnectionHandle> {
        self.connections.lock().remove(&id)
    }

    pub fn lookup(&self, id: u32) -> Result<ConnectionHandle> {
        self.connections
            .lock()
            .get(&id)
            .cloned()
            .ok_or(GateError::ConnectionNotFound(id))
    }

    /// Removes the connection and closes its transport as one step.
    pub fn close(&self, id: u32) -> Result<ConnectionHandle> {
        let handle = self
            .connections
            .lock()
            .remove(&id)
            .ok_or(GateError::ConnectionNotFound(id))?;
        handle.close();
        Ok(handle)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.connections.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.connections.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn lookup_of_absent_id_is_not_found() {
        let registry = ConnectionRegistry::new();
        assert!(matches!(registry.lookup(3), Err(GateError::ConnectionNotFound(3))));
    }

    #[test]
    fn duplicate_register_keeps_first_handle() {
        let registry = ConnectionRegistry::new();
        assert!(registry.register(ConnectionHandle::new(1, "alice")));
        assert!(!registry.register(ConnectionHandle::new(1, "mallory")));

        assert_eq!(registry.lookup(1).unwrap().user, "alice");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn close_removes_and_signals_transport() {
        let registry = ConnectionRegistry::new();
        let handle = ConnectionHandle::new(7, "root");
        registry.register(handle.clone());

        registry.close(7).unwrap();

        assert!(handle.is_closed());
        assert!(!registry.contains(7));
        assert!(matches!(registry.close(7), Err(GateError::ConnectionNotFound(7))));
    }

    #[test]
    fn unregister_does_not_close_transport() {
        let registry = ConnectionRegistry::new();
        let handle = ConnectionHandle::new(2, "root");
        registry.register(handle.clone());

        assert!(registry.unregister(2).is_some());
        assert!(!handle.is_closed());
        assert!(registry.unregister(2).is_none());
    }

    #[test]
    fn concurrent_register_unregister_keeps_map_consistent() {
        let registry = ConnectionRegistry::shared();
        let workers: Vec<_> = (0..16u32)
            .map(|worker| {
                let registry = registry.clone();
                thread::spawn(move || {
                    for i in 0..500u32 {
                        let id = worker * 1_000 + i;
                        assert!(registry.register(ConnectionHandle::new(id, "stress")));
                        assert_eq!(registry.lookup(id).unwrap().id, id);
                        // Drop every other entry so adds and removes interleave
                        if i % 2 == 0 {
                            assert!(registry.unregister(id).is_some());
                        }
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(registry.len(), 16 * 250);
        let ids = registry.ids();
        let mut deduped = ids.clone();
        deduped.dedup();
        assert_eq!(ids, deduped);
        assert!(ids.iter().all(|id| id % 2 == 1));
    }
}
