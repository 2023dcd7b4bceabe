//! Registry of live proxy connections.
//!
//! The accept loop inserts, finished connections remove themselves, and
//! enable/disable calls iterate. All three may happen concurrently.

use crate::proxy::ConnectionHandle;
use crate::util::ConnectionId;
use dashmap::DashMap;

/// Concurrent set of active connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a connection.
    pub fn insert(&self, handle: ConnectionHandle) {
        self.connections.insert(handle.id(), handle);
    }

    /// Stop tracking a finished connection.
    pub fn remove(&self, id: ConnectionId) {
        self.connections.remove(&id);
    }

    /// Turn latency injection on for every tracked connection.
    pub fn enable_all(&self) {
        for entry in self.connections.iter() {
            entry.value().enable();
        }
    }

    /// Turn latency injection off for every tracked connection.
    pub fn disable_all(&self) {
        for entry in self.connections.iter() {
            entry.value().disable();
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Ids of the tracked connections, in ascending order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.connections.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_insert_and_remove() {
        let registry = ConnectionRegistry::new();
        registry.insert(ConnectionHandle::detached(ConnectionId::from(2), true));
        registry.insert(ConnectionHandle::detached(ConnectionId::from(1), true));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids(), vec![ConnectionId::from(1), ConnectionId::from(2)]);

        registry.remove(ConnectionId::from(1));
        registry.remove(ConnectionId::from(1));
        assert_eq!(registry.ids(), vec![ConnectionId::from(2)]);

        registry.remove(ConnectionId::from(2));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_toggle_all() {
        let registry = ConnectionRegistry::new();
        let handles: Vec<_> = (0..3u64)
            .map(|i| ConnectionHandle::detached(ConnectionId::from(i), true))
            .collect();
        for handle in &handles {
            registry.insert(handle.clone());
        }

        registry.disable_all();
        assert!(handles.iter().all(|h| !h.is_enabled()));

        registry.enable_all();
        assert!(handles.iter().all(|h| h.is_enabled()));
    }

    #[test]
    fn test_concurrent_insert_and_toggle() {
        let registry = Arc::new(ConnectionRegistry::new());

        let inserter = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for i in 0..500u64 {
                    registry.insert(ConnectionHandle::detached(ConnectionId::from(i), true));
                }
            })
        };
        let toggler = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for i in 0..200 {
                    if i % 2 == 0 {
                        registry.disable_all();
                    } else {
                        registry.enable_all();
                    }
                }
            })
        };

        inserter.join().unwrap();
        toggler.join().unwrap();
        assert_eq!(registry.len(), 500);
    }
}
