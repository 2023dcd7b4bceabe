//! Connection identifiers for log correlation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out monotonically increasing connection ids.
///
/// Each [`Speedbump`](crate::Speedbump) instance owns its own generator so
/// ids start at zero per instance.
#[derive(Debug, Default)]
pub struct ConnectionIdGenerator {
    next: AtomicU64,
}

impl ConnectionIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id.
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identifier of a single proxied connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_ids_are_sequential() {
        let ids = ConnectionIdGenerator::new();
        assert_eq!(ids.next_id().as_u64(), 0);
        assert_eq!(ids.next_id().as_u64(), 1);
        assert_eq!(ids.next_id().as_u64(), 2);
    }

    #[test]
    fn test_id_display() {
        assert_eq!(ConnectionId::from(42).to_string(), "conn-42");
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let ids = Arc::new(ConnectionIdGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || (0..250).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(seen.len(), 1000);
    }
}
