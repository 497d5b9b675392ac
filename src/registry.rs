//! Live-connection bookkeeping.
//!
//! The registry is the only structure touched by more than one task:
//! every connection worker adds and removes itself, the server's
//! shutdown path snapshots it, and dispatcher callbacks read it for
//! "total connections" and "connection index" answers. Insertion order
//! is meaningful: a connection's index in the list is its answer to
//! "my number".

use std::sync::{Arc, RwLock};
use tracing::info;

use crate::connection::Connection;

/// Thread-safe, insertion-ordered collection of live connections.
///
/// One writer at a time, any number of concurrent readers. Entries are
/// identified by their client ID, which the server never reuses.
#[derive(Debug, Default)]
pub struct Registry {
    connections: RwLock<Vec<Arc<Connection>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a connection. O(1) amortized.
    pub fn add(&self, conn: Arc<Connection>) {
        self.connections.write().unwrap().push(conn);
    }

    /// Remove a connection by identity. Idempotent: removing an absent
    /// connection is a no-op.
    pub fn remove(&self, conn: &Connection) {
        let emptied = {
            let mut list = self.connections.write().unwrap();
            list.retain(|c| c.client_id() != conn.client_id());
            list.is_empty()
        };

        if emptied {
            info!("No active connections. Waiting for clients");
        }
    }

    /// Number of connections currently mid-lifecycle.
    pub fn len(&self) -> usize {
        self.connections.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().unwrap().is_empty()
    }

    /// Position of `conn` in insertion order, or `None` if it has
    /// already been removed.
    pub fn index_of(&self, conn: &Connection) -> Option<usize> {
        self.connections
            .read()
            .unwrap()
            .iter()
            .position(|c| c.client_id() == conn.client_id())
    }

    /// Point-in-time copy of the current membership. Used by the
    /// shutdown broadcast so iteration is never racing mutation.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().unwrap().clone()
    }
}
