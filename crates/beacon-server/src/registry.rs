//! Token ownership registry.
//!
//! Maps each [`Token`] to the one local [`Connection`] that owns it. The map
//! is a sharded `DashMap`; every operation touches a single key, so the
//! shard lock is the whole synchronization story:
//!
//! - `register` replaces under the shard lock and closes the displaced
//!   connection before releasing it, so no lookup can observe both owners
//!   or neither.
//! - `unregister` removes only when the entry still holds the same
//!   connection, so a stale disconnect cannot clobber a newer owner.

use std::sync::Arc;

use beacon_core::Token;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::connection::{CloseReason, Connection};

/// Per-process token -> connection map.
#[derive(Default)]
pub struct TokenRegistry {
    connections: DashMap<Token, Arc<Connection>>,
}

impl TokenRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `connection` the owner of `token`.
    ///
    /// Returns the displaced owner, already closed with
    /// [`CloseReason::Evicted`].
    pub fn register(&self, token: Token, connection: Arc<Connection>) -> Option<Arc<Connection>> {
        match self.connections.entry(token) {
            Entry::Occupied(mut entry) => {
                let previous = entry.insert(connection);
                let _ = previous.close(CloseReason::Evicted);
                Some(previous)
            }
            Entry::Vacant(entry) => {
                let _ = entry.insert(connection);
                None
            }
        }
    }

    /// Remove `token` if, and only if, it is still owned by `connection`.
    ///
    /// Returns whether an entry was removed.
    pub fn unregister(&self, token: &Token, connection: &Connection) -> bool {
        self.connections
            .remove_if(token, |_, current| current.id() == connection.id())
            .is_some()
    }

    /// Current owner of `token`.
    pub fn lookup(&self, token: &Token) -> Option<Arc<Connection>> {
        self.connections.get(token).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of owned tokens.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no token is owned.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Request closure of every registered connection.
    ///
    /// Entries are left in place; each connection's close handler removes
    /// its own entry once its socket task has finished. Returns how many
    /// connections this call closed.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let owners: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        owners.iter().filter(|conn| conn.close(reason)).count()
    }
}
