//! Thread-safe registry of live connections.
//!
//! The accept loop inserts, the dispatch loop removes on disconnect, and
//! `stop` drains everything.  All access goes through one lock; iteration
//! works on a snapshot so a visitor may trigger removals without deadlocking.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use currens_core::ConnectionId;
use thiserror::Error;
use tracing::debug;

use super::connection::Connection;

/// Errors raised by [`ConnectionRegistry`] mutations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Another live connection already derived the same id.
    #[error("connection id {0} is already registered")]
    DuplicateId(ConnectionId),
}

/// Map from connection id to the live [`Connection`].
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `connection` under `id`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateId`] when `id` is taken; the existing entry
    /// is left untouched.
    pub fn add(&self, id: ConnectionId, connection: Connection) -> Result<(), RegistryError> {
        let mut map = self.write();
        if map.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }
        map.insert(id, connection);
        debug!(id, count = map.len(), "connection registered");
        Ok(())
    }

    /// Removes `id`, returning the connection if it was present.
    pub fn remove(&self, id: ConnectionId) -> Option<Connection> {
        let removed = self.write().remove(&id);
        if removed.is_some() {
            debug!(id, "connection unregistered");
        }
        removed
    }

    pub fn get(&self, id: ConnectionId) -> Option<Connection> {
        self.read().get(&id).cloned()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.read().contains_key(&id)
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Ids currently registered, in no particular order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.read().keys().copied().collect()
    }

    /// Calls `visit` for every connection in a snapshot taken under the lock.
    ///
    /// The lock is released before the first call, so `visit` may add or
    /// remove entries.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(ConnectionId, &Connection),
    {
        let snapshot: Vec<(ConnectionId, Connection)> = self
            .read()
            .iter()
            .map(|(id, conn)| (*id, conn.clone()))
            .collect();
        for (id, conn) in &snapshot {
            visit(*id, conn);
        }
    }

    /// Removes and returns every connection.
    pub fn drain(&self) -> Vec<(ConnectionId, Connection)> {
        self.write().drain().collect()
    }

    // A poisoned lock only means a visitor panicked; the map itself is intact.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<ConnectionId, Connection>> {
        self.connections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ConnectionId, Connection>> {
        self.connections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
