//! In-memory presence directory.
//!
//! One write lock spans both maps so every public call is a single
//! atomic read-modify-write with respect to every other call. No
//! operation does I/O under the lock.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use crate::entities::{ConnectionId, Identity};

/// Result of binding a connection to an identity.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// Canonical lowercase key for the identity.
    pub username_key: String,
    /// Connection displaced by this join, if the name was already
    /// bound elsewhere. The caller must migrate that connection's
    /// undelivered messages before releasing any buffered replay.
    pub superseded: Option<ConnectionId>,
}

/// Identity removed by a `leave` call.
#[derive(Debug, Clone)]
pub struct DepartedIdentity {
    pub username: String,
    pub username_key: String,
    pub room: String,
}

#[derive(Default)]
struct DirectoryInner {
    /// connection -> bound identity
    connections: HashMap<ConnectionId, Identity>,
    /// lowercase name -> live connection
    by_name: HashMap<String, ConnectionId>,
}

/// Authoritative connection/identity/room mapping.
///
/// Per-identity state machine: `absent -> bound` on join, `-> absent`
/// on leave or supersession. Supersession is performed entirely under
/// the write lock, so no intermediate state is observable.
#[derive(Default)]
pub struct PresenceDirectory {
    inner: RwLock<DirectoryInner>,
}

impl PresenceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `connection` to `username` in `room`.
    ///
    /// Always succeeds. If the name (case-insensitively) is already
    /// held by a different live connection, that binding is removed and
    /// the displaced connection is reported in the outcome.
    pub async fn join(
        &self,
        connection: ConnectionId,
        username: &str,
        room: &str,
    ) -> JoinOutcome {
        let identity = Identity::new(username, room);
        let username_key = identity.username_key.clone();

        let mut inner = self.inner.write().await;

        // A connection re-joining under a new name sheds its old binding.
        if let Some(previous) = inner.connections.remove(&connection) {
            if previous.username_key != username_key {
                inner.by_name.remove(&previous.username_key);
            }
        }

        let superseded = match inner.by_name.get(&username_key) {
            Some(existing) if *existing != connection => {
                let displaced = existing.clone();
                inner.connections.remove(&displaced);
                Some(displaced)
            }
            _ => None,
        };

        inner.by_name.insert(username_key.clone(), connection.clone());
        inner.connections.insert(connection.clone(), identity);

        if let Some(displaced) = &superseded {
            debug!(%connection, %displaced, username, "presence binding superseded");
        } else {
            debug!(%connection, username, room, "presence bound");
        }

        JoinOutcome {
            username_key,
            superseded,
        }
    }

    /// Remove the connection's binding, returning the departed identity
    /// or `None` if the connection held none (duplicate disconnect).
    pub async fn leave(&self, connection: &ConnectionId) -> Option<DepartedIdentity> {
        let mut inner = self.inner.write().await;
        let identity = inner.connections.remove(connection)?;

        // Only clear the name index if it still points at this
        // connection; a superseding join may have rebound it already.
        if inner
            .by_name
            .get(&identity.username_key)
            .is_some_and(|bound| bound == connection)
        {
            inner.by_name.remove(&identity.username_key);
        }

        debug!(%connection, username = %identity.username, "presence unbound");

        Some(DepartedIdentity {
            username: identity.username,
            username_key: identity.username_key,
            room: identity.room,
        })
    }

    /// True iff some live connection currently holds the name.
    pub async fn is_reachable(&self, name: &str) -> bool {
        let inner = self.inner.read().await;
        inner.by_name.contains_key(&name.to_lowercase())
    }

    /// Case-insensitive identity lookup.
    pub async fn lookup(&self, name: &str) -> Option<Identity> {
        let inner = self.inner.read().await;
        let connection = inner.by_name.get(&name.to_lowercase())?;
        inner.connections.get(connection).cloned()
    }

    /// All identities currently bound into `room`.
    pub async fn list_in_room(&self, room: &str) -> Vec<Identity> {
        let inner = self.inner.read().await;
        inner
            .connections
            .values()
            .filter(|identity| identity.room == room)
            .cloned()
            .collect()
    }

    /// True iff the name is held by a live connection (case-insensitive).
    pub async fn username_taken(&self, name: &str) -> bool {
        self.is_reachable(name).await
    }

    /// Identity bound to a connection, if any.
    pub async fn identity_for(&self, connection: &ConnectionId) -> Option<Identity> {
        let inner = self.inner.read().await;
        inner.connections.get(connection).cloned()
    }

    /// Live connection holding a name, if any.
    pub async fn connection_for(&self, name: &str) -> Option<ConnectionId> {
        let inner = self.inner.read().await;
        inner.by_name.get(&name.to_lowercase()).cloned()
    }
}
