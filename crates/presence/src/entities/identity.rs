use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque per-session handle minted by the transport layer.
///
/// The directory never inspects the contents; it only needs equality
/// and hashing to key its maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Mint a fresh connection id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A chat participant currently bound to a live connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Display form as supplied at join time.
    pub username: String,
    /// Lowercase lookup key; two names differing only in case are the
    /// same identity.
    pub username_key: String,
    /// Room the identity currently occupies.
    pub room: String,
    /// Timestamp of the most recent join.
    pub last_seen: DateTime<Utc>,
}

impl Identity {
    /// Create an identity bound to `room`, stamped with the current time.
    pub fn new(username: impl Into<String>, room: impl Into<String>) -> Self {
        let username = username.into();
        let username_key = username.to_lowercase();
        Self {
            username,
            username_key,
            room: room.into(),
            last_seen: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_lowercases_key() {
        let identity = Identity::new("Alice", "general");
        assert_eq!(identity.username, "Alice");
        assert_eq!(identity.username_key, "alice");
    }

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }
}
