use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical key for the conversation between two identities.
///
/// The pair is unordered: both names are lowercased and sorted, so
/// `("Alice", "bob")` and `("BOB", "alice")` address the same log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey(String, String);

impl ConversationKey {
    pub fn new(a: &str, b: &str) -> Self {
        let mut pair = [a.to_lowercase(), b.to_lowercase()];
        pair.sort();
        let [first, second] = pair;
        Self(first, second)
    }
}

/// One direct message recorded in a pair's conversation log.
///
/// Entries are append-only; only the `delivered` flag mutates, and only
/// from `false` to `true` via an explicit delivery confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    /// Id of the routed message this entry records.
    pub message_id: String,
    /// Sender display name.
    pub from: String,
    /// Recipient display name.
    pub to: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub delivered: bool,
}
