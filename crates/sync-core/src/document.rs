//! Conversation documents as held by the document store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message embedded in a conversation's `messages` array.
///
/// Embedded messages carry no identity of their own that survives
/// re-delivery, so the relational side keys them by [`crate::MessageKey`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDocument {
    pub sender_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

/// A conversation document with its participants and embedded messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDocument {
    /// Document identity. Documents without one are skipped by the transformer.
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub messages: Vec<MessageDocument>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationDocument {
    /// Participant ids in first-seen order with duplicates removed.
    pub fn unique_participants(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.participants
            .iter()
            .filter(|p| seen.insert(p.as_str()))
            .cloned()
            .collect()
    }
}
