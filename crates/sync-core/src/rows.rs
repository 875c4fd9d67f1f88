//! Relational row representations written to the destination store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// A row of the `users` relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserRow {
    pub id: String,
}

impl UserRow {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// A row of the `conversations` relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRow {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A row of the `messages` relation, minus the store-assigned surrogate id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRow {
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

impl MessageRow {
    pub fn key(&self) -> MessageKey {
        MessageKey {
            conversation_id: self.conversation_id.clone(),
            sender_id: self.sender_id.clone(),
            timestamp: self.timestamp,
            content: self.content.clone(),
        }
    }
}

/// Natural identity of a message: `(conversation_id, sender_id, timestamp, content)`.
///
/// The destination enforces uniqueness on this tuple, which is what makes
/// re-applying the same message any number of times a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageKey {
    pub conversation_id: String,
    pub sender_id: String,
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

/// Users, conversations and messages produced from one page or one event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub users: Vec<UserRow>,
    pub conversations: Vec<ConversationRow>,
    pub messages: Vec<MessageRow>,
}

impl RowSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.conversations.is_empty() && self.messages.is_empty()
    }

    /// Append another row set without deduplicating.
    pub fn extend(&mut self, other: RowSet) {
        self.users.extend(other.users);
        self.conversations.extend(other.conversations);
        self.messages.extend(other.messages);
    }

    /// Resolve duplicates the transformer deliberately leaves in place.
    ///
    /// Users come back sorted so that concurrent transactions always lock
    /// user keys in the same order. Conversations keep their first
    /// occurrence. Messages collapse on [`MessageKey`] with the last
    /// occurrence winning, in first-seen position.
    pub fn normalized(&self) -> RowSet {
        let users: BTreeSet<UserRow> = self.users.iter().cloned().collect();

        let mut seen_conversations = HashSet::new();
        let conversations = self
            .conversations
            .iter()
            .filter(|c| seen_conversations.insert(c.id.as_str()))
            .cloned()
            .collect();

        let mut positions: HashMap<MessageKey, usize> = HashMap::new();
        let mut messages: Vec<MessageRow> = Vec::with_capacity(self.messages.len());
        for message in &self.messages {
            match positions.get(&message.key()) {
                Some(&idx) => messages[idx] = message.clone(),
                None => {
                    positions.insert(message.key(), messages.len());
                    messages.push(message.clone());
                }
            }
        }

        RowSet {
            users: users.into_iter().collect(),
            conversations,
            messages,
        }
    }
}

/// Targeted write derived from an update-type change event.
///
/// Each `Option` field is `None` when the event did not touch the
/// corresponding part of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationUpdate {
    pub conversation_id: String,
    /// Users to upsert (changed participants and, when messages are replaced, their senders).
    pub users: Vec<UserRow>,
    /// Conversation row inserted if absent before any message is written.
    pub ensure_conversation: Option<ConversationRow>,
    /// New `created_at`; `None` leaves the stored value unchanged.
    pub created_at: Option<DateTime<Utc>>,
    /// New `updated_at`; `None` leaves the stored value unchanged.
    pub updated_at: Option<DateTime<Utc>>,
    /// Complete current message list; replaces the stored set by natural key.
    pub messages: Option<Vec<MessageRow>>,
}

impl ConversationUpdate {
    pub fn touches_timestamps(&self) -> bool {
        self.created_at.is_some() || self.updated_at.is_some()
    }

    pub fn is_noop(&self) -> bool {
        self.users.is_empty()
            && self.ensure_conversation.is_none()
            && !self.touches_timestamps()
            && self.messages.is_none()
    }
}

/// Conversation and message totals used by the validator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub conversations: u64,
    pub messages: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message(sender: &str, content: &str, secs: i64, read: bool) -> MessageRow {
        MessageRow {
            conversation_id: "c1".into(),
            sender_id: sender.into(),
            content: content.into(),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            read,
        }
    }

    #[test]
    fn test_normalized_sorts_and_dedups_users() {
        let rows = RowSet {
            users: vec![UserRow::new("zed"), UserRow::new("amy"), UserRow::new("zed")],
            ..Default::default()
        };
        let normalized = rows.normalized();
        assert_eq!(
            normalized.users,
            vec![UserRow::new("amy"), UserRow::new("zed")]
        );
    }

    #[test]
    fn test_normalized_message_last_copy_wins_in_first_position() {
        let rows = RowSet {
            messages: vec![
                message("a", "hi", 1, false),
                message("b", "yo", 2, false),
                message("a", "hi", 1, true),
            ],
            ..Default::default()
        };
        let normalized = rows.normalized();
        assert_eq!(normalized.messages.len(), 2);
        assert_eq!(normalized.messages[0].sender_id, "a");
        assert!(normalized.messages[0].read);
        assert_eq!(normalized.messages[1].sender_id, "b");
    }

    #[test]
    fn test_messages_differing_only_in_content_are_distinct() {
        let rows = RowSet {
            messages: vec![message("a", "hi", 1, false), message("a", "hi!", 1, false)],
            ..Default::default()
        };
        assert_eq!(rows.normalized().messages.len(), 2);
    }

    #[test]
    fn test_update_noop_detection() {
        let update = ConversationUpdate {
            conversation_id: "c1".into(),
            users: vec![],
            ensure_conversation: None,
            created_at: None,
            updated_at: None,
            messages: None,
        };
        assert!(update.is_noop());
        assert!(!update.touches_timestamps());
    }
}
