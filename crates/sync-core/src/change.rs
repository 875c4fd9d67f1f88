//! Change events delivered by the source's change feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::ConversationDocument;

/// Operation kind of a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which top-level conversation fields an update touched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangedFields {
    /// Participant ids carried by the update, when `participants` changed.
    /// May be a partial list if the source reported an array append.
    pub participants: Option<Vec<String>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Whether the embedded message array changed in any way.
    pub messages: bool,
}

impl ChangedFields {
    /// Every field changed, as for a whole-document replacement.
    pub fn all(document: &ConversationDocument) -> Self {
        Self {
            participants: Some(document.participants.clone()),
            created_at: Some(document.created_at),
            updated_at: Some(document.updated_at),
            messages: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_none()
            && self.created_at.is_none()
            && self.updated_at.is_none()
            && !self.messages
    }
}

/// A single insert, update or delete of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangeEvent {
    Insert {
        conversation_id: String,
        document: ConversationDocument,
    },
    Update {
        conversation_id: String,
        changed: ChangedFields,
        /// Latest full document, absent if it was deleted before lookup.
        document: Option<ConversationDocument>,
    },
    Delete {
        conversation_id: String,
    },
    /// A change the source reported but whose document could not be decoded.
    /// `conversation_id` is empty when the document key was unreadable too.
    Undecodable {
        conversation_id: String,
        kind: ChangeKind,
        reason: String,
    },
}

impl ChangeEvent {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Insert { .. } => ChangeKind::Insert,
            ChangeEvent::Update { .. } => ChangeKind::Update,
            ChangeEvent::Delete { .. } => ChangeKind::Delete,
            ChangeEvent::Undecodable { kind, .. } => *kind,
        }
    }

    /// Partition key for ordered processing.
    pub fn conversation_id(&self) -> &str {
        match self {
            ChangeEvent::Insert {
                conversation_id, ..
            }
            | ChangeEvent::Update {
                conversation_id, ..
            }
            | ChangeEvent::Delete { conversation_id }
            | ChangeEvent::Undecodable {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

/// A change event paired with the feed position that follows it.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceEvent {
    pub event: ChangeEvent,
    /// Opaque resume position; resuming from it skips this event.
    pub resume_token: Option<Vec<u8>>,
}

impl SourceEvent {
    pub fn new(event: ChangeEvent, resume_token: Option<Vec<u8>>) -> Self {
        Self {
            event,
            resume_token,
        }
    }
}
