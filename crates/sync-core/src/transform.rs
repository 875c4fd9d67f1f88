//! Document-to-row transformation.
//!
//! All functions here are pure: they never touch a store and may run on
//! any number of pages in parallel. Duplicate users across documents are
//! left in place and resolved by the writer's idempotent upsert.

use std::collections::HashSet;

use crate::change::ChangedFields;
use crate::document::{ConversationDocument, MessageDocument};
use crate::rows::{ConversationRow, ConversationUpdate, MessageRow, RowSet, UserRow};

/// Map a page of conversation documents into row sets.
///
/// Documents without an id are skipped.
pub fn transform_batch(documents: &[ConversationDocument]) -> RowSet {
    let mut rows = RowSet::new();
    for document in documents {
        if let Some(document_rows) = transform_document(document) {
            rows.extend(document_rows);
        }
    }
    rows
}

/// Map a single conversation document, or `None` if it has no id.
pub fn transform_document(document: &ConversationDocument) -> Option<RowSet> {
    let conversation_id = document.id.as_deref()?;

    let users = document_users(document)
        .into_iter()
        .map(UserRow::new)
        .collect();

    Some(RowSet {
        users,
        conversations: vec![conversation_row(conversation_id, document)],
        messages: message_rows(conversation_id, &document.messages),
    })
}

/// Derive the targeted write for an update event.
///
/// `document` is the latest full document looked up by the source. The
/// message list is always taken from it whole, since embedded messages
/// have no identity that would allow computing a delta.
pub fn transform_update(
    conversation_id: &str,
    changed: &ChangedFields,
    document: Option<&ConversationDocument>,
) -> ConversationUpdate {
    let mut users: Vec<String> = Vec::new();

    if let Some(changed_participants) = &changed.participants {
        match document {
            Some(doc) => users.extend(doc.unique_participants()),
            None => users.extend(changed_participants.iter().cloned()),
        }
    }

    let mut ensure_conversation = None;
    let mut messages = None;
    if changed.messages {
        if let Some(doc) = document {
            users.extend(doc.messages.iter().map(|m| m.sender_id.clone()));
            ensure_conversation = Some(conversation_row(conversation_id, doc));
            messages = Some(message_rows(conversation_id, &doc.messages));
        }
    }

    let mut seen = HashSet::new();
    users.retain(|u| seen.insert(u.clone()));

    ConversationUpdate {
        conversation_id: conversation_id.to_string(),
        users: users.into_iter().map(UserRow::new).collect(),
        ensure_conversation,
        created_at: changed.created_at,
        updated_at: changed.updated_at,
        messages,
    }
}

/// Participants first, then any sender who is not a participant.
fn document_users(document: &ConversationDocument) -> Vec<String> {
    let mut users = document.unique_participants();
    let mut seen: HashSet<String> = users.iter().cloned().collect();
    for message in &document.messages {
        if seen.insert(message.sender_id.clone()) {
            users.push(message.sender_id.clone());
        }
    }
    users
}

fn conversation_row(conversation_id: &str, document: &ConversationDocument) -> ConversationRow {
    ConversationRow {
        id: conversation_id.to_string(),
        created_at: document.created_at,
        updated_at: document.updated_at,
    }
}

fn message_rows(conversation_id: &str, messages: &[MessageDocument]) -> Vec<MessageRow> {
    messages
        .iter()
        .map(|m| MessageRow {
            conversation_id: conversation_id.to_string(),
            sender_id: m.sender_id.clone(),
            content: m.content.clone(),
            timestamp: m.timestamp,
            read: m.read,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn msg(sender: &str, content: &str, secs: i64) -> MessageDocument {
        MessageDocument {
            sender_id: sender.into(),
            content: content.into(),
            timestamp: at(secs),
            read: false,
        }
    }

    fn conversation(
        id: Option<&str>,
        participants: &[&str],
        messages: Vec<MessageDocument>,
    ) -> ConversationDocument {
        ConversationDocument {
            id: id.map(String::from),
            participants: participants.iter().map(|p| p.to_string()).collect(),
            messages,
            created_at: at(0),
            updated_at: at(10),
        }
    }

    #[test]
    fn test_documents_without_id_are_skipped() {
        let docs = vec![
            conversation(None, &["a", "b"], vec![msg("a", "x", 1)]),
            conversation(Some("c2"), &["c", "d"], vec![]),
        ];
        let rows = transform_batch(&docs);
        assert_eq!(rows.conversations.len(), 1);
        assert_eq!(rows.conversations[0].id, "c2");
        assert!(rows.messages.is_empty());
        assert_eq!(rows.users, vec![UserRow::new("c"), UserRow::new("d")]);
    }

    #[test]
    fn test_participants_deduplicated_within_document() {
        let doc = conversation(Some("c1"), &["a", "b", "a"], vec![]);
        let rows = transform_document(&doc).unwrap();
        assert_eq!(rows.users, vec![UserRow::new("a"), UserRow::new("b")]);
    }

    #[test]
    fn test_cross_document_duplicate_users_left_for_writer() {
        let docs = vec![
            conversation(Some("c1"), &["a", "b"], vec![]),
            conversation(Some("c2"), &["b", "c"], vec![]),
        ];
        let rows = transform_batch(&docs);
        assert_eq!(rows.users.len(), 4);
        assert_eq!(rows.normalized().users.len(), 3);
    }

    #[test]
    fn test_non_participant_sender_becomes_user() {
        let doc = conversation(Some("c1"), &["a", "b"], vec![msg("moderator", "hi", 1)]);
        let rows = transform_document(&doc).unwrap();
        assert!(rows.users.contains(&UserRow::new("moderator")));
        assert_eq!(rows.users.len(), 3);
    }

    #[test]
    fn test_messages_carry_conversation_and_fields() {
        let doc = conversation(
            Some("c1"),
            &["a", "b"],
            vec![msg("a", "one", 1), msg("b", "two", 2), msg("a", "three", 3)],
        );
        let rows = transform_document(&doc).unwrap();
        assert_eq!(rows.messages.len(), 3);
        assert!(rows.messages.iter().all(|m| m.conversation_id == "c1"));
        assert_eq!(rows.messages[1].content, "two");
        assert_eq!(rows.messages[1].timestamp, at(2));
    }

    #[test]
    fn test_update_timestamps_only() {
        let changed = ChangedFields {
            updated_at: Some(at(99)),
            ..Default::default()
        };
        let update = transform_update("c1", &changed, None);
        assert_eq!(update.updated_at, Some(at(99)));
        assert_eq!(update.created_at, None);
        assert!(update.users.is_empty());
        assert!(update.messages.is_none());
        assert!(update.ensure_conversation.is_none());
    }

    #[test]
    fn test_update_messages_replaces_whole_list_from_full_document() {
        let doc = conversation(
            Some("c1"),
            &["a", "b"],
            vec![msg("a", "one", 1), msg("c", "two", 2)],
        );
        let changed = ChangedFields {
            messages: true,
            ..Default::default()
        };
        let update = transform_update("c1", &changed, Some(&doc));
        let messages = update.messages.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(update.ensure_conversation.unwrap().id, "c1");
        assert_eq!(update.users, vec![UserRow::new("a"), UserRow::new("c")]);
    }

    #[test]
    fn test_update_messages_without_document_is_skipped() {
        let changed = ChangedFields {
            messages: true,
            ..Default::default()
        };
        let update = transform_update("c1", &changed, None);
        assert!(update.messages.is_none());
        assert!(update.is_noop());
    }

    #[test]
    fn test_update_participants_prefers_full_document() {
        let doc = conversation(Some("c1"), &["a", "b", "e"], vec![]);
        let changed = ChangedFields {
            participants: Some(vec!["e".into()]),
            ..Default::default()
        };
        let update = transform_update("c1", &changed, Some(&doc));
        assert_eq!(
            update.users,
            vec![UserRow::new("a"), UserRow::new("b"), UserRow::new("e")]
        );

        let partial = transform_update("c1", &changed, None);
        assert_eq!(partial.users, vec![UserRow::new("e")]);
    }
}
