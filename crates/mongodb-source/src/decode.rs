//! BSON to conversation document decoding.
//!
//! Decoding is lenient about shape (missing arrays become empty, stray
//! participant values are dropped) but strict about anything a row key
//! depends on: message sender and timestamp, and the conversation's
//! creation time.

use bson::{Bson, Document};
use chrono::{DateTime, Utc};
use sync_core::{ChangedFields, ConversationDocument, MessageDocument, SyncError, SyncResult};

pub const FIELD_ID: &str = "_id";
pub const FIELD_PARTICIPANTS: &str = "participants";
pub const FIELD_MESSAGES: &str = "messages";
pub const FIELD_CREATED_AT: &str = "createdAt";
pub const FIELD_UPDATED_AT: &str = "updatedAt";

/// Render a document `_id` as the relational primary key.
pub fn id_to_string(id: &Bson) -> SyncResult<String> {
    match id {
        Bson::ObjectId(oid) => Ok(oid.to_hex()),
        Bson::String(s) => Ok(s.clone()),
        Bson::Int32(i) => Ok(i.to_string()),
        Bson::Int64(i) => Ok(i.to_string()),
        other => Err(SyncError::Decode(format!(
            "Unsupported _id type in conversation document: {other:?}"
        ))),
    }
}

/// Decode a full conversation document.
pub fn decode_conversation(doc: &Document) -> SyncResult<ConversationDocument> {
    let id = doc.get(FIELD_ID).map(id_to_string).transpose()?;

    let participants = match doc.get(FIELD_PARTICIPANTS) {
        Some(Bson::Array(values)) => decode_participants(values),
        Some(Bson::Null) | None => Vec::new(),
        Some(other) => {
            tracing::warn!(
                "Conversation {:?} has non-array participants ({:?}), treating as empty",
                id,
                other.element_type()
            );
            Vec::new()
        }
    };

    let messages = match doc.get(FIELD_MESSAGES) {
        Some(Bson::Array(values)) => values
            .iter()
            .map(decode_message)
            .collect::<SyncResult<Vec<_>>>()?,
        Some(Bson::Null) | None => Vec::new(),
        Some(other) => {
            return Err(SyncError::Decode(format!(
                "Conversation {id:?} has non-array messages: {:?}",
                other.element_type()
            )))
        }
    };

    let created_at = match doc.get(FIELD_CREATED_AT) {
        Some(value) => decode_datetime(value, FIELD_CREATED_AT)?,
        None => match doc.get(FIELD_ID) {
            // ObjectIds embed their creation second
            Some(Bson::ObjectId(oid)) => oid.timestamp().to_chrono(),
            _ => {
                return Err(SyncError::Decode(format!(
                    "Conversation {id:?} is missing {FIELD_CREATED_AT}"
                )))
            }
        },
    };

    let updated_at = match doc.get(FIELD_UPDATED_AT) {
        Some(value) => decode_datetime(value, FIELD_UPDATED_AT)?,
        None => created_at,
    };

    Ok(ConversationDocument {
        id,
        participants,
        messages,
        created_at,
        updated_at,
    })
}

/// Interpret an update description's changed-field document.
///
/// Keys may be dotted paths (`messages.4`, `participants.2`) when the
/// update appended to an array rather than replacing it.
pub fn decode_changed_fields(
    updated_fields: &Document,
    removed_fields: &[String],
) -> SyncResult<ChangedFields> {
    let mut changed = ChangedFields::default();

    for (key, value) in updated_fields {
        if touches(key, FIELD_PARTICIPANTS) {
            let participants = changed.participants.get_or_insert_with(Vec::new);
            match value {
                Bson::Array(values) => participants.extend(decode_participants(values)),
                single => participants.extend(decode_participant(single)),
            }
        } else if touches(key, FIELD_MESSAGES) {
            changed.messages = true;
        } else if key == FIELD_CREATED_AT {
            changed.created_at = Some(decode_datetime(value, FIELD_CREATED_AT)?);
        } else if key == FIELD_UPDATED_AT {
            changed.updated_at = Some(decode_datetime(value, FIELD_UPDATED_AT)?);
        }
    }

    for key in removed_fields {
        if touches(key, FIELD_MESSAGES) {
            changed.messages = true;
        } else if touches(key, FIELD_PARTICIPANTS) {
            changed.participants.get_or_insert_with(Vec::new);
        }
    }

    Ok(changed)
}

fn touches(key: &str, field: &str) -> bool {
    key == field
        || key
            .strip_prefix(field)
            .is_some_and(|rest| rest.starts_with('.'))
}

fn decode_participants(values: &[Bson]) -> Vec<String> {
    values.iter().filter_map(decode_participant).collect()
}

fn decode_participant(value: &Bson) -> Option<String> {
    match value {
        Bson::String(s) => Some(s.clone()),
        Bson::ObjectId(oid) => Some(oid.to_hex()),
        other => {
            tracing::warn!("Skipping participant of type {:?}", other.element_type());
            None
        }
    }
}

fn decode_message(value: &Bson) -> SyncResult<MessageDocument> {
    let doc = value.as_document().ok_or_else(|| {
        SyncError::Decode(format!(
            "Message entry is not a document: {:?}",
            value.element_type()
        ))
    })?;

    let sender_id = match doc.get("senderId") {
        Some(Bson::String(s)) => s.clone(),
        Some(Bson::ObjectId(oid)) => oid.to_hex(),
        other => {
            return Err(SyncError::Decode(format!(
                "Message has invalid senderId: {other:?}"
            )))
        }
    };

    let content = match doc.get("content") {
        Some(Bson::String(s)) => s.clone(),
        Some(Bson::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    let timestamp = match doc.get("timestamp") {
        Some(value) => decode_datetime(value, "timestamp")?,
        None => {
            return Err(SyncError::Decode(format!(
                "Message from {sender_id} is missing timestamp"
            )))
        }
    };

    let read = matches!(doc.get("read"), Some(Bson::Boolean(true)));

    Ok(MessageDocument {
        sender_id,
        content,
        timestamp,
        read,
    })
}

fn decode_datetime(value: &Bson, field: &str) -> SyncResult<DateTime<Utc>> {
    match value {
        Bson::DateTime(dt) => Ok(dt.to_chrono()),
        Bson::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| SyncError::Decode(format!("Invalid {field} '{s}': {e}"))),
        Bson::Int64(millis) => DateTime::from_timestamp_millis(*millis)
            .ok_or_else(|| SyncError::Decode(format!("Out-of-range {field}: {millis}"))),
        other => Err(SyncError::Decode(format!(
            "Unsupported {field} type: {:?}",
            other.element_type()
        ))),
    }
}
