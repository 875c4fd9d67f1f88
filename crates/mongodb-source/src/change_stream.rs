//! Change stream feed for the conversation collection.
//!
//! Wraps the driver's change stream (opened with `updateLookup`) and turns
//! each event into a [`ChangeEvent`]. Operations that do not modify a
//! single conversation (drop, rename, invalidate, ...) are logged and
//! skipped.

use std::pin::Pin;

use async_trait::async_trait;
use bson::Document;
use futures::StreamExt;
use mongodb::change_stream::{
    event::{ChangeStreamEvent, OperationType},
    ChangeStream as DriverChangeStream,
};
use sync_core::{
    ChangeEvent, ChangeFeed, ChangeKind, ChangedFields, SourceEvent, SyncError, SyncResult,
};

use crate::decode::{decode_changed_fields, decode_conversation, id_to_string, FIELD_ID};

type DriverStream = Pin<Box<DriverChangeStream<ChangeStreamEvent<Document>>>>;

/// Live change feed over a MongoDB collection.
pub struct MongoChangeFeed {
    stream: DriverStream,
}

impl MongoChangeFeed {
    pub fn new(stream: DriverChangeStream<ChangeStreamEvent<Document>>) -> Self {
        Self {
            stream: Box::pin(stream),
        }
    }
}

#[async_trait]
impl ChangeFeed for MongoChangeFeed {
    async fn next_event(&mut self) -> Option<SyncResult<SourceEvent>> {
        loop {
            let event = match self.stream.next().await? {
                Ok(event) => event,
                Err(e) => {
                    return Some(Err(SyncError::Source(format!(
                        "MongoDB change stream error: {e}"
                    ))))
                }
            };

            let resume_token = bson::to_vec(&event.id).ok();
            match convert_change_event(event) {
                Some(change) => return Some(Ok(SourceEvent::new(change, resume_token))),
                None => continue,
            }
        }
    }

    fn resume_token(&self) -> Option<Vec<u8>> {
        self.stream
            .resume_token()
            .and_then(|token| bson::to_vec(&token).ok())
    }
}

/// Convert a driver event; `None` for operations that carry no conversation change.
///
/// A change whose document fails to decode becomes [`ChangeEvent::Undecodable`]
/// so the sync loop can dead-letter it and move past its resume token.
pub fn convert_change_event(event: ChangeStreamEvent<Document>) -> Option<ChangeEvent> {
    let kind = match &event.operation_type {
        OperationType::Insert => ChangeKind::Insert,
        OperationType::Update | OperationType::Replace => ChangeKind::Update,
        OperationType::Delete => ChangeKind::Delete,
        other => {
            tracing::warn!("Skipping change stream operation {:?}", other);
            return None;
        }
    };
    let key_id = event
        .document_key
        .as_ref()
        .and_then(|key| key.get(FIELD_ID))
        .and_then(|id| id_to_string(id).ok());

    match decode_change(event) {
        Ok(change) => Some(change),
        Err(e) => {
            let conversation_id = key_id.unwrap_or_default();
            tracing::warn!(
                "Could not decode {} of conversation '{}': {}",
                kind,
                conversation_id,
                e
            );
            Some(ChangeEvent::Undecodable {
                conversation_id,
                kind,
                reason: e.to_string(),
            })
        }
    }
}

fn decode_change(event: ChangeStreamEvent<Document>) -> SyncResult<ChangeEvent> {
    let conversation_id = match &event.document_key {
        Some(key) => match key.get(FIELD_ID) {
            Some(id) => Some(id_to_string(id)?),
            None => None,
        },
        None => None,
    };

    let require_id = || {
        conversation_id
            .clone()
            .ok_or_else(|| SyncError::Decode("No document key in change event".to_string()))
    };

    match event.operation_type {
        OperationType::Insert => {
            let conversation_id = require_id()?;
            let full = event.full_document.ok_or_else(|| {
                SyncError::Decode(format!("Insert of {conversation_id} has no full document"))
            })?;
            let mut document = decode_conversation(&full)?;
            document.id.get_or_insert_with(|| conversation_id.clone());
            Ok(ChangeEvent::Insert {
                conversation_id,
                document,
            })
        }
        OperationType::Update => {
            let conversation_id = require_id()?;
            let changed = match &event.update_description {
                Some(description) => {
                    let mut changed = decode_changed_fields(
                        &description.updated_fields,
                        &description.removed_fields,
                    )?;
                    if description
                        .truncated_arrays
                        .as_ref()
                        .is_some_and(|arrays| arrays.iter().any(|a| a.field == "messages"))
                    {
                        changed.messages = true;
                    }
                    changed
                }
                None => ChangedFields::default(),
            };
            let document = event
                .full_document
                .as_ref()
                .map(decode_conversation)
                .transpose()?;
            Ok(ChangeEvent::Update {
                conversation_id,
                changed,
                document,
            })
        }
        OperationType::Replace => {
            let conversation_id = require_id()?;
            let full = event.full_document.ok_or_else(|| {
                SyncError::Decode(format!("Replace of {conversation_id} has no full document"))
            })?;
            let document = decode_conversation(&full)?;
            Ok(ChangeEvent::Update {
                conversation_id,
                changed: ChangedFields::all(&document),
                document: Some(document),
            })
        }
        OperationType::Delete => Ok(ChangeEvent::Delete {
            conversation_id: require_id()?,
        }),
        other => Err(SyncError::Decode(format!(
            "Unsupported change stream operation {other:?}"
        ))),
    }
}
