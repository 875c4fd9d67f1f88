//! Error taxonomy shared across the replication pipeline.

use thiserror::Error;

/// Errors raised by sources, sinks and the replication engine.
///
/// The first four variants correspond to the propagation policy: setup and
/// batch failures end the run, event failures are contained by the sync
/// loop, and validation mismatches are advisory.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Schema or connection failure before any replication work started.
    #[error("Setup error: {0}")]
    Setup(String),

    /// A snapshot page's transaction failed and was rolled back.
    #[error("Batch apply error: {0}")]
    BatchApply(String),

    /// A single change event's transaction failed and was rolled back.
    #[error("Event apply error for conversation '{conversation_id}': {message}")]
    EventApply {
        conversation_id: String,
        message: String,
    },

    /// Source and destination counts differ after the snapshot.
    #[error(
        "Validation mismatch: source has {source_conversations} conversations / {source_messages} messages, \
         destination has {destination_conversations} conversations / {destination_messages} messages"
    )]
    ValidationMismatch {
        source_conversations: u64,
        source_messages: u64,
        destination_conversations: u64,
        destination_messages: u64,
    },

    /// A source document could not be interpreted as a conversation.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Read failure on the document store.
    #[error("Source error: {0}")]
    Source(String),

    /// Statement or connection failure on the relational store.
    #[error("Destination error: {message}")]
    Destination { message: String, transient: bool },

    /// A store round trip exceeded its deadline.
    #[error("Operation '{0}' timed out")]
    Timeout(String),

    /// Work was abandoned because shutdown was requested.
    #[error("Cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn destination(message: impl Into<String>) -> Self {
        SyncError::Destination {
            message: message.into(),
            transient: false,
        }
    }

    pub fn transient_destination(message: impl Into<String>) -> Self {
        SyncError::Destination {
            message: message.into(),
            transient: true,
        }
    }

    /// Whether retrying the same unit of work may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Timeout(_) | SyncError::Source(_) => true,
            SyncError::Destination { transient, .. } => *transient,
            _ => false,
        }
    }

    /// Re-tag a failure as belonging to one change event.
    pub fn into_event_error(self, conversation_id: &str) -> Self {
        match self {
            e @ (SyncError::EventApply { .. } | SyncError::Cancelled) => e,
            other => SyncError::EventApply {
                conversation_id: conversation_id.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Re-tag a failure as belonging to a snapshot page.
    pub fn into_batch_error(self) -> Self {
        match self {
            e @ (SyncError::BatchApply(_) | SyncError::Cancelled) => e,
            other => SyncError::BatchApply(other.to_string()),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
