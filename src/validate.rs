//! Post-snapshot count reconciliation.
//!
//! Compares the source's conversation count and flattened message count with
//! the destination's row counts. A mismatch is logged as a warning and never
//! stops the run: live sync continues afterwards and counts can move either
//! way. Identical duplicate messages inside one conversation collapse onto a
//! single row, so the destination can legitimately hold fewer messages.

use sync_core::{ConversationSource, EntityCounts, ReplicationSink, SyncError, SyncResult};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationReport {
    pub source: EntityCounts,
    pub destination: EntityCounts,
}

impl ValidationReport {
    pub fn new(source: EntityCounts, destination: EntityCounts) -> Self {
        Self {
            source,
            destination,
        }
    }

    pub fn passed(&self) -> bool {
        self.source == self.destination
    }

    /// The mismatch as an error value, for callers that want to surface it.
    pub fn mismatch(&self) -> Option<SyncError> {
        if self.passed() {
            return None;
        }
        Some(SyncError::ValidationMismatch {
            source_conversations: self.source.conversations,
            source_messages: self.source.messages,
            destination_conversations: self.destination.conversations,
            destination_messages: self.destination.messages,
        })
    }
}

/// Count both stores once and log the outcome.
pub async fn validate_counts<S, K>(source: &S, sink: &K) -> SyncResult<ValidationReport>
where
    S: ConversationSource,
    K: ReplicationSink,
{
    let source_counts = source.counts().await?;
    let destination_counts = sink.counts().await?;
    let report = ValidationReport::new(source_counts, destination_counts);

    info!(
        "Source: {} conversations, {} messages. Destination: {} conversations, {} messages",
        source_counts.conversations,
        source_counts.messages,
        destination_counts.conversations,
        destination_counts.messages
    );

    match report.mismatch() {
        None => info!("Validation passed"),
        Some(mismatch) => warn!("{}", mismatch),
    }
    Ok(report)
}
