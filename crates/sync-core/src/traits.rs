//! Collaborator traits implemented by the document store and the relational store.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::change::SourceEvent;
use crate::document::ConversationDocument;
use crate::error::SyncResult;
use crate::rows::{ConversationUpdate, EntityCounts, RowSet};

/// Lazy, ordered sequence of snapshot pages.
pub type PageStream = BoxStream<'static, SyncResult<Vec<ConversationDocument>>>;

/// Ordered stream of change events from the document store.
#[async_trait]
pub trait ChangeFeed: Send {
    /// Next event, or `None` once the feed is closed for good.
    async fn next_event(&mut self) -> Option<SyncResult<SourceEvent>>;

    /// Position after the last event returned, if the source exposes one.
    fn resume_token(&self) -> Option<Vec<u8>>;
}

/// The document store holding the conversation collection.
#[async_trait]
pub trait ConversationSource: Send + Sync {
    type Feed: ChangeFeed + 'static;

    /// Subscribe to the change feed, starting after `resume_after` or at the current position.
    async fn open_change_feed(&self, resume_after: Option<Vec<u8>>) -> SyncResult<Self::Feed>;

    /// Batched read of the whole collection.
    async fn snapshot_pages(&self, batch_size: usize) -> SyncResult<PageStream>;

    /// Total conversations and flattened message count.
    async fn counts(&self) -> SyncResult<EntityCounts>;
}

/// The relational store receiving users, conversations and messages.
///
/// Every method runs in its own transaction: it either commits in full or
/// rolls back and returns an error.
#[async_trait]
pub trait ReplicationSink: Send + Sync {
    /// Upsert users, then conversations, then messages.
    async fn apply_row_set(&self, rows: &RowSet) -> SyncResult<()>;

    /// Apply the targeted write derived from an update event.
    async fn apply_update(&self, update: &ConversationUpdate) -> SyncResult<()>;

    /// Remove a conversation's messages, then the conversation. Users are kept.
    async fn delete_conversation(&self, conversation_id: &str) -> SyncResult<()>;

    /// Create the secondary indexes on the message relation.
    async fn create_message_indexes(&self) -> SyncResult<()>;

    /// Row counts of the conversation and message relations.
    async fn counts(&self) -> SyncResult<EntityCounts>;
}
