//! Snapshot migration: copy the whole collection page by page.
//!
//! Pages come from the source's batched cursor and are transformed and
//! written with up to `concurrency` pages in flight. A full sweep never
//! returns the same conversation in two pages, so pages need no ordering
//! between them. The first page that fails aborts the snapshot; rerunning
//! it is safe because every write is an upsert.

use std::time::{Duration, Instant};

use futures::StreamExt;
use sync_core::{transform_batch, ConversationSource, ReplicationSink, SyncError, SyncResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::retry::{retry_transient, RetryConfig};

#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Documents per page.
    pub batch_size: usize,
    /// Pages transformed and written concurrently.
    pub concurrency: usize,
    pub retry: RetryConfig,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            batch_size: 5000,
            concurrency: 4,
            retry: RetryConfig::event(),
        }
    }
}

/// Totals reported once the cursor is exhausted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotSummary {
    pub pages: u64,
    pub conversations: u64,
    pub messages: u64,
    pub elapsed: Duration,
}

/// Drive the source cursor to exhaustion, then build the message indexes.
pub async fn run_snapshot<S, K>(
    source: &S,
    sink: &K,
    config: &SnapshotConfig,
    cancel: &CancellationToken,
) -> SyncResult<SnapshotSummary>
where
    S: ConversationSource,
    K: ReplicationSink,
{
    let started = Instant::now();
    info!(
        "Starting snapshot (batch size {}, {} pages in flight)",
        config.batch_size, config.concurrency
    );

    let pages = source
        .snapshot_pages(config.batch_size)
        .await
        .map_err(SyncError::into_batch_error)?;

    let mut writes = pages
        .enumerate()
        .map(|(index, page)| async move {
            let documents = page.map_err(SyncError::into_batch_error)?;
            let rows = transform_batch(&documents);
            debug!(
                "Page {}: {} documents -> {} users, {} conversations, {} messages",
                index,
                documents.len(),
                rows.users.len(),
                rows.conversations.len(),
                rows.messages.len()
            );

            let attempt = retry_transient("snapshot page", &config.retry, cancel, || {
                sink.apply_row_set(&rows)
            })
            .await;
            attempt.result.map_err(SyncError::into_batch_error)?;

            Ok::<_, SyncError>((rows.conversations.len() as u64, rows.messages.len() as u64))
        })
        .buffer_unordered(config.concurrency.max(1));

    let mut summary = SnapshotSummary::default();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            next = writes.next() => next,
        };
        let Some(result) = next else { break };
        let (conversations, messages) = result?;

        summary.pages += 1;
        summary.conversations += conversations;
        summary.messages += messages;
        info!(
            "Snapshot page {} written: {} conversations, {} messages so far",
            summary.pages, summary.conversations, summary.messages
        );
    }

    sink.create_message_indexes()
        .await
        .map_err(SyncError::into_batch_error)?;

    summary.elapsed = started.elapsed();
    info!(
        "Snapshot complete: {} conversations and {} messages in {} pages ({:?})",
        summary.conversations, summary.messages, summary.pages, summary.elapsed
    );
    Ok(summary)
}
