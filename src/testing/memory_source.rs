//! In-memory conversation source with a replayable change feed.
//!
//! Events go into an append-only log. A feed opened without a resume token
//! reads the log from the start; the token after the n-th event is `n`
//! encoded as eight big-endian bytes, so resuming from it skips exactly the
//! events already delivered.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;
use sync_core::{
    ChangeEvent, ChangeFeed, ConversationDocument, ConversationSource, EntityCounts, PageStream,
    SourceEvent, SyncError, SyncResult,
};
use tokio::sync::Notify;

enum LogEntry {
    Event(ChangeEvent),
    Failure(String),
}

#[derive(Default)]
struct LogState {
    entries: Vec<LogEntry>,
    closed: bool,
}

#[derive(Default)]
struct FeedLog {
    state: Mutex<LogState>,
    appended: Notify,
}

impl FeedLog {
    fn state(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, entry: LogEntry) {
        self.state().entries.push(entry);
        self.appended.notify_waiters();
    }
}

pub fn position_token(position: usize) -> Vec<u8> {
    (position as u64).to_be_bytes().to_vec()
}

fn token_position(token: &[u8]) -> SyncResult<usize> {
    let bytes: [u8; 8] = token
        .try_into()
        .map_err(|_| SyncError::Setup(format!("Invalid resume token of {} bytes", token.len())))?;
    Ok(u64::from_be_bytes(bytes) as usize)
}

#[derive(Default)]
pub struct MemorySource {
    documents: Mutex<Vec<ConversationDocument>>,
    log: Arc<FeedLog>,
    failing_page: Mutex<Option<usize>>,
    openings: Mutex<Vec<Option<Vec<u8>>>>,
}

impl MemorySource {
    pub fn new(documents: Vec<ConversationDocument>) -> Self {
        Self {
            documents: Mutex::new(documents),
            ..Default::default()
        }
    }

    fn documents(&self) -> MutexGuard<'_, Vec<ConversationDocument>> {
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the collection contents seen by snapshots and counts.
    pub fn set_documents(&self, documents: Vec<ConversationDocument>) {
        *self.documents() = documents;
    }

    pub fn push_event(&self, event: ChangeEvent) {
        self.log.push(LogEntry::Event(event));
    }

    /// Make the feed return an error when it reaches this point of the log.
    pub fn push_failure(&self, message: &str) {
        self.log.push(LogEntry::Failure(message.to_string()));
    }

    /// End every feed once it has delivered the whole log.
    pub fn close_feed(&self) {
        self.log.state().closed = true;
        self.log.appended.notify_waiters();
    }

    /// Make the snapshot page at `index` fail with a source error.
    pub fn fail_snapshot_page(&self, index: usize) {
        *self
            .failing_page
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(index);
    }

    /// Resume tokens passed to each `open_change_feed` call, in order.
    pub fn feed_openings(&self) -> Vec<Option<Vec<u8>>> {
        self.openings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl ConversationSource for MemorySource {
    type Feed = MemoryChangeFeed;

    async fn open_change_feed(&self, resume_after: Option<Vec<u8>>) -> SyncResult<MemoryChangeFeed> {
        let position = match &resume_after {
            Some(token) => token_position(token)?,
            None => 0,
        };
        self.openings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(resume_after);

        Ok(MemoryChangeFeed {
            log: self.log.clone(),
            position,
        })
    }

    async fn snapshot_pages(&self, batch_size: usize) -> SyncResult<PageStream> {
        let failing_page = *self
            .failing_page
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let pages: Vec<SyncResult<Vec<ConversationDocument>>> = self
            .documents()
            .chunks(batch_size.max(1))
            .enumerate()
            .map(|(index, chunk)| {
                if failing_page == Some(index) {
                    Err(SyncError::Source(format!("Snapshot page {index} is unreadable")))
                } else {
                    Ok(chunk.to_vec())
                }
            })
            .collect();

        Ok(futures::stream::iter(pages).boxed())
    }

    async fn counts(&self) -> SyncResult<EntityCounts> {
        let documents = self.documents();
        Ok(EntityCounts {
            conversations: documents.len() as u64,
            messages: documents.iter().map(|d| d.messages.len() as u64).sum(),
        })
    }
}

pub struct MemoryChangeFeed {
    log: Arc<FeedLog>,
    position: usize,
}

#[async_trait]
impl ChangeFeed for MemoryChangeFeed {
    async fn next_event(&mut self) -> Option<SyncResult<SourceEvent>> {
        let log = self.log.clone();
        loop {
            let appended = log.appended.notified();
            {
                let state = log.state();
                if let Some(entry) = state.entries.get(self.position) {
                    self.position += 1;
                    return Some(match entry {
                        LogEntry::Event(event) => Ok(SourceEvent::new(
                            event.clone(),
                            Some(position_token(self.position)),
                        )),
                        LogEntry::Failure(message) => Err(SyncError::Source(message.clone())),
                    });
                }
                if state.closed {
                    return None;
                }
            }
            appended.await;
        }
    }

    fn resume_token(&self) -> Option<Vec<u8>> {
        Some(position_token(self.position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delete(id: &str) -> ChangeEvent {
        ChangeEvent::Delete {
            conversation_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_feed_resumes_after_token() {
        let source = MemorySource::default();
        source.push_event(delete("a"));
        source.push_event(delete("b"));
        source.close_feed();

        let mut feed = source.open_change_feed(None).await.unwrap();
        let first = feed.next_event().await.unwrap().unwrap();
        assert_eq!(first.event.conversation_id(), "a");

        let mut resumed = source
            .open_change_feed(first.resume_token.clone())
            .await
            .unwrap();
        let second = resumed.next_event().await.unwrap().unwrap();
        assert_eq!(second.event.conversation_id(), "b");
        assert!(resumed.next_event().await.is_none());
        assert_eq!(source.feed_openings().len(), 2);
    }

    #[tokio::test]
    async fn test_feed_waits_for_new_events() {
        let source = Arc::new(MemorySource::default());
        let mut feed = source.open_change_feed(None).await.unwrap();

        let pusher = source.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            pusher.push_event(delete("late"));
        });

        let event = feed.next_event().await.unwrap().unwrap();
        assert_eq!(event.event.conversation_id(), "late");
        assert_eq!(feed.resume_token(), Some(position_token(1)));
    }

    #[tokio::test]
    async fn test_rejects_malformed_token() {
        let source = MemorySource::default();
        let err = source.open_change_feed(Some(vec![1, 2])).await.err().unwrap();
        assert!(matches!(err, SyncError::Setup(_)));
    }
}
