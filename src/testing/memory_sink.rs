//! In-memory relational sink.
//!
//! Enforces the same constraints as the PostgreSQL schema: messages need
//! an existing conversation and sender, and are unique on their natural
//! key. Every call applies to a copy of the tables that replaces the
//! originals only on success, which stands in for transaction rollback.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use sync_core::{
    ConversationRow, ConversationUpdate, EntityCounts, MessageKey, MessageRow, ReplicationSink,
    RowSet, SyncError, SyncResult,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTables {
    pub users: BTreeSet<String>,
    pub conversations: BTreeMap<String, ConversationRow>,
    pub messages: BTreeMap<MessageKey, MessageRow>,
}

impl MemoryTables {
    pub fn messages_of(&self, conversation_id: &str) -> Vec<&MessageRow> {
        self.messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .collect()
    }

    fn insert_conversation(&mut self, row: &ConversationRow) {
        self.conversations
            .entry(row.id.clone())
            .or_insert_with(|| row.clone());
    }

    fn upsert_message(&mut self, message: &MessageRow) -> SyncResult<()> {
        if !self.conversations.contains_key(&message.conversation_id) {
            return Err(SyncError::destination(format!(
                "foreign key violation: conversation '{}' does not exist",
                message.conversation_id
            )));
        }
        if !self.users.contains(&message.sender_id) {
            return Err(SyncError::destination(format!(
                "foreign key violation: user '{}' does not exist",
                message.sender_id
            )));
        }
        self.messages
            .entry(message.key())
            .and_modify(|existing| existing.read = message.read)
            .or_insert_with(|| message.clone());
        Ok(())
    }
}

/// A write that committed, in commit order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppliedWrite {
    RowSet { conversations: Vec<String> },
    Update { conversation_id: String },
    Delete { conversation_id: String },
}

impl AppliedWrite {
    pub fn touches(&self, conversation_id: &str) -> bool {
        match self {
            AppliedWrite::RowSet { conversations } => {
                conversations.iter().any(|c| c == conversation_id)
            }
            AppliedWrite::Update {
                conversation_id: id,
            }
            | AppliedWrite::Delete {
                conversation_id: id,
            } => id == conversation_id,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct InjectedFailure {
    remaining: usize,
    transient: bool,
}

#[derive(Default)]
pub struct MemorySink {
    tables: Mutex<MemoryTables>,
    writes: Mutex<Vec<AppliedWrite>>,
    failures: Mutex<HashMap<String, InjectedFailure>>,
    write_delay: Option<Duration>,
    calls: AtomicUsize,
    index_builds: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before every write.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Fail the next `times` writes touching `conversation_id`.
    pub fn fail_conversation(&self, conversation_id: &str, times: usize, transient: bool) {
        lock(&self.failures).insert(
            conversation_id.to_string(),
            InjectedFailure {
                remaining: times,
                transient,
            },
        );
    }

    pub fn tables(&self) -> MemoryTables {
        lock(&self.tables).clone()
    }

    pub fn writes(&self) -> Vec<AppliedWrite> {
        lock(&self.writes).clone()
    }

    /// Write calls made, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn index_builds(&self) -> usize {
        self.index_builds.load(Ordering::SeqCst)
    }

    async fn begin<'a>(&self, conversations: impl IntoIterator<Item = &'a str>) -> SyncResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }

        let mut failures = lock(&self.failures);
        for conversation_id in conversations {
            let Some(failure) = failures.get_mut(conversation_id) else {
                continue;
            };
            if failure.remaining == 0 {
                continue;
            }
            failure.remaining -= 1;
            let message = format!("injected failure for conversation '{conversation_id}'");
            return Err(if failure.transient {
                SyncError::transient_destination(message)
            } else {
                SyncError::destination(message)
            });
        }
        Ok(())
    }

    fn commit(
        &self,
        write: AppliedWrite,
        apply: impl FnOnce(&mut MemoryTables) -> SyncResult<()>,
    ) -> SyncResult<()> {
        let mut tables = lock(&self.tables);
        let mut working = tables.clone();
        apply(&mut working)?;
        *tables = working;
        lock(&self.writes).push(write);
        Ok(())
    }
}

#[async_trait]
impl ReplicationSink for MemorySink {
    async fn apply_row_set(&self, rows: &RowSet) -> SyncResult<()> {
        let rows = rows.normalized();
        let conversations: Vec<String> = rows.conversations.iter().map(|c| c.id.clone()).collect();
        self.begin(conversations.iter().map(String::as_str)).await?;

        self.commit(AppliedWrite::RowSet { conversations }, |tables| {
            tables.users.extend(rows.users.iter().map(|u| u.id.clone()));
            for conversation in &rows.conversations {
                tables.insert_conversation(conversation);
            }
            for message in &rows.messages {
                tables.upsert_message(message)?;
            }
            Ok(())
        })
    }

    async fn apply_update(&self, update: &ConversationUpdate) -> SyncResult<()> {
        if update.is_noop() {
            return Ok(());
        }
        self.begin([update.conversation_id.as_str()]).await?;

        let write = AppliedWrite::Update {
            conversation_id: update.conversation_id.clone(),
        };
        self.commit(write, |tables| {
            tables
                .users
                .extend(update.users.iter().map(|u| u.id.clone()));
            if let Some(conversation) = &update.ensure_conversation {
                tables.insert_conversation(conversation);
            }
            if let Some(row) = tables.conversations.get_mut(&update.conversation_id) {
                if let Some(created_at) = update.created_at {
                    row.created_at = created_at;
                }
                if let Some(updated_at) = update.updated_at {
                    row.updated_at = updated_at;
                }
            }
            if let Some(messages) = &update.messages {
                let current = RowSet {
                    messages: messages.clone(),
                    ..Default::default()
                }
                .normalized()
                .messages;
                let keep: HashSet<MessageKey> = current.iter().map(MessageRow::key).collect();
                tables.messages.retain(|key, row| {
                    row.conversation_id != update.conversation_id || keep.contains(key)
                });
                for message in &current {
                    tables.upsert_message(message)?;
                }
            }
            Ok(())
        })
    }

    async fn delete_conversation(&self, conversation_id: &str) -> SyncResult<()> {
        self.begin([conversation_id]).await?;

        let write = AppliedWrite::Delete {
            conversation_id: conversation_id.to_string(),
        };
        self.commit(write, |tables| {
            tables
                .messages
                .retain(|_, row| row.conversation_id != conversation_id);
            tables.conversations.remove(conversation_id);
            Ok(())
        })
    }

    async fn create_message_indexes(&self) -> SyncResult<()> {
        self.index_builds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn counts(&self) -> SyncResult<EntityCounts> {
        let tables = lock(&self.tables);
        Ok(EntityCounts {
            conversations: tables.conversations.len() as u64,
            messages: tables.messages.len() as u64,
        })
    }
}
