//! [`ReplicationSink`] backed by a PostgreSQL connection pool.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use sync_core::{
    ConversationUpdate, EntityCounts, ReplicationSink, RowSet, SyncError, SyncResult, UserRow,
};
use tracing::{debug, info, warn};

use crate::config::{create_pool, PostgresOpts};
use crate::error::{pg_error, pool_error, with_deadline};
use crate::schema::{self, MESSAGE_INDEX_STATEMENTS};
use crate::writer;

/// Transactional writer over a shared pool.
///
/// Each call checks out its own connection, opens one transaction, and
/// either commits or drops it. Dropping an uncommitted transaction rolls
/// it back, so every exit path releases the connection cleanly.
#[derive(Clone)]
pub struct PostgresSink {
    pool: Pool,
    operation_timeout: Duration,
    message_sub_batch_size: usize,
}

impl PostgresSink {
    pub fn new(pool: Pool, opts: &PostgresOpts) -> Self {
        Self {
            pool,
            operation_timeout: opts.operation_timeout,
            message_sub_batch_size: opts.message_sub_batch_size.max(1),
        }
    }

    /// Build the pool and verify the server answers.
    pub async fn connect(opts: &PostgresOpts) -> SyncResult<Self> {
        let pool = create_pool(opts)?;
        let sink = Self::new(pool, opts);

        let client = sink
            .checkout()
            .await
            .map_err(|e| SyncError::Setup(format!("PostgreSQL is unreachable: {e}")))?;
        with_deadline("ping", sink.operation_timeout, async {
            client
                .simple_query("SELECT 1")
                .await
                .map_err(|e| pg_error("Ping failed", e))
        })
        .await
        .map_err(|e| SyncError::Setup(e.to_string()))?;

        info!(
            "Connected to PostgreSQL at {}:{}/{}",
            opts.host, opts.port, opts.database
        );
        Ok(sink)
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub async fn initialize_schema(&self) -> SyncResult<()> {
        schema::initialize_schema(&self.pool, self.operation_timeout).await
    }

    async fn checkout(&self) -> SyncResult<Object> {
        with_deadline("checkout", self.operation_timeout, async {
            self.pool.get().await.map_err(pool_error)
        })
        .await
    }
}

#[async_trait]
impl ReplicationSink for PostgresSink {
    async fn apply_row_set(&self, rows: &RowSet) -> SyncResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let rows = rows.normalized();
        let deadline = self.operation_timeout;

        let mut client = self.checkout().await?;
        let tx = with_deadline("begin", deadline, async {
            client
                .transaction()
                .await
                .map_err(|e| pg_error("BEGIN failed", e))
        })
        .await?;

        // Referenced rows first so foreign keys hold without deferral
        let users = writer::insert_users(&tx, &rows.users, deadline).await?;
        let conversations = writer::insert_conversations(&tx, &rows.conversations, deadline).await?;
        let messages =
            writer::upsert_messages(&tx, &rows.messages, self.message_sub_batch_size, deadline)
                .await?;

        with_deadline("commit", deadline, async {
            tx.commit().await.map_err(|e| pg_error("COMMIT failed", e))
        })
        .await?;

        debug!(
            "Committed row set: {} new users, {} new conversations, {} messages upserted",
            users, conversations, messages
        );
        Ok(())
    }

    async fn apply_update(&self, update: &ConversationUpdate) -> SyncResult<()> {
        if update.is_noop() {
            debug!("Nothing to write for conversation {}", update.conversation_id);
            return Ok(());
        }
        let deadline = self.operation_timeout;
        let conversation_id = update.conversation_id.as_str();

        let mut users: Vec<UserRow> = update.users.clone();
        users.sort();
        users.dedup();

        // Same collapse as the snapshot path so one statement never hits a key twice
        let messages = update.messages.as_ref().map(|messages| {
            RowSet {
                messages: messages.clone(),
                ..RowSet::default()
            }
            .normalized()
            .messages
        });

        let mut client = self.checkout().await?;
        let tx = with_deadline("begin", deadline, async {
            client
                .transaction()
                .await
                .map_err(|e| pg_error("BEGIN failed", e))
        })
        .await?;

        writer::insert_users(&tx, &users, deadline).await?;

        if let Some(conversation) = &update.ensure_conversation {
            writer::insert_conversations(&tx, std::slice::from_ref(conversation), deadline)
                .await?;
        }

        if update.touches_timestamps() {
            let updated = writer::update_conversation_timestamps(
                &tx,
                conversation_id,
                update.created_at,
                update.updated_at,
                deadline,
            )
            .await?;
            if updated == 0 {
                warn!(
                    "Timestamp update for conversation {} matched no row",
                    conversation_id
                );
            }
        }

        if let Some(messages) = &messages {
            let removed =
                writer::delete_messages_not_in(&tx, conversation_id, messages, deadline).await?;
            writer::upsert_messages(&tx, messages, self.message_sub_batch_size, deadline).await?;
            debug!(
                "Reconciled conversation {}: {} messages kept, {} removed",
                conversation_id,
                messages.len(),
                removed
            );
        }

        with_deadline("commit", deadline, async {
            tx.commit().await.map_err(|e| pg_error("COMMIT failed", e))
        })
        .await
    }

    async fn delete_conversation(&self, conversation_id: &str) -> SyncResult<()> {
        let deadline = self.operation_timeout;
        let mut client = self.checkout().await?;
        let tx = with_deadline("begin", deadline, async {
            client
                .transaction()
                .await
                .map_err(|e| pg_error("BEGIN failed", e))
        })
        .await?;

        let (messages, conversations) =
            writer::delete_conversation(&tx, conversation_id, deadline).await?;

        with_deadline("commit", deadline, async {
            tx.commit().await.map_err(|e| pg_error("COMMIT failed", e))
        })
        .await?;

        debug!(
            "Deleted conversation {} ({} rows) and {} messages",
            conversation_id, conversations, messages
        );
        Ok(())
    }

    async fn create_message_indexes(&self) -> SyncResult<()> {
        info!("Creating secondary indexes on messages");
        schema::execute_all(&self.pool, self.operation_timeout, MESSAGE_INDEX_STATEMENTS).await
    }

    async fn counts(&self) -> SyncResult<EntityCounts> {
        let client = self.checkout().await?;
        let row = with_deadline("count", self.operation_timeout, async {
            client
                .query_one(
                    "SELECT (SELECT COUNT(*) FROM conversations), (SELECT COUNT(*) FROM messages)",
                    &[],
                )
                .await
                .map_err(|e| pg_error("Count query failed", e))
        })
        .await?;

        let conversations: i64 = row
            .try_get(0)
            .map_err(|e| pg_error("Invalid conversation count", e))?;
        let messages: i64 = row
            .try_get(1)
            .map_err(|e| pg_error("Invalid message count", e))?;

        Ok(EntityCounts {
            conversations: conversations.max(0) as u64,
            messages: messages.max(0) as u64,
        })
    }
}
