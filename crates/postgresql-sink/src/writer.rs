//! Statements executed inside a sink transaction.
//!
//! Every function takes the open transaction and runs each round trip under
//! the operation deadline. None of them commit.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sync_core::{ConversationRow, MessageRow, SyncResult, UserRow};
use tokio_postgres::types::ToSql;
use tokio_postgres::Transaction;

use crate::error::{pg_error, with_deadline};
use crate::statement::InsertStatement;

type Param<'a> = &'a (dyn ToSql + Sync);

const USER_COLUMNS: &[&str] = &["id"];
const CONVERSATION_COLUMNS: &[&str] = &["id", "created_at", "updated_at"];
const MESSAGE_COLUMNS: &[&str] = &["conversation_id", "sender_id", "content", "timestamp", "read"];

const MESSAGE_NATURAL_KEY_CONFLICT: &str =
    "ON CONFLICT (conversation_id, sender_id, \"timestamp\", md5(content)) DO UPDATE SET read = EXCLUDED.read";

/// A row that knows how to bind itself in column order.
trait BindRow {
    fn bind<'a>(&'a self, params: &mut Vec<Param<'a>>);
}

impl BindRow for UserRow {
    fn bind<'a>(&'a self, params: &mut Vec<Param<'a>>) {
        params.push(&self.id);
    }
}

impl BindRow for ConversationRow {
    fn bind<'a>(&'a self, params: &mut Vec<Param<'a>>) {
        params.push(&self.id);
        params.push(&self.created_at);
        params.push(&self.updated_at);
    }
}

impl BindRow for MessageRow {
    fn bind<'a>(&'a self, params: &mut Vec<Param<'a>>) {
        params.push(&self.conversation_id);
        params.push(&self.sender_id);
        params.push(&self.content);
        params.push(&self.timestamp);
        params.push(&self.read);
    }
}

async fn insert_rows<T: BindRow + Sync>(
    tx: &Transaction<'_>,
    statement: &InsertStatement,
    rows: &[T],
    deadline: Duration,
) -> SyncResult<u64> {
    let mut affected = 0;
    for (start, len) in statement.plan(rows.len()) {
        let sql = statement.sql(len);
        let mut params: Vec<Param<'_>> = Vec::with_capacity(len * statement.column_count());
        for row in &rows[start..start + len] {
            row.bind(&mut params);
        }
        affected += with_deadline("insert", deadline, async {
            tx.execute(sql.as_str(), &params)
                .await
                .map_err(|e| pg_error("INSERT failed", e))
        })
        .await?;
    }
    Ok(affected)
}

/// Insert users that do not exist yet. Existing rows are left untouched.
pub(crate) async fn insert_users(
    tx: &Transaction<'_>,
    users: &[UserRow],
    deadline: Duration,
) -> SyncResult<u64> {
    let statement =
        InsertStatement::new("users", USER_COLUMNS).on_conflict("ON CONFLICT (id) DO NOTHING");
    insert_rows(tx, &statement, users, deadline).await
}

/// Insert conversations that do not exist yet. Existing rows are left untouched.
pub(crate) async fn insert_conversations(
    tx: &Transaction<'_>,
    conversations: &[ConversationRow],
    deadline: Duration,
) -> SyncResult<u64> {
    let statement = InsertStatement::new("conversations", CONVERSATION_COLUMNS)
        .on_conflict("ON CONFLICT (id) DO NOTHING");
    insert_rows(tx, &statement, conversations, deadline).await
}

/// Upsert messages on their natural key, chunked by `sub_batch_size`.
///
/// Callers must pass messages already deduplicated by key: one statement
/// cannot update the same row twice.
pub(crate) async fn upsert_messages(
    tx: &Transaction<'_>,
    messages: &[MessageRow],
    sub_batch_size: usize,
    deadline: Duration,
) -> SyncResult<u64> {
    let statement = InsertStatement::new("messages", MESSAGE_COLUMNS)
        .on_conflict(MESSAGE_NATURAL_KEY_CONFLICT)
        .with_max_rows(sub_batch_size);
    insert_rows(tx, &statement, messages, deadline).await
}

/// Delete this conversation's messages whose natural key is not in `keep`.
pub(crate) async fn delete_messages_not_in(
    tx: &Transaction<'_>,
    conversation_id: &str,
    keep: &[MessageRow],
    deadline: Duration,
) -> SyncResult<u64> {
    let senders: Vec<&str> = keep.iter().map(|m| m.sender_id.as_str()).collect();
    let timestamps: Vec<DateTime<Utc>> = keep.iter().map(|m| m.timestamp).collect();
    let contents: Vec<&str> = keep.iter().map(|m| m.content.as_str()).collect();

    let sql = "DELETE FROM messages m
        WHERE m.conversation_id = $1
          AND NOT EXISTS (
              SELECT 1
              FROM UNNEST($2::varchar[], $3::timestamptz[], $4::text[]) AS keep(sender_id, ts, content)
              WHERE keep.sender_id = m.sender_id
                AND keep.ts = m.\"timestamp\"
                AND keep.content = m.content
          )";

    with_deadline("reconcile", deadline, async {
        tx.execute(sql, &[&conversation_id, &senders, &timestamps, &contents])
            .await
            .map_err(|e| pg_error("Message reconciliation failed", e))
    })
    .await
}

/// Overwrite the given timestamps; `None` keeps the stored value.
pub(crate) async fn update_conversation_timestamps(
    tx: &Transaction<'_>,
    conversation_id: &str,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    deadline: Duration,
) -> SyncResult<u64> {
    let sql = "UPDATE conversations
        SET created_at = COALESCE($2, created_at),
            updated_at = COALESCE($3, updated_at)
        WHERE id = $1";

    with_deadline("update", deadline, async {
        tx.execute(sql, &[&conversation_id, &created_at, &updated_at])
            .await
            .map_err(|e| pg_error("Conversation update failed", e))
    })
    .await
}

/// Messages first, then the conversation row. Returns `(messages, conversations)` removed.
pub(crate) async fn delete_conversation(
    tx: &Transaction<'_>,
    conversation_id: &str,
    deadline: Duration,
) -> SyncResult<(u64, u64)> {
    let messages = with_deadline("delete", deadline, async {
        tx.execute(
            "DELETE FROM messages WHERE conversation_id = $1",
            &[&conversation_id],
        )
        .await
        .map_err(|e| pg_error("Message delete failed", e))
    })
    .await?;

    let conversations = with_deadline("delete", deadline, async {
        tx.execute("DELETE FROM conversations WHERE id = $1", &[&conversation_id])
            .await
            .map_err(|e| pg_error("Conversation delete failed", e))
    })
    .await?;

    Ok((messages, conversations))
}
