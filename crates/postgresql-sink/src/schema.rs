//! Destination schema.

use std::time::Duration;

use deadpool_postgres::Pool;
use sync_core::{SyncError, SyncResult};
use tracing::{debug, info};

use crate::error::{pg_error, pool_error, with_deadline};

/// Relations and the natural-key index, in creation order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id VARCHAR(255) PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS conversations (
        id VARCHAR(255) PRIMARY KEY,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        id BIGSERIAL PRIMARY KEY,
        conversation_id VARCHAR(255) NOT NULL REFERENCES conversations(id),
        sender_id VARCHAR(255) NOT NULL REFERENCES users(id),
        content TEXT NOT NULL,
        \"timestamp\" TIMESTAMPTZ NOT NULL,
        read BOOLEAN NOT NULL
    )",
    // md5 keeps the key small for long message bodies
    "CREATE UNIQUE INDEX IF NOT EXISTS uq_messages_natural_key
        ON messages (conversation_id, sender_id, \"timestamp\", md5(content))",
];

/// Secondary indexes built once the snapshot has landed.
pub const MESSAGE_INDEX_STATEMENTS: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_messages_conversation_id ON messages (conversation_id)",
    "CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages (\"timestamp\")",
];

/// Create the relations if they do not exist. Safe to run on every start.
pub async fn initialize_schema(pool: &Pool, deadline: Duration) -> SyncResult<()> {
    info!("Initializing PostgreSQL schema");
    execute_all(pool, deadline, SCHEMA_STATEMENTS)
        .await
        .map_err(|e| SyncError::Setup(format!("Failed to initialize schema: {e}")))?;
    info!("PostgreSQL schema initialized");
    Ok(())
}

pub(crate) async fn execute_all(
    pool: &Pool,
    deadline: Duration,
    statements: &[&str],
) -> SyncResult<()> {
    let client = with_deadline("checkout", deadline, async {
        pool.get().await.map_err(pool_error)
    })
    .await?;

    for statement in statements {
        debug!("DDL: {}", statement);
        with_deadline("ddl", deadline, async {
            client
                .batch_execute(statement)
                .await
                .map_err(|e| pg_error("DDL failed", e))
        })
        .await?;
    }
    Ok(())
}
