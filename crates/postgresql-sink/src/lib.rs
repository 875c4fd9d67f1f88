//! PostgreSQL sink for chat-sync
//!
//! Writes users, conversations and messages into the normalized schema:
//!
//! ```text
//! users(id)
//! conversations(id, created_at, updated_at)
//! messages(id, conversation_id -> conversations, sender_id -> users, content, timestamp, read)
//! ```
//!
//! Messages have no identity in the document store, so `messages` carries a
//! unique index on `(conversation_id, sender_id, timestamp, md5(content))`
//! and every message write is an upsert against it.

mod config;
mod error;
mod schema;
mod sink;
pub mod statement;
mod writer;

pub use config::{create_pool, PostgresOpts};
pub use schema::{initialize_schema, MESSAGE_INDEX_STATEMENTS, SCHEMA_STATEMENTS};
pub use sink::PostgresSink;
pub use statement::{InsertStatement, MAX_PARAMETERS};
