//! Core types for the chat-sync replication framework.
//!
//! This crate provides the store-independent pieces of the pipeline that
//! copies conversation documents into a relational store:
//!
//! - [`ConversationDocument`] - A conversation as read from the document store
//! - [`RowSet`] - Deduplicated users, conversations and messages ready to write
//! - [`ChangeEvent`] - A single insert/update/delete notification from the change feed
//! - [`transform_batch`] / [`transform_update`] - The pure document-to-row mapping
//! - [`SyncError`] - The error taxonomy shared by every component
//!
//! # Architecture
//!
//! ```text
//! sync-core (this crate)
//!    │
//!    ├─── chat-sync-mongodb-source     (implements ConversationSource + ChangeFeed)
//!    ├─── chat-sync-postgresql-sink    (implements ReplicationSink)
//!    └─── chat-sync                    (snapshot, live sync, validation)
//! ```
//!
//! # Example
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use sync_core::{transform_batch, ConversationDocument, MessageDocument};
//!
//! let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
//! let doc = ConversationDocument {
//!     id: Some("c1".to_string()),
//!     participants: vec!["alice".to_string(), "bob".to_string(), "alice".to_string()],
//!     messages: vec![MessageDocument {
//!         sender_id: "alice".to_string(),
//!         content: "hi".to_string(),
//!         timestamp: at,
//!         read: false,
//!     }],
//!     created_at: at,
//!     updated_at: at,
//! };
//!
//! let rows = transform_batch(&[doc]);
//! assert_eq!(rows.users.len(), 2);
//! assert_eq!(rows.conversations.len(), 1);
//! assert_eq!(rows.messages.len(), 1);
//! ```

pub mod change;
pub mod document;
pub mod error;
pub mod rows;
pub mod traits;
pub mod transform;

// Re-exports for convenience
pub use change::{ChangeEvent, ChangeKind, ChangedFields, SourceEvent};
pub use document::{ConversationDocument, MessageDocument};
pub use error::{SyncError, SyncResult};
pub use rows::{
    ConversationRow, ConversationUpdate, EntityCounts, MessageKey, MessageRow, RowSet, UserRow,
};
pub use traits::{ChangeFeed, ConversationSource, PageStream, ReplicationSink};
pub use transform::{transform_batch, transform_document, transform_update};
