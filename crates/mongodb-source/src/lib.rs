//! MongoDB conversation source for chat-sync
//!
//! Provides the batched snapshot cursor, the change-stream feed and the
//! source-side counts used by validation.

pub mod checkpoint;
mod change_stream;
pub mod decode;
mod source;

pub use change_stream::{convert_change_event, MongoChangeFeed};
pub use source::{MongoConversationSource, SourceOpts};

// Re-export checkpoint types from this crate
pub use checkpoint::MongoDBCheckpoint;
