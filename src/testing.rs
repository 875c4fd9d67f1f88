//! In-memory collaborators for exercising the replication engine without
//! live databases.

pub mod memory_sink;
pub mod memory_source;

pub use memory_sink::{AppliedWrite, MemorySink, MemoryTables};
pub use memory_source::{position_token, MemoryChangeFeed, MemorySource};
