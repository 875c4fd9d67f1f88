//! Checkpoint management for chat-sync
//!
//! Provides storage-agnostic checkpoint handling with support for
//! source-specific checkpoint types.
//!
//! # Architecture
//!
//! This crate provides a generic checkpoint system that:
//! - Defines the `Checkpoint` trait for source-specific checkpoint types
//! - Provides `CheckpointFile` wrapper for storage-agnostic serialization
//! - Manages checkpoint saving/loading via `SyncManager`
//! - Supports multiple storage backends via `CheckpointStore` trait
//!
//! ## Storage Backends
//!
//! - `FilesystemStore` - Stores one JSON file per sync phase
//! - `NullStore` - Discards checkpoints (checkpointing disabled)
//!
//! ## Phases
//!
//! A replication run records its source position at three points: before
//! the snapshot (`FullSyncStart`), after it (`FullSyncEnd`), and
//! periodically while tailing the change feed (`LiveSync`).

mod file;
mod filesystem;
mod manager;
mod phase;
pub mod store;


// Re-export file types
pub use file::CheckpointFile;

// Re-export manager types
pub use manager::SyncManager;

// Re-export phase types
pub use phase::SyncPhase;

// Re-export store trait and types
pub use store::{CheckpointID, CheckpointStore, NullStore, StoredCheckpoint};

// Re-export storage implementations
pub use filesystem::FilesystemStore;

/// Trait that source-specific checkpoints must implement.
///
/// # Example
///
/// ```rust
/// use checkpoint::Checkpoint;
/// use serde::{Deserialize, Serialize};
/// use chrono::{DateTime, Utc};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct MySourceCheckpoint {
///     pub position: i64,
///     pub timestamp: DateTime<Utc>,
/// }
///
/// impl Checkpoint for MySourceCheckpoint {
///     const DATABASE_TYPE: &'static str = "mysource";
///
///     fn to_cli_string(&self) -> String {
///         format!("{}:{}", self.position, self.timestamp.to_rfc3339())
///     }
///
///     fn from_cli_string(s: &str) -> anyhow::Result<Self> {
///         let parts: Vec<&str> = s.splitn(2, ':').collect();
///         if parts.len() != 2 {
///             anyhow::bail!("Invalid checkpoint format");
///         }
///         Ok(Self {
///             position: parts[0].parse()?,
///             timestamp: chrono::DateTime::parse_from_rfc3339(parts[1])?
///                 .with_timezone(&Utc),
///         })
///     }
/// }
/// ```
pub trait Checkpoint: serde::Serialize + for<'de> serde::Deserialize<'de> + Clone {
    /// Source type identifier (e.g., "mongodb").
    ///
    /// Stored alongside the checkpoint and validated when loading it back.
    const DATABASE_TYPE: &'static str;

    /// Convert to CLI-friendly string format, used for logging.
    ///
    /// The returned string should be parseable by `from_cli_string()`.
    fn to_cli_string(&self) -> String;

    /// Parse from CLI string format.
    fn from_cli_string(s: &str) -> anyhow::Result<Self>
    where
        Self: Sized;
}
