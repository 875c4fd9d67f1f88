//! ChatSync Library
//!
//! Replicates a MongoDB collection of chat conversations (participants and
//! an embedded message array per document) into a normalized PostgreSQL
//! schema of users, conversations and messages, and keeps it current.
//!
//! # Features
//!
//! - Snapshot: batched copy of the whole collection, pages written in parallel
//! - Live sync: change-stream tailing with per-conversation ordering
//! - Idempotent writes: messages are upserted on their natural key
//! - Validation: source/destination count reconciliation after the snapshot
//! - Checkpointing: resume tokens persisted so a restart can pick up where it stopped
//!
//! # Collaborator Crates
//!
//! - `sync_core` - document model, row sets, the transformer and collaborator traits
//! - `chat_sync_mongodb_source` - MongoDB snapshot cursor and change stream
//! - `chat_sync_postgresql_sink` - PostgreSQL schema and transactional writer
//! - `checkpoint` - checkpoint files and stores
//!
//! # CLI Usage
//!
//! ```bash
//! # Snapshot, validate, then follow the change stream until Ctrl+C
//! chat-sync run --mongo-uri mongodb://mongo:27017/chatdb?replicaSet=rs0 --pg-host localhost
//!
//! # Restart live sync from the last checkpoint, skipping the snapshot
//! chat-sync run --resume
//!
//! # Compare counts only
//! chat-sync validate
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

pub mod dead_letter;
pub mod live_sync;
pub mod orchestrator;
pub mod resume;
pub mod retry;
pub mod snapshot;
pub mod testing;
pub mod validate;

pub use dead_letter::{DeadLetterLog, DeadLetterRecord};
pub use live_sync::{run_live_sync, EventState, LiveSyncConfig, LiveSyncSummary};
pub use orchestrator::{run_replication, RunConfig, RunSummary};
pub use resume::{ResumeCheckpoint, ResumePoints};
pub use retry::RetryConfig;
pub use snapshot::{run_snapshot, SnapshotConfig, SnapshotSummary};
pub use validate::{validate_counts, ValidationReport};

/// MongoDB connection options
#[derive(Parser, Clone, Debug)]
pub struct SourceOpts {
    /// MongoDB connection string (must point at a replica set for change streams)
    #[arg(
        long,
        default_value = "mongodb://mongo:27017/chatdb?replicaSet=rs0",
        env = "MONGO_URI"
    )]
    pub mongo_uri: String,

    /// Source database (defaults to the database in the URI, then "chatdb")
    #[arg(long, env = "MONGO_DATABASE")]
    pub source_database: Option<String>,

    /// Collection holding the conversation documents
    #[arg(long, default_value = "conversations")]
    pub collection: String,
}

/// PostgreSQL connection options
#[derive(Parser, Clone, Debug)]
pub struct DestinationOpts {
    #[arg(long, default_value = "localhost", env = "PG_HOST")]
    pub pg_host: String,

    #[arg(long, default_value = "5432", env = "PG_PORT")]
    pub pg_port: u16,

    #[arg(long, default_value = "chatdb", env = "PG_DATABASE")]
    pub pg_database: String,

    #[arg(long, default_value = "postgres", env = "PG_USER")]
    pub pg_user: String,

    #[arg(long, default_value = "postgres", env = "PG_PASSWORD")]
    pub pg_password: String,

    /// Maximum connections shared by all concurrent writers
    #[arg(long, default_value = "16")]
    pub pg_pool_size: usize,

    /// Messages per INSERT statement (also capped by the 65535 parameter limit)
    #[arg(long, default_value = "10000")]
    pub message_sub_batch_size: usize,

    /// Deadline in seconds for each checkout, statement and commit
    #[arg(long, default_value = "30")]
    pub operation_timeout_secs: u64,
}

/// Replication tuning
#[derive(Parser, Clone, Debug)]
pub struct SyncOpts {
    /// Documents per snapshot page
    #[arg(long, default_value = "5000")]
    pub batch_size: usize,

    /// Snapshot pages written concurrently
    #[arg(long, default_value = "4")]
    pub snapshot_concurrency: usize,

    /// Live sync partitions (one worker each)
    #[arg(long, default_value = "8")]
    pub workers: usize,

    /// Queued events per partition before the feed reader waits
    #[arg(long, default_value = "1024")]
    pub queue_depth: usize,

    /// Retries for a transient write failure before the event is dead-lettered
    #[arg(long, default_value = "3")]
    pub max_retries: usize,

    /// Directory for checkpoint files
    #[arg(long, default_value = ".chat-sync-checkpoints")]
    pub checkpoint_dir: PathBuf,

    /// Do not read or write checkpoint files
    #[arg(long)]
    pub no_checkpoints: bool,

    /// Committed events between live sync checkpoints
    #[arg(long, default_value = "100")]
    pub checkpoint_interval: u64,

    /// JSON-lines file receiving events that could not be applied
    #[arg(long, default_value = ".chat-sync-dead-letter.jsonl")]
    pub dead_letter_path: PathBuf,

    /// Skip the snapshot and resume the change stream from the last checkpoint
    #[arg(long)]
    pub resume: bool,
}

// CLI type → library type conversions
impl From<&SourceOpts> for chat_sync_mongodb_source::SourceOpts {
    fn from(opts: &SourceOpts) -> Self {
        Self {
            source_uri: opts.mongo_uri.clone(),
            source_database: opts.source_database.clone(),
            collection: opts.collection.clone(),
        }
    }
}

impl From<&DestinationOpts> for chat_sync_postgresql_sink::PostgresOpts {
    fn from(opts: &DestinationOpts) -> Self {
        Self {
            host: opts.pg_host.clone(),
            port: opts.pg_port,
            database: opts.pg_database.clone(),
            user: opts.pg_user.clone(),
            password: opts.pg_password.clone(),
            pool_size: opts.pg_pool_size,
            operation_timeout: Duration::from_secs(opts.operation_timeout_secs),
            message_sub_batch_size: opts.message_sub_batch_size,
        }
    }
}

impl From<&SyncOpts> for RunConfig {
    fn from(opts: &SyncOpts) -> Self {
        let retry = RetryConfig::event().with_max_retries(opts.max_retries);
        Self {
            snapshot: SnapshotConfig {
                batch_size: opts.batch_size,
                concurrency: opts.snapshot_concurrency,
                retry: retry.clone(),
            },
            live: LiveSyncConfig {
                workers: opts.workers,
                queue_depth: opts.queue_depth,
                checkpoint_interval: opts.checkpoint_interval,
                retry,
            },
            resume: opts.resume,
        }
    }
}
