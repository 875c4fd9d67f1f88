//! Command-line interface for chat-sync
//!
//! # Usage Examples
//!
//! ```bash
//! # Snapshot the collection, validate counts, then follow the change stream
//! chat-sync run \
//!   --mongo-uri "mongodb://mongo:27017/chatdb?replicaSet=rs0" \
//!   --pg-host localhost --pg-database chatdb
//!
//! # Restart after a crash without re-running the snapshot
//! chat-sync run --resume
//!
//! # Compare source and destination counts
//! chat-sync validate
//! ```
//!
//! Every connection option can also be given through the environment
//! (`MONGO_URI`, `PG_HOST`, `PG_PORT`, `PG_DATABASE`, `PG_USER`, `PG_PASSWORD`).
//! Log verbosity follows `RUST_LOG` and defaults to `info`.

use std::sync::Arc;

use anyhow::Context;
use chat_sync::{
    run_replication, validate_counts, DeadLetterLog, DestinationOpts, ResumePoints, RunConfig,
    SourceOpts, SyncOpts,
};
use chat_sync_mongodb_source::{MongoConversationSource, MongoDBCheckpoint};
use chat_sync_postgresql_sink::{PostgresOpts, PostgresSink};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chat-sync")]
#[command(about = "Replicate MongoDB chat conversations into PostgreSQL")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Snapshot, validate and then tail the change stream until interrupted
    Run {
        #[command(flatten)]
        source: SourceOpts,

        #[command(flatten)]
        destination: DestinationOpts,

        #[command(flatten)]
        sync: SyncOpts,
    },
    /// Compare conversation and message counts between the two stores
    Validate {
        #[command(flatten)]
        source: SourceOpts,

        #[command(flatten)]
        destination: DestinationOpts,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            source,
            destination,
            sync,
        } => run_sync(source, destination, sync).await,
        Commands::Validate {
            source,
            destination,
        } => run_validate(source, destination).await,
    }
}

async fn connect(
    source: &SourceOpts,
    destination: &DestinationOpts,
) -> anyhow::Result<(MongoConversationSource, PostgresSink)> {
    let source = MongoConversationSource::connect(&source.into())
        .await
        .context("Failed to connect to MongoDB")?;
    let sink = PostgresSink::connect(&PostgresOpts::from(destination))
        .await
        .context("Failed to connect to PostgreSQL")?;
    Ok((source, sink))
}

async fn run_sync(
    source_opts: SourceOpts,
    destination_opts: DestinationOpts,
    sync_opts: SyncOpts,
) -> anyhow::Result<()> {
    let (source, sink) = connect(&source_opts, &destination_opts).await?;
    sink.initialize_schema()
        .await
        .context("Failed to initialize destination schema")?;

    let resume = if sync_opts.no_checkpoints {
        ResumePoints::<MongoDBCheckpoint>::disabled()
    } else {
        info!("Checkpoints are stored in {:?}", sync_opts.checkpoint_dir);
        ResumePoints::<MongoDBCheckpoint>::filesystem(&sync_opts.checkpoint_dir)
    };
    let dead_letters = DeadLetterLog::open(&sync_opts.dead_letter_path)
        .await
        .with_context(|| {
            format!(
                "Failed to open dead-letter log {:?}",
                sync_opts.dead_letter_path
            )
        })?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down");
                on_signal.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    let config = RunConfig::from(&sync_opts);
    let summary = run_replication(
        &source,
        Arc::new(sink),
        Arc::new(resume),
        Arc::new(dead_letters),
        &config,
        cancel,
    )
    .await?;

    if let Some(report) = &summary.validation {
        if !report.passed() {
            warn!("Snapshot finished with a count mismatch; see the validation warning above");
        }
    }
    if let Some(live) = &summary.live {
        if live.dead_lettered > 0 {
            warn!(
                "{} events could not be applied and were written to {:?}",
                live.dead_lettered, sync_opts.dead_letter_path
            );
        }
    }
    info!("chat-sync stopped");
    Ok(())
}

async fn run_validate(
    source_opts: SourceOpts,
    destination_opts: DestinationOpts,
) -> anyhow::Result<()> {
    let (source, sink) = connect(&source_opts, &destination_opts).await?;
    let report = validate_counts(&source, &sink).await?;
    if let Some(mismatch) = report.mismatch() {
        return Err(mismatch.into());
    }
    Ok(())
}
