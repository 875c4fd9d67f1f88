//! Run orchestration: snapshot, validation, then live sync.
//!
//! The change feed is opened before the snapshot starts and its position is
//! saved as the `full_sync_start` checkpoint. Anything written to the source
//! while the snapshot runs is therefore replayed by live sync afterwards,
//! and replaying it is harmless because every write is idempotent.

use std::sync::Arc;

use anyhow::Context;
use checkpoint::SyncPhase;
use sync_core::{ChangeFeed, ConversationSource, ReplicationSink, SyncError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dead_letter::DeadLetterLog;
use crate::live_sync::{run_live_sync, LiveSyncConfig, LiveSyncSummary};
use crate::resume::{ResumeCheckpoint, ResumePoints};
use crate::snapshot::{run_snapshot, SnapshotConfig, SnapshotSummary};
use crate::validate::{validate_counts, ValidationReport};

#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub snapshot: SnapshotConfig,
    pub live: LiveSyncConfig,
    /// Skip the snapshot and continue from the latest checkpoint.
    pub resume: bool,
}

/// What each phase of a run did. Phases that did not run are `None`.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub snapshot: Option<SnapshotSummary>,
    pub validation: Option<ValidationReport>,
    pub live: Option<LiveSyncSummary>,
}

pub async fn run_replication<S, K, C>(
    source: &S,
    sink: Arc<K>,
    resume: Arc<ResumePoints<C>>,
    dead_letters: Arc<DeadLetterLog>,
    config: &RunConfig,
    cancel: CancellationToken,
) -> anyhow::Result<RunSummary>
where
    S: ConversationSource,
    K: ReplicationSink + 'static,
    C: ResumeCheckpoint,
{
    let mut summary = RunSummary::default();

    if config.resume {
        let Some((phase, token)) = resume.latest().await? else {
            return Err(SyncError::Setup(
                "--resume was given but no checkpoint was found".to_string(),
            )
            .into());
        };
        info!("Resuming from {} checkpoint, skipping snapshot", phase);
        let feed = source
            .open_change_feed(Some(token))
            .await
            .context("Failed to resume change feed")?;

        let live = run_live_sync(
            feed,
            sink,
            resume,
            dead_letters,
            config.live.clone(),
            cancel,
        )
        .await?;
        summary.live = Some(live);
        return Ok(summary);
    }

    let feed = source
        .open_change_feed(None)
        .await
        .context("Failed to open change feed")?;
    let start_token = feed.resume_token();
    match &start_token {
        Some(token) => resume.save(SyncPhase::FullSyncStart, token).await?,
        None => warn!("Change feed reported no start position; a restart will need a new snapshot"),
    }

    let snapshot = match run_snapshot(source, sink.as_ref(), &config.snapshot, &cancel).await {
        Ok(snapshot) => snapshot,
        Err(SyncError::Cancelled) => {
            info!("Snapshot cancelled before completion");
            return Ok(summary);
        }
        Err(e) => return Err(e).context("Snapshot failed"),
    };
    summary.snapshot = Some(snapshot);

    match validate_counts(source, sink.as_ref()).await {
        Ok(report) => summary.validation = Some(report),
        Err(e) => warn!("Validation could not count rows: {}", e),
    }

    // The feed has not been read yet, so the snapshot ends where it started
    if let Some(token) = &start_token {
        resume.save(SyncPhase::FullSyncEnd, token).await?;
    }

    if cancel.is_cancelled() {
        return Ok(summary);
    }

    let live = run_live_sync(
        feed,
        sink,
        resume,
        dead_letters,
        config.live.clone(),
        cancel,
    )
    .await?;
    summary.live = Some(live);
    Ok(summary)
}
