//! Change-capture sync loop.
//!
//! A single reader drains the change feed in source order and routes each
//! event to one of `workers` bounded queues by a stable hash of its
//! conversation id. Each queue is drained by exactly one worker, strictly in
//! arrival order, so an update and a later delete for the same conversation
//! can never be applied out of order. Different conversations are written
//! in parallel over the shared connection pool.
//!
//! Each event runs in its own transaction. Transient failures are retried
//! with backoff; anything else (or running out of retries) sends the event
//! to the dead-letter log and the worker moves on. Events the source could
//! not decode go straight to the dead-letter log. Only a failure of the feed
//! itself stops the loop.
//!
//! The loop runs until the cancellation token fires or the feed closes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use checkpoint::SyncPhase;
use sync_core::{ChangeFeed, ReplicationSink};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dead_letter::DeadLetterLog;
use crate::resume::{ResumeCheckpoint, ResumePoints};
use crate::retry::RetryConfig;

mod handler;
mod partition;
mod tracker;

pub use handler::EventState;
pub use partition::partition_for;
pub use tracker::CommitTracker;

use handler::{handle_event, Envelope, EventContext};

#[derive(Debug, Clone)]
pub struct LiveSyncConfig {
    /// Number of partitions, each drained by one worker.
    pub workers: usize,
    /// Events buffered per partition before the reader waits.
    pub queue_depth: usize,
    /// Completed events between live sync checkpoints.
    pub checkpoint_interval: u64,
    pub retry: RetryConfig,
}

impl Default for LiveSyncConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            queue_depth: 1024,
            checkpoint_interval: 100,
            retry: RetryConfig::event(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveSyncSummary {
    pub received: u64,
    pub committed: u64,
    pub dead_lettered: u64,
    /// Events received but not finished when shutdown was requested.
    pub abandoned: u64,
    pub checkpoints_saved: u64,
}

struct Shared<K, C> {
    sink: Arc<K>,
    resume: Arc<ResumePoints<C>>,
    dead_letters: Arc<DeadLetterLog>,
    config: LiveSyncConfig,
    cancel: CancellationToken,
    tracker: Mutex<CommitTracker>,
    /// Serializes checkpoint writes; holds the last token saved.
    last_saved: tokio::sync::Mutex<Option<Vec<u8>>>,
    committed: AtomicU64,
    dead_lettered: AtomicU64,
    checkpoints_saved: AtomicU64,
}

impl<K, C> Shared<K, C>
where
    K: ReplicationSink + 'static,
    C: ResumeCheckpoint,
{
    fn tracker(&self) -> MutexGuard<'_, CommitTracker> {
        self.tracker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn complete(&self, sequence: u64, state: EventState) {
        match state {
            EventState::Committed => self.committed.fetch_add(1, Ordering::SeqCst),
            _ => self.dead_lettered.fetch_add(1, Ordering::SeqCst),
        };

        let due = {
            let mut tracker = self.tracker();
            tracker.complete(sequence);
            tracker.checkpoint_due(self.config.checkpoint_interval)
        };
        if due {
            self.save_checkpoint().await;
        }
    }

    /// Persist the token at the current watermark unless it was already saved.
    async fn save_checkpoint(&self) {
        let mut last_saved = self.last_saved.lock().await;
        let token = self.tracker().token().map(<[u8]>::to_vec);
        let Some(token) = token else { return };
        if last_saved.as_ref() == Some(&token) {
            return;
        }

        match self.resume.save(SyncPhase::LiveSync, &token).await {
            Ok(()) => {
                *last_saved = Some(token);
                self.checkpoints_saved.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => warn!("Failed to save live sync checkpoint: {:#}", e),
        }
    }
}

async fn worker<K, C>(partition: usize, mut queue: mpsc::Receiver<Envelope>, shared: Arc<Shared<K, C>>)
where
    K: ReplicationSink + 'static,
    C: ResumeCheckpoint,
{
    let ctx = EventContext {
        sink: shared.sink.as_ref(),
        retry: &shared.config.retry,
        cancel: &shared.cancel,
        dead_letters: shared.dead_letters.as_ref(),
    };

    loop {
        let envelope = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            next = queue.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };

        match handle_event(&ctx, partition, &envelope).await {
            Some(state) => shared.complete(envelope.sequence, state).await,
            None => break,
        }
    }
    debug!("Partition {} worker stopped", partition);
}

/// Tail `feed` until cancelled or closed, applying every event to `sink`.
///
/// A feed error stops the loop after in-flight work drains and the final
/// checkpoint is written, then surfaces to the caller: continuing past it
/// would silently drop whatever the feed failed to deliver.
pub async fn run_live_sync<F, K, C>(
    mut feed: F,
    sink: Arc<K>,
    resume: Arc<ResumePoints<C>>,
    dead_letters: Arc<DeadLetterLog>,
    config: LiveSyncConfig,
    cancel: CancellationToken,
) -> anyhow::Result<LiveSyncSummary>
where
    F: ChangeFeed,
    K: ReplicationSink + 'static,
    C: ResumeCheckpoint,
{
    let workers = config.workers.max(1);
    let queue_depth = config.queue_depth.max(1);
    info!(
        "Starting live sync with {} partitions (queue depth {})",
        workers, queue_depth
    );

    let shared = Arc::new(Shared {
        sink,
        resume,
        dead_letters,
        config,
        cancel: cancel.clone(),
        tracker: Mutex::new(CommitTracker::new()),
        last_saved: tokio::sync::Mutex::new(None),
        committed: AtomicU64::new(0),
        dead_lettered: AtomicU64::new(0),
        checkpoints_saved: AtomicU64::new(0),
    });

    let mut queues = Vec::with_capacity(workers);
    let mut handles = Vec::with_capacity(workers);
    for partition in 0..workers {
        let (tx, rx) = mpsc::channel(queue_depth);
        queues.push(tx);
        handles.push(tokio::spawn(worker(partition, rx, shared.clone())));
    }

    let mut received: u64 = 0;
    let mut feed_error = None;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Shutdown requested, stopping change feed reader");
                break;
            }
            next = feed.next_event() => next,
        };

        let source_event = match next {
            Some(Ok(source_event)) => source_event,
            Some(Err(e)) => {
                error!("Change feed failed: {}", e);
                feed_error = Some(e);
                break;
            }
            None => {
                info!("Change feed closed");
                break;
            }
        };

        let sequence = received;
        received += 1;
        let partition = partition_for(source_event.event.conversation_id(), workers);
        shared
            .tracker()
            .register(sequence, source_event.resume_token.clone());
        debug!(
            "Event #{} ({} {}) received, queued on partition {}",
            sequence,
            source_event.event.kind(),
            source_event.event.conversation_id(),
            partition
        );

        let envelope = Envelope {
            sequence,
            event: source_event,
        };
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = queues[partition].send(envelope) => sent,
        };
        if sent.is_err() {
            error!("Partition {} worker is gone, stopping live sync", partition);
            break;
        }
    }

    // Closing the queues lets workers drain what is already buffered
    drop(queues);
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Live sync worker failed: {}", e);
        }
    }
    shared.save_checkpoint().await;

    let committed = shared.committed.load(Ordering::SeqCst);
    let dead_lettered = shared.dead_lettered.load(Ordering::SeqCst);
    let summary = LiveSyncSummary {
        received,
        committed,
        dead_lettered,
        abandoned: received.saturating_sub(committed + dead_lettered),
        checkpoints_saved: shared.checkpoints_saved.load(Ordering::SeqCst),
    };
    info!(
        "Live sync stopped: {} events received, {} committed, {} dead-lettered, {} abandoned",
        summary.received, summary.committed, summary.dead_lettered, summary.abandoned
    );

    if let Some(e) = feed_error {
        return Err(e).context("Change feed failed during live sync");
    }
    Ok(summary)
}
