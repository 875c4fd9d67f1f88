//! Resume positions persisted through the checkpoint crate.
//!
//! Three phases are recorded: the change-feed position before the snapshot
//! starts, the position once it ends, and a periodically advanced position
//! while live sync runs. `--resume` prefers the live position and falls
//! back to the pre-snapshot one.

use std::marker::PhantomData;
use std::path::Path;

use checkpoint::{Checkpoint, CheckpointStore, FilesystemStore, NullStore, SyncManager, SyncPhase};
use chat_sync_mongodb_source::MongoDBCheckpoint;

/// A source checkpoint that wraps an opaque change-feed resume token.
pub trait ResumeCheckpoint: Checkpoint + Send + Sync + 'static {
    fn from_resume_token(token: Vec<u8>) -> Self;

    fn resume_token(&self) -> &[u8];
}

impl ResumeCheckpoint for MongoDBCheckpoint {
    fn from_resume_token(token: Vec<u8>) -> Self {
        MongoDBCheckpoint::new(token)
    }

    fn resume_token(&self) -> &[u8] {
        &self.resume_token
    }
}

/// Reads and writes resume tokens for checkpoint type `C`.
pub struct ResumePoints<C> {
    manager: SyncManager<Box<dyn CheckpointStore>>,
    enabled: bool,
    _checkpoint: PhantomData<fn() -> C>,
}

impl<C: ResumeCheckpoint> ResumePoints<C> {
    pub fn new(store: Box<dyn CheckpointStore>) -> Self {
        Self {
            manager: SyncManager::new(store),
            enabled: true,
            _checkpoint: PhantomData,
        }
    }

    /// One JSON file per phase under `dir`.
    pub fn filesystem(dir: impl AsRef<Path>) -> Self {
        Self::new(Box::new(FilesystemStore::new(dir.as_ref())))
    }

    /// Discards everything; `--resume` has nothing to load.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(Box::new(NullStore))
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn save(&self, phase: SyncPhase, token: &[u8]) -> anyhow::Result<()> {
        let checkpoint = C::from_resume_token(token.to_vec());
        self.manager.emit_checkpoint(&checkpoint, phase).await?;
        tracing::info!("Saved {} checkpoint", phase);
        Ok(())
    }

    pub async fn load(&self, phase: SyncPhase) -> anyhow::Result<Option<Vec<u8>>> {
        let checkpoint: Option<C> = self.manager.read_checkpoint(phase).await?;
        Ok(checkpoint.map(|c| c.resume_token().to_vec()))
    }

    /// The most recent position to resume from: live sync, else pre-snapshot.
    pub async fn latest(&self) -> anyhow::Result<Option<(SyncPhase, Vec<u8>)>> {
        for phase in [SyncPhase::LiveSync, SyncPhase::FullSyncStart] {
            if let Some(token) = self.load(phase).await? {
                return Ok(Some((phase, token)));
            }
        }
        Ok(None)
    }
}
