//! Generic sync manager for checkpoint operations.

use crate::{store::CheckpointStore, Checkpoint, CheckpointFile, CheckpointID, SyncPhase};

/// Manager for handling sync operations with checkpoint tracking.
///
/// # Example
///
/// ```rust,ignore
/// use checkpoint::{FilesystemStore, SyncManager, SyncPhase};
///
/// let manager = SyncManager::new(FilesystemStore::new("/tmp/checkpoints"));
///
/// // Save a checkpoint
/// let checkpoint = MongoDBCheckpoint { ... };
/// manager.emit_checkpoint(&checkpoint, SyncPhase::FullSyncStart).await?;
///
/// // Load a checkpoint
/// let loaded: Option<MongoDBCheckpoint> = manager.read_checkpoint(SyncPhase::FullSyncStart).await?;
/// ```
pub struct SyncManager<S: CheckpointStore> {
    store: S,
}

impl<S: CheckpointStore> SyncManager<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Persist a checkpoint for the given phase, replacing the previous one.
    pub async fn emit_checkpoint<C: Checkpoint>(
        &self,
        checkpoint: &C,
        phase: SyncPhase,
    ) -> anyhow::Result<()> {
        let id = CheckpointID {
            database_type: C::DATABASE_TYPE.to_string(),
            phase: phase.as_str().to_string(),
        };

        let checkpoint_data = serde_json::to_string(checkpoint)?;
        self.store.store_checkpoint(&id, checkpoint_data).await?;

        tracing::debug!(
            "Emitted {} checkpoint: {}",
            phase,
            checkpoint.to_cli_string()
        );

        Ok(())
    }

    /// Read the checkpoint for a phase, if one was ever emitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored checkpoint belongs to another source
    /// type or cannot be deserialized into `C`.
    pub async fn read_checkpoint<C: Checkpoint>(
        &self,
        phase: SyncPhase,
    ) -> anyhow::Result<Option<C>> {
        let id = CheckpointID {
            database_type: C::DATABASE_TYPE.to_string(),
            phase: phase.as_str().to_string(),
        };

        match self.store.read_checkpoint(&id).await? {
            Some(stored) => {
                let file = CheckpointFile::from_stored(stored)?;
                if file.phase != phase {
                    anyhow::bail!(
                        "Checkpoint phase mismatch: expected '{}', found '{}'",
                        phase,
                        file.phase
                    );
                }
                Ok(Some(file.parse::<C>()?))
            }
            None => Ok(None),
        }
    }
}
