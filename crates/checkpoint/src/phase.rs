//! Sync phase enumeration for checkpoint tracking.

use serde::{Deserialize, Serialize};

/// Points in a replication run at which the source position is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncPhase {
    /// Checkpoint emitted before the snapshot begins (t1).
    ///
    /// Changes made during the snapshot are replayed from this position.
    FullSyncStart,

    /// Checkpoint emitted after the snapshot completes (t2).
    FullSyncEnd,

    /// Low-watermark of committed change events while tailing the feed.
    ///
    /// Overwritten as the watermark advances; a restart resumes from here.
    LiveSync,
}

impl SyncPhase {
    /// Get the string representation of this phase.
    ///
    /// Used for checkpoint file naming (e.g., `checkpoint_live_sync.json`)
    /// and log output.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::FullSyncStart => "full_sync_start",
            SyncPhase::FullSyncEnd => "full_sync_end",
            SyncPhase::LiveSync => "live_sync",
        }
    }

    /// Parse the string form produced by [`SyncPhase::as_str`].
    pub fn parse(phase: &str) -> anyhow::Result<Self> {
        match phase {
            "full_sync_start" => Ok(SyncPhase::FullSyncStart),
            "full_sync_end" => Ok(SyncPhase::FullSyncEnd),
            "live_sync" => Ok(SyncPhase::LiveSync),
            other => Err(anyhow::anyhow!("Unknown sync phase: {other}")),
        }
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
