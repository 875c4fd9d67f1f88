//! Dead-letter log for change events that could not be applied.
//!
//! One JSON object per line, appended and flushed per record so the file
//! stays readable after a crash.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// A change event that was skipped after its write failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// Position of the event in the live feed since the process started.
    pub sequence: u64,
    pub conversation_id: String,
    /// `insert`, `update` or `delete`.
    pub kind: String,
    pub error: String,
    pub attempts: usize,
    /// Base64 of the source resume token, for replaying by hand.
    pub resume_token: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn new(
        sequence: u64,
        conversation_id: &str,
        kind: &str,
        error: &str,
        attempts: usize,
        resume_token: Option<&[u8]>,
    ) -> Self {
        Self {
            sequence,
            conversation_id: conversation_id.to_string(),
            kind: kind.to_string(),
            error: error.to_string(),
            attempts,
            resume_token: resume_token.map(|t| general_purpose::STANDARD.encode(t)),
            recorded_at: Utc::now(),
        }
    }
}

/// Append-only sink for [`DeadLetterRecord`]s.
pub struct DeadLetterLog {
    path: Option<PathBuf>,
    file: Mutex<Option<tokio::fs::File>>,
    recorded: AtomicU64,
}

impl DeadLetterLog {
    /// Open (or create) the log file in append mode.
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {parent:?}"))?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open dead-letter log {path:?}"))?;

        Ok(Self {
            path: Some(path),
            file: Mutex::new(Some(file)),
            recorded: AtomicU64::new(0),
        })
    }

    /// A log that only counts records and reports them through tracing.
    pub fn disabled() -> Self {
        Self {
            path: None,
            file: Mutex::new(None),
            recorded: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Records appended since the log was opened.
    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::SeqCst)
    }

    pub async fn append(&self, record: &DeadLetterRecord) -> anyhow::Result<()> {
        self.recorded.fetch_add(1, Ordering::SeqCst);
        tracing::warn!(
            "Dead-lettered {} event #{} for conversation {}: {}",
            record.kind,
            record.sequence,
            record.conversation_id,
            record.error
        );

        let mut guard = self.file.lock().await;
        if let Some(file) = guard.as_mut() {
            let mut line = serde_json::to_vec(record)?;
            line.push(b'\n');
            file.write_all(&line)
                .await
                .context("Failed to write dead-letter record")?;
            file.flush().await?;
        }
        Ok(())
    }
}

/// Read every record from a dead-letter file.
pub fn read_dead_letters(path: impl AsRef<Path>) -> anyhow::Result<Vec<DeadLetterRecord>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dead-letter log {path:?}"))?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).context("Malformed dead-letter record"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_records_are_appended_as_json_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("dead.jsonl");
        let log = DeadLetterLog::open(&path).await.unwrap();

        log.append(&DeadLetterRecord::new(3, "c1", "update", "boom", 4, Some(&[1u8, 2, 3][..])))
            .await
            .unwrap();
        log.append(&DeadLetterRecord::new(9, "c2", "delete", "bang", 1, None))
            .await
            .unwrap();

        let records = read_dead_letters(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].conversation_id, "c1");
        assert_eq!(records[0].resume_token.as_deref(), Some("AQID"));
        assert_eq!(records[1].sequence, 9);
        assert!(records[1].resume_token.is_none());
        assert_eq!(log.recorded(), 2);
    }

    #[tokio::test]
    async fn test_reopening_appends() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("dead.jsonl");

        for sequence in 0..2 {
            let log = DeadLetterLog::open(&path).await.unwrap();
            log.append(&DeadLetterRecord::new(sequence, "c", "insert", "e", 1, None))
                .await
                .unwrap();
        }

        assert_eq!(read_dead_letters(&path).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_log_counts_only() {
        let log = DeadLetterLog::disabled();
        log.append(&DeadLetterRecord::new(0, "c", "insert", "e", 1, None))
            .await
            .unwrap();
        assert_eq!(log.recorded(), 1);
        assert!(log.path().is_none());
    }
}
