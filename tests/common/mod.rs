//! Fixtures shared by the replication integration tests.

#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};

use chat_sync::testing::{MemorySink, MemorySource};
use chat_sync::{
    DeadLetterLog, LiveSyncConfig, ResumePoints, RetryConfig, RunConfig, SnapshotConfig,
};
use chat_sync_mongodb_source::MongoDBCheckpoint;
use chrono::{DateTime, TimeZone, Utc};
use sync_core::{ChangeEvent, ChangeKind, ChangedFields, ConversationDocument, MessageDocument};

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("chat_sync=debug")
        .try_init()
        .ok();
}

/// Log output written by a subscriber installed for the current thread.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// Lines logged at WARN that contain `needle`.
    pub fn warnings(&self, needle: &str) -> usize {
        self.contents()
            .lines()
            .filter(|line| line.contains("WARN") && line.contains(needle))
            .count()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Route this thread's logs into a buffer until the guard is dropped.
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter("chat_sync=info")
        .with_writer(logs.clone())
        .with_ansi(false)
        .finish();
    (logs, tracing::subscriber::set_default(subscriber))
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn message(sender: &str, content: &str, secs: i64) -> MessageDocument {
    MessageDocument {
        sender_id: sender.to_string(),
        content: content.to_string(),
        timestamp: at(secs),
        read: false,
    }
}

pub fn conversation(
    id: &str,
    participants: &[&str],
    messages: Vec<MessageDocument>,
) -> ConversationDocument {
    ConversationDocument {
        id: Some(id.to_string()),
        participants: participants.iter().map(|p| p.to_string()).collect(),
        messages,
        created_at: at(0),
        updated_at: at(0),
    }
}

/// One conversation between alice and bob with three messages.
pub fn seeded_conversation(id: &str) -> ConversationDocument {
    conversation(
        id,
        &["alice", "bob"],
        vec![
            message("alice", "hi bob", 1),
            message("bob", "hi alice", 2),
            message("alice", "how are you?", 3),
        ],
    )
}

pub fn insert(document: ConversationDocument) -> ChangeEvent {
    ChangeEvent::Insert {
        conversation_id: document.id.clone().unwrap_or_default(),
        document,
    }
}

pub fn replace_messages(document: ConversationDocument) -> ChangeEvent {
    ChangeEvent::Update {
        conversation_id: document.id.clone().unwrap_or_default(),
        changed: ChangedFields {
            messages: true,
            ..ChangedFields::default()
        },
        document: Some(document),
    }
}

pub fn delete(id: &str) -> ChangeEvent {
    ChangeEvent::Delete {
        conversation_id: id.to_string(),
    }
}

/// An update whose document the source failed to decode.
pub fn undecodable_update(id: &str, reason: &str) -> ChangeEvent {
    ChangeEvent::Undecodable {
        conversation_id: id.to_string(),
        kind: ChangeKind::Update,
        reason: reason.to_string(),
    }
}

pub fn fast_config() -> RunConfig {
    RunConfig {
        snapshot: SnapshotConfig {
            batch_size: 2,
            concurrency: 2,
            retry: RetryConfig::fast(),
        },
        live: LiveSyncConfig {
            workers: 4,
            queue_depth: 8,
            checkpoint_interval: 1,
            retry: RetryConfig::fast(),
        },
        resume: false,
    }
}

pub struct Harness {
    pub source: MemorySource,
    pub sink: Arc<MemorySink>,
    pub resume: Arc<ResumePoints<MongoDBCheckpoint>>,
    pub dead_letters: Arc<DeadLetterLog>,
}

impl Harness {
    pub fn new(documents: Vec<ConversationDocument>) -> Self {
        Self::with_sink(documents, MemorySink::new())
    }

    pub fn with_sink(documents: Vec<ConversationDocument>, sink: MemorySink) -> Self {
        Self {
            source: MemorySource::new(documents),
            sink: Arc::new(sink),
            resume: Arc::new(ResumePoints::disabled()),
            dead_letters: Arc::new(DeadLetterLog::disabled()),
        }
    }
}
