//! Live sync behaviour: ordering, retries, dead letters and resume.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chat_sync::dead_letter::read_dead_letters;
use chat_sync::testing::{position_token, AppliedWrite, MemorySink};
use chat_sync::{
    run_live_sync, run_replication, run_snapshot, DeadLetterLog, LiveSyncConfig, ResumePoints,
    RetryConfig, SnapshotConfig,
};
use checkpoint::SyncPhase;
use chat_sync_mongodb_source::MongoDBCheckpoint;
use common::*;
use sync_core::{ChangeEvent, ChangedFields, ConversationSource, SyncError};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn live_config() -> LiveSyncConfig {
    LiveSyncConfig {
        workers: 4,
        queue_depth: 4,
        checkpoint_interval: 1,
        retry: RetryConfig::fast(),
    }
}

async fn run_live(harness: &Harness) -> chat_sync::LiveSyncSummary {
    harness.source.close_feed();
    let feed = harness.source.open_change_feed(None).await.unwrap();
    run_live_sync(
        feed,
        harness.sink.clone(),
        harness.resume.clone(),
        harness.dead_letters.clone(),
        live_config(),
        CancellationToken::new(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_events_for_one_conversation_apply_in_feed_order() {
    init_tracing();
    let sink = MemorySink::new().with_write_delay(Duration::from_millis(2));
    let harness = Harness::with_sink(vec![], sink);

    let ids: Vec<String> = (0..6).map(|i| format!("c{i}")).collect();
    for id in &ids {
        harness.source.push_event(insert(seeded_conversation(id)));
    }
    for id in &ids {
        let mut edited = seeded_conversation(id);
        edited.messages.truncate(2);
        harness.source.push_event(replace_messages(edited));
    }
    for id in &ids {
        let mut edited = seeded_conversation(id);
        edited.messages.truncate(1);
        harness.source.push_event(replace_messages(edited));
    }

    let summary = run_live(&harness).await;
    assert_eq!(summary.received, 18);
    assert_eq!(summary.committed, 18);
    assert_eq!(summary.abandoned, 0);

    let writes = harness.sink.writes();
    let tables = harness.sink.tables();
    for id in &ids {
        let per_conversation: Vec<_> = writes.iter().filter(|w| w.touches(id)).collect();
        assert_eq!(per_conversation.len(), 3);
        assert!(matches!(per_conversation[0], AppliedWrite::RowSet { .. }));
        assert!(matches!(per_conversation[1], AppliedWrite::Update { .. }));
        assert!(matches!(per_conversation[2], AppliedWrite::Update { .. }));
        assert_eq!(tables.messages_of(id).len(), 1);
    }
}

#[tokio::test]
async fn test_delete_after_insert_is_never_reordered() {
    init_tracing();
    let sink = MemorySink::new().with_write_delay(Duration::from_millis(1));
    let harness = Harness::with_sink(vec![], sink);
    for round in 0..3 {
        let id = format!("c{round}");
        harness.source.push_event(insert(seeded_conversation(&id)));
        harness.source.push_event(delete(&id));
    }

    run_live(&harness).await;

    let tables = harness.sink.tables();
    assert!(tables.conversations.is_empty());
    assert!(tables.messages.is_empty());
    assert_eq!(tables.users.len(), 2);
}

async fn seed(harness: &Harness) {
    run_snapshot(
        &harness.source,
        harness.sink.as_ref(),
        &SnapshotConfig::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_timestamp_update_leaves_other_fields_alone() {
    init_tracing();
    let harness = Harness::new(vec![seeded_conversation("c1")]);
    seed(&harness).await;
    let before = harness.sink.tables();

    let mut touched = seeded_conversation("c1");
    touched.updated_at = at(50);
    harness.source.push_event(ChangeEvent::Update {
        conversation_id: "c1".to_string(),
        changed: ChangedFields {
            updated_at: Some(at(50)),
            ..ChangedFields::default()
        },
        document: Some(touched),
    });
    let summary = run_live(&harness).await;
    assert_eq!(summary.committed, 1);

    let after = harness.sink.tables();
    let row = &after.conversations["c1"];
    assert_eq!(row.updated_at, at(50));
    assert_eq!(row.created_at, before.conversations["c1"].created_at);
    assert_eq!(after.messages, before.messages);
    assert_eq!(after.users, before.users);
}

#[tokio::test]
async fn test_participant_change_adds_users_without_touching_messages() {
    init_tracing();
    let harness = Harness::new(vec![seeded_conversation("c1")]);
    seed(&harness).await;
    let before = harness.sink.tables();

    let mut joined = seeded_conversation("c1");
    joined.participants.push("carol".to_string());
    harness.source.push_event(ChangeEvent::Update {
        conversation_id: "c1".to_string(),
        changed: ChangedFields {
            participants: Some(joined.participants.clone()),
            ..ChangedFields::default()
        },
        document: Some(joined),
    });
    run_live(&harness).await;

    let after = harness.sink.tables();
    assert!(after.users.contains("carol"));
    assert_eq!(after.users.len(), 3);
    assert_eq!(after.messages, before.messages);
    assert_eq!(after.conversations, before.conversations);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    init_tracing();
    let harness = Harness::new(vec![]);
    harness.sink.fail_conversation("c1", 2, true);
    harness.source.push_event(insert(seeded_conversation("c1")));

    let summary = run_live(&harness).await;

    assert_eq!(summary.committed, 1);
    assert_eq!(summary.dead_lettered, 0);
    assert_eq!(harness.sink.calls(), 3);
    assert_eq!(harness.sink.tables().messages.len(), 3);
}

#[tokio::test]
async fn test_failed_event_is_dead_lettered_and_sync_continues() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("dead-letter.jsonl");
    let mut harness = Harness::new(vec![]);
    harness.dead_letters = Arc::new(DeadLetterLog::open(&path).await.unwrap());

    harness.sink.fail_conversation("bad", 1, false);
    harness.source.push_event(insert(seeded_conversation("bad")));
    harness.source.push_event(insert(seeded_conversation("good")));
    harness.source.push_event(delete("bad"));

    let summary = run_live(&harness).await;

    assert_eq!(summary.received, 3);
    assert_eq!(summary.committed, 2);
    assert_eq!(summary.dead_lettered, 1);
    assert!(harness.sink.tables().conversations.contains_key("good"));

    let records = read_dead_letters(&path).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].conversation_id, "bad");
    assert_eq!(records[0].kind, "insert");
    assert_eq!(records[0].attempts, 1);
    assert!(records[0].resume_token.is_some());
    assert_eq!(harness.dead_letters.recorded(), 1);
}

#[tokio::test]
async fn test_undecodable_event_is_dead_lettered_and_feed_continues() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("dead-letter.jsonl");
    let mut harness = Harness::new(vec![]);
    harness.dead_letters = Arc::new(DeadLetterLog::open(&path).await.unwrap());
    harness.resume = Arc::new(ResumePoints::<MongoDBCheckpoint>::filesystem(tmp.path()));

    harness.source.push_event(undecodable_update(
        "c1",
        "Message from alice is missing timestamp",
    ));
    harness.source.push_event(insert(seeded_conversation("c2")));

    let summary = run_live(&harness).await;

    assert_eq!(summary.received, 2);
    assert_eq!(summary.committed, 1);
    assert_eq!(summary.dead_lettered, 1);
    assert_eq!(harness.sink.calls(), 1);
    assert!(harness.sink.tables().conversations.contains_key("c2"));

    let records = read_dead_letters(&path).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].conversation_id, "c1");
    assert_eq!(records[0].kind, "update");
    assert_eq!(records[0].attempts, 0);
    assert!(records[0].error.contains("missing timestamp"));
    assert_eq!(
        harness.resume.load(SyncPhase::LiveSync).await.unwrap(),
        Some(position_token(2))
    );
}

#[tokio::test]
async fn test_retries_run_out_on_persistent_transient_failure() {
    init_tracing();
    let harness = Harness::new(vec![]);
    harness.sink.fail_conversation("c1", usize::MAX, true);
    harness.source.push_event(insert(seeded_conversation("c1")));

    let summary = run_live(&harness).await;

    assert_eq!(summary.dead_lettered, 1);
    assert_eq!(harness.sink.calls(), 1 + RetryConfig::fast().max_retries);
}

#[tokio::test]
async fn test_restart_resumes_after_last_checkpoint() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let mut harness = Harness::new(vec![seeded_conversation("c0")]);
    harness.resume = Arc::new(ResumePoints::<MongoDBCheckpoint>::filesystem(tmp.path()));

    harness.source.push_event(insert(seeded_conversation("c1")));
    harness.source.push_event(insert(seeded_conversation("c2")));
    harness.source.push_event(delete("c0"));
    harness.source.close_feed();

    let config = fast_config();
    let first = run_replication(
        &harness.source,
        harness.sink.clone(),
        harness.resume.clone(),
        harness.dead_letters.clone(),
        &config,
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert!(first.snapshot.is_some());
    assert_eq!(first.live.unwrap().committed, 3);
    assert_eq!(
        harness.resume.load(SyncPhase::FullSyncStart).await.unwrap(),
        Some(position_token(0))
    );
    assert_eq!(
        harness.resume.load(SyncPhase::LiveSync).await.unwrap(),
        Some(position_token(3))
    );

    harness.source.push_event(insert(seeded_conversation("c3")));
    let mut resumed_config = config.clone();
    resumed_config.resume = true;
    let second = run_replication(
        &harness.source,
        harness.sink.clone(),
        harness.resume.clone(),
        harness.dead_letters.clone(),
        &resumed_config,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(second.snapshot.is_none());
    assert_eq!(second.live.unwrap().received, 1);
    assert_eq!(
        harness.source.feed_openings().last().cloned().flatten(),
        Some(position_token(3))
    );
    let tables = harness.sink.tables();
    assert_eq!(
        tables.conversations.keys().cloned().collect::<Vec<_>>(),
        vec!["c1", "c2", "c3"]
    );
}

#[tokio::test]
async fn test_resume_without_checkpoint_is_a_setup_error() {
    init_tracing();
    let harness = Harness::new(vec![]);
    let mut config = fast_config();
    config.resume = true;

    let err = run_replication(
        &harness.source,
        harness.sink.clone(),
        harness.resume.clone(),
        harness.dead_letters.clone(),
        &config,
        CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<SyncError>(),
        Some(SyncError::Setup(_))
    ));
}

#[tokio::test]
async fn test_feed_failure_stops_after_checkpointing_committed_work() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let mut harness = Harness::new(vec![]);
    harness.resume = Arc::new(ResumePoints::<MongoDBCheckpoint>::filesystem(tmp.path()));
    harness.source.push_event(insert(seeded_conversation("c1")));
    harness.source.push_failure("cursor killed");

    let feed = harness.source.open_change_feed(None).await.unwrap();
    let err = run_live_sync(
        feed,
        harness.sink.clone(),
        harness.resume.clone(),
        harness.dead_letters.clone(),
        live_config(),
        CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(format!("{err:#}").contains("cursor killed"));
    assert_eq!(harness.sink.tables().conversations.len(), 1);
    assert_eq!(
        harness.resume.load(SyncPhase::LiveSync).await.unwrap(),
        Some(position_token(1))
    );
}

#[tokio::test]
async fn test_cancellation_stops_an_idle_feed() {
    init_tracing();
    let harness = Harness::new(vec![]);
    harness.source.push_event(insert(seeded_conversation("c1")));
    let feed = harness.source.open_change_feed(None).await.unwrap();
    let cancel = CancellationToken::new();

    let task = tokio::spawn(run_live_sync(
        feed,
        harness.sink.clone(),
        harness.resume.clone(),
        harness.dead_letters.clone(),
        live_config(),
        cancel.clone(),
    ));

    for _ in 0..200 {
        if !harness.sink.writes().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cancel.cancel();

    let summary = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(summary.received, 1);
    assert_eq!(summary.committed, 1);
}
