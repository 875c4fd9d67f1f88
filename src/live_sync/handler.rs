//! Per-event state machine.
//!
//! ```text
//! received -> transforming -> writing -> committed
//!                  |             |
//!                  |             +-----> failed-and-skipped
//!                  +-> committed (nothing to write)
//!                  +-> failed-and-skipped (undecodable)
//! ```

use std::fmt;

use sync_core::{
    transform_document, transform_update, ChangeEvent, ConversationUpdate, ReplicationSink,
    RowSet, SourceEvent, SyncError, SyncResult,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::dead_letter::{DeadLetterLog, DeadLetterRecord};
use crate::retry::{retry_transient, RetryConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Received,
    Transforming,
    Writing,
    Committed,
    FailedAndSkipped,
}

impl EventState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventState::Received => "received",
            EventState::Transforming => "transforming",
            EventState::Writing => "writing",
            EventState::Committed => "committed",
            EventState::FailedAndSkipped => "failed-and-skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EventState::Committed | EventState::FailedAndSkipped)
    }

    pub fn can_advance_to(&self, next: EventState) -> bool {
        use EventState::*;
        matches!(
            (self, next),
            (Received, Transforming)
                | (Transforming, Writing)
                | (Transforming, Committed)
                | (Transforming, FailedAndSkipped)
                | (Writing, Committed)
                | (Writing, FailedAndSkipped)
        )
    }
}

impl fmt::Display for EventState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event queued on a partition.
#[derive(Debug, Clone)]
pub(crate) struct Envelope {
    pub sequence: u64,
    pub event: SourceEvent,
}

/// The write an event turns into.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PlannedWrite {
    Rows(RowSet),
    Update(ConversationUpdate),
    Delete,
    Nothing,
    /// The event cannot be applied at all.
    Reject(String),
}

/// Transform one change event into the write that applies it.
pub(crate) fn plan_write(event: &ChangeEvent) -> PlannedWrite {
    match event {
        ChangeEvent::Insert { document, .. } => match transform_document(document) {
            Some(rows) => PlannedWrite::Rows(rows),
            None => PlannedWrite::Nothing,
        },
        ChangeEvent::Update {
            conversation_id,
            changed,
            document,
        } => {
            if changed.messages && document.is_none() {
                warn!(
                    "Messages of conversation {} changed but no current document was returned; skipping message reconciliation",
                    conversation_id
                );
            }
            let update = transform_update(conversation_id, changed, document.as_ref());
            if update.is_noop() {
                PlannedWrite::Nothing
            } else {
                PlannedWrite::Update(update)
            }
        }
        ChangeEvent::Delete { .. } => PlannedWrite::Delete,
        ChangeEvent::Undecodable { reason, .. } => PlannedWrite::Reject(reason.clone()),
    }
}

async fn apply<K: ReplicationSink>(
    sink: &K,
    conversation_id: &str,
    write: &PlannedWrite,
) -> SyncResult<()> {
    match write {
        PlannedWrite::Rows(rows) => sink.apply_row_set(rows).await,
        PlannedWrite::Update(update) => sink.apply_update(update).await,
        PlannedWrite::Delete => sink.delete_conversation(conversation_id).await,
        PlannedWrite::Nothing | PlannedWrite::Reject(_) => Ok(()),
    }
}

/// Collaborators shared by every worker.
pub(crate) struct EventContext<'a, K> {
    pub sink: &'a K,
    pub retry: &'a RetryConfig,
    pub cancel: &'a CancellationToken,
    pub dead_letters: &'a DeadLetterLog,
}

struct Trace<'a> {
    sequence: u64,
    partition: usize,
    conversation_id: &'a str,
    kind: &'static str,
    state: EventState,
}

impl Trace<'_> {
    fn advance(&mut self, next: EventState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        debug!(
            "Event #{} ({} {}) on partition {}: {} -> {}",
            self.sequence, self.kind, self.conversation_id, self.partition, self.state, next
        );
        self.state = next;
    }
}

async fn dead_letter<K>(
    ctx: &EventContext<'_, K>,
    envelope: &Envelope,
    kind: &str,
    e: &SyncError,
    attempts: usize,
) {
    let record = DeadLetterRecord::new(
        envelope.sequence,
        envelope.event.event.conversation_id(),
        kind,
        &e.to_string(),
        attempts,
        envelope.event.resume_token.as_deref(),
    );
    if let Err(log_error) = ctx.dead_letters.append(&record).await {
        error!(
            "Failed to record dead letter for event #{}: {:#}",
            envelope.sequence, log_error
        );
    }
}

/// Drive one event to a terminal state.
///
/// Returns `None` when shutdown interrupted the event; its transaction was
/// dropped and rolled back, and it must not count as complete.
pub(crate) async fn handle_event<K: ReplicationSink>(
    ctx: &EventContext<'_, K>,
    partition: usize,
    envelope: &Envelope,
) -> Option<EventState> {
    let event = &envelope.event.event;
    let conversation_id = event.conversation_id();
    let mut trace = Trace {
        sequence: envelope.sequence,
        partition,
        conversation_id,
        kind: event.kind().as_str(),
        state: EventState::Received,
    };

    trace.advance(EventState::Transforming);
    let write = plan_write(event);
    match &write {
        PlannedWrite::Nothing => {
            trace.advance(EventState::Committed);
            return Some(trace.state);
        }
        PlannedWrite::Reject(reason) => {
            let e = SyncError::Decode(reason.clone()).into_event_error(conversation_id);
            trace.advance(EventState::FailedAndSkipped);
            warn!("Skipping event #{}: {}", envelope.sequence, e);
            dead_letter(ctx, envelope, trace.kind, &e, 0).await;
            return Some(trace.state);
        }
        _ => {}
    }

    trace.advance(EventState::Writing);
    let attempted = tokio::select! {
        _ = ctx.cancel.cancelled() => None,
        attempted = retry_transient("apply change event", ctx.retry, ctx.cancel, || {
            apply(ctx.sink, conversation_id, &write)
        }) => Some(attempted),
    };
    let attempted = attempted?;

    match attempted.result {
        Ok(()) => {
            trace.advance(EventState::Committed);
        }
        Err(SyncError::Cancelled) => return None,
        Err(e) => {
            let e = e.into_event_error(conversation_id);
            trace.advance(EventState::FailedAndSkipped);
            warn!(
                "Skipping event #{} after {} attempt(s): {}",
                envelope.sequence, attempted.attempts, e
            );
            dead_letter(ctx, envelope, trace.kind, &e, attempted.attempts).await;
        }
    }
    Some(trace.state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sync_core::{ChangeKind, ChangedFields, ConversationDocument, MessageDocument};

    fn document(id: &str) -> ConversationDocument {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        ConversationDocument {
            id: Some(id.to_string()),
            participants: vec!["a".into(), "b".into()],
            messages: vec![MessageDocument {
                sender_id: "a".into(),
                content: "hi".into(),
                timestamp: at,
                read: false,
            }],
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn test_state_transitions() {
        use EventState::*;
        assert!(Received.can_advance_to(Transforming));
        assert!(Writing.can_advance_to(FailedAndSkipped));
        assert!(!Received.can_advance_to(Committed));
        assert!(Transforming.can_advance_to(FailedAndSkipped));
        assert!(!Committed.can_advance_to(Writing));
        assert!(Committed.is_terminal() && FailedAndSkipped.is_terminal());
        assert!(!Writing.is_terminal());
        assert_eq!(FailedAndSkipped.to_string(), "failed-and-skipped");
    }

    #[test]
    fn test_insert_plans_row_set() {
        let event = ChangeEvent::Insert {
            conversation_id: "c1".into(),
            document: document("c1"),
        };
        match plan_write(&event) {
            PlannedWrite::Rows(rows) => {
                assert_eq!(rows.conversations.len(), 1);
                assert_eq!(rows.messages.len(), 1);
            }
            other => panic!("unexpected plan {other:?}"),
        }
    }

    #[test]
    fn test_update_without_changes_plans_nothing() {
        let event = ChangeEvent::Update {
            conversation_id: "c1".into(),
            changed: ChangedFields::default(),
            document: Some(document("c1")),
        };
        assert_eq!(plan_write(&event), PlannedWrite::Nothing);
    }

    #[test]
    fn test_message_change_without_document_plans_nothing() {
        let event = ChangeEvent::Update {
            conversation_id: "c1".into(),
            changed: ChangedFields {
                messages: true,
                ..ChangedFields::default()
            },
            document: None,
        };
        assert_eq!(plan_write(&event), PlannedWrite::Nothing);
    }

    #[test]
    fn test_delete_plans_delete() {
        let event = ChangeEvent::Delete {
            conversation_id: "c1".into(),
        };
        assert_eq!(plan_write(&event), PlannedWrite::Delete);
    }

    #[test]
    fn test_undecodable_event_plans_rejection() {
        let event = ChangeEvent::Undecodable {
            conversation_id: "c1".into(),
            kind: ChangeKind::Update,
            reason: "Message from a is missing timestamp".into(),
        };
        assert_eq!(
            plan_write(&event),
            PlannedWrite::Reject("Message from a is missing timestamp".into())
        );
    }
}
