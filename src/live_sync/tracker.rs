//! Low-watermark over completed change events.
//!
//! Events are numbered in feed order and may complete out of order across
//! partitions. The watermark only moves past an event once it and every
//! earlier event are committed or dead-lettered, so the resume token at the
//! watermark never skips unfinished work.

use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default)]
pub struct CommitTracker {
    /// Every sequence below this is complete.
    watermark: u64,
    completed: BTreeSet<u64>,
    tokens: HashMap<u64, Vec<u8>>,
    token: Option<Vec<u8>>,
    since_checkpoint: u64,
}

impl CommitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event before it is queued.
    pub fn register(&mut self, sequence: u64, resume_token: Option<Vec<u8>>) {
        if let Some(token) = resume_token {
            self.tokens.insert(sequence, token);
        }
    }

    /// Mark an event finished; returns how far the watermark moved.
    pub fn complete(&mut self, sequence: u64) -> u64 {
        if sequence < self.watermark {
            return 0;
        }
        self.completed.insert(sequence);

        let mut advanced = 0;
        while self.completed.remove(&self.watermark) {
            if let Some(token) = self.tokens.remove(&self.watermark) {
                self.token = Some(token);
            }
            self.watermark += 1;
            advanced += 1;
        }
        self.since_checkpoint += advanced;
        advanced
    }

    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    /// Resume token of the newest event at or below the watermark.
    pub fn token(&self) -> Option<&[u8]> {
        self.token.as_deref()
    }

    /// Whether `interval` events have completed since the last call that returned true.
    pub fn checkpoint_due(&mut self, interval: u64) -> bool {
        if self.since_checkpoint >= interval.max(1) {
            self.since_checkpoint = 0;
            true
        } else {
            false
        }
    }

    /// Completed events still waiting on an earlier one.
    pub fn pending(&self) -> usize {
        self.completed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(n: u8) -> Option<Vec<u8>> {
        Some(vec![n])
    }

    #[test]
    fn test_in_order_completion_advances() {
        let mut tracker = CommitTracker::new();
        for seq in 0..3 {
            tracker.register(seq, token(seq as u8));
        }
        assert_eq!(tracker.complete(0), 1);
        assert_eq!(tracker.token(), Some(&[0u8][..]));
        assert_eq!(tracker.complete(1), 1);
        assert_eq!(tracker.complete(2), 1);
        assert_eq!(tracker.watermark(), 3);
        assert_eq!(tracker.token(), Some(&[2u8][..]));
    }

    #[test]
    fn test_gap_holds_watermark() {
        let mut tracker = CommitTracker::new();
        for seq in 0..4 {
            tracker.register(seq, token(seq as u8));
        }
        assert_eq!(tracker.complete(2), 0);
        assert_eq!(tracker.complete(3), 0);
        assert_eq!(tracker.watermark(), 0);
        assert!(tracker.token().is_none());
        assert_eq!(tracker.pending(), 2);

        assert_eq!(tracker.complete(1), 0);
        assert_eq!(tracker.complete(0), 4);
        assert_eq!(tracker.token(), Some(&[3u8][..]));
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_events_without_token_keep_previous() {
        let mut tracker = CommitTracker::new();
        tracker.register(0, token(7));
        tracker.register(1, None);
        tracker.complete(0);
        tracker.complete(1);
        assert_eq!(tracker.watermark(), 2);
        assert_eq!(tracker.token(), Some(&[7u8][..]));
    }

    #[test]
    fn test_duplicate_completion_is_ignored() {
        let mut tracker = CommitTracker::new();
        tracker.register(0, token(0));
        assert_eq!(tracker.complete(0), 1);
        assert_eq!(tracker.complete(0), 0);
        assert_eq!(tracker.watermark(), 1);
    }

    #[test]
    fn test_checkpoint_due_every_interval() {
        let mut tracker = CommitTracker::new();
        for seq in 0..5 {
            tracker.register(seq, token(seq as u8));
        }
        tracker.complete(0);
        assert!(!tracker.checkpoint_due(2));
        tracker.complete(1);
        assert!(tracker.checkpoint_due(2));
        assert!(!tracker.checkpoint_due(2));
        tracker.complete(3);
        tracker.complete(2);
        assert!(tracker.checkpoint_due(2));
    }
}
