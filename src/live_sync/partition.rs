//! Conversation id to partition mapping.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Stable partition for a conversation id.
///
/// `DefaultHasher::new()` uses fixed keys, so the mapping is the same for
/// every event in the run. Only per-run stability matters: queues are
/// rebuilt on restart.
pub fn partition_for(conversation_id: &str, partitions: usize) -> usize {
    let partitions = partitions.max(1);
    let mut hasher = DefaultHasher::new();
    conversation_id.hash(&mut hasher);
    (hasher.finish() % partitions as u64) as usize
}
