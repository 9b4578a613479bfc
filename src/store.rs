use std::collections::hash_map;
use std::collections::HashMap;

use crate::message::Message;

/// In-memory state owned by exactly one engine task, so no locking.
///
/// Maps each key to the message that committed it; `sequence` is the
/// commit order. On the leader it is authoritative and equals the
/// highest sequence in the map; on a follower it tracks the highest
/// update applied so far.
#[derive(Debug, Default)]
pub struct Store {
    entries: HashMap<String, Message>,
    sequence: u64,
}

impl Store {
    pub fn new() -> Store {
        Store::default()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Message> {
        self.entries.get(key)
    }

    /// Claims the next commit sequence: incremented by one per accepted
    /// write, never reused, never skipped.
    pub fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// Records a committed message under its key.
    pub fn insert(&mut self, message: Message) {
        self.entries.insert(message.key.clone(), message);
    }

    /// Applies a published update iff it advances the sequence. Stale and
    /// duplicate publications are discarded silently.
    pub fn apply_update(&mut self, message: Message) -> bool {
        if message.sequence <= self.sequence {
            return false;
        }
        self.sequence = message.sequence;
        self.insert(message);
        true
    }

    /// Restores one snapshot entry without touching the sequence counter;
    /// the counter is adopted from the terminating message instead.
    pub fn restore(&mut self, message: Message) {
        self.insert(message);
    }

    pub fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    /// Iteration order is unspecified; consumers must not depend on it.
    pub fn iter(&self) -> hash_map::Values<'_, String, Message> {
        self.entries.values()
    }
}
