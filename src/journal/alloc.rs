//! Durable monotonic id allocator.
//!
//! Session and message ids come from one counter. Every step is committed as
//! an UPDATE_ID record *before* the value is handed out, so a replayed journal
//! always knows at least as much as any id a client ever saw. Gaps are fine:
//! the counter only promises monotonicity.

use super::{Journal, Record};

pub struct IdAllocator {
    value: i32,
}

impl IdAllocator {
    /// Seed from the last replayed UPDATE_ID, or 0 for a fresh journal.
    pub fn new(value: i32) -> Self {
        Self { value }
    }

    /// The last value handed out (or the replay seed).
    pub fn value(&self) -> i32 {
        self.value
    }

    /// Allocate the next id, journaling it first.
    ///
    /// When the journal is poisoned the allocation still succeeds (the
    /// server keeps serving from memory) but durability is gone until
    /// restart, so the failure is logged rather than returned.
    pub fn next(&mut self, journal: &mut Journal) -> i32 {
        self.value += 1;
        if let Err(e) = journal.commit(&Record::UpdateId { id: self.value }) {
            tracing::warn!(id = self.value, error = %e, "id allocation not journaled");
        }
        self.value
    }
}
