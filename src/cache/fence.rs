//! Read-Through Fencing
//!
//! A disk read is queued behind earlier jobs, so by the time it finishes the
//! caller may already have stored, removed or cleared the same key. Each
//! queued read takes a [`FillTicket`] on the calling thread; writers bump the
//! key's generation (or the global epoch for clears), and a ticket whose
//! generation moved is not allowed to fill memory.
//!
//! Only keys with a read in flight are tracked.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct PendingRead {
    readers: usize,
    generation: u64,
}

#[derive(Debug, Default)]
struct FenceState {
    epoch: u64,
    pending: HashMap<String, PendingRead>,
}

/// Generation tracking for keys with a disk read in flight
#[derive(Debug, Default)]
pub(crate) struct FillFence {
    state: Mutex<FenceState>,
}

impl FillFence {
    /// Register a read of `key` that may later fill memory
    pub(crate) fn begin(self: &Arc<Self>, key: &str) -> FillTicket {
        let mut state = self.state.lock();
        let epoch = state.epoch;
        let entry = state.pending.entry(key.to_string()).or_default();
        entry.readers += 1;
        FillTicket {
            fence: Arc::clone(self),
            key: key.to_string(),
            epoch,
            generation: entry.generation,
        }
    }

    /// Invalidate in-flight reads of `key`
    pub(crate) fn bump(&self, key: &str) {
        if let Some(entry) = self.state.lock().pending.get_mut(key) {
            entry.generation += 1;
        }
    }

    /// Invalidate every in-flight read
    pub(crate) fn bump_all(&self) {
        self.state.lock().epoch += 1;
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }
}

/// Permission for one read to fill memory; released on drop
#[derive(Debug)]
pub(crate) struct FillTicket {
    fence: Arc<FillFence>,
    key: String,
    epoch: u64,
    generation: u64,
}

impl FillTicket {
    /// Run `fill` only if no write touched the key since the ticket was
    /// taken. Holds the fence lock while filling so a concurrent writer
    /// lands strictly before or after.
    pub(crate) fn fill<F: FnOnce()>(&self, fill: F) -> bool {
        let state = self.fence.state.lock();
        let current = state.epoch == self.epoch
            && state
                .pending
                .get(&self.key)
                .is_some_and(|entry| entry.generation == self.generation);
        if current {
            fill();
        }
        current
    }
}

impl Drop for FillTicket {
    fn drop(&mut self) {
        let mut state = self.fence.state.lock();
        if let Some(entry) = state.pending.get_mut(&self.key) {
            entry.readers = entry.readers.saturating_sub(1);
            if entry.readers == 0 {
                state.pending.remove(&self.key);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
