//! # Ready and Sleep Queues
//!
//! ```text
//!  ReadyQueue (non-increasing effective priority, FIFO among equals)
//!  ┌────┬────┬────┬────┬────┐
//!  │ 40 │ 31 │ 31 │ 31 │  2 │  ──► pop_front() dispatches the leftmost
//!  └────┴────┴────┴────┴────┘
//!            push(31) ───┘ lands after the existing 31s
//!
//!  SleepQueue (unordered, scanned every tick)
//!  ┌──────┬──────┬──────┐
//!  │ @120 │ @104 │ @300 │  ──► take_due(now) removes every wake_time <= now
//!  └──────┴──────┴──────┘
//! ```
//!
//! Both queues hold [`ThreadId`]s. Priorities and wake times live in the
//! TCBs, so every ordering operation is handed the [`ThreadTable`].

use heapless::Vec;

use crate::config::MAX_THREADS;
use crate::thread::{ThreadId, ThreadTable};

// ---------------------------------------------------------------------------
// Ready queue
// ---------------------------------------------------------------------------

/// Threads in the `Ready` state, highest effective priority first.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    entries: Vec<ThreadId, MAX_THREADS>,
}

impl ReadyQueue {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Ordered insert behind every entry of equal or higher priority.
    ///
    /// # Panics
    /// If `id` is already queued.
    pub fn push(&mut self, id: ThreadId, threads: &ThreadTable) {
        assert!(!self.contains(id), "thread {} queued twice", id);

        let priority = threads.priority(id);
        let at = self
            .entries
            .iter()
            .position(|&other| threads.priority(other) < priority)
            .unwrap_or(self.entries.len());

        // Capacity equals the arena size, so a live thread always fits.
        if self.entries.insert(at, id).is_err() {
            panic!("ready queue overflow");
        }
    }

    /// Take the highest-priority thread, the oldest among equals.
    pub fn pop_front(&mut self) -> Option<ThreadId> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    pub fn front(&self) -> Option<ThreadId> {
        self.entries.first().copied()
    }

    /// Take `id` out of the queue. Returns whether it was queued.
    pub fn remove(&mut self, id: ThreadId) -> bool {
        match self.entries.iter().position(|&t| t == id) {
            Some(at) => {
                self.entries.remove(at);
                true
            }
            None => false,
        }
    }

    /// Move `id` to its place for its current priority. A thread whose
    /// priority changed while ready is treated as newly arrived at that level.
    pub fn reposition(&mut self, id: ThreadId, threads: &ThreadTable) {
        if self.remove(id) {
            self.push(id, threads);
        }
    }

    /// Restore the ordering after many priorities changed at once. Stable,
    /// so threads whose relative priority is unchanged keep their order.
    pub fn resort(&mut self, threads: &ThreadTable) {
        for i in 1..self.entries.len() {
            let mut j = i;
            while j > 0
                && threads.priority(self.entries[j - 1]) < threads.priority(self.entries[j])
            {
                self.entries.swap(j - 1, j);
                j -= 1;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.entries.iter().copied()
    }

    pub fn contains(&self, id: ThreadId) -> bool {
        self.entries.contains(&id)
    }
}

// ---------------------------------------------------------------------------
// Sleep queue
// ---------------------------------------------------------------------------

/// Threads blocked until a wake tick.
#[derive(Debug, Default)]
pub struct SleepQueue {
    entries: Vec<ThreadId, MAX_THREADS>,
}

/// Sleepers woken by one scan.
pub type Woken = Vec<ThreadId, MAX_THREADS>;

impl SleepQueue {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, id: ThreadId) {
        assert!(!self.entries.contains(&id), "thread {} sleeping twice", id);
        if self.entries.push(id).is_err() {
            panic!("sleep queue overflow");
        }
    }

    pub fn remove(&mut self, id: ThreadId) -> bool {
        match self.entries.iter().position(|&t| t == id) {
            Some(at) => {
                self.entries.remove(at);
                true
            }
            None => false,
        }
    }

    /// Remove every sleeper whose wake tick has been reached, in the order
    /// they went to sleep.
    pub fn take_due(&mut self, now: u64, threads: &ThreadTable) -> Woken {
        let mut woken = Woken::new();
        self.entries.retain(|&id| {
            let due = threads
                .thread(id)
                .wake_time
                .is_some_and(|wake| wake <= now);
            if due {
                // Same capacity as `entries`.
                let _ = woken.push(id);
            }
            !due
        });
        woken
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.entries.iter().copied()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
