//! # Priority Donation Engine
//!
//! Prevents priority inversion through locks. A thread that blocks on a
//! held lock lends its effective priority to the holder, and through the
//! holder to whoever the holder itself is waiting for.
//!
//! ```text
//!   A (7) ──waits on──► L1 ──held by──► B (3→7) ──waits on──► L2 ──held by──► C (1→7)
//!
//!   donate(A):  hop 1 raises B to 7, hop 2 raises C to 7
//!   C releases L2:  C drops B from its donors, C back to 1
//! ```
//!
//! ## Representation
//!
//! Locks live in a [`LockTable`] and are addressed by [`LockId`]; threads
//! are addressed by [`ThreadId`]. No TCB or lock holds a reference to
//! another, so destroying a thread only has to remove ids.
//!
//! The chain walk is an explicit loop bounded by the configured depth, so
//! stack usage is constant however long the chain is.

use heapless::Vec;
use log::warn;

use crate::config::{MAX_LOCKS, MAX_THREADS};
use crate::error::Error;
use crate::queue::ReadyQueue;
use crate::thread::{ThreadId, ThreadState, ThreadTable};

// ---------------------------------------------------------------------------
// Locks
// ---------------------------------------------------------------------------

/// Handle to a donation-aware lock. The generation makes handles to a
/// destroyed lock detectable even after its slot is reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LockId {
    index: u16,
    generation: u16,
}

impl LockId {
    /// Pack into one word, e.g. to share through an atomic.
    pub const fn into_raw(self) -> u32 {
        (self.generation as u32) << 16 | self.index as u32
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self {
            index: raw as u16,
            generation: (raw >> 16) as u16,
        }
    }
}

/// State of one live lock.
#[derive(Debug, Default)]
pub struct LockState {
    pub holder: Option<ThreadId>,
    /// Blocked acquirers in arrival order.
    pub waiters: Vec<ThreadId, MAX_THREADS>,
}

#[derive(Debug, Default)]
struct LockSlot {
    generation: u16,
    lock: Option<LockState>,
}

/// Fixed-capacity arena of locks.
#[derive(Debug)]
pub struct LockTable {
    slots: [LockSlot; MAX_LOCKS],
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| LockSlot::default()),
        }
    }

    /// Claim a free slot. The handle carries the slot's current generation.
    pub fn create(&mut self) -> Result<LockId, Error> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.lock.is_none())
            .ok_or(Error::NoFreeLockSlot)?;
        slot.lock = Some(LockState::default());
        Ok(LockId {
            index: index as u16,
            generation: slot.generation,
        })
    }

    /// Free `id`'s slot.
    ///
    /// # Panics
    /// If the lock is held or has waiters.
    pub fn destroy(&mut self, id: LockId) {
        let lock = self.get(id);
        assert!(
            lock.holder.is_none() && lock.waiters.is_empty(),
            "destroying a lock in use"
        );
        let slot = &mut self.slots[id.index as usize];
        slot.lock = None;
        slot.generation = slot.generation.wrapping_add(1);
    }

    /// # Panics
    /// If `id` names a destroyed lock.
    pub fn get(&self, id: LockId) -> &LockState {
        let slot = &self.slots[id.index as usize];
        match &slot.lock {
            Some(lock) if slot.generation == id.generation => lock,
            _ => panic!("stale lock handle {:?}", id),
        }
    }

    /// # Panics
    /// If `id` refers to a destroyed lock.
    pub fn get_mut(&mut self, id: LockId) -> &mut LockState {
        let slot = &mut self.slots[id.index as usize];
        match &mut slot.lock {
            Some(lock) if slot.generation == id.generation => lock,
            _ => panic!("stale lock handle {:?}", id),
        }
    }

    /// Every lock currently held by `thread`.
    pub fn held_by(&self, thread: ThreadId) -> Vec<LockId, MAX_LOCKS> {
        let mut held = Vec::new();
        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(lock) = &slot.lock {
                if lock.holder == Some(thread) {
                    let _ = held.push(LockId {
                        index: index as u16,
                        generation: slot.generation,
                    });
                }
            }
        }
        held
    }

    /// Remove and return the waiter that should own `id` next: the highest
    /// effective priority, earliest arrival among equals.
    pub fn take_next_waiter(&mut self, id: LockId, threads: &ThreadTable) -> Option<ThreadId> {
        let waiters = &mut self.get_mut(id).waiters;
        let mut best: Option<usize> = None;
        for (i, &w) in waiters.iter().enumerate() {
            match best {
                Some(b) if threads.priority(waiters[b]) >= threads.priority(w) => {}
                _ => best = Some(i),
            }
        }
        best.map(|i| waiters.remove(i))
    }
}

// ---------------------------------------------------------------------------
// Donation
// ---------------------------------------------------------------------------

/// Record `donor` among `holder`'s donors, keeping them highest first.
pub fn add_donor(holder: ThreadId, donor: ThreadId, threads: &mut ThreadTable) {
    let priority = threads.priority(donor);
    let at = {
        let donors = &threads.thread(holder).donors;
        donors
            .iter()
            .position(|&d| threads.priority(d) < priority)
            .unwrap_or(donors.len())
    };
    if threads.thread_mut(holder).donors.insert(at, donor).is_err() {
        panic!("donor list overflow");
    }
}

/// Propagate `donor`'s effective priority along its chain of lock holders.
///
/// Each hop raises the holder of the lock the previous thread waits on, if
/// that holder is lower. A `Ready` holder moves to its new place in `ready`.
/// Stops when the chain ends or after `depth` hops.
///
/// Returns the number of holders visited.
pub fn donate(
    donor: ThreadId,
    threads: &mut ThreadTable,
    locks: &LockTable,
    ready: &mut ReadyQueue,
    depth: usize,
) -> usize {
    let priority = threads.priority(donor);
    let mut cur = donor;

    for hop in 0..depth {
        let holder = match next_holder(cur, threads, locks) {
            Some(h) => h,
            None => return hop,
        };

        let h = threads.thread_mut(holder);
        if h.priority < priority {
            h.priority = priority;
            if h.state == ThreadState::Ready {
                ready.reposition(holder, threads);
            }
        }
        cur = holder;
    }

    if next_holder(cur, threads, locks).is_some() {
        warn!(
            "donation from thread {} stopped after {} holders",
            donor, depth
        );
    }
    depth
}

fn next_holder(thread: ThreadId, threads: &ThreadTable, locks: &LockTable) -> Option<ThreadId> {
    let lock = threads.thread(thread).waiting_on?;
    locks.get(lock).holder
}

/// Drop from `holder`'s donors every thread waiting on `lock`.
pub fn remove_donors_for(holder: ThreadId, lock: LockId, threads: &mut ThreadTable) {
    let waiting: Vec<ThreadId, MAX_THREADS> = threads
        .thread(holder)
        .donors
        .iter()
        .copied()
        .filter(|&d| threads.thread(d).waiting_on == Some(lock))
        .collect();
    threads
        .thread_mut(holder)
        .donors
        .retain(|d| !waiting.contains(d));
}

/// Recompute `thread`'s effective priority as the maximum of its base
/// priority and its donors' priorities, and re-sort the donors.
///
/// Returns the new effective priority.
pub fn refresh_priority(thread: ThreadId, threads: &mut ThreadTable) -> u8 {
    let mut donors = core::mem::take(&mut threads.thread_mut(thread).donors);

    // Donor priorities may have changed since they were recorded.
    for i in 1..donors.len() {
        let mut j = i;
        while j > 0 && threads.priority(donors[j - 1]) < threads.priority(donors[j]) {
            donors.swap(j - 1, j);
            j -= 1;
        }
    }

    let donated = donors.first().map(|&d| threads.priority(d));
    let t = threads.thread_mut(thread);
    t.donors = donors;
    t.priority = match donated {
        Some(p) if p > t.base_priority => p,
        _ => t.base_priority,
    };
    t.priority
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DONATION_DEPTH;
    use crate::thread::Thread;

    fn id(n: u32) -> ThreadId {
        ThreadId::new(n)
    }

    fn setup(priorities: &[u8]) -> (ThreadTable, LockTable, ReadyQueue) {
        let mut threads = ThreadTable::new();
        for (i, &p) in priorities.iter().enumerate() {
            threads
                .insert(Thread::new(id(i as u32 + 1), "t", p))
                .unwrap();
        }
        (threads, LockTable::new(), ReadyQueue::new())
    }

    /// `waiter` blocks on a fresh lock held by `holder`.
    fn wait_on(
        waiter: ThreadId,
        holder: ThreadId,
        threads: &mut ThreadTable,
        locks: &mut LockTable,
    ) -> LockId {
        let lock = locks.create().unwrap();
        locks.get_mut(lock).holder = Some(holder);
        locks.get_mut(lock).waiters.push(waiter).unwrap();
        threads.thread_mut(waiter).waiting_on = Some(lock);
        add_donor(holder, waiter, threads);
        lock
    }

    #[test]
    fn test_single_donation_and_restore() {
        let (mut threads, mut locks, mut ready) = setup(&[5, 2]);
        let (a, b) = (id(1), id(2));

        let lock = wait_on(a, b, &mut threads, &mut locks);
        assert_eq!(donate(a, &mut threads, &locks, &mut ready, DONATION_DEPTH), 1);
        assert_eq!(threads.priority(b), 5);
        assert_eq!(threads.thread(b).base_priority, 2);

        remove_donors_for(b, lock, &mut threads);
        assert_eq!(refresh_priority(b, &mut threads), 2);
        assert!(threads.thread(b).donors.is_empty());
    }

    #[test]
    fn test_nested_donation() {
        let (mut threads, mut locks, mut ready) = setup(&[7, 3, 1]);
        let (a, b, c) = (id(1), id(2), id(3));

        let l2 = wait_on(b, c, &mut threads, &mut locks);
        donate(b, &mut threads, &locks, &mut ready, DONATION_DEPTH);
        assert_eq!(threads.priority(c), 3);

        let _l1 = wait_on(a, b, &mut threads, &mut locks);
        assert_eq!(donate(a, &mut threads, &locks, &mut ready, DONATION_DEPTH), 2);
        assert_eq!(threads.priority(b), 7);
        assert_eq!(threads.priority(c), 7);

        // C releases L2: only B donated through it, and B is still at 7.
        remove_donors_for(c, l2, &mut threads);
        assert_eq!(refresh_priority(c, &mut threads), 1);
    }

    #[test]
    fn test_donation_depth_is_bounded() {
        // Thread n+1 waits on a lock held by thread n+2; thread 1 is the top.
        let n = 12;
        let mut prios = std::vec![1u8; n];
        prios[0] = 60;
        let (mut threads, mut locks, mut ready) = setup(&prios);
        for i in 1..n as u32 {
            wait_on(id(i), id(i + 1), &mut threads, &mut locks);
        }

        assert_eq!(donate(id(1), &mut threads, &locks, &mut ready, 8), 8);
        for i in 2..=9 {
            assert_eq!(threads.priority(id(i)), 60, "thread {}", i);
        }
        for i in 10..=n as u32 {
            assert_eq!(threads.priority(id(i)), 1, "thread {}", i);
        }
    }

    #[test]
    fn test_donation_never_lowers() {
        let (mut threads, mut locks, mut ready) = setup(&[10, 40]);
        wait_on(id(1), id(2), &mut threads, &mut locks);
        donate(id(1), &mut threads, &locks, &mut ready, DONATION_DEPTH);
        assert_eq!(threads.priority(id(2)), 40);
    }

    #[test]
    fn test_multiple_donors_release_one_lock() {
        // H holds L1 (waited on by A at 20) and L2 (waited on by B at 30).
        let (mut threads, mut locks, mut ready) = setup(&[20, 30, 5]);
        let (a, b, h) = (id(1), id(2), id(3));
        let l1 = wait_on(a, h, &mut threads, &mut locks);
        donate(a, &mut threads, &locks, &mut ready, DONATION_DEPTH);
        let l2 = wait_on(b, h, &mut threads, &mut locks);
        donate(b, &mut threads, &locks, &mut ready, DONATION_DEPTH);

        assert_eq!(threads.priority(h), 30);
        assert_eq!(threads.thread(h).donors.as_slice(), [b, a]);

        remove_donors_for(h, l2, &mut threads);
        assert_eq!(refresh_priority(h, &mut threads), 20);

        remove_donors_for(h, l1, &mut threads);
        assert_eq!(refresh_priority(h, &mut threads), 5);
    }

    #[test]
    fn test_ready_holder_is_repositioned() {
        let (mut threads, mut locks, mut ready) = setup(&[50, 10, 20]);
        let (a, b, other) = (id(1), id(2), id(3));
        for t in [b, other] {
            threads.thread_mut(t).state = ThreadState::Ready;
            ready.push(t, &threads);
        }
        assert_eq!(ready.front(), Some(other));

        wait_on(a, b, &mut threads, &mut locks);
        donate(a, &mut threads, &locks, &mut ready, DONATION_DEPTH);
        assert_eq!(ready.front(), Some(b));
    }

    #[test]
    fn test_next_waiter_by_priority_then_arrival() {
        let (threads, mut locks, _) = setup(&[10, 30, 30, 20]);
        let lock = locks.create().unwrap();
        for n in 1..=4 {
            locks.get_mut(lock).waiters.push(id(n)).unwrap();
        }
        assert_eq!(locks.take_next_waiter(lock, &threads), Some(id(2)));
        assert_eq!(locks.take_next_waiter(lock, &threads), Some(id(3)));
        assert_eq!(locks.take_next_waiter(lock, &threads), Some(id(4)));
        assert_eq!(locks.take_next_waiter(lock, &threads), Some(id(1)));
        assert_eq!(locks.take_next_waiter(lock, &threads), None);
    }

    #[test]
    #[should_panic(expected = "stale lock handle")]
    fn test_stale_lock_handle_panics() {
        let mut locks = LockTable::new();
        let lock = locks.create().unwrap();
        locks.destroy(lock);
        let reused = locks.create().unwrap();
        assert_ne!(lock, reused);
        assert_eq!(LockId::from_raw(reused.into_raw()), reused);
        let _ = locks.get(lock);
    }

    #[test]
    fn test_lock_table_full() {
        let mut locks = LockTable::new();
        for _ in 0..MAX_LOCKS {
            locks.create().unwrap();
        }
        assert_eq!(locks.create(), Err(Error::NoFreeLockSlot));
    }
}
