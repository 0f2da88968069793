//! # Synchronization Primitives
//!
//! Interrupt masking is the only mutual exclusion the scheduler needs: one
//! CPU, and interrupts are the only way another context can run. Every
//! public scheduler entry point holds an [`IrqGuard`] for its whole body.
//!
//! On top of that sit the donation-aware locks. They are ordinary
//! sleeping mutexes whose wait queue feeds the donation engine:
//!
//! ```text
//!  lock_acquire(L)
//!    ├─ L free ──────────────► holder = me                 Acquired
//!    └─ L held by H ─────────► waiters += me
//!                              donate(me → H → ...)        (priority policy)
//!                              block                       Blocked
//!
//!  lock_release(L)
//!    ├─ drop my donors waiting on L, refresh my priority
//!    ├─ no waiters ──────────► holder = none
//!    └─ waiters ─────────────► holder = best waiter, unblock it
//!                              remaining waiters donate to the new holder
//!    └─ preemption check
//! ```
//!
//! A released lock is handed straight to its next owner, so a blocked
//! acquirer owns the lock the moment it is dispatched again.

use critical_section::RestoreState;
use log::debug;

use crate::arch::Port;
use crate::donation::{self, LockId};
use crate::error::Error;
use crate::scheduler::Scheduler;
use crate::thread::{ThreadId, ThreadState};

// ---------------------------------------------------------------------------
// Interrupt guard
// ---------------------------------------------------------------------------

/// Masks interrupts while alive and restores the previous state on drop,
/// including on early return and during unwinding. Guards nest.
///
/// # Usage
/// ```ignore
/// let _irq = IrqGuard::new();
/// // scheduler state may be mutated here
/// ```
#[must_use = "interrupts are unmasked again as soon as the guard is dropped"]
pub struct IrqGuard {
    state: RestoreState,
}

impl IrqGuard {
    #[inline]
    pub fn new() -> Self {
        // SAFETY: paired with the `release` in `Drop`; guards are dropped in
        // reverse order of creation because they are never moved out of the
        // scope that created them.
        let state = unsafe { critical_section::acquire() };
        Self { state }
    }
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IrqGuard {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: `state` came from the matching `acquire` in `new`.
        unsafe { critical_section::release(self.state) }
    }
}

// ---------------------------------------------------------------------------
// Donation-aware locks
// ---------------------------------------------------------------------------

/// Outcome of [`Scheduler::lock_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// The lock was free and now belongs to the caller.
    Acquired,
    /// The lock was held. The caller was descheduled and owns the lock once
    /// it runs again.
    Blocked,
}

impl<P: Port> Scheduler<P> {
    /// Create a free lock.
    ///
    /// # Returns
    /// - `Ok(lock)`: handle of the new lock
    /// - `Err(Error::NoFreeLockSlot)`: all `MAX_LOCKS` locks are in use
    pub fn lock_create(&mut self) -> Result<LockId, Error> {
        let _irq = IrqGuard::new();
        self.locks.create()
    }

    /// # Panics
    /// If the lock is held or has waiters.
    pub fn lock_destroy(&mut self, lock: LockId) {
        let _irq = IrqGuard::new();
        self.locks.destroy(lock);
    }

    /// Take `lock`, blocking until it is handed over if it is held.
    ///
    /// # Panics
    /// From interrupt context, or if the caller already holds `lock`.
    pub fn lock_acquire(&mut self, lock: LockId) -> Acquire {
        let _irq = IrqGuard::new();
        assert!(!self.in_interrupt, "lock_acquire in interrupt context");
        let cur = self.current;

        let holder = self.locks.get(lock).holder;
        let holder = match holder {
            None => {
                self.locks.get_mut(lock).holder = Some(cur);
                return Acquire::Acquired;
            }
            Some(holder) => holder,
        };
        assert!(holder != cur, "thread {} acquiring a lock it holds", cur);

        if self.locks.get_mut(lock).waiters.push(cur).is_err() {
            panic!("lock wait queue overflow");
        }
        self.threads.thread_mut(cur).waiting_on = Some(lock);

        if !self.config.is_mlfqs() {
            donation::add_donor(holder, cur, &mut self.threads);
            donation::donate(
                cur,
                &mut self.threads,
                &self.locks,
                &mut self.ready,
                self.config.donation_depth,
            );
        }

        self.threads.thread_mut(cur).state = ThreadState::Blocked;
        self.schedule();
        Acquire::Blocked
    }

    /// Take `lock` only if it is free.
    pub fn lock_try_acquire(&mut self, lock: LockId) -> bool {
        let _irq = IrqGuard::new();
        let state = self.locks.get_mut(lock);
        if state.holder.is_some() {
            return false;
        }
        state.holder = Some(self.current);
        true
    }

    /// Release `lock`, handing it to the best waiter.
    ///
    /// # Panics
    /// If the caller does not hold `lock`.
    pub fn lock_release(&mut self, lock: LockId) {
        let _irq = IrqGuard::new();
        let cur = self.current;
        assert!(
            self.locks.get(lock).holder == Some(cur),
            "thread {} releasing a lock it does not hold",
            cur
        );
        self.release_lock(cur, lock);
        self.test_preemption();
    }

    /// Whether the running thread holds `lock`.
    pub fn lock_held_by_current(&self, lock: LockId) -> bool {
        self.locks.get(lock).holder == Some(self.current)
    }

    /// Current holder of `lock`, if any.
    pub fn lock_holder(&self, lock: LockId) -> Option<ThreadId> {
        self.locks.get(lock).holder
    }

    /// Release without the preemption check. Also used on thread exit.
    pub(crate) fn release_lock(&mut self, holder: ThreadId, lock: LockId) {
        let donate = !self.config.is_mlfqs();
        if donate {
            donation::remove_donors_for(holder, lock, &mut self.threads);
            donation::refresh_priority(holder, &mut self.threads);
        }

        let next = match self.locks.take_next_waiter(lock, &self.threads) {
            Some(next) => next,
            None => {
                self.locks.get_mut(lock).holder = None;
                return;
            }
        };

        self.locks.get_mut(lock).holder = Some(next);
        self.threads.thread_mut(next).waiting_on = None;
        if donate {
            let remaining = self.locks.get(lock).waiters.clone();
            for waiter in remaining {
                donation::add_donor(next, waiter, &mut self.threads);
            }
            donation::refresh_priority(next, &mut self.threads);
        }

        debug!("lock {:?} handed from thread {} to thread {}", lock, holder, next);
        self.unblock_thread(next);
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::host::HostPort;
    use crate::config::{SchedConfig, PRI_MIN};

    type Sched = Scheduler<HostPort>;

    fn noop(_: usize) {}

    fn sched() -> Sched {
        Scheduler::new(HostPort::new(), SchedConfig::default())
    }

    fn priority(s: &Sched, id: ThreadId) -> u8 {
        s.thread(id).unwrap().priority
    }

    #[test]
    fn test_irq_guards_nest() {
        let outer = IrqGuard::new();
        {
            let _inner = IrqGuard::new();
        }
        drop(outer);
        let _again = IrqGuard::new();
    }

    #[test]
    fn test_uncontended_acquire_release() {
        let mut s = sched();
        let lock = s.lock_create().unwrap();
        assert_eq!(s.lock_acquire(lock), Acquire::Acquired);
        assert!(s.lock_held_by_current(lock));
        assert!(!s.lock_try_acquire(lock));
        s.lock_release(lock);
        assert_eq!(s.lock_holder(lock), None);
        assert!(s.lock_try_acquire(lock));
        s.lock_release(lock);
        s.lock_destroy(lock);
    }

    #[test]
    fn test_donation_to_lock_holder() {
        let mut s = sched();
        let lock = s.lock_create().unwrap();

        // B (2) takes the lock, then creates A (5), which preempts it.
        let b = s.create("b", 2, noop, 0).unwrap();
        s.set_priority(PRI_MIN + 1);
        assert_eq!(s.current(), b);
        assert_eq!(s.lock_acquire(lock), Acquire::Acquired);
        let a = s.create("a", 5, noop, 0).unwrap();
        assert_eq!(s.current(), a);

        // A blocks; B runs at A's priority.
        assert_eq!(s.lock_acquire(lock), Acquire::Blocked);
        assert_eq!(s.current(), b);
        assert_eq!(priority(&s, b), 5);
        assert_eq!(s.thread(b).unwrap().base_priority, 2);

        // Release hands the lock to A, which preempts B at once.
        s.lock_release(lock);
        assert_eq!(s.current(), a);
        assert_eq!(s.lock_holder(lock), Some(a));
        assert_eq!(priority(&s, b), 2);
        assert!(s.thread(a).unwrap().waiting_on.is_none());
    }

    #[test]
    fn test_nested_donation_through_scheduler() {
        let mut s = sched();
        let (l1, l2) = (s.lock_create().unwrap(), s.lock_create().unwrap());

        let c = s.create("c", 1, noop, 0).unwrap();
        s.set_priority(PRI_MIN);
        assert_eq!(s.current(), c);
        s.lock_acquire(l2);

        let b = s.create("b", 3, noop, 0).unwrap();
        assert_eq!(s.current(), b);
        s.lock_acquire(l1);
        assert_eq!(s.lock_acquire(l2), Acquire::Blocked);
        assert_eq!(s.current(), c);
        assert_eq!(priority(&s, c), 3);

        let a = s.create("a", 7, noop, 0).unwrap();
        assert_eq!(s.current(), a);
        assert_eq!(s.lock_acquire(l1), Acquire::Blocked);
        assert_eq!(priority(&s, b), 7);
        assert_eq!(priority(&s, c), 7);
        assert_eq!(s.current(), c);

        // C releases L2: B gets it and keeps A's donation through L1.
        s.lock_release(l2);
        assert_eq!(priority(&s, c), 1);
        assert_eq!(s.current(), b);
        assert_eq!(priority(&s, b), 7);

        // B releases L1: A gets it, B drops to its base priority.
        s.lock_release(l1);
        assert_eq!(s.current(), a);
        assert_eq!(priority(&s, b), 3);
        assert_eq!(s.lock_holder(l1), Some(a));
        assert_eq!(s.lock_holder(l2), Some(b));
    }

    #[test]
    fn test_handoff_prefers_highest_waiter() {
        let mut s = sched();
        let lock = s.lock_create().unwrap();
        let main = s.current();
        s.lock_acquire(lock);

        let w1 = s.create("w1", 40, noop, 0).unwrap();
        assert_eq!(s.lock_acquire(lock), Acquire::Blocked);
        assert_eq!(s.current(), main);
        let w2 = s.create("w2", 50, noop, 0).unwrap();
        assert_eq!(s.lock_acquire(lock), Acquire::Blocked);
        assert_eq!(s.current(), main);
        assert_eq!(s.get_priority(), 50);

        s.lock_release(lock);
        assert_eq!(s.current(), w2);
        assert_eq!(s.lock_holder(lock), Some(w2));
        // W1 still waits and now donates to W2.
        assert_eq!(s.thread(w2).unwrap().donors.as_slice(), [w1]);
        assert_eq!(priority(&s, main), crate::config::PRI_DEFAULT);
    }

    #[test]
    fn test_mlfqs_locks_do_not_donate() {
        let mut s = Scheduler::new(HostPort::new(), SchedConfig::mlfqs());
        let lock = s.lock_create().unwrap();
        let main = s.current();
        s.lock_acquire(lock);
        s.set_nice(10); // 63 - 20 = 43

        let w = s.create("w", 31, noop, 0).unwrap();
        s.set_nice(20);
        assert_eq!(s.current(), w);
        assert_eq!(s.lock_acquire(lock), Acquire::Blocked);
        assert_eq!(s.current(), main);
        assert_eq!(priority(&s, main), 23);
        assert!(s.thread(main).unwrap().donors.is_empty());
    }

    #[test]
    fn test_exit_hands_off_held_locks() {
        let mut s = sched();
        let lock = s.lock_create().unwrap();
        let holder = s.create("holder", 40, noop, 0).unwrap();
        assert_eq!(s.current(), holder);
        s.lock_acquire(lock);
        s.set_priority(10);

        let main = s.current();
        assert_eq!(s.lock_acquire(lock), Acquire::Blocked);
        assert_eq!(s.current(), holder);
        s.exit_current();

        assert_eq!(s.current(), main);
        assert_eq!(s.lock_holder(lock), Some(main));
    }

    #[test]
    #[should_panic(expected = "does not hold")]
    fn test_release_unheld_lock_panics() {
        let mut s = sched();
        let lock = s.lock_create().unwrap();
        s.lock_release(lock);
    }

    #[test]
    #[should_panic(expected = "in use")]
    fn test_destroy_held_lock_panics() {
        let mut s = sched();
        let lock = s.lock_create().unwrap();
        s.lock_acquire(lock);
        s.lock_destroy(lock);
    }
}
