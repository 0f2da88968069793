//! # Thread Control Block
//!
//! Defines the thread model: the TCB every other component operates on,
//! and the fixed-capacity arena that owns all TCBs and their stacks.
//!
//! ## Ownership
//!
//! The [`ThreadTable`] owns every [`Thread`] from creation until its slot
//! is reclaimed. Nothing else holds a reference to a TCB: queues, donor
//! lists and lock holders all name threads by [`ThreadId`], so a reclaimed
//! thread can never be reached through a dangling pointer.
//!
//! Stacks live beside the slots rather than inside them. A dying thread
//! still executes on its stack until the switch away from it has finished,
//! and the port may push a final exception frame there, so the stack memory
//! must outlive the TCB by one switch.

use core::sync::atomic::{AtomicU32, Ordering};

use heapless::{String, Vec};

use crate::arch::Context;
use crate::config::{MAX_THREADS, NICE_DEFAULT, PRI_MAX, PRI_MIN, STACK_SIZE, THREAD_NAME_LEN};
use crate::donation::LockId;
use crate::error::Error;
use crate::fixed_point::Fixed;

/// Entry point of a kernel thread. Returning from it exits the thread.
pub type ThreadFn = fn(usize);

/// Unique, never-reused thread identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u32);

impl ThreadId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic identifier source. The first thread gets id 1.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU32,
}

impl IdAllocator {
    pub const fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Next id. Ids are never reused.
    pub fn allocate(&self) -> ThreadId {
        ThreadId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Opaque page-directory handle owned by the virtual-memory collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageDir(pub usize);

// ---------------------------------------------------------------------------
// Thread state machine
// ---------------------------------------------------------------------------

/// Execution state of a thread.
///
/// ```text
///    create ──► ┌─────────┐   unblock()   ┌─────────┐
///               │ Blocked │ ────────────► │  Ready  │ ◄──┐
///               └─────────┘               └─────────┘    │ yield /
///                    ▲                         │         │ preempt
///                    │ block / sleep /         │ dispatch│
///                    │ lock wait               ▼         │
///                    │                    ┌─────────┐    │
///                    └─────────────────── │ Running │ ───┘
///                                         └─────────┘
///                                              │ exit()
///                                              ▼
///                                         ┌─────────┐
///                                         │  Dying  │ (reclaimed by the
///                                         └─────────┘  next thread)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadState {
    /// Created but not yet started, waiting on a lock, sleeping, or parked
    /// explicitly.
    Blocked,
    /// In the ready queue.
    Ready,
    /// Executing on the CPU.
    Running,
    /// Exited; waiting for the next thread to reclaim its slot.
    Dying,
}

// ---------------------------------------------------------------------------
// Stack
// ---------------------------------------------------------------------------

/// One thread stack, 8-byte aligned as AAPCS requires.
#[repr(C, align(8))]
pub struct Stack([u8; STACK_SIZE]);

impl Stack {
    pub const ZEROED: Stack = Stack([0; STACK_SIZE]);

    /// Address one past the highest byte. Stacks grow down from here.
    pub fn top(&mut self) -> *mut u8 {
        self.0.as_mut_ptr_range().end
    }
}

// ---------------------------------------------------------------------------
// Thread Control Block
// ---------------------------------------------------------------------------

/// Thread Control Block.
#[derive(Debug)]
pub struct Thread {
    pub id: ThreadId,
    pub name: String<THREAD_NAME_LEN>,
    pub state: ThreadState,

    /// Priority set at creation or by `set_priority`.
    pub base_priority: u8,
    /// Effective priority: `base_priority` raised by donations. This is the
    /// value every scheduling decision compares.
    pub priority: u8,

    /// Threads blocked on a lock this thread holds, highest priority first
    /// as of the last refresh.
    pub donors: Vec<ThreadId, MAX_THREADS>,
    /// Lock this thread is blocked on.
    pub waiting_on: Option<LockId>,
    /// Tick at which a sleeping thread becomes ready again.
    pub wake_time: Option<u64>,

    pub nice: i32,
    pub recent_cpu: Fixed,

    /// Address space of the user process this thread runs, if any.
    pub page_dir: Option<PageDir>,
    /// Saved register state. Only the port reads or writes it.
    pub context: Context,
}

impl Thread {
    /// A fresh TCB in the `Blocked` state.
    ///
    /// # Panics
    /// If `priority` is outside `[PRI_MIN, PRI_MAX]`.
    pub fn new(id: ThreadId, name: &str, priority: u8) -> Self {
        assert!(
            (PRI_MIN..=PRI_MAX).contains(&priority),
            "thread priority {} out of range",
            priority
        );

        Self {
            id,
            name: truncated_name(name),
            state: ThreadState::Blocked,
            base_priority: priority,
            priority,
            donors: Vec::new(),
            waiting_on: None,
            wake_time: None,
            nice: NICE_DEFAULT,
            recent_cpu: Fixed::ZERO,
            page_dir: None,
            context: Context::default(),
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Live threads are still in the all-threads registry.
    #[inline]
    pub fn is_live(&self) -> bool {
        self.state != ThreadState::Dying
    }
}

fn truncated_name(name: &str) -> String<THREAD_NAME_LEN> {
    let mut out = String::new();
    for c in name.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Thread arena
// ---------------------------------------------------------------------------

/// Fixed-capacity arena owning every TCB and its stack.
pub struct ThreadTable {
    slots: [Option<Thread>; MAX_THREADS],
    stacks: [Stack; MAX_THREADS],
}

impl Default for ThreadTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadTable {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
            stacks: [Stack::ZEROED; MAX_THREADS],
        }
    }

    /// Store `thread` in a free slot. Nothing is registered on failure.
    pub fn insert(&mut self, thread: Thread) -> Result<(), Error> {
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(Error::NoFreeThreadSlot)?;
        self.slots[slot] = Some(thread);
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Drop the TCB of `id` and free its slot and stack.
    pub fn remove(&mut self, id: ThreadId) -> Option<Thread> {
        let slot = self.slot_of(id)?;
        self.slots[slot].take()
    }

    fn slot_of(&self, id: ThreadId) -> Option<usize> {
        self.slots
            .iter()
            .position(|t| t.as_ref().is_some_and(|t| t.id == id))
    }

    pub fn get(&self, id: ThreadId) -> Option<&Thread> {
        self.slots.iter().flatten().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: ThreadId) -> Option<&mut Thread> {
        self.slots.iter_mut().flatten().find(|t| t.id == id)
    }

    /// The TCB of `id`, which must exist.
    ///
    /// # Panics
    /// If `id` does not name a thread in the table.
    pub fn thread(&self, id: ThreadId) -> &Thread {
        match self.get(id) {
            Some(t) => t,
            None => panic!("no such thread {}", id),
        }
    }

    /// Mutable variant of [`ThreadTable::thread`].
    pub fn thread_mut(&mut self, id: ThreadId) -> &mut Thread {
        match self.get_mut(id) {
            Some(t) => t,
            None => panic!("no such thread {}", id),
        }
    }

    /// Effective priority of `id`.
    #[inline]
    pub fn priority(&self, id: ThreadId) -> u8 {
        self.thread(id).priority
    }

    /// All TCBs, dying ones included.
    pub fn iter(&self) -> impl Iterator<Item = &Thread> {
        self.slots.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Thread> {
        self.slots.iter_mut().flatten()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The context and stack of `id`, borrowed together for the port.
    pub fn context_and_stack(&mut self, id: ThreadId) -> (&mut Context, &mut Stack) {
        let slot = match self.slot_of(id) {
            Some(slot) => slot,
            None => panic!("no such thread {}", id),
        };
        let thread = self.slots[slot].as_mut().map(|t| &mut t.context);
        match thread {
            Some(ctx) => (ctx, &mut self.stacks[slot]),
            None => unreachable!(),
        }
    }

    /// Contexts of the outgoing and incoming threads of a switch. The
    /// outgoing context is `None` when that thread is dying, since its
    /// registers are never resumed.
    pub fn switch_contexts(
        &mut self,
        prev: ThreadId,
        next: ThreadId,
    ) -> (Option<&mut Context>, &Context) {
        let (p, n) = match (self.slot_of(prev), self.slot_of(next)) {
            (Some(p), Some(n)) if p != n => (p, n),
            _ => panic!("invalid switch {} -> {}", prev, next),
        };

        let (prev_slot, next_slot) = if p < n {
            let (lo, hi) = self.slots.split_at_mut(n);
            (&mut lo[p], &hi[0])
        } else {
            let (lo, hi) = self.slots.split_at_mut(p);
            (&mut hi[0], &lo[n])
        };

        match (prev_slot.as_mut(), next_slot.as_ref()) {
            (Some(prev), Some(next)) => {
                let prev_ctx = if prev.state == ThreadState::Dying {
                    None
                } else {
                    Some(&mut prev.context)
                };
                (prev_ctx, &next.context)
            }
            _ => unreachable!(),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
