//! # Host Simulation Port
//!
//! Stands in for the CPU when the scheduler runs on a development machine.
//! No thread body ever executes: a switch simply completes, and the port
//! records what happened so tests can observe dispatch order, address-space
//! activations and exits.

use heapless::Deque;

use super::Port;
use crate::thread::{PageDir, Stack, ThreadFn, ThreadId};

/// Number of recent dispatches and exits the port remembers.
pub const HISTORY_LEN: usize = 64;

/// Simulated register state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Context {
    /// Thread this context belongs to.
    pub owner: Option<ThreadId>,
    pub entry: Option<ThreadFn>,
    pub arg: usize,
    /// Address one past the end of the thread's stack.
    pub stack_top: usize,
    /// Number of times this context was saved by a switch.
    pub saves: u32,
}

/// The idle thread's body. Never run on the host.
pub fn idle_loop(_: usize) {
    loop {
        core::hint::spin_loop();
    }
}

/// Simulated CPU.
#[derive(Debug)]
pub struct HostPort {
    switches: u64,
    activations: u64,
    last_page_dir: Option<PageDir>,
    dispatched: Deque<ThreadId, HISTORY_LEN>,
    exited: Deque<ThreadId, HISTORY_LEN>,
}

impl Default for HostPort {
    fn default() -> Self {
        Self::new()
    }
}

impl HostPort {
    pub const fn new() -> Self {
        Self {
            switches: 0,
            activations: 0,
            last_page_dir: None,
            dispatched: Deque::new(),
            exited: Deque::new(),
        }
    }

    /// Number of real switches (the running thread changed).
    pub fn switches(&self) -> u64 {
        self.switches
    }

    /// Number of completed schedule passes, switch or not.
    pub fn activations(&self) -> u64 {
        self.activations
    }

    /// Page directory handed to the last activation.
    pub fn last_page_dir(&self) -> Option<PageDir> {
        self.last_page_dir
    }

    /// Threads switched to, oldest first.
    pub fn dispatch_log(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.dispatched.iter().copied()
    }

    /// Threads that announced their exit, oldest first.
    pub fn exit_log(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.exited.iter().copied()
    }

    /// Forget recorded dispatches and exits. Counters are kept.
    pub fn clear_logs(&mut self) {
        self.dispatched.clear();
        self.exited.clear();
    }
}

fn remember(log: &mut Deque<ThreadId, HISTORY_LEN>, id: ThreadId) {
    if log.is_full() {
        log.pop_front();
    }
    let _ = log.push_back(id);
}

impl Port for HostPort {
    fn adopt_context(&mut self, thread: ThreadId, ctx: &mut Context) {
        ctx.owner = Some(thread);
    }

    fn init_context(
        &mut self,
        thread: ThreadId,
        ctx: &mut Context,
        stack: &mut Stack,
        entry: ThreadFn,
        arg: usize,
    ) {
        *ctx = Context {
            owner: Some(thread),
            entry: Some(entry),
            arg,
            stack_top: stack.top() as usize,
            saves: 0,
        };
    }

    fn switch_context(&mut self, prev: Option<&mut Context>, next: &Context) {
        if let Some(prev) = prev {
            prev.saves += 1;
        }
        self.switches += 1;
        if let Some(owner) = next.owner {
            remember(&mut self.dispatched, owner);
        }
    }

    fn activate(&mut self, _thread: ThreadId, page_dir: Option<PageDir>) {
        self.activations += 1;
        self.last_page_dir = page_dir;
    }

    fn thread_exiting(&mut self, thread: ThreadId) {
        remember(&mut self.exited, thread);
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
