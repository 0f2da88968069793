//! # Scheduler
//!
//! Core scheduling logic. Owns every thread, both queues, the lock table and
//! the MLFQS controller, and decides which thread runs next.
//!
//! ## Dispatch
//!
//! Every path that takes the CPU away from the running thread ends in
//! [`Scheduler::schedule`]:
//!
//! ```text
//!  yield / block / sleep / exit / lock wait / preemption
//!    └─► running thread leaves the Running state
//!          └─► schedule()
//!                ├─► next_thread_to_run()   ready head, or idle
//!                ├─► port.switch_context()  only if the thread changes
//!                └─► schedule_tail()
//!                      ├─► next thread marked Running, slice reset
//!                      ├─► port.activate(page directory)
//!                      └─► previous thread reclaimed if it is dying
//! ```
//!
//! ## Timer tick
//!
//! [`Scheduler::on_timer_tick`] runs in interrupt context:
//! 1. **Accounting**: idle, kernel or user tick for the running thread
//! 2. **MLFQS** (if enabled): `recent_cpu`, `load_avg` and priority updates
//! 3. **Wakeups**: every sleeper whose wake tick is reached becomes ready
//! 4. **Time slice**: after `time_slice` ticks the running thread yields
//!
//! Blocking is forbidden in interrupt context, so the tick only records that
//! a yield is wanted and performs it after leaving interrupt context.
//!
//! ## Preemption
//!
//! Whenever a priority changes or a thread is created, the running thread is
//! compared with the ready head. If the head is strictly higher the running
//! thread yields at once. Equal priorities never preempt; they take turns at
//! time-slice boundaries.

use core::fmt;

use log::{debug, info, trace, warn};

use crate::arch::{idle_loop, Port};
use crate::config::{SchedConfig, NICE_MAX, NICE_MIN, PRI_DEFAULT, PRI_MAX, PRI_MIN};
use crate::donation::{self, LockTable};
use crate::error::Error;
use crate::fixed_point::Fixed;
use crate::mlfqs::{self, Mlfqs};
use crate::queue::{ReadyQueue, SleepQueue};
use crate::sync::IrqGuard;
use crate::thread::{IdAllocator, PageDir, Thread, ThreadFn, ThreadId, ThreadState, ThreadTable};

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Where timer ticks were spent.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    pub idle_ticks: u64,
    /// Ticks in threads without an address space of their own.
    pub kernel_ticks: u64,
    /// Ticks in threads running a user process.
    pub user_ticks: u64,
}

impl fmt::Display for TickStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Thread: {} idle ticks, {} kernel ticks, {} user ticks",
            self.idle_ticks, self.kernel_ticks, self.user_ticks
        )
    }
}

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// The scheduler context. Exactly one exists per CPU; on the target it is
/// held by `kernel`, in tests by the test itself.
pub struct Scheduler<P: Port> {
    pub(crate) port: P,
    pub(crate) config: SchedConfig,

    pub(crate) threads: ThreadTable,
    pub(crate) ready: ReadyQueue,
    pub(crate) sleepers: SleepQueue,
    pub(crate) locks: LockTable,
    pub(crate) mlfqs: Mlfqs,
    ids: IdAllocator,

    /// The thread that owns the CPU.
    pub(crate) current: ThreadId,
    idle: ThreadId,
    /// The code that was running when the scheduler was created. Its TCB is
    /// never reclaimed.
    initial: ThreadId,

    ticks: u64,
    /// Ticks since the running thread was dispatched.
    slice_ticks: u32,
    /// Set while the timer interrupt handler runs.
    pub(crate) in_interrupt: bool,
    /// A yield requested from interrupt context.
    yield_on_return: bool,

    stats: TickStats,
}

impl<P: Port> Scheduler<P> {
    /// Turn the running code into the thread `"main"` and create the idle
    /// thread.
    ///
    /// # Panics
    /// If `config.time_slice` or `config.timer_freq` is zero.
    pub fn new(mut port: P, config: SchedConfig) -> Self {
        assert!(config.time_slice > 0, "time slice must be at least one tick");
        assert!(config.timer_freq > 0, "timer frequency must be non-zero");
        let ids = IdAllocator::new();
        let mut threads = ThreadTable::new();

        let initial = ids.allocate();
        let mut main = Thread::new(initial, "main", PRI_DEFAULT);
        main.state = ThreadState::Running;
        if config.is_mlfqs() {
            let p = mlfqs::priority_for(main.recent_cpu, main.nice);
            main.base_priority = p;
            main.priority = p;
        }
        port.adopt_context(initial, &mut main.context);

        let idle = ids.allocate();
        let idle_thread = Thread::new(idle, "idle", PRI_MIN);

        if threads.insert(main).is_err() || threads.insert(idle_thread).is_err() {
            panic!("thread table cannot hold the bootstrap threads");
        }
        let (ctx, stack) = threads.context_and_stack(idle);
        port.init_context(idle, ctx, stack, idle_loop, 0);

        info!(
            "scheduler up: {:?} policy, {} ticks per slice",
            config.policy, config.time_slice
        );

        Self {
            port,
            config,
            threads,
            ready: ReadyQueue::new(),
            sleepers: SleepQueue::new(),
            locks: LockTable::new(),
            mlfqs: Mlfqs::new(),
            ids,
            current: initial,
            idle,
            initial,
            ticks: 0,
            slice_ticks: 0,
            in_interrupt: false,
            yield_on_return: false,
            stats: TickStats::default(),
        }
    }

    // -----------------------------------------------------------------------
    // Thread lifecycle
    // -----------------------------------------------------------------------

    /// Create a thread that runs `entry(arg)` and make it ready.
    ///
    /// Under MLFQS the new thread inherits `nice` and `recent_cpu` from its
    /// creator and `priority` is derived from them.
    ///
    /// # Returns
    /// - `Ok(id)`: the thread is ready, and already running if it outranks
    ///   the creator
    /// - `Err(Error::NoFreeThreadSlot)`: the arena is full; nothing changed
    pub fn create(
        &mut self,
        name: &str,
        priority: u8,
        entry: ThreadFn,
        arg: usize,
    ) -> Result<ThreadId, Error> {
        let _irq = IrqGuard::new();
        assert!(
            (PRI_MIN..=PRI_MAX).contains(&priority),
            "thread priority {} out of range",
            priority
        );
        if self.threads.is_full() {
            return Err(Error::NoFreeThreadSlot);
        }

        let id = self.ids.allocate();
        let mut thread = Thread::new(id, name, priority);
        if self.config.is_mlfqs() {
            let creator = self.threads.thread(self.current);
            thread.nice = creator.nice;
            thread.recent_cpu = creator.recent_cpu;
            let p = mlfqs::priority_for(thread.recent_cpu, thread.nice);
            thread.base_priority = p;
            thread.priority = p;
        }
        self.threads.insert(thread)?;

        let (ctx, stack) = self.threads.context_and_stack(id);
        self.port.init_context(id, ctx, stack, entry, arg);
        debug!("created thread {} `{}` at priority {}", id, name, self.threads.priority(id));

        self.unblock_thread(id);
        self.test_preemption();
        Ok(id)
    }

    /// Put the running thread to sleep until some other party calls
    /// [`Scheduler::unblock`] on it.
    pub fn block_current(&mut self) {
        let _irq = IrqGuard::new();
        assert!(!self.in_interrupt, "blocking in interrupt context");
        self.threads.thread_mut(self.current).state = ThreadState::Blocked;
        self.schedule();
    }

    /// Make a blocked thread ready. Never preempts the caller, which may be
    /// an interrupt handler; a pending sleep of `id` is cancelled.
    ///
    /// # Panics
    /// If `id` is not blocked, is waiting on a lock, or is the idle thread.
    pub fn unblock(&mut self, id: ThreadId) {
        let _irq = IrqGuard::new();
        assert!(id != self.idle, "the idle thread is never queued");
        self.unblock_thread(id);
    }

    pub(crate) fn unblock_thread(&mut self, id: ThreadId) {
        let t = self.threads.thread_mut(id);
        assert!(
            t.state == ThreadState::Blocked,
            "unblocking thread {} that is not blocked ({:?})",
            id,
            t.state
        );
        assert!(t.waiting_on.is_none(), "thread {} is waiting on a lock", id);

        if t.wake_time.take().is_some() {
            self.sleepers.remove(id);
        }
        t.state = ThreadState::Ready;
        self.ready.push(id, &self.threads);
    }

    /// Give up the CPU. The running thread stays ready and runs again when
    /// its turn comes.
    pub fn yield_current(&mut self) {
        let _irq = IrqGuard::new();
        assert!(!self.in_interrupt, "yielding in interrupt context");

        let cur = self.current;
        if cur == self.idle {
            self.threads.thread_mut(cur).state = ThreadState::Blocked;
        } else {
            self.threads.thread_mut(cur).state = ThreadState::Ready;
            self.ready.push(cur, &self.threads);
        }
        self.schedule();
    }

    /// Terminate the running thread. Locks it still holds are handed on.
    pub fn exit_current(&mut self) {
        let _irq = IrqGuard::new();
        assert!(!self.in_interrupt, "exiting in interrupt context");
        let cur = self.current;
        assert!(cur != self.idle, "the idle thread cannot exit");

        self.port.thread_exiting(cur);

        for lock in self.locks.held_by(cur) {
            warn!("thread {} exited holding lock {:?}", cur, lock);
            self.release_lock(cur, lock);
        }

        self.threads.thread_mut(cur).state = ThreadState::Dying;
        debug!("thread {} exiting", cur);
        self.schedule();
    }

    /// Sleep until the tick counter reaches `tick`. Returns at once if it
    /// already has.
    pub fn sleep_until(&mut self, tick: u64) {
        let _irq = IrqGuard::new();
        assert!(!self.in_interrupt, "sleeping in interrupt context");
        let cur = self.current;
        assert!(cur != self.idle, "the idle thread cannot sleep");

        if self.ticks >= tick {
            return;
        }

        let t = self.threads.thread_mut(cur);
        t.wake_time = Some(tick);
        t.state = ThreadState::Blocked;
        self.sleepers.push(cur);
        trace!("thread {} sleeps until tick {}", cur, tick);
        self.schedule();
    }

    /// Sleep for `ticks` timer ticks.
    pub fn sleep(&mut self, ticks: u64) {
        let until = self.ticks.saturating_add(ticks);
        self.sleep_until(until);
    }

    // -----------------------------------------------------------------------
    // Priorities
    // -----------------------------------------------------------------------

    /// Set the running thread's base priority. Ignored under MLFQS.
    pub fn set_priority(&mut self, priority: u8) {
        let _irq = IrqGuard::new();
        if self.config.is_mlfqs() {
            warn!("set_priority({}) ignored under MLFQS", priority);
            return;
        }

        let cur = self.current;
        self.threads.thread_mut(cur).base_priority = priority.clamp(PRI_MIN, PRI_MAX);
        donation::refresh_priority(cur, &mut self.threads);
        self.test_preemption();
    }

    /// Effective priority of the running thread.
    pub fn get_priority(&self) -> u8 {
        self.threads.priority(self.current)
    }

    /// Set the running thread's nice value, clamped to
    /// `NICE_MIN..=NICE_MAX`.
    ///
    /// Under MLFQS the thread's priority is recomputed at once and the
    /// thread yields if it no longer has the highest priority.
    pub fn set_nice(&mut self, nice: i32) {
        let _irq = IrqGuard::new();
        let cur = self.current;
        let t = self.threads.thread_mut(cur);
        t.nice = nice.clamp(NICE_MIN, NICE_MAX);
        if self.config.is_mlfqs() {
            let p = mlfqs::priority_for(t.recent_cpu, t.nice);
            t.base_priority = p;
            t.priority = p;
        }
        self.test_preemption();
    }

    /// Nice value of the running thread.
    pub fn get_nice(&self) -> i32 {
        self.threads.thread(self.current).nice
    }

    /// System load average, times 100, rounded.
    pub fn get_load_avg(&self) -> i32 {
        mlfqs::times_100(self.mlfqs.load_avg())
    }

    /// The running thread's `recent_cpu`, times 100, rounded.
    pub fn get_recent_cpu(&self) -> i32 {
        mlfqs::times_100(self.threads.thread(self.current).recent_cpu)
    }

    /// Yield if the ready head outranks the running thread. From interrupt
    /// context the yield is deferred until the handler returns.
    pub fn test_preemption(&mut self) {
        let _irq = IrqGuard::new();
        let head = match self.ready.front() {
            Some(head) => head,
            None => return,
        };
        if self.threads.priority(head) <= self.threads.priority(self.current) {
            return;
        }

        if self.in_interrupt {
            self.yield_on_return = true;
        } else {
            self.yield_current();
        }
    }

    // -----------------------------------------------------------------------
    // Timer
    // -----------------------------------------------------------------------

    /// Timer interrupt handler body.
    pub fn on_timer_tick(&mut self) {
        let _irq = IrqGuard::new();
        assert!(!self.in_interrupt, "nested timer interrupt");
        self.in_interrupt = true;
        self.ticks += 1;

        let cur = self.current;
        if cur == self.idle {
            self.stats.idle_ticks += 1;
        } else if self.threads.thread(cur).page_dir.is_some() {
            self.stats.user_ticks += 1;
        } else {
            self.stats.kernel_ticks += 1;
        }

        if self.config.is_mlfqs()
            && self.mlfqs.on_tick(
                self.ticks,
                cur,
                self.idle,
                &mut self.threads,
                &mut self.ready,
                &self.config,
            )
        {
            self.yield_on_return = true;
        }

        let woken = self.sleepers.take_due(self.ticks, &self.threads);
        for id in woken {
            self.unblock_thread(id);
            trace!("thread {} woke at tick {}", id, self.ticks);
            if self.threads.priority(id) > self.threads.priority(cur) {
                self.yield_on_return = true;
            }
        }

        self.slice_ticks += 1;
        if self.slice_ticks >= self.config.time_slice {
            self.yield_on_return = true;
        }
        if cur == self.idle && !self.ready.is_empty() {
            self.yield_on_return = true;
        }

        self.in_interrupt = false;
        if core::mem::take(&mut self.yield_on_return) {
            self.yield_current();
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    fn next_thread_to_run(&mut self) -> ThreadId {
        self.ready.pop_front().unwrap_or(self.idle)
    }

    /// Switch to the next thread. The running thread must already have left
    /// the `Running` state.
    pub(crate) fn schedule(&mut self) {
        let cur = self.current;
        assert!(
            self.threads.thread(cur).state != ThreadState::Running,
            "schedule() with thread {} still running",
            cur
        );

        let next = self.next_thread_to_run();
        let mut prev = None;
        if cur != next {
            let (prev_ctx, next_ctx) = self.threads.switch_contexts(cur, next);
            self.port.switch_context(prev_ctx, next_ctx);
            self.current = next;
            prev = Some(cur);
        }
        self.schedule_tail(prev);
    }

    /// Switch completion.
    fn schedule_tail(&mut self, prev: Option<ThreadId>) {
        let cur = self.current;
        let t = self.threads.thread_mut(cur);
        t.state = ThreadState::Running;
        let page_dir = t.page_dir;
        self.slice_ticks = 0;
        self.port.activate(cur, page_dir);
        trace!("dispatched thread {}", cur);

        if let Some(prev) = prev {
            let dying = self
                .threads
                .get(prev)
                .is_some_and(|t| t.state == ThreadState::Dying);
            if dying && prev != self.initial {
                self.threads.remove(prev);
                debug!("reclaimed thread {}", prev);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The thread that owns the CPU.
    pub fn current(&self) -> ThreadId {
        self.current
    }

    /// Name of the running thread.
    pub fn current_name(&self) -> &str {
        self.threads.thread(self.current).name()
    }

    /// Look up a thread by id.
    ///
    /// # Returns
    /// - `Some(thread)`: `id` is alive, or dying but not yet reclaimed
    /// - `None`: `id` never existed or its slot was reclaimed
    pub fn thread(&self, id: ThreadId) -> Option<&Thread> {
        self.threads.get(id)
    }

    /// Timer ticks since the scheduler was created.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// The thread that runs when nothing else is ready.
    pub fn idle_thread(&self) -> ThreadId {
        self.idle
    }

    /// The bootstrap thread, `"main"`.
    pub fn initial_thread(&self) -> ThreadId {
        self.initial
    }

    /// Ready threads in dispatch order.
    pub fn ready_threads(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.ready.iter()
    }

    /// Sleeping threads, earliest wake tick first.
    pub fn sleeping_threads(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.sleepers.iter()
    }

    /// Call `f` on every live thread with interrupts masked.
    pub fn for_each_thread<F>(&self, mut f: F)
    where
        F: FnMut(&Thread),
    {
        let _irq = IrqGuard::new();
        for t in self.threads.iter().filter(|t| t.is_live()) {
            f(t);
        }
    }

    /// Tick accounting so far.
    pub fn stats(&self) -> TickStats {
        self.stats
    }

    /// Log the tick accounting at `info` level.
    pub fn print_stats(&self) {
        info!("{}", self.stats);
    }

    /// Attach a user address space to `id`. It is activated whenever `id`
    /// is dispatched.
    pub fn set_page_dir(&mut self, id: ThreadId, page_dir: Option<PageDir>) {
        let _irq = IrqGuard::new();
        self.threads.thread_mut(id).page_dir = page_dir;
    }

    /// Configuration the scheduler was created with.
    pub fn config(&self) -> &SchedConfig {
        &self.config
    }

    /// The port the scheduler switches through.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Mutable access to the port, for port-specific setup.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// `recent_cpu` of `id`, unscaled.
    pub fn recent_cpu_of(&self, id: ThreadId) -> Option<Fixed> {
        self.threads.get(id).map(|t| t.recent_cpu)
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::host::HostPort;
    use crate::config::MAX_THREADS;

    type Sched = Scheduler<HostPort>;

    fn noop(_: usize) {}

    fn sched() -> Sched {
        Scheduler::new(HostPort::new(), SchedConfig::default())
    }

    fn dispatched(s: &Sched) -> std::vec::Vec<ThreadId> {
        s.port().dispatch_log().collect()
    }

    fn state(s: &Sched, id: ThreadId) -> ThreadState {
        s.thread(id).unwrap().state
    }

    #[test]
    fn test_bootstrap_threads() {
        let s = sched();
        let main = s.current();
        assert_eq!(main, s.initial_thread());
        assert_eq!(main.raw(), 1);
        assert_eq!(s.current_name(), "main");
        assert_eq!(s.get_priority(), PRI_DEFAULT);
        assert_eq!(state(&s, s.idle_thread()), ThreadState::Blocked);
        assert_eq!(s.ready_threads().count(), 0);
    }

    #[test]
    fn test_dispatch_by_priority() {
        let mut s = sched();
        let main = s.current();
        let t1 = s.create("p1", 1, noop, 0).unwrap();
        let t3 = s.create("p3", 3, noop, 0).unwrap();
        let t2 = s.create("p2", 2, noop, 0).unwrap();
        assert_eq!(s.current(), main);

        s.set_priority(PRI_MIN);
        assert_eq!(s.current(), t3);
        s.exit_current();
        assert_eq!(s.current(), t2);
        s.exit_current();
        assert_eq!(s.current(), t1);
        s.exit_current();
        assert_eq!(s.current(), main);

        assert_eq!(dispatched(&s), [t3, t2, t1, main]);
    }

    #[test]
    fn test_ready_queue_sorted_for_any_creation_order() {
        let mut s = sched();
        let prios = [5, 9, 1, 9, 5, 20, 1, 7];
        for (i, &p) in prios.iter().enumerate() {
            s.create("t", p, noop, i).unwrap();
        }
        let order: std::vec::Vec<(u8, u32)> = s
            .ready_threads()
            .map(|id| (s.thread(id).unwrap().priority, id.raw()))
            .collect();
        for w in order.windows(2) {
            assert!(w[0].0 > w[1].0 || (w[0].0 == w[1].0 && w[0].1 < w[1].1));
        }
    }

    #[test]
    fn test_higher_priority_create_preempts() {
        let mut s = sched();
        let main = s.current();
        let hi = s.create("hi", PRI_DEFAULT + 1, noop, 0).unwrap();
        assert_eq!(s.current(), hi);
        assert_eq!(state(&s, main), ThreadState::Ready);

        // Equal priority never preempts.
        let peer = s.create("peer", PRI_DEFAULT + 1, noop, 0).unwrap();
        assert_eq!(s.current(), hi);
        assert_eq!(s.ready_threads().next(), Some(peer));
    }

    #[test]
    fn test_preemption_check_is_idempotent() {
        let mut s = sched();
        let main = s.current();
        s.create("low", 10, noop, 0).unwrap();

        let switches = s.port().switches();
        let activations = s.port().activations();
        let before: std::vec::Vec<_> = s.ready_threads().collect();

        s.test_preemption();
        s.test_preemption();

        assert_eq!(s.current(), main);
        assert_eq!(s.port().switches(), switches);
        assert_eq!(s.port().activations(), activations);
        assert_eq!(s.ready_threads().collect::<std::vec::Vec<_>>(), before);
    }

    #[test]
    fn test_sleep_until_wakes_on_time() {
        let mut s = sched();
        let main = s.current();
        let wake = s.ticks() + 10;

        s.sleep_until(wake);
        assert_eq!(s.current(), s.idle_thread());
        assert_eq!(s.sleeping_threads().collect::<std::vec::Vec<_>>(), [main]);

        while s.ticks() < wake - 1 {
            s.on_timer_tick();
            assert_eq!(state(&s, main), ThreadState::Blocked);
            assert_eq!(s.current(), s.idle_thread());
        }

        s.on_timer_tick();
        assert_eq!(s.ticks(), wake);
        assert_eq!(s.current(), main);
        assert_eq!(s.thread(main).unwrap().wake_time, None);
        assert_eq!(s.sleeping_threads().count(), 0);
    }

    #[test]
    fn test_woken_sleeper_preempts_lower_runner() {
        let config = SchedConfig {
            time_slice: 100,
            ..SchedConfig::default()
        };
        let mut s = Scheduler::new(HostPort::new(), config);
        let main = s.current();
        let worker = s.create("worker", 10, noop, 0).unwrap();

        s.sleep(3);
        assert_eq!(s.current(), worker);
        s.port_mut().clear_logs();

        for _ in 0..2 {
            s.on_timer_tick();
            assert_eq!(s.current(), worker);
        }

        s.on_timer_tick();
        assert_eq!(s.ticks(), 3);
        assert_eq!(s.current(), main);
        assert_eq!(s.ready_threads().next(), Some(worker));
        assert_eq!(dispatched(&s), [main]);
    }

    #[test]
    fn test_sleep_in_past_returns_immediately() {
        let mut s = sched();
        s.on_timer_tick();
        let main = s.current();
        s.sleep_until(1);
        s.sleep(0);
        assert_eq!(s.current(), main);
        assert_eq!(s.sleeping_threads().count(), 0);
    }

    #[test]
    fn test_unblock_cancels_sleep() {
        let mut s = sched();
        let main = s.current();
        let worker = s.create("worker", 10, noop, 0).unwrap();

        s.sleep(50);
        assert_eq!(s.current(), worker);
        s.unblock(main);
        assert_eq!(s.current(), worker);
        assert_eq!(s.sleeping_threads().count(), 0);
        assert_eq!(s.ready_threads().next(), Some(main));
        s.test_preemption();
        assert_eq!(s.current(), main);
    }

    #[test]
    fn test_round_robin_among_equals() {
        let mut s = sched();
        let main = s.current();
        let a = s.create("a", PRI_DEFAULT, noop, 0).unwrap();
        let b = s.create("b", PRI_DEFAULT, noop, 0).unwrap();

        for _ in 0..3 * s.config().time_slice {
            s.on_timer_tick();
        }
        assert_eq!(dispatched(&s), [a, b, main]);
    }

    #[test]
    fn test_exit_reclaims_slot() {
        let mut s = sched();
        let main = s.current();
        let worker = s.create("worker", PRI_DEFAULT + 1, noop, 0).unwrap();
        assert_eq!(s.current(), worker);

        s.exit_current();
        assert_eq!(s.current(), main);
        assert!(s.thread(worker).is_none());
        assert_eq!(s.port().exit_log().collect::<std::vec::Vec<_>>(), [worker]);
    }

    #[test]
    fn test_initial_thread_is_never_reclaimed() {
        let mut s = sched();
        let main = s.current();
        let worker = s.create("worker", 1, noop, 0).unwrap();

        s.exit_current();
        assert_eq!(s.current(), worker);
        assert_eq!(state(&s, main), ThreadState::Dying);

        let mut live = 0;
        s.for_each_thread(|_| live += 1);
        assert_eq!(live, 2); // worker and idle
    }

    #[test]
    fn test_create_fails_when_full() {
        let mut s = sched();
        for _ in 0..MAX_THREADS - 2 {
            s.create("filler", 1, noop, 0).unwrap();
        }
        let queued = s.ready_threads().count();
        assert_eq!(s.create("extra", 1, noop, 0), Err(Error::NoFreeThreadSlot));
        assert_eq!(s.ready_threads().count(), queued);
    }

    #[test]
    fn test_idle_runs_when_nothing_ready() {
        let mut s = sched();
        let main = s.current();
        s.block_current();
        assert_eq!(s.current(), s.idle_thread());

        s.on_timer_tick();
        assert_eq!(s.current(), s.idle_thread());

        s.unblock(main);
        assert_eq!(s.current(), s.idle_thread());
        s.on_timer_tick();
        assert_eq!(s.current(), main);
        assert_eq!(state(&s, s.idle_thread()), ThreadState::Blocked);
    }

    #[test]
    fn test_tick_statistics() {
        let mut s = sched();
        let main = s.current();
        for _ in 0..3 {
            s.on_timer_tick();
        }
        s.set_page_dir(main, Some(PageDir(0x1000)));
        for _ in 0..2 {
            s.on_timer_tick();
        }
        assert_eq!(s.port().last_page_dir(), Some(PageDir(0x1000)));

        s.sleep(100);
        s.on_timer_tick();

        let stats = s.stats();
        assert_eq!(
            stats,
            TickStats {
                idle_ticks: 1,
                kernel_ticks: 3,
                user_ticks: 2
            }
        );
        assert_eq!(
            std::format!("{}", stats),
            "Thread: 1 idle ticks, 3 kernel ticks, 2 user ticks"
        );
    }

    #[test]
    fn test_set_priority_lowering_yields() {
        let mut s = sched();
        let main = s.current();
        let w = s.create("w", 20, noop, 0).unwrap();
        s.set_priority(20);
        assert_eq!(s.current(), main);
        s.set_priority(19);
        assert_eq!(s.current(), w);
        s.exit_current();
        s.set_priority(PRI_MAX + 10);
        assert_eq!(s.get_priority(), PRI_MAX);
    }

    #[test]
    fn test_mlfqs_ignores_set_priority() {
        let mut s = Scheduler::new(HostPort::new(), SchedConfig::mlfqs());
        let before = s.get_priority();
        s.set_priority(10);
        assert_eq!(s.get_priority(), before);
        assert_eq!(before, PRI_MAX);
    }

    #[test]
    fn test_mlfqs_nice_and_inheritance() {
        let mut s = Scheduler::new(HostPort::new(), SchedConfig::mlfqs());
        s.set_nice(5);
        assert_eq!(s.get_nice(), 5);
        assert_eq!(s.get_priority(), 53);

        s.set_nice(100);
        assert_eq!(s.get_nice(), NICE_MAX);
        s.set_nice(5);

        let child = s.create("child", PRI_DEFAULT, noop, 0).unwrap();
        let t = s.thread(child).unwrap();
        assert_eq!(t.nice, 5);
        assert_eq!(t.priority, 53);
        assert_eq!(s.current(), s.initial_thread());
    }

    #[test]
    fn test_mlfqs_recompute_preempts_runner() {
        let mut s = Scheduler::new(HostPort::new(), SchedConfig::mlfqs());
        let main = s.current();
        let child = s.create("child", PRI_DEFAULT, noop, 0).unwrap();
        assert_eq!(s.thread(child).unwrap().priority, PRI_MAX);
        assert_eq!(s.current(), main);

        for _ in 0..s.config().time_slice {
            s.on_timer_tick();
        }

        // main used four ticks of CPU, child none.
        assert_eq!(s.thread(main).unwrap().priority, PRI_MAX - 1);
        assert_eq!(s.thread(child).unwrap().priority, PRI_MAX);
        assert_eq!(s.current(), child);
        assert_eq!(s.ready_threads().next(), Some(main));
    }

    #[test]
    fn test_mlfqs_load_and_recent_cpu_report() {
        let mut s = Scheduler::new(HostPort::new(), SchedConfig::mlfqs());
        assert_eq!(s.get_load_avg(), 0);
        for _ in 0..s.config().timer_freq {
            s.on_timer_tick();
        }
        // One running thread for one second.
        assert_eq!(s.get_load_avg(), 2);
        assert!(s.get_recent_cpu() > 0);
        assert_eq!(s.recent_cpu_of(s.idle_thread()), Some(Fixed::ZERO));
    }

    #[test]
    #[should_panic(expected = "not blocked")]
    fn test_unblock_running_thread_panics() {
        let mut s = sched();
        let main = s.current();
        s.unblock(main);
    }

    #[test]
    #[should_panic(expected = "interrupt context")]
    fn test_sleep_in_interrupt_context_panics() {
        let mut s = sched();
        s.in_interrupt = true;
        s.sleep(5);
    }

    #[test]
    #[should_panic(expected = "time slice")]
    fn test_zero_time_slice_rejected() {
        let config = SchedConfig {
            time_slice: 0,
            ..SchedConfig::default()
        };
        let _ = Scheduler::new(HostPort::new(), config);
    }

    #[test]
    #[should_panic(expected = "timer frequency")]
    fn test_zero_timer_freq_rejected() {
        let config = SchedConfig {
            timer_freq: 0,
            ..SchedConfig::default()
        };
        let _ = Scheduler::new(HostPort::new(), config);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_create_rejects_bad_priority() {
        let mut s = sched();
        let _ = s.create("bad", PRI_MAX + 1, noop, 0);
    }
}
