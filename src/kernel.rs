//! # Kernel
//!
//! Global scheduler instance and the free-function API used by threads and
//! interrupt handlers on the target.
//!
//! The scheduler lives in a `critical_section::Mutex`, so every call below
//! runs with interrupts masked. A call that switches threads only pends
//! PendSV; the switch happens the moment the critical section ends.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()                     bootstrap thread, on MSP
//!         ├─► kernel::init()       ← scheduler up, "main" at PRI_MAX
//!         ├─► kernel::spawn()      ← register threads (×N)
//!         └─► kernel::start()      ← no return
//!               ├─► PendSV/SysTick priorities, SysTick at TIMER_FREQ
//!               └─► bootstrap thread exits, PendSV dispatches the
//!                   highest-priority thread on PSP
//! ```
//!
//! The bootstrap thread must not block before `start`.

use core::cell::RefCell;

use critical_section::Mutex;
use log::info;

use crate::arch::cortex_m4::{self, CortexM4};
use crate::config::{SchedConfig, PRI_MAX};
use crate::donation::LockId;
use crate::error::Error;
use crate::scheduler::Scheduler;
use crate::sync::Acquire;
use crate::thread::{ThreadFn, ThreadId};

// ---------------------------------------------------------------------------
// Global scheduler instance
// ---------------------------------------------------------------------------

static SCHEDULER: Mutex<RefCell<Option<Scheduler<CortexM4>>>> = Mutex::new(RefCell::new(None));

/// Run `f` on the global scheduler with interrupts masked.
///
/// # Panics
/// If [`init`] has not been called.
pub fn with<R>(f: impl FnOnce(&mut Scheduler<CortexM4>) -> R) -> R {
    critical_section::with(|cs| {
        let mut slot = SCHEDULER.borrow_ref_mut(cs);
        match slot.as_mut() {
            Some(scheduler) => f(scheduler),
            None => panic!("kernel not initialized"),
        }
    })
}

// ---------------------------------------------------------------------------
// Kernel API
// ---------------------------------------------------------------------------

/// Turn the running code into the bootstrap thread.
pub fn init(config: SchedConfig) {
    let scheduler = Scheduler::new(CortexM4::new(), config);
    critical_section::with(|cs| {
        SCHEDULER.borrow_ref_mut(cs).replace(scheduler);
    });
    // Nothing spawned before `start` may take the CPU from the bootstrap
    // thread, which cannot be switched away from on MSP.
    with(|s| s.set_priority(PRI_MAX));
}

/// Start preemptive scheduling. **Does not return.**
///
/// SysTick is armed and the bootstrap thread exits inside one critical
/// section, so no tick can see the bootstrap thread still running.
pub fn start(mut core_peripherals: cortex_m::Peripherals) -> ! {
    with(|s| {
        let timer_freq = s.config().timer_freq;
        cortex_m4::set_interrupt_priorities(&mut core_peripherals.SCB);
        cortex_m4::configure_systick(&mut core_peripherals.SYST, timer_freq);
        info!("kernel starting, {} Hz tick", timer_freq);
        s.exit_current();
    });
    park()
}

/// Create a thread and make it ready.
///
/// # Parameters
/// - `name`: Thread name, truncated to `THREAD_NAME_LEN` bytes.
/// - `priority`: Base priority in `PRI_MIN..=PRI_MAX`. Ignored under MLFQS.
/// - `entry`: Thread body. Returning from it exits the thread.
/// - `arg`: Passed to `entry`.
///
/// # Returns
/// - `Ok(id)`: The new thread's id.
/// - `Err(Error::NoFreeThreadSlot)`: All `MAX_THREADS` slots are in use.
pub fn spawn(name: &str, priority: u8, entry: ThreadFn, arg: usize) -> Result<ThreadId, Error> {
    with(|s| s.create(name, priority, entry, arg))
}

/// Give up the CPU to the next ready thread of equal or higher priority.
pub fn yield_now() {
    with(|s| s.yield_current());
}

/// Terminate the calling thread.
pub fn exit() -> ! {
    with(|s| s.exit_current());
    park()
}

// PendSV fires as the critical section ends and never comes back.
fn park() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

/// Block the calling thread for `ticks` timer ticks.
pub fn sleep(ticks: u64) {
    with(|s| s.sleep(ticks));
}

/// Block the calling thread until the tick counter reaches `tick`.
pub fn sleep_until(tick: u64) {
    with(|s| s.sleep_until(tick));
}

/// Make a blocked thread ready. Safe to call from interrupt handlers.
pub fn unblock(thread: ThreadId) {
    with(|s| s.unblock(thread));
}

/// Set the calling thread's base priority. Ignored under MLFQS.
pub fn set_priority(priority: u8) {
    with(|s| s.set_priority(priority));
}

/// Effective priority of the calling thread, donations included.
pub fn priority() -> u8 {
    with(|s| s.get_priority())
}

/// Set the calling thread's nice value.
pub fn set_nice(nice: i32) {
    with(|s| s.set_nice(nice));
}

/// Nice value of the calling thread.
pub fn nice() -> i32 {
    with(|s| s.get_nice())
}

/// System load average times 100.
pub fn load_avg() -> i32 {
    with(|s| s.get_load_avg())
}

/// The calling thread's `recent_cpu` times 100.
pub fn recent_cpu() -> i32 {
    with(|s| s.get_recent_cpu())
}

/// Create a lock.
///
/// # Returns
/// - `Ok(lock)`: The new lock's handle.
/// - `Err(Error::NoFreeLockSlot)`: All `MAX_LOCKS` locks are in use.
pub fn lock_create() -> Result<LockId, Error> {
    with(|s| s.lock_create())
}

/// Take `lock`. Returns once the caller owns it.
pub fn lock_acquire(lock: LockId) {
    if with(|s| s.lock_acquire(lock)) == Acquire::Blocked {
        // Ownership was handed over before this thread was dispatched again.
        debug_assert!(with(|s| s.lock_held_by_current(lock)));
    }
}

/// Release `lock` and hand it to its highest-priority waiter.
pub fn lock_release(lock: LockId) {
    with(|s| s.lock_release(lock));
}

/// Timer ticks since `init`.
pub fn ticks() -> u64 {
    with(|s| s.ticks())
}

/// Body of the SysTick handler.
pub fn timer_interrupt() {
    with(|s| s.on_timer_tick());
}
