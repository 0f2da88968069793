//! # Demo Firmware
//!
//! Boots the scheduler on an STM32F407 and runs a priority-inversion
//! scenario that only finishes promptly because of priority donation:
//!
//! | Thread   | Priority | Behavior                                          |
//! |----------|----------|---------------------------------------------------|
//! | `low`    | 10       | Takes the shared lock, works, releases it         |
//! | `medium` | 20       | CPU hog, sleeps now and then                      |
//! | `high`   | 30       | Sleeps, then needs the shared lock                |
//!
//! Without donation `medium` would starve `low` while `high` waits for the
//! lock. With donation `low` runs at 30 until it releases the lock.
//!
//! Pass `-mlfqs` in `CMDLINE` to run the same threads under the feedback
//! queue instead.

#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::{entry, exception};
use panic_halt as _;

use kthread_sched::config::SchedConfig;
use kthread_sched::donation::LockId;
use kthread_sched::kernel;

/// Scheduler options, in kernel command-line syntax.
const CMDLINE: &str = "";

static SHARED_LOCK: AtomicU32 = AtomicU32::new(u32::MAX);
static HIGH_ROUNDS: AtomicU32 = AtomicU32::new(0);

// ---------------------------------------------------------------------------
// Thread entry points
// ---------------------------------------------------------------------------

fn shared_lock() -> LockId {
    // Written once by `main` before any thread runs.
    LockId::from_raw(SHARED_LOCK.load(Ordering::Acquire))
}

fn spin(iterations: u32) {
    let mut x: u32 = 0;
    for _ in 0..iterations {
        x = x.wrapping_add(1);
        core::hint::black_box(x);
    }
}

fn low(_: usize) {
    loop {
        kernel::lock_acquire(shared_lock());
        spin(50_000);
        kernel::lock_release(shared_lock());
        kernel::yield_now();
    }
}

fn medium(_: usize) {
    loop {
        spin(200_000);
        kernel::sleep(5);
    }
}

fn high(_: usize) {
    loop {
        kernel::sleep(20);
        kernel::lock_acquire(shared_lock());
        HIGH_ROUNDS.fetch_add(1, Ordering::Relaxed);
        kernel::lock_release(shared_lock());
    }
}

// ---------------------------------------------------------------------------
// Interrupt handlers
// ---------------------------------------------------------------------------

#[exception]
fn SysTick() {
    kernel::timer_interrupt();
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

#[entry]
fn main() -> ! {
    let config = match SchedConfig::from_cmdline(CMDLINE) {
        Ok(config) => config,
        Err(_) => SchedConfig::default(),
    };
    let cp = match cortex_m::Peripherals::take() {
        Some(cp) => cp,
        None => panic!("core peripherals already taken"),
    };

    kernel::init(config);

    let lock = match kernel::lock_create() {
        Ok(lock) => lock,
        Err(e) => panic!("{}", e),
    };
    SHARED_LOCK.store(lock.into_raw(), Ordering::Release);

    for (name, priority, body) in [
        ("low", 10, low as fn(usize)),
        ("medium", 20, medium),
        ("high", 30, high),
    ] {
        if let Err(e) = kernel::spawn(name, priority, body, 0) {
            panic!("spawning {}: {}", name, e);
        }
    }

    kernel::start(cp)
}
