//! # kthread-sched
//!
//! The single-CPU thread scheduler of a teaching kernel: thread lifecycle,
//! priority scheduling with priority donation through locks, and a 4.4BSD
//! style multi-level feedback queue (MLFQS) driven by fixed-point
//! arithmetic.
//!
//! ## Overview
//!
//! All scheduler state lives in one owned [`Scheduler`] value. Register
//! state, address spaces and process teardown belong to collaborators
//! behind the [`arch::Port`] trait, so the same scheduler runs:
//!
//! - **on a Cortex-M4**, switching threads through PendSV and ticking from
//!   SysTick (`kernel` module, `firmware` demo binary)
//! - **on the host**, where a simulated port records every switch and the
//!   unit tests drive the scheduler tick by tick
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Kernel threads                       │
//! ├────────────────────────────────────────────────────────┤
//! │          Kernel API (kernel.rs, Cortex-M only)          │
//! │     init() · spawn() · start() · yield_now() · sleep()  │
//! ├──────────────────────────┬─────────────────────────────┤
//! │  Scheduler               │  Locks (sync.rs)            │
//! │  scheduler.rs            │  ─ IrqGuard                 │
//! │  ─ create / exit         │  ─ lock_acquire / release   │
//! │  ─ block / unblock       ├─────────────────────────────┤
//! │  ─ on_timer_tick()       │  Donation (donation.rs)     │
//! │  ─ schedule()            │  MLFQS (mlfqs.rs)           │
//! ├──────────────────────────┴─────────────────────────────┤
//! │    Queues (queue.rs) · TCB arena (thread.rs)            │
//! │    Fixed point (fixed_point.rs) · Config (config.rs)    │
//! ├────────────────────────────────────────────────────────┤
//! │   Arch Port (arch/): cortex_m4.rs · host.rs             │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scheduling Policies
//!
//! | Policy      | Priority source                   | Locks donate |
//! |-------------|-----------------------------------|--------------|
//! | `Priority`  | `create` / `set_priority`         | yes          |
//! | `Mlfqs`     | `recent_cpu`, `nice`, `load_avg`  | no           |
//!
//! In both, the highest-priority ready thread runs, equal priorities take
//! turns every time slice, and a thread that becomes strictly higher than
//! the running one takes the CPU at once.
//!
//! ## Memory Model
//!
//! - **No heap**: all containers are fixed-capacity `heapless` types
//! - **Thread arena**: `MAX_THREADS` TCB slots plus `MAX_THREADS` stacks
//! - **Handles, not references**: threads and locks refer to each other by
//!   `ThreadId` / `LockId`
//! - **Critical sections**: the `critical-section` crate, implemented by
//!   `cortex-m` on the target and by `std` in tests

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod config;
pub mod donation;
pub mod error;
pub mod fixed_point;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod kernel;
pub mod mlfqs;
pub mod queue;
pub mod scheduler;
pub mod sync;
pub mod thread;

pub use config::{Policy, SchedConfig};
pub use donation::LockId;
pub use error::Error;
pub use scheduler::{Scheduler, TickStats};
pub use sync::{Acquire, IrqGuard};
pub use thread::{PageDir, ThreadFn, ThreadId, ThreadState};
