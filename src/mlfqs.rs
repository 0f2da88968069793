//! # MLFQS Controller
//!
//! 4.4BSD-style feedback scheduling. Instead of being assigned, a thread's
//! priority is derived from how much CPU it used recently and how nice it
//! is, and the system load decides how quickly past usage is forgotten.
//!
//! ```text
//!  every tick          running thread:   recent_cpu += 1
//!  every second        load_avg   = (59/60)·load_avg + (1/60)·ready_threads
//!                      recent_cpu = (2·load_avg)/(2·load_avg + 1)·recent_cpu + nice
//!  every time slice    priority   = PRI_MAX − recent_cpu/4 − 2·nice   (clamped)
//! ```
//!
//! All quantities use [`Fixed`] arithmetic. Priorities for every thread are
//! computed before the ready queue is re-sorted, so no decision in the pass
//! is based on a half-updated ordering.

use crate::config::{SchedConfig, PRI_MAX, PRI_MIN};
use crate::fixed_point::Fixed;
use crate::queue::ReadyQueue;
use crate::thread::{ThreadId, ThreadTable};

/// Priority derived from `recent_cpu` and `nice`, clamped to the legal range.
pub fn priority_for(recent_cpu: Fixed, nice: i32) -> u8 {
    let p = (Fixed::from_int(PRI_MAX as i32) - recent_cpu / 4 - nice * 2).to_int_trunc();
    p.clamp(PRI_MIN as i32, PRI_MAX as i32) as u8
}

/// Report a fixed-point value the way the user-facing getters do.
#[inline]
pub fn times_100(value: Fixed) -> i32 {
    (value * 100).to_int_round()
}

/// System-wide controller state.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mlfqs {
    load_avg: Fixed,
}

impl Mlfqs {
    pub const fn new() -> Self {
        Self {
            load_avg: Fixed::ZERO,
        }
    }

    pub fn load_avg(&self) -> Fixed {
        self.load_avg
    }

    /// Fold one second of observations into `load_avg`.
    pub fn update_load_avg(&mut self, ready_threads: usize) {
        self.load_avg =
            Fixed::ratio(59, 60) * self.load_avg + Fixed::ratio(1, 60) * ready_threads as i32;
    }

    /// One second of decay for a thread's `recent_cpu`.
    pub fn decay(&self, recent_cpu: Fixed, nice: i32) -> Fixed {
        let twice = self.load_avg * 2;
        (twice / (twice + 1)) * recent_cpu + nice
    }

    /// Per-tick bookkeeping, called from the timer interrupt after the tick
    /// counter advanced to `now`.
    ///
    /// Returns `true` when recalculated priorities put a ready thread above
    /// the running one.
    pub fn on_tick(
        &mut self,
        now: u64,
        current: ThreadId,
        idle: ThreadId,
        threads: &mut ThreadTable,
        ready: &mut ReadyQueue,
        config: &SchedConfig,
    ) -> bool {
        if current != idle {
            threads.thread_mut(current).recent_cpu += 1;
        }

        if now % config.timer_freq as u64 == 0 {
            let running = usize::from(current != idle);
            self.update_load_avg(ready.len() + running);

            let controller = *self;
            for t in threads.iter_mut().filter(|t| t.is_live() && t.id != idle) {
                t.recent_cpu = controller.decay(t.recent_cpu, t.nice);
            }
        }

        if now % config.time_slice as u64 == 0 {
            for t in threads.iter_mut().filter(|t| t.is_live() && t.id != idle) {
                let p = priority_for(t.recent_cpu, t.nice);
                t.base_priority = p;
                t.priority = p;
            }
            ready.resort(threads);

            return ready
                .front()
                .is_some_and(|head| threads.priority(head) > threads.priority(current));
        }

        false
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
