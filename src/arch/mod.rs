//! # Architecture Abstraction Layer
//!
//! The scheduler never touches registers itself. Anything that needs the
//! CPU goes through the [`Port`] trait, and the saved register layout is
//! the target's [`Context`].
//!
//! Two ports exist:
//!
//! - `cortex_m4`: the real port for ARM Cortex-M4 (`thumbv7em-none-*`).
//!   Switches are deferred to PendSV.
//! - `host`: a simulation used on development machines and by the unit
//!   tests. Switches complete immediately and are recorded.

use crate::thread::{PageDir, Stack, ThreadFn, ThreadId};

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use cortex_m4::{idle_loop, Context};

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub mod host;
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub use host::{idle_loop, Context};

/// The collaborators the scheduler consumes.
///
/// ## Switch contract
///
/// [`Port::switch_context`] is the only suspension point in the system.
/// When it is asked to switch, the running register state is completely
/// saved into `prev` before any other thread observes the CPU, and `next`
/// is completely restored before control reaches the resumed thread. A
/// thread is therefore either fully running or fully suspended.
///
/// All methods are called with interrupts masked.
pub trait Port {
    /// Turn the code that is already executing into `thread`.
    fn adopt_context(&mut self, thread: ThreadId, ctx: &mut Context);

    /// Prepare `ctx` so that the first switch into it runs `entry(arg)` on
    /// `stack`, and exits the thread if `entry` returns.
    fn init_context(
        &mut self,
        thread: ThreadId,
        ctx: &mut Context,
        stack: &mut Stack,
        entry: ThreadFn,
        arg: usize,
    );

    /// Save the running register state into `prev` and resume `next`.
    /// `prev` is `None` when the outgoing thread is dying and will never be
    /// resumed.
    fn switch_context(&mut self, prev: Option<&mut Context>, next: &Context);

    /// Called after every switch completion with the page directory of the
    /// thread that now runs. `None` means the kernel-only address space.
    fn activate(&mut self, thread: ThreadId, page_dir: Option<PageDir>);

    /// Called on the exiting thread before it is finally descheduled.
    fn thread_exiting(&mut self, _thread: ThreadId) {}
}
